//! Co-registered thickness / surface grids for one glacier.
//!
//! The thickness and surface arrays share one shape and one coverage mask.
//! Every yearly transformation takes the field by value and hands back the
//! next state, so the evolution loop is the only owner at any time.

use ndarray::Array2;

use crate::error::GlacierError;

/// Georeferencing of a raster, returned by the reader and handed to the writer.
///
/// `y_origin` is the top edge and `pixel_height` is negative for north-up grids,
/// so pixel indices are `floor((x - x_origin) / pixel_width)` and
/// `floor((y - y_origin) / pixel_height)` on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterMeta {
    pub x_origin: f64,
    pub y_origin: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub no_data: f64,
}

impl RasterMeta {
    /// Pixel `(row, col)` containing a map coordinate, or `None` outside a `rows × cols` grid.
    pub fn pixel_of(&self, x: f64, y: f64, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let col = ((x - self.x_origin) / self.pixel_width).floor();
        let row = ((y - self.y_origin) / self.pixel_height).floor();
        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        (row < rows && col < cols).then_some((row, col))
    }
}

/// Ice thickness [m] and surface elevation [m] with an explicit ice-covered mask.
#[derive(Debug, Clone)]
pub struct ElevationField {
    pub rows: usize,
    pub cols: usize,
    pub thickness: Array2<f64>,
    pub surface: Array2<f64>,
    /// `true` where the cell is ice-covered (thickness > 0).
    pub covered: Array2<bool>,
    pub meta: RasterMeta,
}

impl ElevationField {
    /// Build a field from already-cleaned grids. Cells with non-positive or
    /// non-finite thickness start uncovered.
    pub fn new(
        thickness: Array2<f64>,
        surface: Array2<f64>,
        meta: RasterMeta,
    ) -> Result<Self, GlacierError> {
        if thickness.dim() != surface.dim() {
            return Err(GlacierError::Misaligned {
                thickness: thickness.dim(),
                dem: surface.dim(),
            });
        }
        let (rows, cols) = thickness.dim();
        let covered = thickness.mapv(|t| t.is_finite() && t > 0.0);
        let thickness = thickness.mapv(|t| if t.is_finite() && t > 0.0 { t } else { 0.0 });
        Ok(Self {
            rows,
            cols,
            thickness,
            surface,
            covered,
            meta,
        })
    }

    #[inline]
    pub fn covered_cells(&self) -> usize {
        self.covered.iter().filter(|&&c| c).count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.covered.iter().any(|&c| c)
    }

    /// Glacier area [km²] = covered cells × pixel area.
    pub fn area_km2(&self, pixel_area_km2: f64) -> f64 {
        self.covered_cells() as f64 * pixel_area_km2
    }

    /// Σ thickness × pixel area over covered cells, in m·km².
    pub fn volume(&self, pixel_area_km2: f64) -> f64 {
        let total: f64 = self
            .thickness
            .iter()
            .zip(self.covered.iter())
            .filter_map(|(&t, &c)| c.then_some(t))
            .sum();
        total * pixel_area_km2
    }

    /// Mean surface elevation of covered cells, `None` when nothing is covered.
    pub fn mean_surface(&self) -> Option<f64> {
        let (sum, n) = self.covered_surface().fold((0.0, 0usize), |(s, n), z| (s + z, n + 1));
        (n > 0).then(|| sum / n as f64)
    }

    pub fn max_surface(&self) -> Option<f64> {
        self.covered_surface().reduce(f64::max)
    }

    pub fn min_surface(&self) -> Option<f64> {
        self.covered_surface().reduce(f64::min)
    }

    fn covered_surface(&self) -> impl Iterator<Item = f64> + '_ {
        self.surface
            .iter()
            .zip(self.covered.iter())
            .filter_map(|(&z, &c)| c.then_some(z))
    }

    /// Replace the thickness grid. Previously covered cells move their surface
    /// by the thickness change; cells reaching zero leave the mask for good.
    pub fn with_thickness(mut self, new_thickness: Array2<f64>) -> Self {
        for ((r, c), new_t) in new_thickness.indexed_iter() {
            if !self.covered[[r, c]] {
                continue;
            }
            let new_t = new_t.max(0.0);
            self.surface[[r, c]] += new_t - self.thickness[[r, c]];
            self.thickness[[r, c]] = new_t;
            if new_t <= 0.0 {
                self.covered[[r, c]] = false;
            }
        }
        self
    }

    /// Thickness grid with uncovered cells set to the raster no-data value.
    pub fn thickness_for_output(&self) -> Array2<f64> {
        self.masked(&self.thickness)
    }

    /// Surface grid with uncovered cells set to the raster no-data value.
    pub fn surface_for_output(&self) -> Array2<f64> {
        self.masked(&self.surface)
    }

    fn masked(&self, values: &Array2<f64>) -> Array2<f64> {
        let mut out = values.clone();
        out.zip_mut_with(&self.covered, |v, &c| {
            if !c {
                *v = self.meta.no_data;
            }
        });
        out
    }
}

/// Cells sharing one surface elevation.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationBand {
    pub elevation: f64,
    /// 0 at the highest band, 1 at the terminus.
    pub normalized: f64,
    pub cells: Vec<(usize, usize)>,
}

impl ElevationBand {
    pub fn area_km2(&self, pixel_area_km2: f64) -> f64 {
        self.cells.len() as f64 * pixel_area_km2
    }
}

/// Distinct positive covered surface elevations, ascending, with their cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElevationBandSet {
    pub bands: Vec<ElevationBand>,
}

impl ElevationBandSet {
    /// Group the covered cells by exact surface elevation. Must be rebuilt
    /// whenever the mask or the surface changes.
    pub fn from_field(field: &ElevationField) -> Self {
        let mut cells: Vec<(f64, (usize, usize))> = field
            .surface
            .indexed_iter()
            .filter(|&((r, c), &z)| field.covered[[r, c]] && z > 0.0)
            .map(|(idx, &z)| (z, idx))
            .collect();
        cells.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut bands: Vec<ElevationBand> = Vec::new();
        for (z, idx) in cells {
            match bands.last_mut() {
                Some(band) if band.elevation == z => band.cells.push(idx),
                _ => bands.push(ElevationBand {
                    elevation: z,
                    normalized: 0.0,
                    cells: vec![idx],
                }),
            }
        }

        if let (Some(min), Some(max)) = (
            bands.first().map(|b| b.elevation),
            bands.last().map(|b| b.elevation),
        ) {
            let range = max - min;
            for band in &mut bands {
                band.normalized = if range > 0.0 { (max - band.elevation) / range } else { 0.0 };
            }
        }
        Self { bands }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn lowest(&self) -> Option<f64> {
        self.bands.first().map(|b| b.elevation)
    }

    pub fn highest(&self) -> Option<f64> {
        self.bands.last().map(|b| b.elevation)
    }

    pub fn normalized(&self) -> Vec<f64> {
        self.bands.iter().map(|b| b.normalized).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn meta() -> RasterMeta {
        RasterMeta {
            x_origin: 1000.0,
            y_origin: 2000.0,
            pixel_width: 25.0,
            pixel_height: -25.0,
            no_data: -9999.0,
        }
    }

    #[test]
    fn test_mask_follows_thickness() {
        let field = ElevationField::new(
            array![[10.0, 0.0], [-3.0, f64::NAN]],
            array![[3000.0, 3000.0], [3000.0, 3000.0]],
            meta(),
        )
        .unwrap();
        assert_eq!(field.covered_cells(), 1);
        assert_eq!(field.thickness[[1, 0]], 0.0);
        assert_relative_eq!(field.area_km2(0.000625), 0.000625);
    }

    #[test]
    fn test_misaligned_shapes_rejected() {
        let err = ElevationField::new(Array2::zeros((2, 3)), Array2::zeros((3, 2)), meta()).unwrap_err();
        assert!(matches!(err, GlacierError::Misaligned { .. }));
    }

    #[test]
    fn test_surface_tracks_thickness_change() {
        let field = ElevationField::new(
            array![[10.0, 5.0, 0.0]],
            array![[3010.0, 3005.0, 2990.0]],
            meta(),
        )
        .unwrap();
        let field = field.with_thickness(array![[8.0, -1.0, 4.0]]);
        assert_relative_eq!(field.surface[[0, 0]], 3008.0);
        assert_relative_eq!(field.surface[[0, 1]], 3000.0);
        // Uncovered cells never regrow.
        assert_eq!(field.thickness[[0, 2]], 0.0);
        assert_relative_eq!(field.surface[[0, 2]], 2990.0);
        assert_eq!(field.covered, array![[true, false, false]]);
    }

    #[test]
    fn test_bands_sorted_and_normalized_top_down() {
        let field = ElevationField::new(
            array![[1.0, 1.0, 1.0], [1.0, 0.0, 1.0]],
            array![[3100.0, 3000.0, 3200.0], [3000.0, 3300.0, 3200.0]],
            meta(),
        )
        .unwrap();
        let bands = ElevationBandSet::from_field(&field);
        let elevations: Vec<f64> = bands.bands.iter().map(|b| b.elevation).collect();
        assert_eq!(elevations, vec![3000.0, 3100.0, 3200.0]);
        assert_eq!(bands.normalized(), vec![1.0, 0.5, 0.0]);
        assert_eq!(bands.bands[0].cells.len(), 2);
    }

    #[test]
    fn test_single_band_normalizes_to_zero() {
        let field = ElevationField::new(array![[10.0, 10.0]], array![[3000.0, 3000.0]], meta()).unwrap();
        let bands = ElevationBandSet::from_field(&field);
        assert_eq!(bands.len(), 1);
        assert_eq!(bands.bands[0].normalized, 0.0);
    }

    #[test]
    fn test_pixel_lookup() {
        let m = meta();
        assert_eq!(m.pixel_of(1010.0, 1990.0, 4, 4), Some((0, 0)));
        assert_eq!(m.pixel_of(1060.0, 1940.0, 4, 4), Some((2, 2)));
        assert_eq!(m.pixel_of(990.0, 1990.0, 4, 4), None);
        assert_eq!(m.pixel_of(1010.0, 1800.0, 4, 4), None);
    }

    #[test]
    fn test_output_masks_with_no_data() {
        let field = ElevationField::new(array![[2.0, 0.0]], array![[3000.0, 2900.0]], meta()).unwrap();
        assert_eq!(field.thickness_for_output(), array![[2.0, -9999.0]]);
        assert_eq!(field.surface_for_output(), array![[3000.0, -9999.0]]);
    }
}
