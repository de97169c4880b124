//! Delta-h redistribution of the glacier-wide mass balance across elevation bands.
//!
//! A normalized curve (0 = top, 1 = terminus) gives the relative thickness
//! change of each band. The scale factor `fs` converts one year's mass balance
//! into metres of ice such that the band-weighted volume change equals the
//! glacier-wide balance:
//!
//! ```text
//! fs = B · (A · 1000) / (ρ_ice · Σ_b area_b · w_b)
//! ```

use ndarray::Array2;

use crate::config::PhysicsSettings;
use crate::grid::{ElevationBandSet, ElevationField};

/// Points in the uniform fallback curve.
pub const UNIFORM_CURVE_POINTS: usize = 50;

/// Paired series of normalized elevation and redistribution weight.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaHCurve {
    pub normalized_elevation: Vec<f64>,
    pub weight: Vec<f64>,
}

impl DeltaHCurve {
    pub fn new(normalized_elevation: Vec<f64>, weight: Vec<f64>) -> Option<Self> {
        (normalized_elevation.len() == weight.len() && !weight.is_empty()).then_some(Self {
            normalized_elevation,
            weight,
        })
    }

    /// Weight 1 at every normalized elevation.
    pub fn uniform() -> Self {
        let n = UNIFORM_CURVE_POINTS;
        Self {
            normalized_elevation: (0..n).map(|i| i as f64 / (n - 1) as f64).collect(),
            weight: vec![1.0; n],
        }
    }

    /// All weights zero: redistribution would be undefined.
    pub fn is_flat(&self) -> bool {
        self.weight.iter().all(|&w| w == 0.0)
    }

    /// Weight at the curve entry nearest to `normalized`.
    pub fn weight_at(&self, normalized: f64) -> f64 {
        nearest_index(&self.normalized_elevation, normalized)
            .map(|i| self.weight[i])
            .unwrap_or(1.0)
    }
}

/// Index of the entry closest to `query` by absolute difference; ties keep
/// the first occurrence.
pub fn nearest_index(values: &[f64], query: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        let diff = (v - query).abs();
        match best {
            Some((_, d)) if !(diff < d) => {}
            _ => best = Some((i, diff)),
        }
    }
    best.map(|(i, _)| i)
}

/// The glacier's curve plus an optional replacement taking over at a given year.
#[derive(Debug, Clone)]
pub struct CurveSchedule {
    initial: DeltaHCurve,
    replacement: Option<(i32, DeltaHCurve)>,
}

impl CurveSchedule {
    pub fn fixed(curve: DeltaHCurve) -> Self {
        Self {
            initial: curve,
            replacement: None,
        }
    }

    pub fn with_replacement(curve: DeltaHCurve, from_year: i32, replacement: DeltaHCurve) -> Self {
        Self {
            initial: curve,
            replacement: Some((from_year, replacement)),
        }
    }

    pub fn curve_for(&self, year: i32) -> &DeltaHCurve {
        match &self.replacement {
            Some((from, curve)) if year >= *from => curve,
            _ => &self.initial,
        }
    }
}

/// Scale factor for one year. The band weights come from the glacier curve,
/// or from the uniform curve when that one was degenerate or overridden.
#[derive(Debug, Clone)]
pub struct ScaleFactor {
    /// Thickness change [m ice] per unit of curve weight.
    pub value: f64,
    /// Weight of each band, aligned with the band set passed in.
    pub band_weights: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct DeltaHEngine {
    pub ice_density: f64,
    pub pixel_area_km2: f64,
    pub small_glacier_area_km2: f64,
}

impl From<&PhysicsSettings> for DeltaHEngine {
    fn from(physics: &PhysicsSettings) -> Self {
        Self {
            ice_density: physics.ice_density,
            pixel_area_km2: physics.pixel_area_km2,
            small_glacier_area_km2: physics.small_glacier_area_km2,
        }
    }
}

impl DeltaHEngine {
    /// Derive this year's scale factor from the glacier-wide balance [m w.e.].
    pub fn compute_scale_factor(
        &self,
        annual_mb: f64,
        bands: &ElevationBandSet,
        curve: &DeltaHCurve,
        glacier_area_km2: f64,
    ) -> ScaleFactor {
        let mut effective = if glacier_area_km2 < self.small_glacier_area_km2 || curve.is_flat() {
            tracing::debug!(glacier_area_km2, "using uniform delta-h curve");
            DeltaHCurve::uniform()
        } else {
            curve.clone()
        };

        let (mut band_weights, mut proxy) = self.weighted_area(bands, &effective);
        if proxy == 0.0 && !effective.weight.iter().all(|&w| w == 1.0) {
            tracing::debug!("zero redistribution volume, falling back to uniform curve");
            effective = DeltaHCurve::uniform();
            (band_weights, proxy) = self.weighted_area(bands, &effective);
        }

        let value = if proxy != 0.0 {
            annual_mb * (glacier_area_km2 * 1000.0) / (self.ice_density * proxy)
        } else {
            0.0
        };
        ScaleFactor { value, band_weights }
    }

    fn weighted_area(&self, bands: &ElevationBandSet, curve: &DeltaHCurve) -> (Vec<f64>, f64) {
        let weights: Vec<f64> = bands.bands.iter().map(|b| curve.weight_at(b.normalized)).collect();
        let proxy = bands
            .bands
            .iter()
            .zip(&weights)
            .map(|(b, w)| b.area_km2(self.pixel_area_km2) * w)
            .sum();
        (weights, proxy)
    }

    /// Add `value · weight` to every cell of every band and return the next field.
    /// Cells driven to zero or below leave the ice-covered mask.
    pub fn apply(
        &self,
        scale: &ScaleFactor,
        field: ElevationField,
        bands: &ElevationBandSet,
    ) -> ElevationField {
        let mut next: Array2<f64> = field.thickness.clone();
        for (band, &w) in bands.bands.iter().zip(&scale.band_weights) {
            let dh = scale.value * w;
            for &(r, c) in &band.cells {
                next[[r, c]] = (next[[r, c]] + dh).max(0.0);
            }
        }
        field.with_thickness(next)
    }
}
