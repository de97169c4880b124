//! Flowline-derived topography: terminus slope and aspect sectors.
//!
//! The terminus slope ("slope20") is the mean surface slope over the lowest
//! 20 % of the glacier's altitude range, measured along its central flowline
//! on the current surface.

use serde::Deserialize;

use crate::deltah::nearest_index;
use crate::grid::{ElevationBandSet, ElevationField};

/// Used when the flowline misses the grid, or when the slope is undefined and
/// no earlier slope exists [°].
pub const DUMMY_SLOPE_DEG: f64 = 20.0;
/// Used when refinement gives up and no earlier slope exists [°].
pub const EXHAUSTED_SLOPE_DEG: f64 = 50.0;
pub const MAX_SLOPE_DEG: f64 = 55.0;
/// A new slope never drops below this fraction of last year's.
pub const SLOPE_FLOOR_RATIO: f64 = 0.8;
pub const MAX_REFINEMENTS: usize = 20;
pub const TERMINUS_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Flowline {
    pub glims_id: String,
    pub length: f64,
    /// Map coordinates, from the head down to the terminus.
    pub points: Vec<[f64; 2]>,
}

/// Pick the flowline for a glacier among all candidates sharing its GLIMS id.
///
/// A candidate replaces the current choice when it is strictly closer in
/// length, or exactly equal. Otherwise the first candidate within 1 % of the
/// outline length is accepted while nothing has been chosen yet.
pub fn select_flowline<'a>(flowlines: &'a [Flowline], glims_id: &str, length: f64) -> Option<&'a Flowline> {
    let mut chosen: Option<(&Flowline, f64)> = None;
    for f in flowlines.iter().filter(|f| f.glims_id == glims_id) {
        let diff = (length - f.length).abs();
        let chosen_diff = chosen.map_or(0.0, |(_, d)| d);
        if diff < chosen_diff || diff == 0.0 || (chosen.is_none() && diff < length / 100.0) {
            chosen = Some((f, diff));
        }
    }
    chosen.map(|(f, _)| f)
}

/// Surface altitudes sampled along a flowline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowlineProfile {
    pub altitudes: Vec<f64>,
    pub coords: Vec<[f64; 2]>,
}

impl FlowlineProfile {
    /// Sample the surface grid under each point, stopping at the first point
    /// that falls outside the grid. Only positive altitudes are kept.
    pub fn sample(flowline: &Flowline, field: &ElevationField) -> Self {
        let mut profile = Self::default();
        for &[x, y] in &flowline.points {
            let Some((r, c)) = field.meta.pixel_of(x, y, field.rows, field.cols) else {
                break;
            };
            let z = field.surface[[r, c]];
            if z > 0.0 {
                profile.altitudes.push(z);
                profile.coords.push([x, y]);
            }
        }
        profile
    }

    pub fn is_empty(&self) -> bool {
        self.altitudes.is_empty()
    }

    /// Length of the polyline from sample `from` down to sample `to`, both included.
    /// A start on the very last sample is moved one sample up.
    fn length_between(&self, from: usize, to: usize) -> (f64, bool) {
        let mut from = from;
        let mut shifted = false;
        if from + 1 == self.coords.len() {
            from = from.saturating_sub(1);
            shifted = true;
        }
        let length = if from < to && to < self.coords.len() {
            self.coords[from..=to]
                .windows(2)
                .map(|w| ((w[1][0] - w[0][0]).powi(2) + (w[1][1] - w[0][1]).powi(2)).sqrt())
                .sum()
        } else {
            0.0
        };
        (length, shifted)
    }
}

/// Terminus slope [°] for this year.
///
/// `previous` is last year's slope, if any. A flat terminus (no drop over no
/// length) keeps `previous`, or takes the dummy slope in the first year.
pub fn slope20(profile: &FlowlineProfile, bands: &ElevationBandSet, previous: Option<f64>) -> f64 {
    let (Some(lowest), Some(highest)) = (bands.lowest(), bands.highest()) else {
        return DUMMY_SLOPE_DEG;
    };
    if profile.is_empty() {
        tracing::debug!("flowline misses the surface grid, using dummy slope");
        return DUMMY_SLOPE_DEG;
    }
    let alts = &profile.altitudes;

    let min_idx = nearest_index(alts, lowest).unwrap_or(0);
    let min_alt = alts[min_idx];
    let mut threshold = min_alt + (highest - min_alt) * TERMINUS_FRACTION;
    let mut idx20 = nearest_index(alts, threshold).unwrap_or(0);

    let (mut length, shifted) = profile.length_between(idx20, min_idx);
    if shifted {
        threshold = alts[idx20.saturating_sub(1)];
    }

    let mut attempts = 0;
    while length < threshold - min_alt && attempts < MAX_REFINEMENTS {
        idx20 = idx20.saturating_sub(1);
        length = profile.length_between(idx20, min_idx).0;
        attempts += 1;
    }

    let slope = if attempts >= MAX_REFINEMENTS {
        let fallback = previous.unwrap_or(EXHAUSTED_SLOPE_DEG);
        tracing::debug!(fallback, "terminus slope refinement exhausted");
        fallback
    } else {
        let s = ((threshold - min_alt) / length).atan().to_degrees();
        match previous {
            Some(p) if !s.is_finite() => {
                tracing::debug!(previous = p, "terminus slope undefined, keeping previous");
                p
            }
            None if !s.is_finite() => {
                tracing::debug!("terminus slope undefined, using dummy slope");
                DUMMY_SLOPE_DEG
            }
            Some(p) if s < p * SLOPE_FLOOR_RATIO => p * SLOPE_FLOOR_RATIO,
            _ => s,
        }
    };

    if slope > MAX_SLOPE_DEG {
        tracing::debug!(slope, "terminus slope capped");
        return MAX_SLOPE_DEG;
    }
    slope
}

/// Degrees clockwise from north for a 16-point compass sector code.
pub fn aspect_degrees(sector: &str) -> Option<f64> {
    const SECTORS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW", "NNW",
    ];
    let code = sector.trim().to_ascii_uppercase();
    SECTORS.iter().position(|&s| s == code).map(|i| i as f64 * 22.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::RasterMeta;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn flowline(id: &str, length: f64) -> Flowline {
        Flowline {
            glims_id: id.to_string(),
            length,
            points: Vec::new(),
        }
    }

    /// 1 row × 10 columns, 25 m pixels, surface falling 10 m per pixel from 3100 m.
    fn ramp() -> (ElevationField, Flowline) {
        let meta = RasterMeta {
            x_origin: 0.0,
            y_origin: 25.0,
            pixel_width: 25.0,
            pixel_height: -25.0,
            no_data: -9999.0,
        };
        let t = Array2::from_elem((1, 10), 20.0);
        let s = Array2::from_shape_fn((1, 10), |(_, c)| 3100.0 - 10.0 * c as f64);
        let field = ElevationField::new(t, s, meta).unwrap();
        let line = Flowline {
            glims_id: "G".into(),
            length: 250.0,
            points: (0..10).map(|c| [12.5 + 25.0 * c as f64, 12.5]).collect(),
        };
        (field, line)
    }

    #[test]
    fn test_flowline_selection() {
        let lines = vec![flowline("A", 1000.0), flowline("A", 1005.0), flowline("B", 1000.0)];
        // exact length wins
        assert_eq!(select_flowline(&lines, "A", 1000.0), Some(&lines[0]));
        // within 1 %: first candidate accepted, later closer ones replace it
        let picked = select_flowline(&lines, "A", 1004.0).unwrap();
        assert_eq!(picked.length, 1005.0);
        // nothing close enough
        assert_eq!(select_flowline(&lines, "A", 2000.0), None);
        assert_eq!(select_flowline(&lines, "C", 1000.0), None);
    }

    #[test]
    fn test_sampling_stops_outside_grid() {
        let (field, mut line) = ramp();
        line.points.insert(3, [-100.0, 12.5]);
        let profile = FlowlineProfile::sample(&line, &field);
        assert_eq!(profile.altitudes, vec![3100.0, 3090.0, 3080.0]);
        assert_eq!(profile.coords.len(), 3);
    }

    #[test]
    fn test_ramp_slope() {
        let (field, line) = ramp();
        let bands = ElevationBandSet::from_field(&field);
        let profile = FlowlineProfile::sample(&line, &field);
        // lowest 3010, threshold 3010 + 0.2·90 = 3028 → nearest sample 3030 (idx 7)
        // drop 18 m over 50 m
        let slope = slope20(&profile, &bands, None);
        assert_relative_eq!(slope, (18.0f64 / 50.0).atan().to_degrees(), epsilon = 1e-9);
    }

    #[test]
    fn test_slope_floor_and_cap() {
        let (field, line) = ramp();
        let bands = ElevationBandSet::from_field(&field);
        let profile = FlowlineProfile::sample(&line, &field);
        let raw = slope20(&profile, &bands, None);
        let floored = slope20(&profile, &bands, Some(raw * 2.0));
        assert_relative_eq!(floored, raw * 1.6);
        let capped = slope20(&profile, &bands, Some(80.0));
        assert_eq!(capped, MAX_SLOPE_DEG);
    }

    #[test]
    fn test_no_samples_gives_dummy() {
        let (field, mut line) = ramp();
        line.points = vec![[-50.0, -50.0]];
        let bands = ElevationBandSet::from_field(&field);
        let profile = FlowlineProfile::sample(&line, &field);
        assert_eq!(slope20(&profile, &bands, None), DUMMY_SLOPE_DEG);
    }

    #[test]
    fn test_exhausted_refinement_falls_back() {
        // Two samples 1 m apart with a 100 m drop: the polyline can never be
        // long enough, so refinement runs out.
        let profile = FlowlineProfile {
            altitudes: vec![3500.0, 3000.0],
            coords: vec![[0.0, 0.0], [1.0, 0.0]],
        };
        let (field, _) = ramp();
        let mut bands = ElevationBandSet::from_field(&field);
        bands.bands.first_mut().unwrap().elevation = 3000.0;
        bands.bands.last_mut().unwrap().elevation = 3500.0;
        assert_eq!(slope20(&profile, &bands, None), EXHAUSTED_SLOPE_DEG);
        assert_eq!(slope20(&profile, &bands, Some(33.0)), 33.0);
    }

    #[test]
    fn test_flat_terminus_falls_back() {
        // Single sample: zero length and zero drop.
        let profile = FlowlineProfile {
            altitudes: vec![3000.0],
            coords: vec![[0.0, 0.0]],
        };
        let (field, _) = ramp();
        let mut bands = ElevationBandSet::from_field(&field);
        for b in &mut bands.bands {
            b.elevation = 3000.0;
        }
        assert_eq!(slope20(&profile, &bands, None), DUMMY_SLOPE_DEG);
        assert_eq!(slope20(&profile, &bands, Some(12.0)), 12.0);
    }

    #[test]
    fn test_flat_surface_along_flowline_gives_dummy() {
        // Flowline crossing a flat field: every sample shares one altitude.
        let (mut field, line) = ramp();
        field.surface.fill(3000.0);
        let bands = ElevationBandSet::from_field(&field);
        let profile = FlowlineProfile::sample(&line, &field);
        assert_eq!(profile.altitudes.len(), 10);
        assert_eq!(slope20(&profile, &bands, None), DUMMY_SLOPE_DEG);
        assert_eq!(slope20(&profile, &bands, Some(25.0)), 25.0);
    }

    #[test]
    fn test_aspect_sectors() {
        assert_eq!(aspect_degrees("N"), Some(0.0));
        assert_eq!(aspect_degrees("ese"), Some(112.5));
        assert_eq!(aspect_degrees("NNW"), Some(337.5));
        assert_eq!(aspect_degrees("X"), None);
    }
}
