use std::collections::HashMap;

use super::ModelFamily;

/// Number of trailing years shifted in reconstruction mode.
pub const RECONSTRUCTION_CORRECTED_YEARS: usize = 15;

/// Empirical correction for one glacier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasCorrection {
    /// Multiplier applied to negative single-year estimates.
    pub factor: f64,
    /// Added to the last years of a reconstructed series.
    pub offset: f64,
}

impl BiasCorrection {
    pub fn correct_point(&self, point: f64) -> f64 {
        if point < 0.0 {
            point * self.factor
        } else {
            point
        }
    }

    pub fn correct_series(&self, series: &mut [f64]) {
        let start = series.len().saturating_sub(RECONSTRUCTION_CORRECTED_YEARS);
        for v in &mut series[start..] {
            *v += self.offset;
        }
    }
}

/// Glacier id → correction. Read once per run.
#[derive(Debug, Clone, Default)]
pub struct BiasCorrectionTable {
    entries: HashMap<String, BiasCorrection>,
}

impl BiasCorrectionTable {
    pub fn from_entries(entries: impl IntoIterator<Item = (String, BiasCorrection)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Correction to apply, if any: only when enabled, for the baseline
    /// linear family, and for glaciers listed in the table.
    pub fn correction_for(&self, glacier: &str, family: ModelFamily, enabled: bool) -> Option<BiasCorrection> {
        if !enabled || !family.is_baseline() {
            return None;
        }
        self.entries.get(glacier).copied()
    }
}
