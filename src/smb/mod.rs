//! Ensemble surface mass balance prediction.
//!
//! A run picks one [`ModelFamily`] at start-up; its members are loaded once
//! into an immutable [`SmbEnsemble`] shared by every glacier (and every rayon
//! worker). Each glacier resolves its [`EnsemblePool`] once, before the year
//! loop, and every estimate is the unweighted mean of that pool's members.

mod bias;
mod features;
mod members;

pub use bias::{BiasCorrection, BiasCorrectionTable, RECONSTRUCTION_CORRECTED_YEARS};
pub use features::{FeatureVector, GlacierSite, Topography, FEATURE_COUNT};
pub use members::{load_linear, load_network, Activation, DenseNetwork, LinearMember, SmbPredictor};

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BatchError;

/// Held-out diagnostic members at the end of the baseline pool.
pub const BASELINE_HELD_OUT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Baseline linear (lasso) family.
    Lasso,
    Ann,
    /// Network members trained with sample weights.
    AnnWeighted,
}

impl ModelFamily {
    pub fn is_baseline(self) -> bool {
        matches!(self, ModelFamily::Lasso)
    }

    pub fn label(self) -> &'static str {
        match self {
            ModelFamily::Lasso => "lasso",
            ModelFamily::Ann => "ann",
            ModelFamily::AnnWeighted => "ann_weighted",
        }
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which member subset a glacier is simulated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsemblePool {
    Baseline,
    /// Members trained with this glacier included.
    Full,
    /// Members trained without this glacier.
    CrossValidated,
}

impl EnsemblePool {
    pub fn is_cross_validated(self) -> bool {
        matches!(self, EnsemblePool::CrossValidated)
    }
}

/// GLIMS ids of the glaciers seen during training.
#[derive(Debug, Clone, Default)]
pub struct TrainingRoster(HashSet<String>);

impl TrainingRoster {
    pub fn new(ids: impl IntoIterator<Item = String>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn contains(&self, glims_id: &str) -> bool {
        self.0.contains(glims_id)
    }
}

/// Point estimate plus the member estimates it was averaged from.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsemblePrediction {
    pub point: f64,
    pub members: Vec<f64>,
}

impl EnsemblePrediction {
    fn undefined(n: usize) -> Self {
        Self {
            point: f64::NAN,
            members: vec![f64::NAN; n],
        }
    }

    /// `false` for the undefined-estimate sentinel.
    pub fn is_defined(&self) -> bool {
        self.point.is_finite()
    }
}

/// Historical series reconstructed year by year.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    /// Ensemble mean per year.
    pub series: Vec<f64>,
    /// `members[m][y]`: member `m` estimate for year `y`.
    pub members: Vec<Vec<f64>>,
}

type Pool = Vec<Box<dyn SmbPredictor>>;

pub struct SmbEnsemble {
    family: ModelFamily,
    full: Pool,
    cross_validation: Pool,
    baseline: Pool,
}

impl std::fmt::Debug for SmbEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmbEnsemble")
            .field("family", &self.family)
            .field("full", &self.full.len())
            .field("cross_validation", &self.cross_validation.len())
            .field("baseline", &self.baseline.len())
            .finish()
    }
}

impl SmbEnsemble {
    /// Assemble an ensemble, failing when a pool the family needs is empty.
    pub fn new(family: ModelFamily, full: Pool, cross_validation: Pool, baseline: Pool) -> Result<Self, BatchError> {
        let ensemble = Self {
            family,
            full,
            cross_validation,
            baseline,
        };
        if family.is_baseline() {
            if ensemble.members(EnsemblePool::Baseline).is_empty() {
                return Err(BatchError::EmptyPool {
                    pool: "baseline",
                    family: family.to_string(),
                });
            }
        } else {
            for pool in [EnsemblePool::Full, EnsemblePool::CrossValidated] {
                if ensemble.members(pool).is_empty() {
                    return Err(BatchError::EmptyPool {
                        pool: if pool == EnsemblePool::Full { "full" } else { "cross_validation" },
                        family: family.to_string(),
                    });
                }
            }
        }
        Ok(ensemble)
    }

    /// Load members from `<dir>/lasso/*.json` for the baseline family, or
    /// `<dir>/<family>/full/*.json` and `<dir>/<family>/cv/*.json` otherwise.
    pub fn load(dir: &Path, family: ModelFamily) -> Result<Self, BatchError> {
        let (full, cv, baseline) = if family.is_baseline() {
            let baseline = member_files(&dir.join(family.label()))?
                .iter()
                .map(|p| load_linear(p).map(|m| Box::new(m) as Box<dyn SmbPredictor>))
                .collect::<Result<Pool, _>>()?;
            (Vec::new(), Vec::new(), baseline)
        } else {
            let root = dir.join(family.label());
            let load_pool = |sub: &str| -> Result<Pool, BatchError> {
                member_files(&root.join(sub))?
                    .iter()
                    .map(|p| load_network(p).map(|m| Box::new(m) as Box<dyn SmbPredictor>))
                    .collect()
            };
            (load_pool("full")?, load_pool("cv")?, Vec::new())
        };
        tracing::info!(
            %family,
            full = full.len(),
            cross_validation = cv.len(),
            baseline = baseline.len(),
            "loaded SMB ensemble"
        );
        Self::new(family, full, cv, baseline)
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// Pool for one glacier. Resolved once, before its year loop.
    pub fn resolve_pool(&self, glims_id: &str, roster: &TrainingRoster) -> EnsemblePool {
        if self.family.is_baseline() {
            EnsemblePool::Baseline
        } else if roster.contains(glims_id) {
            EnsemblePool::Full
        } else {
            EnsemblePool::CrossValidated
        }
    }

    pub fn members(&self, pool: EnsemblePool) -> &[Box<dyn SmbPredictor>] {
        match pool {
            EnsemblePool::Full => &self.full,
            EnsemblePool::CrossValidated => &self.cross_validation,
            EnsemblePool::Baseline => {
                let keep = self.baseline.len().saturating_sub(BASELINE_HELD_OUT);
                &self.baseline[..keep]
            }
        }
    }

    /// Single glacier-year estimate (evolution mode).
    pub fn predict(&self, features: &FeatureVector, pool: EnsemblePool) -> EnsemblePrediction {
        let members = self.members(pool);
        if !features.is_finite() || members.is_empty() {
            return EnsemblePrediction::undefined(members.len());
        }
        let estimates: Vec<f64> = members.iter().map(|m| m.predict(features.as_slice())).collect();
        EnsemblePrediction {
            point: mean(&estimates),
            members: estimates,
        }
    }

    /// Series estimate (reconstruction mode): every member predicts every
    /// year, then years are averaged independently across members. A
    /// correction shifts the last years of the averaged series.
    pub fn reconstruct(
        &self,
        yearly: &[FeatureVector],
        pool: EnsemblePool,
        correction: Option<BiasCorrection>,
    ) -> Reconstruction {
        let members: Vec<Vec<f64>> = self
            .members(pool)
            .iter()
            .map(|m| {
                yearly
                    .iter()
                    .map(|f| if f.is_finite() { m.predict(f.as_slice()) } else { f64::NAN })
                    .collect()
            })
            .collect();
        let mut series: Vec<f64> = (0..yearly.len())
            .map(|y| mean(&members.iter().map(|m| m[y]).collect::<Vec<_>>()))
            .collect();
        if let Some(c) = correction {
            c.correct_series(&mut series);
        }
        Reconstruction { series, members }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `*.json` files of a pool directory, sorted by name so member order is stable.
fn member_files(dir: &Path) -> Result<Vec<PathBuf>, BatchError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BatchError::io(dir, e)),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| BatchError::io(dir, e))?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
