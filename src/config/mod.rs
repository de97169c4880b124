// ============================================================================
// Run configuration
//
// One immutable value built at startup and passed by reference into the
// batch driver, the evolution loop and every collaborator. Nothing here is
// mutated once `RunConfig::validate` has accepted it.
// ============================================================================

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BatchError;
use crate::smb::ModelFamily;

/// Ice density used to convert m w.e. into m of ice [kg m⁻³].
pub const ICE_DENSITY: f64 = 850.0;
/// Area of one 25 m × 25 m raster cell [km²].
pub const PIXEL_AREA_KM2: f64 = 0.000625;
/// Below this area the glacier-specific delta-h curve no longer applies [km²].
pub const SMALL_GLACIER_AREA_KM2: f64 = 0.5;
/// Thickness values above this (times the thickness factor) are raster noise [m].
pub const THICKNESS_NOISE_CEILING_M: f64 = 550.0;

/// Which climate archive drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcingSource {
    /// Historical reanalysis with a fixed reference period.
    Reanalysis,
    /// Scenario projection; raw seasonal climate is tracked and persisted.
    Projection,
}

impl ForcingSource {
    pub fn tracks_raw_climate(self) -> bool {
        matches!(self, ForcingSource::Projection)
    }

    pub fn label(self) -> &'static str {
        match self {
            ForcingSource::Reanalysis => "reanalysis",
            ForcingSource::Projection => "projection",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationSettings {
    pub forcing: ForcingSource,
    pub start_year: i32,
    pub end_year: i32,
    /// Freeze geometry and track mass balance only.
    #[serde(default)]
    pub static_geometry: bool,
    pub model_family: ModelFamily,
    #[serde(default = "default_true")]
    pub bias_correction: bool,
    #[serde(default)]
    pub overwrite: bool,
    /// Run glaciers on the rayon pool instead of one after another.
    #[serde(default)]
    pub parallel: bool,
    /// Write thickness and surface grids every simulated year.
    #[serde(default)]
    pub store_rasters: bool,
    /// Multiplier applied to the initial thickness (uncertainty runs).
    #[serde(default = "default_thickness_factor")]
    pub thickness_factor: f64,
    /// Simulate only the glacier with this integer id.
    #[serde(default)]
    pub only_glacier: Option<i64>,
    /// Skip catalog entries before this position.
    #[serde(default)]
    pub start_index: usize,
    /// Year from which the replacement delta-h curves (if present) apply.
    #[serde(default)]
    pub curve_replacement_year: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhysicsSettings {
    #[serde(default = "default_ice_density")]
    pub ice_density: f64,
    #[serde(default = "default_pixel_area")]
    pub pixel_area_km2: f64,
    #[serde(default = "default_small_glacier")]
    pub small_glacier_area_km2: f64,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            ice_density: ICE_DENSITY,
            pixel_area_km2: PIXEL_AREA_KM2,
            small_glacier_area_km2: SMALL_GLACIER_AREA_KM2,
        }
    }
}

/// Input and output locations. Relative paths resolve against the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathSettings {
    pub catalog: PathBuf,
    /// Directory holding `<id>_thickness.asc` and `<id>_dem.asc`.
    pub rasters: PathBuf,
    pub flowlines: PathBuf,
    /// Directory holding `<glims_id>_dh.csv` (and `<glims_id>_dh_replacement.csv`).
    pub delta_h: PathBuf,
    pub forcing: PathBuf,
    pub climate_references: PathBuf,
    pub bias_correction: PathBuf,
    pub training_roster: PathBuf,
    /// One sub-folder per model family (see `SmbEnsemble::load`).
    pub models: PathBuf,
    pub output: PathBuf,
}

impl PathSettings {
    fn resolve_against(&mut self, base: &Path) {
        for path in [
            &mut self.catalog,
            &mut self.rasters,
            &mut self.flowlines,
            &mut self.delta_h,
            &mut self.forcing,
            &mut self.climate_references,
            &mut self.bias_correction,
            &mut self.training_roster,
            &mut self.models,
            &mut self.output,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Full configuration for a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub physics: PhysicsSettings,
    pub paths: PathSettings,
}

impl RunConfig {
    /// Parse and validate a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, BatchError> {
        let text = std::fs::read_to_string(path).map_err(|e| BatchError::io(path, e))?;
        let mut config = Self::from_toml(&text).map_err(|e| match e {
            BatchError::Config(msg) => BatchError::parse(path, msg),
            other => other,
        })?;
        if let Some(base) = path.parent() {
            config.paths.resolve_against(base);
        }
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, BatchError> {
        let config: RunConfig =
            toml::from_str(text).map_err(|e| BatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        let sim = &self.simulation;
        if sim.start_year > sim.end_year {
            return Err(BatchError::Config(format!(
                "start_year {} is after end_year {}",
                sim.start_year, sim.end_year
            )));
        }
        if !(self.physics.ice_density > 0.0) {
            return Err(BatchError::Config("ice_density must be positive".into()));
        }
        if !(self.physics.pixel_area_km2 > 0.0) {
            return Err(BatchError::Config("pixel_area_km2 must be positive".into()));
        }
        if !(sim.thickness_factor > 0.0) {
            return Err(BatchError::Config("thickness_factor must be positive".into()));
        }
        Ok(())
    }

    /// Years simulated, inclusive on both ends.
    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.simulation.start_year..=self.simulation.end_year
    }

    /// Sub-folder that separates runs with different forcing / thickness settings.
    pub fn run_label(&self) -> PathBuf {
        let sim = &self.simulation;
        let mut label = PathBuf::from(sim.forcing.label());
        if sim.static_geometry {
            label.push("static_geometry");
        }
        label.push(sim.model_family.label());
        label.push(format!("{}", sim.thickness_factor));
        label
    }
}

fn default_true() -> bool {
    true
}
fn default_thickness_factor() -> f64 {
    1.0
}
fn default_ice_density() -> f64 {
    ICE_DENSITY
}
fn default_pixel_area() -> f64 {
    PIXEL_AREA_KM2
}
fn default_small_glacier() -> f64 {
    SMALL_GLACIER_AREA_KM2
}
