//! Annual evolution loop for one glacier.
//!
//! Each year: refresh topography → climate anomalies at the current mean
//! surface → ensemble SMB → delta-h redistribution → bookkeeping. The loop
//! owns the glacier state outright; the field is moved through the delta-h
//! engine and comes back as next year's state.

use crate::climate::{ClimateAnomalyProvider, ClimateReference, RawSeasonal};
use crate::config::RunConfig;
use crate::deltah::{CurveSchedule, DeltaHEngine};
use crate::error::{GlacierError, SlopeError};
use crate::grid::{ElevationBandSet, ElevationField};
use crate::io::OutputStore;
use crate::smb::{BiasCorrection, EnsemblePool, FeatureVector, GlacierSite, SmbEnsemble, Topography};
use crate::topography::{slope20, Flowline, FlowlineProfile};

/// Batch-wide collaborators, shared read-only by every glacier.
pub struct EvolutionContext<'a> {
    pub config: &'a RunConfig,
    pub climate: &'a dyn ClimateAnomalyProvider,
    pub ensemble: &'a SmbEnsemble,
    pub engine: DeltaHEngine,
    /// Receives yearly rasters when `store_rasters` is set.
    pub rasters: Option<&'a OutputStore>,
}

/// Static inputs of one glacier, resolved before its first year.
#[derive(Debug, Clone)]
pub struct GlacierInputs<'a> {
    pub glims_id: &'a str,
    pub glacier_id: i64,
    pub site: GlacierSite,
    pub flowline: Option<&'a Flowline>,
    pub curves: CurveSchedule,
    pub forcing_index: usize,
    pub reference: &'a ClimateReference,
    pub pool: EnsemblePool,
    pub bias: Option<BiasCorrection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every configured year was simulated.
    Completed,
    /// The ice-covered mask emptied during `year`; that year is the last one recorded.
    Melted { year: i32 },
    /// No forcing for `year`; the series stops the year before.
    Truncated { year: i32 },
}

/// One value per simulated year, starting at `start_year`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YearlySeries {
    pub start_year: i32,
    pub area: Vec<f64>,
    pub volume: Vec<f64>,
    pub zmean: Vec<f64>,
    pub slope20: Vec<f64>,
    pub smb: Vec<f64>,
    /// Filled only for forcing sources that track raw climate.
    pub raw_climate: Vec<RawSeasonal>,
}

impl YearlySeries {
    fn new(start_year: i32) -> Self {
        Self {
            start_year,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.smb.len()
    }

    pub fn is_empty(&self) -> bool {
        self.smb.is_empty()
    }

    pub fn last_year(&self) -> Option<i32> {
        (!self.is_empty()).then(|| self.start_year + self.len() as i32 - 1)
    }
}

#[derive(Debug, Clone)]
pub struct GlacierRun {
    pub series: YearlySeries,
    pub outcome: Outcome,
    pub pool: EnsemblePool,
    /// Geometry after the last simulated year.
    pub field: ElevationField,
}

/// Working state owned by the loop.
struct GlacierState {
    field: ElevationField,
    bands: ElevationBandSet,
    initial_zmean: f64,
    series: YearlySeries,
}

impl GlacierState {
    fn new(field: ElevationField, start_year: i32) -> Result<Self, GlacierError> {
        let initial_zmean = field.mean_surface().ok_or(GlacierError::NoIce)?;
        let bands = ElevationBandSet::from_field(&field);
        Ok(Self {
            field,
            bands,
            initial_zmean,
            series: YearlySeries::new(start_year),
        })
    }

    fn topography(&self, glacier: &GlacierInputs, pixel_area_km2: f64) -> Result<Topography, GlacierError> {
        let flowline = glacier
            .flowline
            .ok_or_else(|| SlopeError::NoFlowline(glacier.glims_id.to_string()))?;
        let profile = FlowlineProfile::sample(flowline, &self.field);
        let slope = slope20(&profile, &self.bands, self.series.slope20.last().copied());
        Ok(Topography {
            mean_elevation: self.field.mean_surface().unwrap_or(self.initial_zmean),
            max_elevation: self.field.max_surface().unwrap_or(self.initial_zmean),
            slope20: slope,
            area_km2: self.field.area_km2(pixel_area_km2),
        })
    }

    /// Mean covered surface, else last year's value, else the pre-loop mean.
    fn zmean(&self) -> f64 {
        self.field
            .mean_surface()
            .or_else(|| self.series.zmean.last().copied())
            .unwrap_or(self.initial_zmean)
    }
}

/// Simulate one glacier over the configured period.
pub fn evolve_glacier(
    ctx: &EvolutionContext<'_>,
    glacier: &GlacierInputs<'_>,
    field: ElevationField,
) -> Result<GlacierRun, GlacierError> {
    let sim = &ctx.config.simulation;
    let pixel_area = ctx.engine.pixel_area_km2;
    let mut state = GlacierState::new(field, sim.start_year)?;
    let mut frozen: Option<Topography> = None;
    let mut outcome = Outcome::Completed;

    for year in ctx.config.years() {
        let topo = match frozen {
            Some(t) if sim.static_geometry => t,
            _ => {
                let t = state.topography(glacier, pixel_area)?;
                frozen = Some(t);
                t
            }
        };

        let mean_now = state.field.mean_surface().unwrap_or(state.initial_zmean);
        let Some(climate) = ctx
            .climate
            .year_climate(year, glacier.forcing_index, mean_now, glacier.reference)
        else {
            tracing::info!(year, "no forcing for year, stopping");
            outcome = Outcome::Truncated { year };
            break;
        };

        let features = FeatureVector::assemble(&climate.anomalies, &topo, &glacier.site);
        let prediction = ctx.ensemble.predict(&features, glacier.pool);
        if !prediction.is_defined() {
            return Err(GlacierError::UndefinedMassBalance { year });
        }
        let smb = glacier
            .bias
            .map_or(prediction.point, |c| c.correct_point(prediction.point));

        let mut scale_factor = None;
        if !sim.static_geometry {
            let curve = glacier.curves.curve_for(year);
            let area = state.field.area_km2(pixel_area);
            let scale = ctx.engine.compute_scale_factor(smb, &state.bands, curve, area);
            state.field = ctx.engine.apply(&scale, state.field, &state.bands);
            scale_factor = Some(scale.value);
        }

        let area = state.field.area_km2(pixel_area);
        let volume = state.field.volume(pixel_area);
        let zmean = state.zmean();
        state.series.smb.push(smb);
        state.series.area.push(area);
        state.series.volume.push(volume);
        state.series.zmean.push(zmean);
        state.series.slope20.push(topo.slope20);
        if sim.forcing.tracks_raw_climate() {
            state.series.raw_climate.push(climate.raw);
        }

        tracing::debug!(
            year,
            smb,
            fs = scale_factor,
            area,
            volume,
            zmean,
            slope20 = topo.slope20,
            "year simulated"
        );

        if sim.store_rasters && !sim.static_geometry {
            if let Some(store) = ctx.rasters {
                // Failures are logged by the store; the run goes on.
                let _ = store.write_rasters(glacier.glacier_id, year, &state.field);
            }
        }

        if state.field.is_empty() {
            outcome = Outcome::Melted { year };
            break;
        }
        if !sim.static_geometry {
            state.bands = ElevationBandSet::from_field(&state.field);
        }
    }

    tracing::info!(
        years = state.series.len(),
        outcome = ?outcome,
        final_area = state.series.area.last().copied(),
        "glacier finished"
    );
    Ok(GlacierRun {
        series: state.series,
        outcome,
        pool: glacier.pool,
        field: state.field,
    })
}
