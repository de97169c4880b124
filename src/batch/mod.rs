//! Batch driver: loads every shared input once, then runs the catalog.
//!
//! Shared inputs are immutable for the whole run, so glaciers can go through
//! the rayon pool as easily as through a plain loop. Each glacier owns its
//! field; any `GlacierError` ends up in the error roster and nowhere else.

use rayon::prelude::*;

use crate::climate::{load_forcing, ClimateReferences, DailyForcingArchive, RawSeasonal};
use crate::config::RunConfig;
use crate::deltah::{CurveSchedule, DeltaHCurve, DeltaHEngine};
use crate::error::{BatchError, GlacierError, PersistError};
use crate::evolution::{evolve_glacier, EvolutionContext, GlacierInputs, GlacierRun, Outcome};
use crate::io::{
    load_glacier_field, read_bias_table, read_catalog, read_climate_references, read_delta_h_curve, read_flowlines,
    read_training_roster, GlacierRecord, OutputStore, SMB_SERIES,
};
use crate::smb::{BiasCorrectionTable, GlacierSite, SmbEnsemble, TrainingRoster};
use crate::topography::{aspect_degrees, select_flowline, Flowline};

/// Everything the batch reads once and shares with every glacier.
pub struct BatchInputs {
    pub catalog: Vec<GlacierRecord>,
    pub flowlines: Vec<Flowline>,
    pub references: ClimateReferences,
    pub bias: BiasCorrectionTable,
    pub roster: TrainingRoster,
    pub ensemble: SmbEnsemble,
    pub forcing: DailyForcingArchive,
}

impl BatchInputs {
    pub fn load(config: &RunConfig) -> Result<Self, BatchError> {
        let paths = &config.paths;
        let catalog = read_catalog(&paths.catalog)?;
        let flowlines = read_flowlines(&paths.flowlines)?;
        let references = read_climate_references(&paths.climate_references)?;
        let bias = read_bias_table(&paths.bias_correction)?;
        let roster = read_training_roster(&paths.training_roster)?;
        let ensemble = SmbEnsemble::load(&paths.models, config.simulation.model_family)?;
        let forcing = load_forcing(&paths.forcing, false)?;
        tracing::info!(
            glaciers = catalog.len(),
            flowlines = flowlines.len(),
            references = references.len(),
            bias_entries = bias.len(),
            family = %config.simulation.model_family,
            "batch inputs loaded"
        );
        Ok(Self {
            catalog,
            flowlines,
            references,
            bias,
            roster,
            ensemble,
            forcing,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub simulated: usize,
    pub skipped: usize,
    /// `(name, reason)`
    pub errors: Vec<(String, String)>,
    /// `(glims_id, name, melt_year)`
    pub melted: Vec<(String, String, i32)>,
}

enum GlacierReport {
    Skipped,
    Simulated { melted: Option<i32> },
    Failed(String),
}

/// Load all inputs and run the batch.
pub fn run_batch(config: &RunConfig) -> Result<BatchSummary, BatchError> {
    let inputs = BatchInputs::load(config)?;
    run_with_inputs(config, &inputs)
}

pub fn run_with_inputs(config: &RunConfig, inputs: &BatchInputs) -> Result<BatchSummary, BatchError> {
    let sim = &config.simulation;
    let store = OutputStore::new(&config.paths.output, config.run_label());
    if sim.overwrite {
        tracing::info!(label = %config.run_label().display(), "clearing previous outputs");
        store.clear().map_err(BatchError::Clear)?;
    }

    let ctx = EvolutionContext {
        config,
        climate: &inputs.forcing,
        ensemble: &inputs.ensemble,
        engine: DeltaHEngine::from(&config.physics),
        rasters: sim.store_rasters.then_some(&store),
    };

    let selected: Vec<&GlacierRecord> = inputs
        .catalog
        .iter()
        .skip(sim.start_index)
        .filter(|r| sim.only_glacier.map_or(true, |id| r.id == id))
        .collect();
    tracing::info!(selected = selected.len(), parallel = sim.parallel, "starting batch");

    let run_one = |record: &&GlacierRecord| {
        let span = tracing::info_span!("glacier", glims_id = %record.glims_id, name = %record.name);
        let _enter = span.enter();
        process_glacier(&ctx, inputs, &store, record)
    };
    let reports: Vec<GlacierReport> = if sim.parallel {
        selected.par_iter().map(run_one).collect()
    } else {
        selected.iter().map(run_one).collect()
    };

    let mut summary = BatchSummary::default();
    for (record, report) in selected.iter().zip(reports) {
        match report {
            GlacierReport::Skipped => summary.skipped += 1,
            GlacierReport::Simulated { melted } => {
                summary.simulated += 1;
                if let Some(year) = melted {
                    summary
                        .melted
                        .push((record.glims_id.clone(), record.name.clone(), year));
                }
            }
            GlacierReport::Failed(reason) => summary.errors.push((record.name.clone(), reason)),
        }
    }

    tracing::info!(
        simulated = summary.simulated,
        skipped = summary.skipped,
        melted = summary.melted.len(),
        errors = summary.errors.len(),
        "batch finished"
    );
    store
        .write_rosters(sim.start_year, sim.end_year, &summary.errors, &summary.melted)
        .map_err(BatchError::Rosters)?;
    Ok(summary)
}

fn process_glacier(
    ctx: &EvolutionContext<'_>,
    inputs: &BatchInputs,
    store: &OutputStore,
    record: &GlacierRecord,
) -> GlacierReport {
    let sim = &ctx.config.simulation;
    if record.id == 0 {
        tracing::warn!("glacier has no raster data");
        return GlacierReport::Failed("no raster data".into());
    }
    if !sim.overwrite && store.is_processed(&record.glims_id) {
        tracing::debug!("already processed, skipping");
        return GlacierReport::Skipped;
    }

    match simulate(ctx, inputs, record) {
        Ok(run) => {
            persist(store, ctx.config, &record.glims_id, &run);
            let melted = match run.outcome {
                Outcome::Melted { year } => Some(year),
                _ => None,
            };
            GlacierReport::Simulated { melted }
        }
        Err(e) => {
            tracing::warn!(error = %e, "glacier skipped");
            GlacierReport::Failed(e.to_string())
        }
    }
}

fn simulate(ctx: &EvolutionContext<'_>, inputs: &BatchInputs, record: &GlacierRecord) -> Result<GlacierRun, GlacierError> {
    let config = ctx.config;
    let field = load_glacier_field(&config.paths.rasters, record.id, config.simulation.thickness_factor)?;
    let mean_elevation = field.mean_surface().ok_or(GlacierError::NoIce)?;

    let aspect = aspect_degrees(&record.aspect);
    if aspect.is_none() {
        tracing::warn!(aspect = %record.aspect, "unknown aspect sector, assuming north");
    }
    let forcing_index = inputs
        .forcing
        .forcing_index(record.massif_index, mean_elevation, aspect)
        .ok_or(GlacierError::NoForcingPoint {
            massif: record.massif_index,
            altitude: mean_elevation,
        })?;
    let reference = inputs
        .references
        .get(&record.glims_id)
        .ok_or_else(|| GlacierError::MissingReference(record.glims_id.clone()))?;

    let pool = inputs.ensemble.resolve_pool(&record.glims_id, &inputs.roster);
    let glacier = GlacierInputs {
        glims_id: &record.glims_id,
        glacier_id: record.id,
        site: GlacierSite {
            lon: record.lon,
            lat: record.lat,
            aspect_deg: aspect.unwrap_or(0.0),
        },
        flowline: select_flowline(&inputs.flowlines, &record.glims_id, record.length),
        curves: curve_schedule(config, &record.glims_id)?,
        forcing_index,
        reference,
        pool,
        bias: inputs.bias.correction_for(
            &record.glims_id,
            inputs.ensemble.family(),
            config.simulation.bias_correction,
        ),
    };
    tracing::debug!(forcing_index, pool = ?pool, mean_elevation, "glacier inputs resolved");
    evolve_glacier(ctx, &glacier, field)
}

/// `<glims_id>_dh.csv`, or the uniform curve when the glacier has none. The
/// replacement curve only applies when a replacement year is configured.
fn curve_schedule(config: &RunConfig, glims_id: &str) -> Result<CurveSchedule, GlacierError> {
    let dir = &config.paths.delta_h;
    let curve = read_delta_h_curve(&dir.join(format!("{glims_id}_dh.csv")))?.unwrap_or_else(|| {
        tracing::debug!("no delta-h curve, using uniform");
        DeltaHCurve::uniform()
    });
    let Some(from_year) = config.simulation.curve_replacement_year else {
        return Ok(CurveSchedule::fixed(curve));
    };
    Ok(
        match read_delta_h_curve(&dir.join(format!("{glims_id}_dh_replacement.csv")))? {
            Some(replacement) => CurveSchedule::with_replacement(curve, from_year, replacement),
            None => CurveSchedule::fixed(curve),
        },
    )
}

fn persist(store: &OutputStore, config: &RunConfig, glims_id: &str, run: &GlacierRun) {
    let series = &run.series;
    if series.is_empty() {
        tracing::warn!("no year simulated, nothing to persist");
        return;
    }
    let start = series.start_year;
    let mut results: Vec<Result<(), PersistError>> = Vec::new();
    let mut write = |name: &str, values: &[f64]| {
        results.push(store.write_series(glims_id, name, start, values).map(|_| ()));
    };

    if !config.simulation.static_geometry {
        write("area", &series.area);
        write("volume", &series.volume);
        write("zmean", &series.zmean);
        write("slope20", &series.slope20);
    }
    write(SMB_SERIES, &series.smb);

    if config.simulation.forcing.tracks_raw_climate() {
        let raw = &series.raw_climate;
        let column = |f: fn(&RawSeasonal) -> f64| raw.iter().map(f).collect::<Vec<f64>>();
        write("winter_CPDD", &column(|r| r.winter_cpdd));
        write("summer_CPDD", &column(|r| r.summer_cpdd));
        write("winter_snowfall", &column(|r| r.winter_snow));
        write("summer_snowfall", &column(|r| r.summer_snow));
        write("winter_rain", &column(|r| r.winter_rain));
        write("summer_rain", &column(|r| r.summer_rain));
    }

    if let Outcome::Melted { year } = run.outcome {
        results.push(store.write_melt_year(glims_id, year).map(|_| ()));
    }

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        tracing::warn!(failed, "some outputs were not persisted, glacier stays pending");
        return;
    }
    let marker = match run.outcome {
        Outcome::Completed => "completed".to_string(),
        Outcome::Melted { year } => format!("melted;{year}"),
        Outcome::Truncated { year } => format!("truncated;{year}"),
    };
    if let Err(e) = store.write_outcome(glims_id, &marker) {
        tracing::warn!(error = %e, "completion marker not written");
    }
}
