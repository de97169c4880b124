// ============================================================================
// icefront: batch glacier evolution
//
// Reads a TOML run configuration, loads the shared inputs once and simulates
// every glacier of the catalog year by year. Per-glacier failures land in the
// error roster; only configuration and shared-input failures stop the run.
// ============================================================================

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use icefront::{run_batch, RunConfig};

#[derive(Parser, Debug)]
#[command(name = "icefront")]
#[command(about = "Simulate glacier geometry evolution for a glacier catalog")]
#[command(version)]
struct Args {
    /// Run configuration (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Clear previous outputs of this run before simulating
    #[arg(long)]
    overwrite: bool,

    /// Simulate only the glacier with this integer id
    #[arg(short, long)]
    glacier: Option<i64>,

    /// Run glaciers in parallel on the rayon pool
    #[arg(short, long)]
    parallel: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = RunConfig::from_file(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    config.simulation.overwrite |= args.overwrite;
    config.simulation.parallel |= args.parallel;
    if args.glacier.is_some() {
        config.simulation.only_glacier = args.glacier;
    }

    tracing::info!(
        forcing = config.simulation.forcing.label(),
        start = config.simulation.start_year,
        end = config.simulation.end_year,
        family = %config.simulation.model_family,
        static_geometry = config.simulation.static_geometry,
        "icefront starting"
    );

    let summary = run_batch(&config).context("batch aborted")?;
    tracing::info!(
        simulated = summary.simulated,
        skipped = summary.skipped,
        melted = summary.melted.len(),
        errors = summary.errors.len(),
        "done"
    );
    Ok(())
}
