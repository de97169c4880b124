//! icefront: annual glacier geometry evolution driven by an ensemble surface
//! mass balance model.
//!
//! Architecture:
//! - Ice-covered elevation field with explicit mask and elevation bands (grid module)
//! - Delta-h parameterization turning one glacier-wide balance into per-band thinning (deltah module)
//! - Ensemble of linear and neural SMB members over 34 climate + topography features (smb module)
//! - Daily forcing archive adjusted to the glacier surface by lapse rate (climate module)
//! - Terminus slope along the glacier flowline (topography module)
//! - Raster / CSV / JSON adapters and the output store (io module)
//!
//! One simulated year: topography → climate anomalies → SMB → delta-h → bookkeeping.
//! The batch module runs that loop for every glacier of a catalog, optionally
//! on the rayon pool.

pub mod batch;
pub mod climate;
pub mod config;
pub mod deltah;
pub mod error;
pub mod evolution;
pub mod grid;
pub mod io;
pub mod smb;
pub mod topography;

pub use batch::{run_batch, run_with_inputs, BatchInputs, BatchSummary};
pub use config::RunConfig;
pub use error::{BatchError, FormatError, GlacierError, PersistError, SlopeError};
pub use evolution::{evolve_glacier, EvolutionContext, GlacierInputs, GlacierRun, Outcome, YearlySeries};
