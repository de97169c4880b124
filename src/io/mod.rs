//! File adapters: every reader the batch needs and the output store.

mod inputs;
mod output;
mod raster;

pub use inputs::{
    read_bias_table, read_catalog, read_climate_references, read_delta_h_curve, read_flowlines,
    read_training_roster, GlacierRecord,
};
pub use output::{
    OutputStore, RetryPolicy, ALL_SERIES, MELT_SERIES, OUTCOME_SERIES, RASTER_DIR, ROSTER_DIR, SMB_SERIES,
};
pub use raster::{format_ascii_grid, load_glacier_field, parse_ascii_grid, prepare_field, read_ascii_grid};
