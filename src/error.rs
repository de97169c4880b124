//! Error taxonomy.
//!
//! Three layers, matching how far a failure is allowed to travel:
//! - [`BatchError`] aborts the whole run (nothing can be simulated without it).
//! - [`GlacierError`] aborts one glacier; the batch records it and moves on.
//! - [`PersistError`] aborts one write after its retry budget is spent.

use std::path::PathBuf;

use thiserror::Error;

/// Failures that stop the batch before or while it iterates the catalog.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("base forcing archive not found at {0}")]
    MissingForcing(PathBuf),

    #[error("ensemble pool `{pool}` has no members for model family {family}")]
    EmptyPool { pool: &'static str, family: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("cannot clear previous outputs: {0}")]
    Clear(#[source] PersistError),

    #[error("cannot write rosters: {0}")]
    Rosters(#[source] PersistError),
}

/// Failures local to one glacier. Caught at the glacier boundary.
#[derive(Debug, Error)]
pub enum GlacierError {
    #[error("raster missing: {0}")]
    MissingRaster(PathBuf),

    #[error("raster {path} unreadable: {message}")]
    BadRaster { path: PathBuf, message: String },

    #[error("raster {path} malformed: {source}")]
    MalformedRaster {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("thickness grid {thickness:?} and DEM grid {dem:?} are not aligned")]
    Misaligned {
        thickness: (usize, usize),
        dem: (usize, usize),
    },

    #[error("ice thickness raster holds no valid ice")]
    NoIce,

    #[error("no climate reference for glacier {0}")]
    MissingReference(String),

    #[error("no forcing grid point for massif {massif} near {altitude:.0} m")]
    NoForcingPoint { massif: i64, altitude: f64 },

    #[error("terminus slope failed: {0}")]
    Slope(#[from] SlopeError),

    #[error("mass balance estimate undefined in {year}")]
    UndefinedMassBalance { year: i32 },

    #[error("delta-h curve unreadable: {0}")]
    BadCurve(String),
}

/// Terminus-slope failures with no usable fallback.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SlopeError {
    #[error("no flowline matches glacier {0}")]
    NoFlowline(String),
}

/// Malformed grid or forcing content, independent of the file it came from.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormatError {
    #[error("{name} grid is {found:?}, expected {expected:?}")]
    Shape {
        name: &'static str,
        found: (usize, usize),
        expected: (usize, usize),
    },

    #[error("year {year}: invalid month {month}")]
    InvalidMonth { year: i32, month: u8 },

    #[error("year {year}: {source}")]
    Year {
        year: i32,
        #[source]
        source: Box<FormatError>,
    },

    #[error("header {key}: `{value}` is not a number")]
    HeaderValue { key: String, value: String },

    #[error("unknown header key `{0}`")]
    UnknownHeader(String),

    #[error("incomplete header")]
    IncompleteHeader,

    #[error("cell value `{0}` is not a number")]
    CellValue(String),

    #[error("expected {expected} cells, found {found}")]
    CellCount { expected: usize, found: usize },
}

/// A write that could not complete even after retrying.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{path} still unavailable after {attempts} attempts: {source}")]
    Unavailable {
        path: PathBuf,
        attempts: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {message}")]
    Encode { path: PathBuf, message: String },
}

impl BatchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
