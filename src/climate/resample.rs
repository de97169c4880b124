//! Loading of the forcing archive, with one-off resampling of sub-daily
//! scenario data to daily values cached next to the source file.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use ndarray::{Array2, Axis};
use serde::Deserialize;

use super::archive::{DailyForcingArchive, ForcingPoint, ForcingYear};
use crate::error::{BatchError, FormatError};

const KELVIN_OFFSET: f64 = 273.15;

/// Calendar stamp of one sub-daily step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StepStamp {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

/// Scenario output at native resolution; steps are chronological.
#[derive(Debug, Clone, Deserialize)]
pub struct SubDailyArchive {
    pub points: Vec<ForcingPoint>,
    pub steps: Vec<StepStamp>,
    /// Air temperature [K], `steps × points`.
    pub temperature_k: Array2<f64>,
    pub snow: Array2<f64>,
    pub rain: Array2<f64>,
}

#[derive(Deserialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
enum ArchiveFile {
    Daily(DailyForcingArchive),
    SubDaily(SubDailyArchive),
}

/// Sibling file holding the resampled daily archive.
pub fn cache_path(source: &Path) -> PathBuf {
    source.with_extension("daily.json")
}

/// Load the batch forcing. A cached daily archive is reused unless
/// `refresh` is set; a missing source is fatal for the run.
pub fn load_forcing(source: &Path, refresh: bool) -> Result<DailyForcingArchive, BatchError> {
    let cache = cache_path(source);
    if !refresh && cache.exists() {
        tracing::info!(path = %cache.display(), "reusing cached daily forcing");
        let mut archive: DailyForcingArchive = read_json(&cache)?;
        archive.validate().map_err(|e| BatchError::parse(&cache, e))?;
        return Ok(archive);
    }
    if !source.exists() {
        return Err(BatchError::MissingForcing(source.to_path_buf()));
    }

    let mut archive = match read_json::<ArchiveFile>(source)? {
        ArchiveFile::Daily(a) => a,
        ArchiveFile::SubDaily(raw) => {
            tracing::info!(path = %source.display(), steps = raw.steps.len(), "resampling forcing to daily");
            let daily = resample_to_daily(&raw).map_err(|e| BatchError::parse(source, e))?;
            if let Err(e) = write_cache(&cache, &daily) {
                tracing::warn!(path = %cache.display(), error = %e, "could not cache daily forcing");
            }
            daily
        }
    };
    archive.validate().map_err(|e| BatchError::parse(source, e))?;
    tracing::info!(points = archive.points.len(), years = archive.years.len(), "forcing loaded");
    Ok(archive)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, BatchError> {
    let file = File::open(path).map_err(|e| BatchError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| BatchError::parse(path, e))
}

fn write_cache(path: &Path, archive: &DailyForcingArchive) -> std::io::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), archive)?;
    Ok(())
}

/// Daily mean temperature (converted to °C) and daily snow / rain sums,
/// grouped into hydrological years (October of year-1 to September of year).
pub fn resample_to_daily(raw: &SubDailyArchive) -> Result<DailyForcingArchive, FormatError> {
    let n = raw.points.len();
    let steps = raw.steps.len();
    for (name, grid) in [("temperature_k", &raw.temperature_k), ("snow", &raw.snow), ("rain", &raw.rain)] {
        if grid.dim() != (steps, n) {
            return Err(FormatError::Shape {
                name,
                found: grid.dim(),
                expected: (steps, n),
            });
        }
    }

    // Consecutive runs of identical stamps form one day.
    let mut day_bounds: Vec<(StepStamp, usize, usize)> = Vec::new();
    for (i, stamp) in raw.steps.iter().enumerate() {
        match day_bounds.last_mut() {
            Some((s, _, end)) if s == stamp => *end = i + 1,
            _ => day_bounds.push((*stamp, i, i + 1)),
        }
    }

    let mut years: Vec<ForcingYear> = Vec::new();
    let mut current: Option<(i32, Vec<u8>, Vec<f64>, Vec<f64>, Vec<f64>)> = None;
    for (stamp, start, end) in day_bounds {
        let hydro_year = if stamp.month >= 10 { stamp.year + 1 } else { stamp.year };
        if current.as_ref().map(|c| c.0) != Some(hydro_year) {
            if let Some(done) = current.take() {
                years.push(finish_year(done, n)?);
            }
            current = Some((hydro_year, Vec::new(), Vec::new(), Vec::new(), Vec::new()));
        }
        if let Some((_, months, t, s, r)) = current.as_mut() {
            months.push(stamp.month);
            let slice = |g: &Array2<f64>| g.slice(ndarray::s![start..end, ..]).to_owned();
            let temp = slice(&raw.temperature_k).sum_axis(Axis(0)) / (end - start) as f64;
            t.extend(temp.iter().map(|k| k - KELVIN_OFFSET));
            s.extend(slice(&raw.snow).sum_axis(Axis(0)).iter());
            r.extend(slice(&raw.rain).sum_axis(Axis(0)).iter());
        }
    }
    if let Some(done) = current.take() {
        years.push(finish_year(done, n)?);
    }

    Ok(DailyForcingArchive {
        points: raw.points.clone(),
        years,
    })
}

fn finish_year(
    (year, months, t, s, r): (i32, Vec<u8>, Vec<f64>, Vec<f64>, Vec<f64>),
    points: usize,
) -> Result<ForcingYear, FormatError> {
    let days = months.len();
    let grid = |name: &'static str, v: Vec<f64>| {
        let found = (v.len() / points.max(1), points);
        Array2::from_shape_vec((days, points), v).map_err(|_| FormatError::Year {
            year,
            source: Box::new(FormatError::Shape {
                name,
                found,
                expected: (days, points),
            }),
        })
    };
    Ok(ForcingYear {
        year,
        months,
        temperature: grid("temperature", t)?,
        snow: grid("snow", s)?,
        rain: grid("rain", r)?,
    })
}
