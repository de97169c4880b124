//! Output store: yearly series, melt years, rosters and optional rasters.
//!
//! Layout: `<root>/<series>/<run_label>/<glims_id>_<series>.csv`, rows
//! `year;value`. An existing target is never overwritten in place; the next
//! free `<glims_id>_<n>_<series>.csv` (n = 2, 3, …) is used instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PersistError;
use crate::grid::ElevationField;

use super::raster::format_ascii_grid;

pub const SMB_SERIES: &str = "simu_SMB";
pub const MELT_SERIES: &str = "melt_year";
/// Written last, once every series of a glacier is on disk.
pub const OUTCOME_SERIES: &str = "outcome";
pub const RASTER_DIR: &str = "rasters";
pub const ROSTER_DIR: &str = "rosters";

/// Every series folder an overwrite run clears.
pub const ALL_SERIES: [&str; 13] = [
    "area",
    "volume",
    "zmean",
    "slope20",
    SMB_SERIES,
    "winter_CPDD",
    "summer_CPDD",
    "winter_snowfall",
    "summer_snowfall",
    "winter_rain",
    "summer_rain",
    MELT_SERIES,
    OUTCOME_SERIES,
];

/// Bounded retry for writes that hit a busy or locked target.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn run<T>(&self, path: &Path, mut op: impl FnMut() -> std::io::Result<T>) -> Result<T, PersistError> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < attempts => {
                    tracing::warn!(path = %path.display(), attempt, error = %e, "write failed, retrying");
                    std::thread::sleep(self.backoff);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), attempts, error = %e, "write abandoned");
                    return Err(PersistError::Unavailable {
                        path: path.to_path_buf(),
                        attempts,
                        source: e,
                    });
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
    run_label: PathBuf,
    retry: RetryPolicy,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>, run_label: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            run_label: run_label.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn series_dir(&self, series: &str) -> PathBuf {
        self.root.join(series).join(&self.run_label)
    }

    /// Path the first write of a series lands on.
    pub fn base_path(&self, glims_id: &str, series: &str) -> PathBuf {
        self.series_dir(series).join(format!("{glims_id}_{series}.csv"))
    }

    /// First free name for this glacier and series.
    pub fn unique_path(&self, glims_id: &str, series: &str) -> PathBuf {
        let base = self.base_path(glims_id, series);
        if !base.exists() {
            return base;
        }
        let dir = self.series_dir(series);
        (2..)
            .map(|n| dir.join(format!("{glims_id}_{n}_{series}.csv")))
            .find(|p| !p.exists())
            .unwrap_or(base)
    }

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
        self.retry.run(path, || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, bytes)
        })
    }

    /// Write `start_year + i; values[i]` rows, 7 decimals.
    pub fn write_series(
        &self,
        glims_id: &str,
        series: &str,
        start_year: i32,
        values: &[f64],
    ) -> Result<PathBuf, PersistError> {
        let path = self.unique_path(glims_id, series);
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .from_writer(Vec::new());
        for (year, v) in (start_year..).zip(values) {
            writer
                .write_record([year.to_string(), format!("{v:.7}")])
                .map_err(|e| encode_error(&path, e))?;
        }
        let bytes = writer.into_inner().map_err(|e| encode_error(&path, e))?;
        self.write_bytes(&path, &bytes)?;
        Ok(path)
    }

    pub fn write_melt_year(&self, glims_id: &str, year: i32) -> Result<PathBuf, PersistError> {
        let path = self.unique_path(glims_id, MELT_SERIES);
        self.write_bytes(&path, format!("{year}\n").as_bytes())?;
        Ok(path)
    }

    /// Completion marker: one `outcome[;year]` line, replaced on every write.
    pub fn write_outcome(&self, glims_id: &str, outcome: &str) -> Result<PathBuf, PersistError> {
        let path = self.base_path(glims_id, OUTCOME_SERIES);
        self.write_bytes(&path, format!("{outcome}\n").as_bytes())?;
        Ok(path)
    }

    /// A glacier is done once its completion marker exists, whatever the
    /// outcome, or when a melt year was recorded.
    pub fn is_processed(&self, glims_id: &str) -> bool {
        self.base_path(glims_id, OUTCOME_SERIES).exists() || self.base_path(glims_id, MELT_SERIES).exists()
    }

    /// Remove every output of this run label.
    pub fn clear(&self) -> Result<(), PersistError> {
        for series in ALL_SERIES.iter().chain([RASTER_DIR, ROSTER_DIR].iter()) {
            let dir = self.series_dir(series);
            if dir.exists() {
                self.retry.run(&dir, || std::fs::remove_dir_all(&dir))?;
            }
        }
        Ok(())
    }

    /// Thickness and surface grids of one simulated year.
    pub fn write_rasters(&self, glacier_id: i64, year: i32, field: &ElevationField) -> Result<(), PersistError> {
        let dir = self.series_dir(RASTER_DIR).join(glacier_id.to_string());
        let thickness = format_ascii_grid(&field.thickness_for_output(), &field.meta);
        let surface = format_ascii_grid(&field.surface_for_output(), &field.meta);
        self.write_bytes(&dir.join(format!("{year}_thickness.asc")), thickness.as_bytes())?;
        self.write_bytes(&dir.join(format!("{year}_surface.asc")), surface.as_bytes())
    }

    /// Error (`name;reason`) and melt (`glims_id;name;year`) rosters. Empty
    /// rosters are not written.
    pub fn write_rosters(
        &self,
        start_year: i32,
        end_year: i32,
        errors: &[(String, String)],
        melted: &[(String, String, i32)],
    ) -> Result<(), PersistError> {
        let dir = self.series_dir(ROSTER_DIR);
        if !errors.is_empty() {
            let path = dir.join(format!("glaciers_w_errors_{start_year}_{end_year}.csv"));
            let rows = errors.iter().map(|(name, reason)| vec![name.clone(), reason.clone()]);
            self.write_bytes(&path, &encode_rows(&path, rows)?)?;
        }
        if !melted.is_empty() {
            let path = dir.join(format!("melted_glaciers_{start_year}_{end_year}.csv"));
            let rows = melted
                .iter()
                .map(|(glims, name, year)| vec![glims.clone(), name.clone(), year.to_string()]);
            self.write_bytes(&path, &encode_rows(&path, rows)?)?;
        }
        Ok(())
    }
}

fn encode_rows(path: &Path, rows: impl Iterator<Item = Vec<String>>) -> Result<Vec<u8>, PersistError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(&row).map_err(|e| encode_error(path, e))?;
    }
    writer.into_inner().map_err(|e| encode_error(path, e))
}

fn encode_error(path: &Path, e: impl std::fmt::Display) -> PersistError {
    PersistError::Encode {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn store(dir: &Path) -> OutputStore {
        OutputStore::new(dir, "projection/lasso/1").with_retry(RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
        })
    }

    #[test]
    fn test_series_rows() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let path = s.write_series("G1", "area", 2015, &[1.5, 1.25]).unwrap();
        assert_eq!(path, dir.path().join("area/projection/lasso/1/G1_area.csv"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "2015;1.5000000\n2016;1.2500000\n");
    }

    #[test]
    fn test_collisions_get_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let a = s.write_series("G1", "volume", 2015, &[1.0]).unwrap();
        let b = s.write_series("G1", "volume", 2015, &[2.0]).unwrap();
        let c = s.write_series("G1", "volume", 2015, &[3.0]).unwrap();
        assert!(a.ends_with("G1_volume.csv"));
        assert!(b.ends_with("G1_2_volume.csv"));
        assert!(c.ends_with("G1_3_volume.csv"));
    }

    #[test]
    fn test_retry_then_give_up() {
        let policy = RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
        };
        let calls = Cell::new(0);
        let ok = policy.run(Path::new("x"), || {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(ok.unwrap(), 7);

        calls.set(0);
        let err = policy
            .run(Path::new("x"), || -> std::io::Result<()> {
                calls.set(calls.get() + 1);
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 2);
        assert!(matches!(err, PersistError::Unavailable { attempts: 2, .. }));
    }

    #[test]
    fn test_processed_detection_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(!s.is_processed("G1"));
        s.write_series("G1", SMB_SERIES, 2015, &[0.1, 0.2]).unwrap();
        assert!(!s.is_processed("G1"));
        s.write_melt_year("G1", 2016).unwrap();
        assert!(s.is_processed("G1"));

        // A run cut short by the forcing horizon still counts once marked.
        s.write_series("G2", SMB_SERIES, 2015, &[0.1]).unwrap();
        assert!(!s.is_processed("G2"));
        s.write_outcome("G2", "completed").unwrap();
        // The marker is replaced in place, never numbered.
        let marker = s.write_outcome("G2", "truncated;2016").unwrap();
        assert!(marker.ends_with("G2_outcome.csv"));
        assert_eq!(std::fs::read_to_string(marker).unwrap(), "truncated;2016\n");
        assert!(s.is_processed("G2"));

        s.clear().unwrap();
        assert!(!s.is_processed("G1"));
        assert!(!s.is_processed("G2"));
        assert!(!s.series_dir(SMB_SERIES).exists());
    }

    #[test]
    fn test_rosters() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.write_rosters(
            2015,
            2099,
            &[("Tiny".into(), "no raster data".into())],
            &[("G2".into(), "Small".into(), 2040)],
        )
        .unwrap();
        let roster_dir = s.series_dir(ROSTER_DIR);
        let errors = std::fs::read_to_string(roster_dir.join("glaciers_w_errors_2015_2099.csv")).unwrap();
        assert_eq!(errors, "Tiny;no raster data\n");
        let melted = std::fs::read_to_string(roster_dir.join("melted_glaciers_2015_2099.csv")).unwrap();
        assert_eq!(melted, "G2;Small;2040\n");
    }
}
