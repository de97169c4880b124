//! Readers for the batch-wide inputs: glacier catalog, flowlines, climate
//! references, bias table, training roster and delta-h curves.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::climate::ClimateReferences;
use crate::deltah::DeltaHCurve;
use crate::error::{BatchError, GlacierError};
use crate::smb::{BiasCorrection, BiasCorrectionTable, TrainingRoster};
use crate::topography::Flowline;

/// One row of the `;`-separated glacier catalog.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GlacierRecord {
    pub name: String,
    pub massif: String,
    /// Outline area [km²].
    pub area: f64,
    /// Integer id used to name the raster pair; 0 means no raster data.
    pub id: i64,
    pub glims_id: String,
    /// Massif number in the forcing grid.
    pub massif_index: i64,
    /// 16-point compass sector, e.g. `NNE`.
    pub aspect: String,
    pub lat: f64,
    pub lon: f64,
    /// Outline length [m], used to disambiguate flowlines.
    pub length: f64,
}

fn semicolon_reader(path: &Path, has_headers: bool) -> Result<csv::Reader<std::fs::File>, BatchError> {
    csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(has_headers)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| BatchError::parse(path, e))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, BatchError> {
    let file = std::fs::File::open(path).map_err(|e| BatchError::io(path, e))?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| BatchError::parse(path, e))
}

pub fn read_catalog(path: &Path) -> Result<Vec<GlacierRecord>, BatchError> {
    semicolon_reader(path, true)?
        .deserialize()
        .collect::<Result<Vec<GlacierRecord>, _>>()
        .map_err(|e| BatchError::parse(path, e))
}

pub fn read_flowlines(path: &Path) -> Result<Vec<Flowline>, BatchError> {
    read_json(path)
}

pub fn read_climate_references(path: &Path) -> Result<ClimateReferences, BatchError> {
    read_json(path)
}

#[derive(Deserialize)]
struct BiasRow {
    glims_id: String,
    factor: f64,
    offset: f64,
}

/// `glims_id;factor;offset` with a header row.
pub fn read_bias_table(path: &Path) -> Result<BiasCorrectionTable, BatchError> {
    let rows = semicolon_reader(path, true)?
        .deserialize()
        .collect::<Result<Vec<BiasRow>, _>>()
        .map_err(|e| BatchError::parse(path, e))?;
    Ok(BiasCorrectionTable::from_entries(rows.into_iter().map(|r| {
        (
            r.glims_id,
            BiasCorrection {
                factor: r.factor,
                offset: r.offset,
            },
        )
    })))
}

/// One GLIMS id per line, no header.
pub fn read_training_roster(path: &Path) -> Result<TrainingRoster, BatchError> {
    let mut ids = Vec::new();
    for record in semicolon_reader(path, false)?.records() {
        let record = record.map_err(|e| BatchError::parse(path, e))?;
        if let Some(id) = record.get(0).filter(|s| !s.is_empty()) {
            ids.push(id.to_string());
        }
    }
    Ok(TrainingRoster::new(ids))
}

/// Two `;`-separated rows: normalized elevations, then weights.
/// `Ok(None)` when the glacier has no curve file.
pub fn read_delta_h_curve(path: &Path) -> Result<Option<DeltaHCurve>, GlacierError> {
    if !path.exists() {
        return Ok(None);
    }
    let bad = |m: String| GlacierError::BadCurve(format!("{}: {m}", path.display()));
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| bad(e.to_string()))?;
    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(2);
    for record in reader.records() {
        let record = record.map_err(|e| bad(e.to_string()))?;
        let row = record
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<f64>().map_err(|e| bad(format!("`{s}`: {e}"))))
            .collect::<Result<Vec<f64>, _>>()?;
        rows.push(row);
    }
    match <[Vec<f64>; 2]>::try_from(rows) {
        Ok([elevations, weights]) => DeltaHCurve::new(elevations, weights)
            .map(Some)
            .ok_or_else(|| bad("elevation and weight rows differ in length".into())),
        Err(rows) => Err(bad(format!("expected 2 rows, found {}", rows.len()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        std::fs::write(
            &path,
            "name;massif;area;id;glims_id;massif_index;aspect;lat;lon;length\n\
             Argentiere; Mont-Blanc ;10.6;3651;G006985E45951N;3;NNW;45.95;6.98;9500\n\
             Tiny;Ecrins;0.1;0;G006100E44900N;16;S;44.9;6.1;300\n",
        )
        .unwrap();
        let catalog = read_catalog(&path).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].massif, "Mont-Blanc");
        assert_eq!(catalog[0].id, 3651);
        assert_eq!(catalog[1].aspect, "S");
    }

    #[test]
    fn test_delta_h_curve_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("G_dh.csv");
        assert_eq!(read_delta_h_curve(&path).unwrap(), None);

        std::fs::write(&path, "0.0;0.5;1.0\n0.2;0.6;1.0\n").unwrap();
        let curve = read_delta_h_curve(&path).unwrap().unwrap();
        assert_eq!(curve.weight, vec![0.2, 0.6, 1.0]);

        std::fs::write(&path, "0.0;0.5;1.0\n0.2;0.6\n").unwrap();
        assert!(read_delta_h_curve(&path).is_err());
    }

    #[test]
    fn test_bias_table_and_roster() {
        let dir = tempfile::tempdir().unwrap();
        let bias = dir.path().join("bias.csv");
        std::fs::write(&bias, "glims_id;factor;offset\nG1;1.25;-0.3\n").unwrap();
        let table = read_bias_table(&bias).unwrap();
        assert_eq!(table.len(), 1);

        let roster = dir.path().join("roster.csv");
        std::fs::write(&roster, "G1\nG2\n\n").unwrap();
        let roster = read_training_roster(&roster).unwrap();
        assert!(roster.contains("G2"));
        assert!(!roster.contains("G3"));
    }

    #[test]
    fn test_flowlines_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowlines.json");
        std::fs::write(&path, r#"[{"glims_id": "G1", "length": 1200.0, "points": [[0.0, 1.0], [2.0, 3.0]]}]"#).unwrap();
        let lines = read_flowlines(&path).unwrap();
        assert_eq!(lines[0].points[1], [2.0, 3.0]);
    }
}
