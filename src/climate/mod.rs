//! Climate forcing at the glacier surface.
//!
//! The evolution loop only sees [`ClimateAnomalyProvider`]: give it a year, a
//! forcing-grid index, the glacier's current mean elevation and its baseline,
//! and it returns the anomalies the SMB ensemble is trained on. The batch
//! implementation is [`DailyForcingArchive`], loaded once per run.

mod archive;
pub mod lapse_rate;
mod resample;

pub use archive::{DailyForcingArchive, ForcingPoint, ForcingYear, GlacierClimate};
pub use resample::{cache_path, load_forcing, resample_to_daily, StepStamp, SubDailyArchive};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const MONTHS: usize = 12;

/// Long-term mean climate of a glacier over the reference period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateReference {
    pub cpdd: f64,
    pub winter_snow: f64,
    pub summer_snow: f64,
    /// Hydrological-year order, October first.
    pub monthly_temperature: [f64; MONTHS],
    pub monthly_snow: [f64; MONTHS],
}

/// GLIMS id → reference.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ClimateReferences(HashMap<String, ClimateReference>);

impl ClimateReferences {
    pub fn get(&self, glims_id: &str) -> Option<&ClimateReference> {
        self.0.get(glims_id)
    }

    pub fn insert(&mut self, glims_id: impl Into<String>, reference: ClimateReference) {
        self.0.insert(glims_id.into(), reference);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Departures from the glacier's reference climate.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateAnomalies {
    pub cpdd: f64,
    pub winter_snow: f64,
    pub summer_snow: f64,
    pub monthly_temperature: [f64; MONTHS],
    pub monthly_snow: [f64; MONTHS],
}

/// Absolute seasonal values, persisted for projection runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSeasonal {
    pub winter_cpdd: f64,
    pub summer_cpdd: f64,
    pub winter_snow: f64,
    pub summer_snow: f64,
    pub winter_rain: f64,
    pub summer_rain: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearClimate {
    pub anomalies: ClimateAnomalies,
    pub raw: RawSeasonal,
}

impl YearClimate {
    pub fn from_glacier_climate(c: &GlacierClimate, reference: &ClimateReference) -> Self {
        let mut monthly_temperature = [0.0; MONTHS];
        let mut monthly_snow = [0.0; MONTHS];
        for m in 0..MONTHS {
            monthly_temperature[m] = c.monthly_temperature[m] - reference.monthly_temperature[m];
            monthly_snow[m] = c.monthly_snow[m] - reference.monthly_snow[m];
        }
        Self {
            anomalies: ClimateAnomalies {
                cpdd: c.cpdd - reference.cpdd,
                winter_snow: c.winter_snow - reference.winter_snow,
                summer_snow: c.summer_snow - reference.summer_snow,
                monthly_temperature,
                monthly_snow,
            },
            raw: RawSeasonal {
                winter_cpdd: c.winter_cpdd,
                summer_cpdd: c.summer_cpdd,
                winter_snow: c.winter_snow,
                summer_snow: c.summer_snow,
                winter_rain: c.winter_rain,
                summer_rain: c.summer_rain,
            },
        }
    }
}

/// Source of yearly climate anomalies for the evolution loop.
pub trait ClimateAnomalyProvider: Sync {
    /// `None` when no complete forcing exists for `year`; the loop treats that
    /// as the end of the available horizon.
    fn year_climate(
        &self,
        year: i32,
        index: usize,
        mean_elevation: f64,
        reference: &ClimateReference,
    ) -> Option<YearClimate>;
}

#[cfg(test)]
mod tests {
    use super::archive::tests::{archive, two_day_months};
    use super::*;
    use approx::assert_relative_eq;

    fn reference() -> ClimateReference {
        ClimateReference {
            cpdd: 50.0,
            winter_snow: 10.0,
            summer_snow: 5.0,
            monthly_temperature: [1.0; MONTHS],
            monthly_snow: [0.5; MONTHS],
        }
    }

    #[test]
    fn test_anomalies_subtract_reference() {
        let a = archive(vec![two_day_months(2030, 3.0, 0.0, 1.0)]);
        let y = a.year_climate(2030, 0, 3000.0, &reference()).unwrap();
        assert_relative_eq!(y.anomalies.cpdd, 72.0 - 50.0);
        assert_relative_eq!(y.anomalies.winter_snow, -10.0);
        assert_relative_eq!(y.anomalies.summer_snow, -5.0);
        assert!(y.anomalies.monthly_temperature.iter().all(|&t| (t - 2.0).abs() < 1e-12));
        assert!(y.anomalies.monthly_snow.iter().all(|&s| (s + 0.5).abs() < 1e-12));
        assert_relative_eq!(y.raw.winter_rain, 12.0);
        assert_relative_eq!(y.raw.summer_cpdd, 36.0);
    }

    #[test]
    fn test_missing_year_ends_horizon() {
        let a = archive(vec![two_day_months(2030, 3.0, 0.0, 1.0)]);
        assert!(a.year_climate(2031, 0, 3000.0, &reference()).is_none());
    }

    #[test]
    fn test_references_from_json() {
        let refs: ClimateReferences = serde_json::from_str(
            r#"{"G006934E45883N": {"cpdd": 1.0, "winter_snow": 2.0, "summer_snow": 3.0,
                "monthly_temperature": [0,0,0,0,0,0,0,0,0,0,0,0],
                "monthly_snow": [1,1,1,1,1,1,1,1,1,1,1,1]}}"#,
        )
        .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs.get("G006934E45883N").unwrap().summer_snow, 3.0);
        assert!(refs.get("missing").is_none());
    }
}
