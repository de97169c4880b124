//! Daily forcing archive held in memory for the whole batch.
//!
//! One [`ForcingYear`] per hydrological year (October to September). Every
//! daily field is a `days × points` grid; `months[d]` is the calendar month of
//! day `d`.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::FormatError;

use super::lapse_rate::{partition, positive_degrees, temperature_at};
use super::{ClimateAnomalyProvider, ClimateReference, YearClimate, MONTHS};

/// Grid point metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForcingPoint {
    pub altitude: f64,
    pub massif: i64,
    /// Slope aspect in degrees; absent for flat or aspect-free grids.
    #[serde(default)]
    pub aspect: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcingYear {
    /// Hydrological year, named after the year it ends in.
    pub year: i32,
    pub months: Vec<u8>,
    /// Daily mean temperature [°C].
    pub temperature: Array2<f64>,
    /// Daily snowfall [mm w.e.].
    pub snow: Array2<f64>,
    /// Daily rainfall [mm w.e.].
    pub rain: Array2<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyForcingArchive {
    pub points: Vec<ForcingPoint>,
    pub years: Vec<ForcingYear>,
}

/// Seasonal and monthly climate at the glacier surface for one year.
#[derive(Debug, Clone, PartialEq)]
pub struct GlacierClimate {
    pub cpdd: f64,
    pub winter_cpdd: f64,
    pub summer_cpdd: f64,
    pub winter_snow: f64,
    pub summer_snow: f64,
    pub winter_rain: f64,
    pub summer_rain: f64,
    pub monthly_temperature: [f64; MONTHS],
    pub monthly_snow: [f64; MONTHS],
}

#[inline]
fn is_winter(month: u8) -> bool {
    month >= 10 || month <= 3
}

impl DailyForcingArchive {
    /// Check every year's grids against the point list.
    pub fn validate(&mut self) -> Result<(), FormatError> {
        let n = self.points.len();
        for y in &self.years {
            let days = y.months.len();
            for (name, grid) in [("temperature", &y.temperature), ("snow", &y.snow), ("rain", &y.rain)] {
                if grid.dim() != (days, n) {
                    return Err(FormatError::Year {
                        year: y.year,
                        source: Box::new(FormatError::Shape {
                            name,
                            found: grid.dim(),
                            expected: (days, n),
                        }),
                    });
                }
            }
            if let Some(&month) = y.months.iter().find(|&&m| !(1..=12).contains(&m)) {
                return Err(FormatError::InvalidMonth { year: y.year, month });
            }
        }
        self.years.sort_by_key(|y| y.year);
        Ok(())
    }

    pub fn year(&self, year: i32) -> Option<&ForcingYear> {
        self.years
            .binary_search_by_key(&year, |y| y.year)
            .ok()
            .map(|i| &self.years[i])
    }

    /// Point of the glacier's massif closest in altitude; restricted to the
    /// glacier's aspect when the grid resolves aspects.
    pub fn forcing_index(&self, massif: i64, altitude: f64, aspect_deg: Option<f64>) -> Option<usize> {
        let in_massif: Vec<usize> = (0..self.points.len())
            .filter(|&i| self.points[i].massif == massif)
            .collect();
        let same_aspect: Vec<usize> = match aspect_deg {
            Some(a) => in_massif
                .iter()
                .copied()
                .filter(|&i| self.points[i].aspect == Some(a))
                .collect(),
            None => Vec::new(),
        };
        let candidates = if same_aspect.is_empty() { &in_massif } else { &same_aspect };

        let mut best: Option<(usize, f64)> = None;
        for &i in candidates {
            let diff = (self.points[i].altitude - altitude).abs();
            if best.map_or(true, |(_, d)| diff < d) {
                best = Some((i, diff));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Climate at `mean_elevation` from point `index`. `None` when the year is
    /// missing or does not cover twelve months.
    pub fn glacier_climate(&self, year: i32, index: usize, mean_elevation: f64) -> Option<GlacierClimate> {
        let point = self.points.get(index)?;
        let fy = self.year(year)?;
        aggregate(
            &fy.months,
            fy.temperature.column(index),
            fy.snow.column(index),
            fy.rain.column(index),
            point.altitude,
            mean_elevation,
        )
    }
}

fn aggregate(
    months: &[u8],
    temperature: ArrayView1<f64>,
    snow: ArrayView1<f64>,
    rain: ArrayView1<f64>,
    point_altitude: f64,
    glacier_altitude: f64,
) -> Option<GlacierClimate> {
    let mut c = GlacierClimate {
        cpdd: 0.0,
        winter_cpdd: 0.0,
        summer_cpdd: 0.0,
        winter_snow: 0.0,
        summer_snow: 0.0,
        winter_rain: 0.0,
        summer_rain: 0.0,
        monthly_temperature: [0.0; MONTHS],
        monthly_snow: [0.0; MONTHS],
    };
    // (month, temperature sum, days, snow sum) in chronological order
    let mut monthly: Vec<(u8, f64, usize, f64)> = Vec::with_capacity(MONTHS);

    for (d, &month) in months.iter().enumerate() {
        let t = temperature_at(temperature[d], point_altitude, glacier_altitude);
        let (s, r) = partition(t, snow[d], rain[d]);
        let pdd = positive_degrees(t);
        c.cpdd += pdd;
        if is_winter(month) {
            c.winter_cpdd += pdd;
            c.winter_snow += s;
            c.winter_rain += r;
        } else {
            c.summer_cpdd += pdd;
            c.summer_snow += s;
            c.summer_rain += r;
        }
        match monthly.last_mut() {
            Some(m) if m.0 == month => {
                m.1 += t;
                m.2 += 1;
                m.3 += s;
            }
            _ => monthly.push((month, t, 1, s)),
        }
    }

    if monthly.len() != MONTHS {
        return None;
    }
    for (i, (_, t_sum, days, s_sum)) in monthly.into_iter().enumerate() {
        c.monthly_temperature[i] = t_sum / days as f64;
        c.monthly_snow[i] = s_sum;
    }
    Some(c)
}

impl ClimateAnomalyProvider for DailyForcingArchive {
    fn year_climate(
        &self,
        year: i32,
        index: usize,
        mean_elevation: f64,
        reference: &ClimateReference,
    ) -> Option<YearClimate> {
        self.glacier_climate(year, index, mean_elevation)
            .map(|c| YearClimate::from_glacier_climate(&c, reference))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// One point at 3000 m, two days per month from October to September.
    pub(crate) fn two_day_months(year: i32, temp: f64, snow: f64, rain: f64) -> ForcingYear {
        let months: Vec<u8> = [10u8, 11, 12, 1, 2, 3, 4, 5, 6, 7, 8, 9]
            .iter()
            .flat_map(|&m| [m, m])
            .collect();
        let days = months.len();
        ForcingYear {
            year,
            months,
            temperature: Array2::from_elem((days, 1), temp),
            snow: Array2::from_elem((days, 1), snow),
            rain: Array2::from_elem((days, 1), rain),
        }
    }

    pub(crate) fn archive(years: Vec<ForcingYear>) -> DailyForcingArchive {
        let mut a = DailyForcingArchive {
            points: vec![ForcingPoint {
                altitude: 3000.0,
                massif: 3,
                aspect: None,
            }],
            years,
        };
        a.validate().unwrap();
        a
    }

    #[test]
    fn test_warm_year_has_no_snow() {
        let a = archive(vec![two_day_months(2020, 4.0, 10.0, 2.0)]);
        let c = a.glacier_climate(2020, 0, 3000.0).unwrap();
        assert_relative_eq!(c.cpdd, 96.0);
        assert_relative_eq!(c.winter_cpdd, 48.0);
        assert_eq!(c.winter_snow + c.summer_snow, 0.0);
        assert_relative_eq!(c.summer_rain, 24.0);
        assert!(c.monthly_temperature.iter().all(|&t| t == 4.0));
    }

    #[test]
    fn test_lapse_rate_turns_rain_to_snow() {
        let a = archive(vec![two_day_months(2020, 1.0, 1.0, 2.0)]);
        // 500 m above the point: 1 - 3 = -2 °C
        let c = a.glacier_climate(2020, 0, 3500.0).unwrap();
        assert_eq!(c.cpdd, 0.0);
        assert_relative_eq!(c.winter_snow, 36.0);
        assert_relative_eq!(c.monthly_snow[0], 6.0);
        assert_eq!(c.winter_rain + c.summer_rain, 0.0);
        assert_relative_eq!(c.monthly_temperature[5], -2.0);
    }

    #[test]
    fn test_incomplete_year_is_none() {
        let mut y = two_day_months(2099, 0.0, 0.0, 0.0);
        y.months.truncate(20);
        y.temperature = Array2::zeros((20, 1));
        y.snow = Array2::zeros((20, 1));
        y.rain = Array2::zeros((20, 1));
        let a = archive(vec![y]);
        assert!(a.glacier_climate(2099, 0, 3000.0).is_none());
        assert!(a.glacier_climate(2100, 0, 3000.0).is_none());
    }

    #[test]
    fn test_forcing_index_nearest_in_massif() {
        let mut a = archive(Vec::new());
        a.points = vec![
            ForcingPoint { altitude: 2400.0, massif: 3, aspect: None },
            ForcingPoint { altitude: 2700.0, massif: 3, aspect: None },
            ForcingPoint { altitude: 2800.0, massif: 4, aspect: None },
            ForcingPoint { altitude: 3000.0, massif: 3, aspect: None },
        ];
        assert_eq!(a.forcing_index(3, 2790.0, None), Some(1));
        assert_eq!(a.forcing_index(4, 1000.0, None), Some(2));
        assert_eq!(a.forcing_index(9, 2790.0, None), None);
    }

    #[test]
    fn test_forcing_index_prefers_aspect() {
        let mut a = archive(Vec::new());
        a.points = vec![
            ForcingPoint { altitude: 2700.0, massif: 3, aspect: Some(0.0) },
            ForcingPoint { altitude: 2400.0, massif: 3, aspect: Some(180.0) },
        ];
        assert_eq!(a.forcing_index(3, 2700.0, Some(180.0)), Some(1));
        assert_eq!(a.forcing_index(3, 2700.0, Some(90.0)), Some(0));
    }

    #[test]
    fn test_validate_rejects_shape_mismatch() {
        let mut y = two_day_months(2020, 0.0, 0.0, 0.0);
        y.snow = Array2::zeros((3, 1));
        let mut a = DailyForcingArchive {
            points: vec![ForcingPoint { altitude: 1.0, massif: 1, aspect: None }],
            years: vec![y],
        };
        let err = a.validate().unwrap_err();
        assert!(matches!(
            err,
            FormatError::Year { year: 2020, ref source } if matches!(**source, FormatError::Shape { name: "snow", .. })
        ));
    }
}
