use crate::climate::ClimateAnomalies;

/// Number of predictors every ensemble member expects.
pub const FEATURE_COUNT: usize = 34;

/// Location attributes of a glacier that never change during a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlacierSite {
    pub lon: f64,
    pub lat: f64,
    /// Aspect in degrees clockwise from north. The members were trained on
    /// the cosine of this value taken as is, without conversion to radians.
    pub aspect_deg: f64,
}

/// Geometry descriptors refreshed by the evolution loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Topography {
    pub mean_elevation: f64,
    pub max_elevation: f64,
    pub slope20: f64,
    pub area_km2: f64,
}

/// One glacier-year of predictors, in model order:
/// `cpdd, winter_snow, summer_snow, mean_alt, max_alt, slope20, area, lon, lat,
/// cos(aspect)`, then 12 monthly temperature and 12 monthly snow anomalies.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn assemble(anomalies: &ClimateAnomalies, topo: &Topography, site: &GlacierSite) -> Self {
        let mut v = [0.0; FEATURE_COUNT];
        v[0] = anomalies.cpdd;
        v[1] = anomalies.winter_snow;
        v[2] = anomalies.summer_snow;
        v[3] = topo.mean_elevation;
        v[4] = topo.max_elevation;
        v[5] = topo.slope20;
        v[6] = topo.area_km2;
        v[7] = site.lon;
        v[8] = site.lat;
        v[9] = site.aspect_deg.cos();
        v[10..22].copy_from_slice(&anomalies.monthly_temperature);
        v[22..34].copy_from_slice(&anomalies.monthly_snow);
        Self(v)
    }

    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn anomalies() -> ClimateAnomalies {
        ClimateAnomalies {
            cpdd: 120.0,
            winter_snow: -300.0,
            summer_snow: 40.0,
            monthly_temperature: [1.0; 12],
            monthly_snow: [2.0; 12],
        }
    }

    #[test]
    fn test_feature_order() {
        let topo = Topography {
            mean_elevation: 3000.0,
            max_elevation: 3500.0,
            slope20: 18.0,
            area_km2: 2.5,
        };
        let site = GlacierSite {
            lon: 6.9,
            lat: 45.9,
            aspect_deg: 337.5,
        };
        let f = FeatureVector::assemble(&anomalies(), &topo, &site);
        let v = f.as_slice();
        assert_eq!(v.len(), FEATURE_COUNT);
        assert_eq!(&v[..9], &[120.0, -300.0, 40.0, 3000.0, 3500.0, 18.0, 2.5, 6.9, 45.9]);
        assert_relative_eq!(v[9], 337.5f64.cos(), epsilon = 1e-12);
        assert!((v[9] - 337.5f64.to_radians().cos()).abs() > 0.5);
        assert!(v[10..22].iter().all(|&t| t == 1.0));
        assert!(v[22..].iter().all(|&s| s == 2.0));
        assert!(f.is_finite());
    }

    #[test]
    fn test_nan_feature_detected() {
        let mut a = anomalies();
        a.monthly_snow[11] = f64::NAN;
        let topo = Topography {
            mean_elevation: 3000.0,
            max_elevation: 3500.0,
            slope20: 18.0,
            area_km2: 2.5,
        };
        let site = GlacierSite { lon: 0.0, lat: 0.0, aspect_deg: 0.0 };
        assert!(!FeatureVector::assemble(&a, &topo, &site).is_finite());
    }
}
