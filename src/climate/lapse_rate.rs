/// Temperature lapse rate used to move forcing to the glacier surface [°C km⁻¹].
pub const LAPSE_RATE_C_PER_KM: f64 = 6.0;
/// Below this temperature precipitation falls as snow [°C].
pub const SNOW_RAIN_THRESHOLD_C: f64 = 0.0;

/// Temperature at the glacier's mean altitude from a forcing point at `point_altitude`.
#[inline]
pub fn temperature_at(point_temp_c: f64, point_altitude: f64, glacier_altitude: f64) -> f64 {
    point_temp_c + (point_altitude - glacier_altitude) / 1000.0 * LAPSE_RATE_C_PER_KM
}

/// Re-partition one day of precipitation at the adjusted temperature.
/// Warm days lose their snow, cold days turn rain into snow. Returns `(snow, rain)`.
#[inline]
pub fn partition(temp_c: f64, snow: f64, rain: f64) -> (f64, f64) {
    if temp_c > SNOW_RAIN_THRESHOLD_C {
        (0.0, rain)
    } else if temp_c < SNOW_RAIN_THRESHOLD_C {
        (snow + rain, 0.0)
    } else {
        (snow, rain)
    }
}

/// Positive part of a daily temperature, the CPDD contribution.
#[inline]
pub fn positive_degrees(temp_c: f64) -> f64 {
    temp_c.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lower_glacier_is_warmer() {
        assert_relative_eq!(temperature_at(-2.0, 3000.0, 2500.0), 1.0);
        assert_relative_eq!(temperature_at(-2.0, 2500.0, 3000.0), -5.0);
    }

    #[test]
    fn test_partition() {
        assert_eq!(partition(2.0, 5.0, 3.0), (0.0, 3.0));
        assert_eq!(partition(-2.0, 5.0, 3.0), (8.0, 0.0));
        assert_eq!(partition(0.0, 5.0, 3.0), (5.0, 3.0));
    }
}
