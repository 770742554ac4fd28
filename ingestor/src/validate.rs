use crate::errors::{Error, Result};
use crate::model::TelemetrySample;

const FUEL_MIN: f64 = 0.0;
const FUEL_MAX: f64 = 100.0;
const LAT_MIN: f64 = -90.0;
const LAT_MAX: f64 = 90.0;
const LNG_MIN: f64 = -180.0;
const LNG_MAX: f64 = 180.0;
const SPEED_MIN: f64 = 0.0;
const SPEED_MAX: f64 = 400.0;
const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 150.0;

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(Error::Validation(format!(
            "{} {} out of range [{}, {}]",
            name, value, min, max
        )));
    }
    Ok(())
}

/// Validates a telemetry sample before it is persisted
pub fn validate(sample: &TelemetrySample) -> Result<()> {
    if sample.device_id <= 0 {
        return Err(Error::Validation(format!(
            "Device ID must be positive, got {}",
            sample.device_id
        )));
    }

    check_range("Fuel level", sample.fuel_level, FUEL_MIN, FUEL_MAX)?;
    check_range("Latitude", sample.lat, LAT_MIN, LAT_MAX)?;
    check_range("Longitude", sample.lng, LNG_MIN, LNG_MAX)?;
    check_range("Speed", sample.speed, SPEED_MIN, SPEED_MAX)?;
    check_range("Temperature", sample.temperature, TEMP_MIN, TEMP_MAX)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> TelemetrySample {
        TelemetrySample {
            device_id: 1,
            timestamp: Utc::now(),
            lat: 10.2,
            lng: -70.3,
            speed: 45.0,
            fuel_level: 60.0,
            temperature: 30.0,
        }
    }

    #[test]
    fn test_valid_sample() {
        assert!(validate(&sample()).is_ok());
    }

    #[test]
    fn test_invalid_fuel_level() {
        let mut s = sample();
        s.fuel_level = 120.0;
        assert!(validate(&s).is_err());

        s.fuel_level = -0.5;
        assert!(validate(&s).is_err());
    }

    #[test]
    fn test_fuel_bounds_are_inclusive() {
        let mut s = sample();
        s.fuel_level = 0.0;
        assert!(validate(&s).is_ok());
        s.fuel_level = 100.0;
        assert!(validate(&s).is_ok());
    }

    #[test]
    fn test_invalid_coordinates() {
        let mut s = sample();
        s.lat = 91.0;
        assert!(validate(&s).is_err());

        let mut s = sample();
        s.lng = -181.0;
        assert!(validate(&s).is_err());
    }

    #[test]
    fn test_nan_rejected() {
        let mut s = sample();
        s.speed = f64::NAN;
        assert!(validate(&s).is_err());
    }

    #[test]
    fn test_non_positive_device_id() {
        let mut s = sample();
        s.device_id = 0;
        assert!(matches!(validate(&s), Err(Error::Validation(_))));
    }
}
