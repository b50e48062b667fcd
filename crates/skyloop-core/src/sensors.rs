//! Raw sensor samples
//!
//! A [`SensorSample`] is one timestamped capture from the sensor board:
//! accelerometer and gyroscope always, GPS and barometer when a new reading
//! from those slower sensors arrived since the previous capture.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::config::SensorLimits;
use crate::error::FlightError;

/// Geodetic GPS fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Latitude [deg]
    pub latitude: f64,
    /// Longitude [deg]
    pub longitude: f64,
    /// Altitude above mean sea level [m]
    pub altitude: f64,
}

impl GpsFix {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self { latitude, longitude, altitude }
    }

    fn check(&self) -> Result<(), FlightError> {
        let finite = self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.altitude.is_finite();
        if !finite || self.latitude.abs() > 90.0 || self.longitude.abs() > 180.0 {
            return Err(FlightError::SensorInvalid(format!(
                "gps fix out of range: lat {}, lon {}, alt {}",
                self.latitude, self.longitude, self.altitude
            )));
        }
        Ok(())
    }
}

/// One timestamped capture of the raw sensors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Capture time [s]
    pub timestamp: f64,
    /// Specific force, body frame [m/s²]
    pub accel: Vector3<f64>,
    /// Angular rate, body frame [rad/s]
    pub gyro: Vector3<f64>,
    /// GPS fix, when a new one arrived with this capture
    pub gps: Option<GpsFix>,
    /// Barometric altitude above mean sea level [m]
    pub baro: Option<f64>,
}

impl SensorSample {
    /// Create an IMU-only sample
    pub fn new(timestamp: f64, accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self {
            timestamp,
            accel,
            gyro,
            gps: None,
            baro: None,
        }
    }

    /// Stationary, level reading: gravity reaction on the accelerometer, no rotation
    pub fn at_rest(timestamp: f64) -> Self {
        Self::new(timestamp, Vector3::new(0.0, 0.0, crate::GRAVITY), Vector3::zeros())
    }

    pub fn with_gps(mut self, fix: GpsFix) -> Self {
        self.gps = Some(fix);
        self
    }

    pub fn with_baro(mut self, altitude: f64) -> Self {
        self.baro = Some(altitude);
        self
    }

    /// Check every reading against its physical range
    pub fn validate(&self, limits: &SensorLimits) -> Result<(), FlightError> {
        if !self.timestamp.is_finite() {
            return Err(FlightError::SensorInvalid("non-finite timestamp".into()));
        }

        if !self.accel.iter().all(|v| v.is_finite()) || self.accel.norm() > limits.max_accel {
            return Err(FlightError::SensorInvalid(format!(
                "accelerometer reading {:.2} m/s² exceeds {:.2} m/s²",
                self.accel.norm(),
                limits.max_accel
            )));
        }

        if !self.gyro.iter().all(|v| v.is_finite()) || self.gyro.amax() > limits.max_gyro_rate {
            return Err(FlightError::SensorInvalid(format!(
                "gyroscope reading {:.2} rad/s exceeds {:.2} rad/s",
                self.gyro.amax(),
                limits.max_gyro_rate
            )));
        }

        if let Some(fix) = &self.gps {
            fix.check()?;
        }

        if let Some(alt) = self.baro {
            if !alt.is_finite() || alt < limits.min_baro_altitude || alt > limits.max_baro_altitude {
                return Err(FlightError::SensorInvalid(format!(
                    "barometric altitude {alt} m out of range"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_rest_is_valid() {
        let sample = SensorSample::at_rest(0.0)
            .with_gps(GpsFix::new(47.0, 8.0, 400.0))
            .with_baro(400.0);
        assert!(sample.validate(&SensorLimits::default()).is_ok());
    }

    #[test]
    fn test_nan_gyro_rejected() {
        let sample = SensorSample::new(0.0, Vector3::new(0.0, 0.0, 9.81), Vector3::new(f64::NAN, 0.0, 0.0));
        assert!(matches!(
            sample.validate(&SensorLimits::default()),
            Err(FlightError::SensorInvalid(_))
        ));
    }

    #[test]
    fn test_accel_over_range_rejected() {
        let limits = SensorLimits::default();
        let sample = SensorSample::new(0.0, Vector3::new(0.0, 0.0, limits.max_accel * 2.0), Vector3::zeros());
        assert!(sample.validate(&limits).is_err());
    }

    #[test]
    fn test_gps_out_of_range_rejected() {
        let sample = SensorSample::at_rest(0.0).with_gps(GpsFix::new(91.0, 0.0, 0.0));
        assert!(sample.validate(&SensorLimits::default()).is_err());
    }

    #[test]
    fn test_baro_out_of_range_rejected() {
        let sample = SensorSample::at_rest(0.0).with_baro(-5000.0);
        assert!(sample.validate(&SensorLimits::default()).is_err());
    }
}
