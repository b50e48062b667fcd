//! Simulation configuration

use serde::{Deserialize, Serialize};

use skyloop_core::sensors::GpsFix;
use skyloop_core::FlightError;

use super::sensors::SensorModelConfig;
use super::vehicle::VehicleParams;

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Physics step [s]
    pub physics_dt: f64,
    /// Where the vehicle starts, resting on the ground
    pub home: GpsFix,
    pub vehicle: VehicleParams,
    pub sensors: SensorModelConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            physics_dt: 0.001, // 1 kHz
            home: GpsFix::new(47.3977, 8.5456, 488.0),
            vehicle: VehicleParams::default(),
            sensors: SensorModelConfig::default(),
        }
    }
}

impl SimConfig {
    /// Default vehicle with perfect sensors
    pub fn noiseless() -> Self {
        Self {
            sensors: SensorModelConfig::noiseless(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), FlightError> {
        if !(self.physics_dt > 0.0 && self.physics_dt <= 0.01) {
            return Err(FlightError::ConfigInvalid(format!(
                "physics_dt must be within (0, 0.01] s, got {}",
                self.physics_dt
            )));
        }
        let s = &self.sensors;
        let noise = [
            s.accel_noise,
            s.gyro_noise,
            s.baro_noise,
            s.gps_horizontal_noise,
            s.gps_vertical_noise,
        ];
        if noise.iter().any(|n| !n.is_finite() || *n < 0.0) {
            return Err(FlightError::ConfigInvalid("sensor noise must be finite and non-negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
        assert!(SimConfig::noiseless().validate().is_ok());
    }

    #[test]
    fn test_bad_step_rejected() {
        let config = SimConfig {
            physics_dt: 0.0,
            ..SimConfig::default()
        };
        assert!(matches!(config.validate(), Err(FlightError::ConfigInvalid(_))));
    }

    #[test]
    fn test_json_round_trip_of_defaults() {
        let json = serde_json::to_string(&SimConfig::noiseless()).unwrap();
        let parsed: SimConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sensors.accel_noise, 0.0);
        assert_eq!(parsed.vehicle.mass, 1.5);
    }
}
