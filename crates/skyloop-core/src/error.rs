//! Error kinds of the flight core
//!
//! `FlightError` covers the fault kinds that either stop the vehicle from
//! arming (`ConfigInvalid`) or escalate to the mission supervisor.
//! `MissionError` covers edits to the waypoint list, `ArmError` the
//! pre-arm checks.

use thiserror::Error;

use crate::supervisor::MissionState;

/// Flight core errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlightError {
    /// No sensor sample arrived within the configured timeout
    #[error("sensor stale: no sample for {gap:.3} s (timeout {timeout:.3} s)")]
    SensorStale { gap: f64, timeout: f64 },
    /// A sensor reading was out of its physical range
    #[error("sensor invalid: {0}")]
    SensorInvalid(String),
    /// An actuator command was not delivered within the cycle deadline
    #[error("actuator dispatch failed: {0}")]
    ActuatorDispatchFailure(String),
    /// A configuration parameter is out of bounds
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    /// The vehicle left the configured envelope
    #[error("geofence breach: {distance:.1} m from home at {altitude:.1} m altitude")]
    GeofenceBreach { distance: f64, altitude: f64 },
}

impl FlightError {
    /// Whether the supervisor has to react to this error with a failsafe
    pub fn escalates(&self) -> bool {
        matches!(
            self,
            FlightError::SensorStale { .. }
                | FlightError::SensorInvalid(_)
                | FlightError::GeofenceBreach { .. }
        )
    }
}

/// Waypoint list errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MissionError {
    #[error("waypoint altitude {altitude:.1} m outside envelope [0, {max_altitude:.1}] m")]
    AltitudeOutOfEnvelope { altitude: f64, max_altitude: f64 },
    #[error("waypoint coordinates out of range: lat {latitude}, lon {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
    #[error("waypoint speed {0} m/s must be positive")]
    InvalidSpeed(f64),
    #[error("mission is locked while in flight; only appending is allowed")]
    Locked,
    #[error("waypoint index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("waypoint {index} is {distance:.1} m from home, beyond the {radius:.1} m geofence")]
    OutsideGeofence { index: usize, distance: f64, radius: f64 },
}

/// Reasons the supervisor refuses to arm
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArmError {
    #[error("cannot arm while {0}")]
    NotIdle(MissionState),
    #[error(transparent)]
    Config(#[from] FlightError),
    #[error("state estimate not usable: {0}")]
    EstimateUnavailable(String),
    #[error("vehicle not on the ground: altitude {altitude:.2} m, speed {speed:.2} m/s")]
    NotOnGround { altitude: f64, speed: f64 },
    #[error("vehicle tilted {0:.2} rad beyond the arming limit")]
    Tilted(f64),
    #[error("mission rejected: {0}")]
    Mission(#[from] MissionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_kinds() {
        assert!(FlightError::SensorStale { gap: 1.0, timeout: 0.1 }.escalates());
        assert!(FlightError::SensorInvalid("nan".into()).escalates());
        assert!(FlightError::GeofenceBreach { distance: 500.0, altitude: 10.0 }.escalates());
        assert!(!FlightError::ActuatorDispatchFailure("late".into()).escalates());
        assert!(!FlightError::ConfigInvalid("gain".into()).escalates());
    }

    #[test]
    fn test_display() {
        let err = FlightError::SensorStale { gap: 0.25, timeout: 0.1 };
        assert_eq!(err.to_string(), "sensor stale: no sample for 0.250 s (timeout 0.100 s)");

        let err = MissionError::AltitudeOutOfEnvelope { altitude: 150.0, max_altitude: 100.0 };
        assert_eq!(
            err.to_string(),
            "waypoint altitude 150.0 m outside envelope [0, 100.0] m"
        );

        let err = ArmError::from(FlightError::ConfigInvalid("gains.roll.kp must be finite".into()));
        assert_eq!(err.to_string(), "invalid configuration: gains.roll.kp must be finite");

        let err = ArmError::NotIdle(MissionState::Airborne);
        assert_eq!(err.to_string(), "cannot arm while Airborne");
    }
}
