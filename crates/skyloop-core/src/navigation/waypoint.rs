//! Waypoints and mission storage
//!
//! A [`Mission`] is an ordered list of waypoints. Appending is allowed at
//! any time; every other edit requires the mission to be unlocked, which
//! the supervisor guarantees outside of flight. Every waypoint is checked
//! against the altitude envelope on entry.

use serde::{Deserialize, Serialize};

use crate::error::MissionError;

/// Geodetic waypoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Waypoint {
    /// Latitude [deg]
    pub latitude: f64,
    /// Longitude [deg]
    pub longitude: f64,
    /// Altitude above home [m]
    pub altitude: f64,
    /// Speed limit on the leg towards this waypoint [m/s]
    #[serde(default)]
    pub speed: Option<f64>,
}

impl Waypoint {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            speed: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Check coordinates, altitude envelope and speed constraint
    pub fn validate(&self, max_altitude: f64) -> Result<(), MissionError> {
        if !self.latitude.is_finite()
            || !self.longitude.is_finite()
            || self.latitude.abs() > 90.0
            || self.longitude.abs() > 180.0
        {
            return Err(MissionError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            });
        }
        if !self.altitude.is_finite() || self.altitude < 0.0 || self.altitude > max_altitude {
            return Err(MissionError::AltitudeOutOfEnvelope {
                altitude: self.altitude,
                max_altitude,
            });
        }
        if let Some(speed) = self.speed {
            if !speed.is_finite() || speed <= 0.0 {
                return Err(MissionError::InvalidSpeed(speed));
            }
        }
        Ok(())
    }
}

/// Ordered waypoint list
#[derive(Debug, Clone, PartialEq)]
pub struct Mission {
    waypoints: Vec<Waypoint>,
    max_altitude: f64,
    locked: bool,
}

impl Mission {
    /// Empty, unlocked mission bounded by `max_altitude`
    pub fn new(max_altitude: f64) -> Self {
        Self {
            waypoints: Vec::new(),
            max_altitude,
            locked: false,
        }
    }

    /// Build a mission, rejecting the first waypoint outside the envelope
    pub fn with_waypoints(
        max_altitude: f64,
        waypoints: impl IntoIterator<Item = Waypoint>,
    ) -> Result<Self, MissionError> {
        let mut mission = Self::new(max_altitude);
        for waypoint in waypoints {
            mission.push(waypoint)?;
        }
        Ok(mission)
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Waypoint> {
        self.waypoints.get(index)
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn max_altitude(&self) -> f64 {
        self.max_altitude
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Freeze everything but appends
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Append a waypoint; allowed in flight
    pub fn push(&mut self, waypoint: Waypoint) -> Result<(), MissionError> {
        waypoint.validate(self.max_altitude)?;
        self.waypoints.push(waypoint);
        Ok(())
    }

    pub fn insert(&mut self, index: usize, waypoint: Waypoint) -> Result<(), MissionError> {
        self.ensure_unlocked()?;
        if index > self.waypoints.len() {
            return Err(self.out_of_bounds(index));
        }
        waypoint.validate(self.max_altitude)?;
        self.waypoints.insert(index, waypoint);
        Ok(())
    }

    pub fn replace(&mut self, index: usize, waypoint: Waypoint) -> Result<Waypoint, MissionError> {
        self.ensure_unlocked()?;
        waypoint.validate(self.max_altitude)?;
        let len = self.waypoints.len();
        let slot = self
            .waypoints
            .get_mut(index)
            .ok_or(MissionError::IndexOutOfBounds { index, len })?;
        Ok(std::mem::replace(slot, waypoint))
    }

    pub fn remove(&mut self, index: usize) -> Result<Waypoint, MissionError> {
        self.ensure_unlocked()?;
        if index >= self.waypoints.len() {
            return Err(self.out_of_bounds(index));
        }
        Ok(self.waypoints.remove(index))
    }

    pub fn clear(&mut self) -> Result<(), MissionError> {
        self.ensure_unlocked()?;
        self.waypoints.clear();
        Ok(())
    }

    fn ensure_unlocked(&self) -> Result<(), MissionError> {
        if self.locked {
            Err(MissionError::Locked)
        } else {
            Ok(())
        }
    }

    fn out_of_bounds(&self, index: usize) -> MissionError {
        MissionError::IndexOutOfBounds {
            index,
            len: self.waypoints.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(altitude: f64) -> Waypoint {
        Waypoint::new(47.0, 8.0, altitude)
    }

    #[test]
    fn test_altitude_envelope() {
        let mut mission = Mission::new(100.0);
        assert!(mission.push(wp(0.0)).is_ok());
        assert!(mission.push(wp(100.0)).is_ok());
        assert_eq!(
            mission.push(wp(150.0)),
            Err(MissionError::AltitudeOutOfEnvelope {
                altitude: 150.0,
                max_altitude: 100.0
            })
        );
        assert!(mission.push(wp(-1.0)).is_err());
        assert_eq!(mission.len(), 2);
    }

    #[test]
    fn test_invalid_coordinates_and_speed() {
        let mut mission = Mission::new(100.0);
        assert!(matches!(
            mission.push(Waypoint::new(95.0, 0.0, 10.0)),
            Err(MissionError::InvalidCoordinates { .. })
        ));
        assert_eq!(
            mission.push(wp(10.0).with_speed(0.0)),
            Err(MissionError::InvalidSpeed(0.0))
        );
    }

    #[test]
    fn test_locked_mission_is_append_only() {
        let mut mission = Mission::with_waypoints(100.0, [wp(10.0), wp(20.0)]).unwrap();
        mission.lock();

        assert!(mission.push(wp(30.0)).is_ok());
        assert_eq!(mission.insert(0, wp(5.0)), Err(MissionError::Locked));
        assert_eq!(mission.replace(0, wp(5.0)), Err(MissionError::Locked));
        assert_eq!(mission.remove(0), Err(MissionError::Locked));
        assert_eq!(mission.clear(), Err(MissionError::Locked));
        assert_eq!(mission.len(), 3);

        mission.unlock();
        assert_eq!(mission.remove(0).map(|w| w.altitude), Ok(10.0));
        assert!(mission.insert(0, wp(5.0)).is_ok());
        assert_eq!(mission.get(0).map(|w| w.altitude), Some(5.0));
        assert!(mission.clear().is_ok());
        assert!(mission.is_empty());
    }

    #[test]
    fn test_index_bounds() {
        let mut mission = Mission::with_waypoints(100.0, [wp(10.0)]).unwrap();
        assert_eq!(
            mission.remove(3),
            Err(MissionError::IndexOutOfBounds { index: 3, len: 1 })
        );
        assert!(mission.insert(1, wp(20.0)).is_ok());
        assert!(mission.insert(5, wp(20.0)).is_err());
    }

    #[test]
    fn test_waypoint_json_speed_optional() {
        let w: Waypoint =
            serde_json::from_str(r#"{"latitude": 47.0, "longitude": 8.0, "altitude": 12.0}"#).unwrap();
        assert_eq!(w.speed, None);
        let w: Waypoint = serde_json::from_str(
            r#"{"latitude": 47.0, "longitude": 8.0, "altitude": 12.0, "speed": 2.5}"#,
        )
        .unwrap();
        assert_eq!(w.speed, Some(2.5));
    }
}
