//! Control algorithms
//!
//! - Single-axis PID with anti-windup and derivative on measurement
//! - Cascaded flight controller: position → velocity → tilt → torque,
//!   altitude → collective thrust, heading → yaw torque

pub mod flight;
pub mod pid;

pub use flight::*;
pub use pid::*;

use serde::{Deserialize, Serialize};

use crate::Vec3;

/// Which part of a [`ControlReference`] the controller tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceMode {
    /// Track `position`, with `velocity` as feedforward
    Position,
    /// Track `velocity`; `position` only seeds the altitude setpoint
    Velocity,
}

/// Target for the current control cycle, local ENU frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlReference {
    /// Target position [m]
    pub position: Vec3,
    /// Target or feedforward velocity [m/s]
    pub velocity: Vec3,
    /// Target heading, counter-clockwise from East [rad]
    pub heading: f64,
    pub mode: ReferenceMode,
}

impl ControlReference {
    /// Hold a fixed position
    pub fn hold(position: Vec3, heading: f64) -> Self {
        Self {
            position,
            velocity: Vec3::zeros(),
            heading,
            mode: ReferenceMode::Position,
        }
    }

    /// Track a velocity starting from `position`
    pub fn velocity(position: Vec3, velocity: Vec3, heading: f64) -> Self {
        Self {
            position,
            velocity,
            heading,
            mode: ReferenceMode::Velocity,
        }
    }
}

/// Normalised thrust and torque demand
///
/// `thrust` ∈ [0, 1] is the collective throttle, the torques ∈ [-1, 1] are
/// body-frame (FLU) demands: positive roll banks right, positive pitch
/// pitches nose down, positive yaw turns counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlOutput {
    pub thrust: f64,
    pub roll_torque: f64,
    pub pitch_torque: f64,
    pub yaw_torque: f64,
}

impl ControlOutput {
    pub fn new(thrust: f64, roll_torque: f64, pitch_torque: f64, yaw_torque: f64) -> Self {
        Self {
            thrust,
            roll_torque,
            pitch_torque,
            yaw_torque,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Torque demand as a vector (roll, pitch, yaw)
    pub fn torque(&self) -> Vec3 {
        Vec3::new(self.roll_torque, self.pitch_torque, self.yaw_torque)
    }

    /// Clamp every channel to its normalised range
    pub fn clamped(&self) -> Self {
        Self {
            thrust: self.thrust.clamp(0.0, 1.0),
            roll_torque: self.roll_torque.clamp(-1.0, 1.0),
            pitch_torque: self.pitch_torque.clamp(-1.0, 1.0),
            yaw_torque: self.yaw_torque.clamp(-1.0, 1.0),
        }
    }
}
