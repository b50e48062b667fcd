//! Cascaded flight controller
//!
//! Horizontal: position error → velocity setpoint (P, limited by max speed)
//! → velocity PIDs → world acceleration → roll/pitch setpoints (limited by
//! max tilt) → roll/pitch PIDs.
//!
//! Vertical: altitude PID → collective offset about the hover throttle,
//! compensated for tilt.
//!
//! Heading: wrapped yaw PID.

use std::sync::Arc;

use nalgebra::Vector2;

use super::pid::Pid;
use super::{ControlOutput, ControlReference, ReferenceMode};
use crate::config::FlightConfig;
use crate::estimation::StateEstimate;
use crate::math::world_to_heading;
use crate::supervisor::MissionState;
use crate::GRAVITY;

/// Altitude setpoint in velocity mode stays within this distance of the estimate [m]
const ALTITUDE_SETPOINT_LEAD: f64 = 1.0;

/// Lower bound on cos(roll)·cos(pitch) in the thrust tilt compensation
const MIN_TILT_COMPENSATION: f64 = 0.5;

/// Cascaded flight controller
#[derive(Debug, Clone)]
pub struct FlightController {
    config: Arc<FlightConfig>,
    altitude: Pid,
    roll: Pid,
    pitch: Pid,
    yaw: Pid,
    velocity_east: Pid,
    velocity_north: Pid,
    /// Altitude setpoint integrated from the climb rate in velocity mode
    altitude_setpoint: Option<f64>,
    last_mode: Option<ReferenceMode>,
}

impl FlightController {
    pub fn new(config: Arc<FlightConfig>) -> Self {
        let gains = &config.gains;
        Self {
            altitude: Pid::new(gains.altitude),
            roll: Pid::new(gains.roll),
            pitch: Pid::new(gains.pitch),
            yaw: Pid::new(gains.yaw),
            velocity_east: Pid::new(gains.velocity),
            velocity_north: Pid::new(gains.velocity),
            altitude_setpoint: None,
            last_mode: None,
            config,
        }
    }

    /// Compute the thrust and torque demand for one cycle
    ///
    /// Outputs zero and clears all PID state unless the vehicle is
    /// `Airborne` or `Landing`.
    pub fn compute(
        &mut self,
        reference: &ControlReference,
        estimate: &StateEstimate,
        dt: f64,
        state: MissionState,
    ) -> ControlOutput {
        if !state.is_flying() {
            self.reset();
            return ControlOutput::zero();
        }

        if self.last_mode != Some(reference.mode) {
            self.altitude_setpoint = None;
            self.last_mode = Some(reference.mode);
        }

        let env = &self.config.envelope;
        let (roll, pitch, yaw) = estimate.euler();
        let position = estimate.position;
        let velocity = estimate.velocity;

        // Horizontal velocity setpoint
        let mut velocity_sp = match reference.mode {
            ReferenceMode::Position => {
                let error = reference.position.xy() - position.xy();
                error * self.config.gains.position_kp + reference.velocity.xy()
            }
            ReferenceMode::Velocity => reference.velocity.xy(),
        };
        let speed = velocity_sp.norm();
        if speed > env.max_speed {
            velocity_sp *= env.max_speed / speed;
        }

        let accel_world = Vector2::new(
            self.velocity_east.update(velocity_sp.x, velocity.x, dt).output,
            self.velocity_north.update(velocity_sp.y, velocity.y, dt).output,
        );

        // Forward acceleration needs nose-down (positive) pitch, leftward
        // acceleration needs a left bank (negative roll)
        let accel_heading = world_to_heading(&accel_world, yaw);
        let pitch_sp = (accel_heading.x / GRAVITY).atan().clamp(-env.max_tilt, env.max_tilt);
        let roll_sp = (-accel_heading.y / GRAVITY).atan().clamp(-env.max_tilt, env.max_tilt);

        let roll_torque = self.roll.update(roll_sp, roll, dt).output;
        let pitch_torque = self.pitch.update(pitch_sp, pitch, dt).output;
        let yaw_torque = self.yaw.update_angle(reference.heading, yaw, dt).output;

        // Vertical
        let altitude_sp = match reference.mode {
            ReferenceMode::Position => reference.position.z,
            ReferenceMode::Velocity => {
                let climb = reference.velocity.z.clamp(-env.max_climb_rate, env.max_climb_rate);
                let base = self.altitude_setpoint.unwrap_or(position.z);
                let next = (base + climb * dt.max(0.0)).clamp(
                    position.z - ALTITUDE_SETPOINT_LEAD,
                    position.z + ALTITUDE_SETPOINT_LEAD,
                );
                self.altitude_setpoint = Some(next);
                next
            }
        }
        .min(env.max_altitude);

        let collective = self.config.hover_throttle + self.altitude.update(altitude_sp, position.z, dt).output;
        let tilt = (roll.cos() * pitch.cos()).max(MIN_TILT_COMPENSATION);

        ControlOutput::new(collective / tilt, roll_torque, pitch_torque, yaw_torque).clamped()
    }

    /// Current velocity-mode altitude setpoint, if any
    pub fn altitude_setpoint(&self) -> Option<f64> {
        self.altitude_setpoint
    }

    /// Clear every axis
    pub fn reset(&mut self) {
        self.altitude.reset();
        self.roll.reset();
        self.pitch.reset();
        self.yaw.reset();
        self.velocity_east.reset();
        self.velocity_north.reset();
        self.altitude_setpoint = None;
        self.last_mode = None;
    }
}
