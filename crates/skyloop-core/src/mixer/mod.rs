//! Motor mixing
//!
//! Each motor i has a row mᵢ = [tᵢ, rᵢ, pᵢ, yᵢ] and receives
//!
//! uᵢ = tᵢ·T + rᵢ·τ_roll + pᵢ·τ_pitch + yᵢ·τ_yaw
//!
//! Saturation is resolved without clipping motors independently:
//!
//! - Low side (some uᵢ < 0): the torque demand is shrunk by the largest
//!   factor k ∈ [0, 1] that keeps every motor at or above zero. Collective
//!   thrust wins over attitude authority.
//! - High side (some uᵢ > 1): every motor is divided by max uᵢ, so the
//!   ratios between motors, and with them the torque balance, are kept.

use nalgebra::Vector4;
use serde::{Deserialize, Serialize};

use crate::control::ControlOutput;
use crate::error::FlightError;

/// Most motors a custom frame may declare
pub const MAX_MOTORS: usize = 12;

/// Roll/pitch column magnitude of the built-in frames
const TORQUE_COEFF: f64 = 0.25;

/// Airframe geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameKind {
    /// Four motors on diagonal arms: front-right, rear-left, front-left, rear-right
    QuadX,
    /// Four motors on the body axes: front, rear, left, right
    QuadPlus,
    /// Six motors at 30°, 90°, ... 330° from the nose
    HexX,
    /// Explicit mixing rows [thrust, roll, pitch, yaw], one per motor
    Custom { rows: Vec<[f64; 4]> },
}

impl FrameKind {
    pub fn motor_count(&self) -> usize {
        match self {
            FrameKind::QuadX | FrameKind::QuadPlus => 4,
            FrameKind::HexX => 6,
            FrameKind::Custom { rows } => rows.len(),
        }
    }

    /// Mixing rows of this frame
    pub fn rows(&self) -> Vec<Vector4<f64>> {
        // (arm angle from the nose, counter-clockwise [deg], +1 clockwise prop / -1 counter-clockwise)
        let geometry: &[(f64, f64)] = match self {
            FrameKind::QuadX => &[(-45.0, -1.0), (135.0, -1.0), (45.0, 1.0), (-135.0, 1.0)],
            FrameKind::QuadPlus => &[(0.0, -1.0), (180.0, -1.0), (90.0, 1.0), (-90.0, 1.0)],
            FrameKind::HexX => &[
                (30.0, 1.0),
                (90.0, -1.0),
                (150.0, 1.0),
                (-150.0, -1.0),
                (-90.0, 1.0),
                (-30.0, -1.0),
            ],
            FrameKind::Custom { rows } => {
                return rows.iter().map(|r| Vector4::new(r[0], r[1], r[2], r[3])).collect();
            }
        };
        rows_from_geometry(geometry)
    }

    pub fn validate(&self) -> Result<(), FlightError> {
        let FrameKind::Custom { rows } = self else {
            return Ok(());
        };
        if rows.is_empty() || rows.len() > MAX_MOTORS {
            return Err(FlightError::ConfigInvalid(format!(
                "mixer.frame must declare 1 to {MAX_MOTORS} motors, got {}",
                rows.len()
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.iter().any(|c| !c.is_finite()) {
                return Err(FlightError::ConfigInvalid(format!(
                    "mixer row {i} has non-finite coefficients"
                )));
            }
            if row[0] <= 0.0 {
                return Err(FlightError::ConfigInvalid(format!(
                    "mixer row {i} thrust coefficient must be positive, got {}",
                    row[0]
                )));
            }
        }
        Ok(())
    }
}

/// Rows from arm angles and prop directions
///
/// A motor on the left (positive y) lifts that side for a positive roll
/// torque (bank right); a motor behind the centre (negative x) lifts the
/// tail for a positive pitch torque (nose down); clockwise props speed up
/// for a positive (counter-clockwise) yaw torque.
fn rows_from_geometry(geometry: &[(f64, f64)]) -> Vec<Vector4<f64>> {
    let raw: Vec<(f64, f64, f64)> = geometry
        .iter()
        .map(|&(angle, spin)| {
            let (s, c) = angle.to_radians().sin_cos();
            (s, -c, spin)
        })
        .collect();

    let roll_max = raw.iter().fold(0.0f64, |m, r| m.max(r.0.abs()));
    let pitch_max = raw.iter().fold(0.0f64, |m, r| m.max(r.1.abs()));

    raw.into_iter()
        .map(|(roll, pitch, yaw)| {
            Vector4::new(
                1.0,
                TORQUE_COEFF * roll / roll_max,
                TORQUE_COEFF * pitch / pitch_max,
                TORQUE_COEFF * yaw,
            )
        })
        .collect()
}

/// Per-motor throttles for one control cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    /// Throttle per motor, each in [0, 1]
    pub throttles: Vec<f64>,
    /// Time of the estimate this command was computed from [s]
    pub timestamp: f64,
}

impl ActuatorCommand {
    /// Build a command for a frame with `motor_count` motors
    ///
    /// Values are clamped to [0, 1]; NaN becomes 0.
    pub fn new(throttles: Vec<f64>, motor_count: usize, timestamp: f64) -> Result<Self, FlightError> {
        if throttles.len() != motor_count {
            return Err(FlightError::ActuatorDispatchFailure(format!(
                "command has {} throttles for a {motor_count}-motor frame",
                throttles.len()
            )));
        }
        Ok(Self {
            throttles: throttles.into_iter().map(clamp_throttle).collect(),
            timestamp,
        })
    }

    /// All motors stopped
    pub fn zero(motor_count: usize, timestamp: f64) -> Self {
        Self {
            throttles: vec![0.0; motor_count],
            timestamp,
        }
    }

    pub fn motor_count(&self) -> usize {
        self.throttles.len()
    }

    pub fn is_zero(&self) -> bool {
        self.throttles.iter().all(|t| *t == 0.0)
    }
}

fn clamp_throttle(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// How a mix was brought back into range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Saturation {
    /// Factor applied to the torque demand for the low side
    pub torque_scale: f64,
    /// Factor applied to every motor for the high side
    pub output_scale: f64,
}

impl Saturation {
    pub fn none() -> Self {
        Self {
            torque_scale: 1.0,
            output_scale: 1.0,
        }
    }

    pub fn is_saturated(&self) -> bool {
        self.torque_scale < 1.0 || self.output_scale < 1.0
    }
}

/// Result of one mix
#[derive(Debug, Clone, PartialEq)]
pub struct MixOutput {
    pub command: ActuatorCommand,
    pub saturation: Saturation,
}

/// Maps thrust and torques to motor throttles
#[derive(Debug, Clone)]
pub struct MotorMixer {
    rows: Vec<Vector4<f64>>,
}

impl MotorMixer {
    pub fn new(frame: &FrameKind) -> Result<Self, FlightError> {
        frame.validate()?;
        Ok(Self { rows: frame.rows() })
    }

    pub fn motor_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vector4<f64>] {
        &self.rows
    }

    /// Linear mix without any saturation handling
    pub fn mix_unsaturated(&self, output: &ControlOutput) -> Vec<f64> {
        let u = Vector4::new(output.thrust, output.roll_torque, output.pitch_torque, output.yaw_torque);
        self.rows.iter().map(|row| row.dot(&u)).collect()
    }

    /// Mix and resolve saturation
    pub fn mix(&self, output: &ControlOutput, timestamp: f64) -> MixOutput {
        let mut saturation = Saturation::none();

        if !(output.thrust.is_finite()
            && output.roll_torque.is_finite()
            && output.pitch_torque.is_finite()
            && output.yaw_torque.is_finite())
        {
            return MixOutput {
                command: ActuatorCommand::zero(self.motor_count(), timestamp),
                saturation,
            };
        }

        let thrust = output.thrust.max(0.0);
        let torque = Vector4::new(0.0, output.roll_torque, output.pitch_torque, output.yaw_torque);

        let collective: Vec<f64> = self.rows.iter().map(|row| row[0] * thrust).collect();
        let differential: Vec<f64> = self.rows.iter().map(|row| row.dot(&torque)).collect();

        // Low side: largest k with collective + k·differential ≥ 0 everywhere
        let mut k: f64 = 1.0;
        for (c, d) in collective.iter().zip(&differential) {
            if c + d < 0.0 && *d < 0.0 {
                k = k.min(c / -d);
            }
        }
        let k = k.clamp(0.0, 1.0);
        saturation.torque_scale = k;

        let mut throttles: Vec<f64> = collective
            .iter()
            .zip(&differential)
            .map(|(c, d)| c + k * d)
            .collect();

        // High side: uniform scaling keeps motor ratios
        let max = throttles.iter().cloned().fold(0.0f64, f64::max);
        if max > 1.0 {
            saturation.output_scale = 1.0 / max;
            for t in &mut throttles {
                *t /= max;
            }
        }

        MixOutput {
            command: ActuatorCommand {
                throttles: throttles.into_iter().map(clamp_throttle).collect(),
                timestamp,
            },
            saturation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quad() -> MotorMixer {
        MotorMixer::new(&FrameKind::QuadX).unwrap()
    }

    #[test]
    fn test_pure_thrust_is_uniform() {
        for frame in [FrameKind::QuadX, FrameKind::QuadPlus, FrameKind::HexX] {
            let mixer = MotorMixer::new(&frame).unwrap();
            let out = mixer.mix(&ControlOutput::new(0.6, 0.0, 0.0, 0.0), 1.0);
            assert_eq!(out.command.motor_count(), frame.motor_count());
            for t in &out.command.throttles {
                assert_relative_eq!(*t, 0.6, epsilon = 1e-12);
            }
            assert!(!out.saturation.is_saturated());
        }
    }

    #[test]
    fn test_builtin_frames_are_torque_balanced() {
        for frame in [FrameKind::QuadX, FrameKind::QuadPlus, FrameKind::HexX] {
            let rows = frame.rows();
            for axis in 1..4 {
                let sum: f64 = rows.iter().map(|r| r[axis]).sum();
                assert_relative_eq!(sum, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_quad_x_torque_directions() {
        let mixer = quad();
        // FR, RL, FL, RR
        let roll = mixer.mix(&ControlOutput::new(0.5, 0.4, 0.0, 0.0), 0.0).command.throttles;
        assert!(roll[1] > roll[0] && roll[2] > roll[3], "left motors up for bank right");

        let pitch = mixer.mix(&ControlOutput::new(0.5, 0.0, 0.4, 0.0), 0.0).command.throttles;
        assert!(pitch[1] > pitch[0] && pitch[3] > pitch[2], "rear motors up for nose down");

        let yaw = mixer.mix(&ControlOutput::new(0.5, 0.0, 0.0, 0.4), 0.0).command.throttles;
        assert!(yaw[2] > yaw[0] && yaw[3] > yaw[1], "clockwise props up for counter-clockwise yaw");
    }

    #[test]
    fn test_high_saturation_preserves_ratios() {
        let mixer = quad();
        let output = ControlOutput::new(0.95, 0.6, -0.4, 0.3);
        let raw = mixer.mix_unsaturated(&output);
        assert!(raw.iter().all(|t| *t > 0.0));
        assert!(raw.iter().any(|t| *t > 1.0));

        let out = mixer.mix(&output, 0.0);
        assert!(out.saturation.output_scale < 1.0);
        let max = out.command.throttles.iter().cloned().fold(0.0, f64::max);
        assert_relative_eq!(max, 1.0, epsilon = 1e-12);

        for i in 0..raw.len() {
            for j in 0..raw.len() {
                assert_relative_eq!(
                    out.command.throttles[i] / out.command.throttles[j],
                    raw[i] / raw[j],
                    epsilon = 1e-9
                );
            }
        }
    }

    #[test]
    fn test_low_saturation_shrinks_torque() {
        let mixer = quad();
        let out = mixer.mix(&ControlOutput::new(0.1, 1.0, 0.0, 0.0), 0.0);
        assert!(out.saturation.torque_scale < 1.0);
        let min = out.command.throttles.iter().cloned().fold(f64::INFINITY, f64::min);
        assert_relative_eq!(min, 0.0, epsilon = 1e-12);

        // Collective preserved: mean stays at the thrust demand
        let mean: f64 = out.command.throttles.iter().sum::<f64>() / 4.0;
        assert_relative_eq!(mean, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_outputs_always_in_range() {
        let mixer = MotorMixer::new(&FrameKind::HexX).unwrap();
        let values = [-2.0, -1.0, -0.3, 0.0, 0.2, 0.7, 1.0, 3.0];
        for &t in &values {
            for &r in &values {
                for &y in &values {
                    let out = mixer.mix(&ControlOutput::new(t, r, -r, y), 0.0);
                    assert!(out.command.throttles.iter().all(|v| (0.0..=1.0).contains(v)));
                }
            }
        }
    }

    #[test]
    fn test_non_finite_demand_stops_motors() {
        let out = quad().mix(&ControlOutput::new(f64::NAN, 0.0, 0.0, 0.0), 0.0);
        assert!(out.command.is_zero());
    }

    #[test]
    fn test_command_motor_count_enforced() {
        assert!(ActuatorCommand::new(vec![0.5; 3], 4, 0.0).is_err());
        let cmd = ActuatorCommand::new(vec![1.5, -0.2, f64::NAN, 0.5], 4, 0.0).unwrap();
        assert_eq!(cmd.throttles, vec![1.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_custom_frame_validation() {
        assert!(FrameKind::Custom { rows: vec![] }.validate().is_err());
        assert!(FrameKind::Custom {
            rows: vec![[0.0, 0.1, 0.1, 0.1]]
        }
        .validate()
        .is_err());

        let frame = FrameKind::Custom {
            rows: vec![[1.0, 0.5, 0.0, 0.0], [1.0, -0.5, 0.0, 0.0]],
        };
        let mixer = MotorMixer::new(&frame).unwrap();
        let out = mixer.mix(&ControlOutput::new(0.5, 0.2, 0.0, 0.0), 0.0);
        assert_relative_eq!(out.command.throttles[0], 0.6, epsilon = 1e-12);
        assert_relative_eq!(out.command.throttles[1], 0.4, epsilon = 1e-12);
    }
}
