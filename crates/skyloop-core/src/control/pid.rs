//! Single-axis PID
//!
//! u = Kp·e + Ki·∫e dt − Kd·dy/dt
//!
//! The integral accumulator is clamped to `integral_limit` after every
//! update, the derivative acts on the measurement y rather than the error,
//! and the final output is clamped to `output_limit`. There is no hidden
//! state besides the accumulator and the previous measurement, so identical
//! input and dt sequences give bit-identical outputs.

use serde::{Deserialize, Serialize};

use crate::error::FlightError;
use crate::math::wrap_angle;

/// PID gains and limits for one axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PidGains {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Bound on |∫e dt|
    pub integral_limit: f64,
    /// Bound on |u|
    pub output_limit: f64,
}

impl PidGains {
    pub const fn new(kp: f64, ki: f64, kd: f64, integral_limit: f64, output_limit: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral_limit,
            output_limit,
        }
    }

    /// Proportional-only gains with the given output bound
    pub const fn proportional(kp: f64, output_limit: f64) -> Self {
        Self::new(kp, 0.0, 0.0, 0.0, output_limit)
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), FlightError> {
        let fields = [
            ("kp", self.kp),
            ("ki", self.ki),
            ("kd", self.kd),
            ("integral_limit", self.integral_limit),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(FlightError::ConfigInvalid(format!(
                    "{name}.{field} must be finite and non-negative, got {value}"
                )));
            }
        }
        if !self.output_limit.is_finite() || self.output_limit <= 0.0 {
            return Err(FlightError::ConfigInvalid(format!(
                "{name}.output_limit must be positive, got {}",
                self.output_limit
            )));
        }
        Ok(())
    }
}

/// Result of one PID update, with the individual terms for telemetry
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidOutput {
    /// Clamped output
    pub output: f64,
    /// Sum of the terms before output clamping
    pub unclamped: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

/// PID controller for one axis
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    /// ∫e dt, always within ±integral_limit
    integral: f64,
    prev_measurement: Option<f64>,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_measurement: None,
        }
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    /// Current integral accumulator ∫e dt
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Update with a linear error
    pub fn update(&mut self, setpoint: f64, measurement: f64, dt: f64) -> PidOutput {
        let delta = self.prev_measurement.map(|prev| measurement - prev);
        self.step(setpoint - measurement, measurement, delta, dt)
    }

    /// Update with an angular error, wrapped to (-π, π]
    ///
    /// The measurement change is wrapped as well, so crossing ±π does not
    /// produce a derivative kick.
    pub fn update_angle(&mut self, setpoint: f64, measurement: f64, dt: f64) -> PidOutput {
        let delta = self.prev_measurement.map(|prev| wrap_angle(measurement - prev));
        self.step(wrap_angle(setpoint - measurement), measurement, delta, dt)
    }

    fn step(&mut self, error: f64, measurement: f64, delta: Option<f64>, dt: f64) -> PidOutput {
        let g = self.gains;
        let p = g.kp * error;

        let mut d = 0.0;
        if dt > 0.0 && dt.is_finite() && error.is_finite() {
            self.integral = (self.integral + error * dt).clamp(-g.integral_limit, g.integral_limit);
            if let Some(delta) = delta {
                d = -g.kd * delta / dt;
            }
        }
        let i = g.ki * self.integral;

        if measurement.is_finite() {
            self.prev_measurement = Some(measurement);
        }

        let unclamped = p + i + d;
        PidOutput {
            output: unclamped.clamp(-g.output_limit, g.output_limit),
            unclamped,
            p,
            i,
            d,
        }
    }

    /// Clear the integral and derivative history
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_measurement = None;
    }
}
