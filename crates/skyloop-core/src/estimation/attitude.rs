//! Complementary attitude filter (Mahony)
//!
//! The gyro rate is integrated over the measured sample interval and
//! corrected by the error between the measured gravity direction
//! (accelerometer) and the direction predicted by the current attitude:
//!
//! e = â × v̂,   v̂ = R(q)ᵀ e_z
//! ω' = ω + Kp·e + Ki·∫e dt
//!
//! The integral term doubles as a running gyro bias estimate.

use nalgebra::{UnitQuaternion, Vector3};

use crate::math::{integrate_body_rate, rotate_vector_inverse};
use crate::GRAVITY;

/// Mahony complementary filter
#[derive(Debug, Clone)]
pub struct AttitudeFilter {
    q: UnitQuaternion<f64>,
    kp: f64,
    ki: f64,
    /// Accelerometer corrections are skipped when | |a|/g − 1 | exceeds this
    accel_rejection: f64,
    integral: Vector3<f64>,
}

impl AttitudeFilter {
    pub fn new(kp: f64, ki: f64, accel_rejection: f64) -> Self {
        Self {
            q: UnitQuaternion::identity(),
            kp,
            ki,
            accel_rejection,
            integral: Vector3::zeros(),
        }
    }

    /// Current attitude (body to world)
    pub fn attitude(&self) -> UnitQuaternion<f64> {
        self.q
    }

    /// Gyro bias learned by the integral term [rad/s]
    pub fn gyro_bias(&self) -> Vector3<f64> {
        -self.integral
    }

    /// Level the filter from a stationary accelerometer reading
    ///
    /// Roll and pitch come from the gravity direction; yaw is zero.
    pub fn align(&mut self, accel: &Vector3<f64>) {
        if accel.norm() <= f64::EPSILON {
            return;
        }
        let roll = accel.y.atan2(accel.z);
        let pitch = (-accel.x).atan2((accel.y * accel.y + accel.z * accel.z).sqrt());
        self.q = UnitQuaternion::from_euler_angles(roll, pitch, 0.0);
        self.integral = Vector3::zeros();
    }

    /// Advance by `dt` seconds
    ///
    /// # Arguments
    /// * `gyro` - Body angular rate [rad/s]
    /// * `accel` - Body specific force [m/s²]
    /// * `dt` - Measured time since the previous update [s]
    pub fn update(&mut self, gyro: &Vector3<f64>, accel: &Vector3<f64>, dt: f64) {
        if dt <= 0.0 || !dt.is_finite() {
            return;
        }

        let mut omega = *gyro;

        let norm = accel.norm();
        if norm > f64::EPSILON && (norm / GRAVITY - 1.0).abs() <= self.accel_rejection {
            let measured = accel / norm;
            let predicted = rotate_vector_inverse(&self.q, &Vector3::z());
            let error = measured.cross(&predicted);

            if self.ki > 0.0 {
                self.integral += error * (self.ki * dt);
            } else {
                self.integral = Vector3::zeros();
            }
            omega += error * self.kp + self.integral;
        } else {
            omega += self.integral;
        }

        self.q = integrate_body_rate(&self.q, &omega, dt);
    }

    pub fn reset(&mut self) {
        self.q = UnitQuaternion::identity();
        self.integral = Vector3::zeros();
    }
}
