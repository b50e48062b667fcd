//! Position/velocity Kalman filter for one axis
//!
//! State x = [p, v], driven by a measured acceleration:
//!
//! x⁺ = F x + B a,   F = [1 dt; 0 1],   B = [dt²/2; dt]
//!
//! with white-acceleration process noise Q = σₐ² B Bᵀ, and corrected by
//! position measurements (H = [1 0]).

use nalgebra::{Matrix2, Vector2};

/// Initial position/velocity variance before the first measurement
const INITIAL_VARIANCE: f64 = 100.0;

/// Kalman filter for one ENU axis
#[derive(Debug, Clone)]
pub struct AxisKalman {
    /// [position, velocity]
    x: Vector2<f64>,
    /// Covariance
    p: Matrix2<f64>,
    /// Acceleration noise std dev [m/s²]
    accel_noise: f64,
}

impl AxisKalman {
    pub fn new(accel_noise: f64) -> Self {
        Self {
            x: Vector2::zeros(),
            p: Matrix2::identity() * INITIAL_VARIANCE,
            accel_noise,
        }
    }

    pub fn position(&self) -> f64 {
        self.x[0]
    }

    pub fn velocity(&self) -> f64 {
        self.x[1]
    }

    pub fn covariance(&self) -> &Matrix2<f64> {
        &self.p
    }

    /// Set the state and collapse its uncertainty to `variance`
    pub fn reset_to(&mut self, position: f64, velocity: f64, variance: f64) {
        self.x = Vector2::new(position, velocity);
        self.p = Matrix2::identity() * variance;
    }

    /// Propagate over `dt` seconds with acceleration `accel`
    pub fn predict(&mut self, dt: f64, accel: f64) {
        if dt <= 0.0 {
            return;
        }
        let f = Matrix2::new(1.0, dt, 0.0, 1.0);
        let b = Vector2::new(0.5 * dt * dt, dt);

        self.x = f * self.x + b * accel;

        let q = b * b.transpose() * (self.accel_noise * self.accel_noise);
        self.p = f * self.p * f.transpose() + q;
    }

    /// Correct with a position measurement of variance `variance`
    ///
    /// Returns the innovation z − p.
    pub fn update(&mut self, measurement: f64, variance: f64) -> f64 {
        let innovation = measurement - self.x[0];
        let s = self.p[(0, 0)] + variance;
        if s <= 0.0 || !s.is_finite() {
            return innovation;
        }

        // K = P Hᵀ / S
        let k = Vector2::new(self.p[(0, 0)], self.p[(1, 0)]) / s;
        self.x += k * innovation;

        // P = (I − K H) P
        let kh = Matrix2::new(k[0], 0.0, k[1], 0.0);
        self.p = (Matrix2::identity() - kh) * self.p;
        // Keep P symmetric against round-off
        self.p = (self.p + self.p.transpose()) * 0.5;

        innovation
    }
}
