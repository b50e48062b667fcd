//! Static IMU calibration
//!
//! Averages a block of samples taken while the vehicle sits level and
//! still. The gyro mean is the gyro bias; the accelerometer mean minus
//! the gravity reaction is the accelerometer bias. A block in which any
//! channel spreads further than the motion threshold is rejected.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::FlightError;
use crate::sensors::SensorSample;
use crate::GRAVITY;

/// Additive IMU biases, subtracted from raw readings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImuBias {
    /// Accelerometer bias [m/s²]
    pub accel: Vector3<f64>,
    /// Gyroscope bias [rad/s]
    pub gyro: Vector3<f64>,
}

/// Static calibration thresholds
#[derive(Debug, Clone, Copy)]
pub struct CalibrationLimits {
    /// Samples to average
    pub samples: usize,
    /// Max per-axis gyro spread (max − min) [rad/s]
    pub max_gyro_spread: f64,
    /// Max per-axis accelerometer spread [m/s²]
    pub max_accel_spread: f64,
}

impl Default for CalibrationLimits {
    fn default() -> Self {
        Self {
            samples: 250,
            max_gyro_spread: 0.05,
            max_accel_spread: 0.5,
        }
    }
}

/// Collects stationary samples into an [`ImuBias`]
#[derive(Debug, Clone)]
pub struct ImuCalibrator {
    limits: CalibrationLimits,
    count: usize,
    accel_sum: Vector3<f64>,
    gyro_sum: Vector3<f64>,
    accel_min: Vector3<f64>,
    accel_max: Vector3<f64>,
    gyro_min: Vector3<f64>,
    gyro_max: Vector3<f64>,
}

impl ImuCalibrator {
    pub fn new(limits: CalibrationLimits) -> Self {
        let inf = Vector3::repeat(f64::INFINITY);
        Self {
            limits,
            count: 0,
            accel_sum: Vector3::zeros(),
            gyro_sum: Vector3::zeros(),
            accel_min: inf,
            accel_max: -inf,
            gyro_min: inf,
            gyro_max: -inf,
        }
    }

    /// Add one sample; returns true once enough samples are collected
    pub fn push(&mut self, sample: &SensorSample) -> bool {
        if !self.is_complete() {
            self.count += 1;
            self.accel_sum += sample.accel;
            self.gyro_sum += sample.gyro;
            self.accel_min = self.accel_min.inf(&sample.accel);
            self.accel_max = self.accel_max.sup(&sample.accel);
            self.gyro_min = self.gyro_min.inf(&sample.gyro);
            self.gyro_max = self.gyro_max.sup(&sample.gyro);
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.count >= self.limits.samples
    }

    pub fn progress(&self) -> usize {
        self.count
    }

    /// Compute the biases from the collected block
    pub fn finish(&self) -> Result<ImuBias, FlightError> {
        if self.count == 0 || !self.is_complete() {
            return Err(FlightError::SensorInvalid(format!(
                "calibration incomplete: {} of {} samples",
                self.count, self.limits.samples
            )));
        }

        let gyro_spread = (self.gyro_max - self.gyro_min).max();
        let accel_spread = (self.accel_max - self.accel_min).max();
        if gyro_spread > self.limits.max_gyro_spread || accel_spread > self.limits.max_accel_spread {
            return Err(FlightError::SensorInvalid(format!(
                "vehicle moved during calibration (gyro spread {gyro_spread:.3} rad/s, accel spread {accel_spread:.3} m/s²)"
            )));
        }

        let n = self.count as f64;
        let mut accel = self.accel_sum / n;
        accel.z -= GRAVITY;
        let gyro = self.gyro_sum / n;
        if !accel.iter().chain(gyro.iter()).all(|v| v.is_finite()) {
            return Err(FlightError::SensorInvalid("non-finite reading in calibration block".into()));
        }

        Ok(ImuBias { accel, gyro })
    }
}
