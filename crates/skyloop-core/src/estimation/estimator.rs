//! State estimator
//!
//! Fuses raw samples into a [`StateEstimate`] incrementally, one sample at a
//! time:
//!
//! 1. Validate the sample and its timestamp against the previous one
//! 2. Attitude: complementary filter over the measured interval
//! 3. Translation: per-axis Kalman predict with earth-frame acceleration
//! 4. GPS (x, y, z) and barometer (z) corrections when present
//!
//! A gap longer than the sensor timeout is never integrated: the estimate is
//! marked stale, the filters hold their state across the gap, and integration
//! resumes from that held state with the next sample.

use std::sync::Arc;

use log::{debug, info, warn};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use super::attitude::AttitudeFilter;
use super::axis::AxisKalman;
use super::calibration::ImuBias;
use crate::config::FlightConfig;
use crate::error::FlightError;
use crate::math::{euler_from_quaternion, rotate_vector};
use crate::navigation::GeoOrigin;
use crate::sensors::SensorSample;
use crate::{gravity_enu, Vec3};

/// Filtered vehicle state, local ENU frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateEstimate {
    /// Position relative to home [m]
    pub position: Vec3,
    /// Velocity [m/s]
    pub velocity: Vec3,
    /// Attitude (body to world)
    pub attitude: UnitQuaternion<f64>,
    /// Bias-corrected body rate [rad/s]
    pub angular_velocity: Vec3,
    /// Time of the sample this estimate was computed from [s]
    pub timestamp: f64,
    /// False until initialised, and while stale or fed invalid samples
    pub valid: bool,
}

impl StateEstimate {
    /// Level, stationary estimate at `position`, not yet valid
    pub fn at(position: Vec3, timestamp: f64) -> Self {
        Self {
            position,
            velocity: Vec3::zeros(),
            attitude: UnitQuaternion::identity(),
            angular_velocity: Vec3::zeros(),
            timestamp,
            valid: false,
        }
    }

    /// (roll, pitch, yaw) [rad]
    pub fn euler(&self) -> (f64, f64, f64) {
        euler_from_quaternion(&self.attitude)
    }

    /// Height above home [m]
    pub fn altitude(&self) -> f64 {
        self.position.z
    }

    pub fn horizontal_speed(&self) -> f64 {
        self.velocity.xy().norm()
    }

    pub fn climb_rate(&self) -> f64 {
        self.velocity.z
    }

    /// Angle between body z and world z [rad]
    pub fn tilt(&self) -> f64 {
        let (roll, pitch, _) = self.euler();
        (roll.cos() * pitch.cos()).clamp(-1.0, 1.0).acos()
    }
}

impl Default for StateEstimate {
    fn default() -> Self {
        Self::at(Vec3::zeros(), 0.0)
    }
}

/// Health of the estimate returned alongside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EstimateStatus {
    Ok,
    /// No attitude alignment or no position origin yet
    NotInitialized,
    /// Input gap or consecutive missed frames beyond the limits
    Stale { gap: f64, timeout: f64 },
    /// Out-of-range or out-of-order sample
    Invalid { reason: String },
}

impl EstimateStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, EstimateStatus::Ok)
    }

    /// The fault this status reports to the supervisor, if any
    pub fn fault(&self) -> Option<FlightError> {
        match self {
            EstimateStatus::Stale { gap, timeout } => Some(FlightError::SensorStale {
                gap: *gap,
                timeout: *timeout,
            }),
            EstimateStatus::Invalid { reason } => Some(FlightError::SensorInvalid(reason.clone())),
            EstimateStatus::Ok | EstimateStatus::NotInitialized => None,
        }
    }
}

/// One estimator step result
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorOutput {
    pub estimate: StateEstimate,
    pub status: EstimateStatus,
}

/// Incremental sensor-fusion state estimator
#[derive(Debug, Clone)]
pub struct StateEstimator {
    config: Arc<FlightConfig>,
    attitude: AttitudeFilter,
    axes: [AxisKalman; 3],
    bias: ImuBias,
    origin: Option<GeoOrigin>,
    /// Barometric altitude corresponding to local z = 0
    baro_reference: Option<f64>,
    last_timestamp: Option<f64>,
    aligned: bool,
    missed_frames: u32,
    estimate: StateEstimate,
}

impl StateEstimator {
    pub fn new(config: Arc<FlightConfig>) -> Self {
        let est = &config.estimator;
        let attitude = AttitudeFilter::new(est.attitude_kp, est.attitude_ki, est.accel_rejection);
        let axes = std::array::from_fn(|_| AxisKalman::new(est.accel_noise));
        let origin = config.home.as_ref().map(GeoOrigin::new);
        Self {
            attitude,
            axes,
            bias: ImuBias::default(),
            origin,
            baro_reference: None,
            last_timestamp: None,
            aligned: false,
            missed_frames: 0,
            estimate: StateEstimate::default(),
            config,
        }
    }

    /// Latest estimate
    pub fn estimate(&self) -> &StateEstimate {
        &self.estimate
    }

    /// Local frame origin (home), once known
    pub fn origin(&self) -> Option<GeoOrigin> {
        self.origin
    }

    pub fn set_imu_bias(&mut self, bias: ImuBias) {
        self.bias = bias;
    }

    /// Record samples that were overwritten before being consumed
    ///
    /// Counts accumulate while consecutive consumptions report losses and
    /// clear on a consumption without loss.
    pub fn record_missed_frames(&mut self, missed: u32) {
        if missed == 0 {
            self.missed_frames = 0;
        } else {
            self.missed_frames = self.missed_frames.saturating_add(missed);
            debug!("{} consecutive sensor frames missed", self.missed_frames);
        }
    }

    /// Fuse one sample
    pub fn update(&mut self, sample: &SensorSample) -> EstimatorOutput {
        if let Err(err) = sample.validate(&self.config.sensors) {
            warn!("rejecting sample at t={:.3}: {}", sample.timestamp, err);
            return self.invalid(err.to_string());
        }

        let dt = match self.last_timestamp {
            None => {
                self.initialize(sample);
                return self.output();
            }
            Some(last) if sample.timestamp < last => {
                return self.invalid(format!(
                    "timestamp {:.4} s precedes previous sample at {:.4} s",
                    sample.timestamp, last
                ));
            }
            Some(last) if sample.timestamp == last => return self.output(),
            Some(last) => sample.timestamp - last,
        };
        self.last_timestamp = Some(sample.timestamp);

        let timeout = self.config.timeouts.sensor_timeout;
        if dt > timeout {
            warn!("sensor gap of {dt:.3} s exceeds {timeout:.3} s, not integrating");
            self.estimate.timestamp = sample.timestamp;
            self.estimate.valid = false;
            return EstimatorOutput {
                estimate: self.estimate,
                status: EstimateStatus::Stale { gap: dt, timeout },
            };
        }

        let gyro = sample.gyro - self.bias.gyro;
        let accel = sample.accel - self.bias.accel;

        self.attitude.update(&gyro, &accel, dt);
        let attitude = self.attitude.attitude();

        // Specific force → earth-frame linear acceleration
        let accel_world = rotate_vector(&attitude, &accel) + gravity_enu();
        for (axis, a) in self.axes.iter_mut().zip(accel_world.iter()) {
            axis.predict(dt, *a);
        }

        self.correct(sample);

        self.estimate.attitude = attitude;
        self.estimate.angular_velocity = gyro - self.attitude.gyro_bias();
        self.estimate.timestamp = sample.timestamp;
        self.store_translation();

        if self.missed_frames > self.config.timeouts.max_missed_frames {
            self.estimate.valid = false;
            return EstimatorOutput {
                estimate: self.estimate,
                status: EstimateStatus::Stale {
                    gap: self.missed_frames as f64 * self.config.loop_period(),
                    timeout,
                },
            };
        }

        self.output()
    }

    /// Status for a cycle in which no new sample arrived
    pub fn check_staleness(&mut self, now: f64) -> EstimatorOutput {
        let timeout = self.config.timeouts.sensor_timeout;
        if let Some(last) = self.last_timestamp {
            let gap = now - last;
            if gap > timeout {
                self.estimate.valid = false;
                return EstimatorOutput {
                    estimate: self.estimate,
                    status: EstimateStatus::Stale { gap, timeout },
                };
            }
        }
        self.output()
    }

    /// Forget all filter state; a configured home point is kept
    pub fn reset(&mut self) {
        self.attitude.reset();
        for axis in &mut self.axes {
            *axis = AxisKalman::new(self.config.estimator.accel_noise);
        }
        self.origin = self.config.home.as_ref().map(GeoOrigin::new);
        self.baro_reference = None;
        self.last_timestamp = None;
        self.aligned = false;
        self.missed_frames = 0;
        self.estimate = StateEstimate::default();
    }

    fn initialize(&mut self, sample: &SensorSample) {
        self.last_timestamp = Some(sample.timestamp);
        self.attitude.align(&(sample.accel - self.bias.accel));
        self.aligned = true;

        self.estimate.attitude = self.attitude.attitude();
        self.estimate.angular_velocity = sample.gyro - self.bias.gyro;
        self.estimate.timestamp = sample.timestamp;
        self.correct(sample);
        self.store_translation();
        debug!("estimator aligned at t={:.3}", sample.timestamp);
    }

    fn correct(&mut self, sample: &SensorSample) {
        let est = &self.config.estimator;

        if let Some(fix) = &sample.gps {
            let origin = match self.origin {
                Some(origin) => origin,
                None => {
                    let origin = GeoOrigin::new(fix);
                    info!(
                        "home set at lat {:.7}, lon {:.7}, alt {:.1} m",
                        fix.latitude, fix.longitude, fix.altitude
                    );
                    self.origin = Some(origin);
                    for axis in &mut self.axes {
                        axis.reset_to(0.0, 0.0, est.gps_horizontal_noise.powi(2));
                    }
                    origin
                }
            };
            let enu = origin.fix_to_enu(fix);
            let h_var = est.gps_horizontal_noise.powi(2);
            self.axes[0].update(enu.x, h_var);
            self.axes[1].update(enu.y, h_var);
            self.axes[2].update(enu.z, est.gps_vertical_noise.powi(2));
        }

        if let Some(baro) = sample.baro {
            let reference = *self
                .baro_reference
                .get_or_insert_with(|| baro - self.axes[2].position());
            self.axes[2].update(baro - reference, est.baro_noise.powi(2));
        }
    }

    fn store_translation(&mut self) {
        self.estimate.position = Vector3::from_fn(|i, _| self.axes[i].position());
        self.estimate.velocity = Vector3::from_fn(|i, _| self.axes[i].velocity());
    }

    fn initialized(&self) -> bool {
        self.aligned && self.origin.is_some()
    }

    fn invalid(&mut self, reason: String) -> EstimatorOutput {
        self.estimate.valid = false;
        EstimatorOutput {
            estimate: self.estimate,
            status: EstimateStatus::Invalid { reason },
        }
    }

    fn output(&mut self) -> EstimatorOutput {
        let status = if self.initialized() {
            EstimateStatus::Ok
        } else {
            EstimateStatus::NotInitialized
        };
        self.estimate.valid = status.is_ok();
        EstimatorOutput {
            estimate: self.estimate,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::GpsFix;
    use approx::assert_relative_eq;

    const HOME: GpsFix = GpsFix {
        latitude: 47.3977,
        longitude: 8.5456,
        altitude: 488.0,
    };

    fn estimator() -> StateEstimator {
        StateEstimator::new(Arc::new(FlightConfig::default()))
    }

    #[test]
    fn test_not_initialized_without_origin() {
        let mut est = estimator();
        let out = est.update(&SensorSample::at_rest(0.0));
        assert_eq!(out.status, EstimateStatus::NotInitialized);
        assert!(!out.estimate.valid);
    }

    #[test]
    fn test_first_gps_fix_sets_home() {
        let mut est = estimator();
        let out = est.update(&SensorSample::at_rest(0.0).with_gps(HOME));
        assert!(out.status.is_ok());
        assert!(out.estimate.valid);
        assert_relative_eq!(out.estimate.position.norm(), 0.0, epsilon = 1e-9);
        assert_eq!(est.origin().map(|o| o.fix().altitude), Some(488.0));
    }

    #[test]
    fn test_configured_home_initializes_without_gps() {
        let mut config = FlightConfig::default();
        config.home = Some(HOME);
        let mut est = StateEstimator::new(Arc::new(config));
        assert!(est.update(&SensorSample::at_rest(0.0)).status.is_ok());
    }

    #[test]
    fn test_stationary_estimate_stays_put() {
        let mut est = estimator();
        let dt = 0.004;
        let mut out = est.update(&SensorSample::at_rest(0.0).with_gps(HOME).with_baro(488.0));
        for k in 1..=1000 {
            let t = k as f64 * dt;
            let mut sample = SensorSample::at_rest(t);
            if k % 25 == 0 {
                sample = sample.with_gps(HOME);
            }
            if k % 5 == 0 {
                sample = sample.with_baro(488.0);
            }
            out = est.update(&sample);
        }
        assert!(out.status.is_ok());
        assert_relative_eq!(out.estimate.timestamp, 4.0, epsilon = 1e-9);
        assert!(out.estimate.position.norm() < 1e-6);
        assert!(out.estimate.velocity.norm() < 1e-6);
    }

    #[test]
    fn test_timestamps_monotonic() {
        let mut est = estimator();
        est.update(&SensorSample::at_rest(0.0).with_gps(HOME));
        let mut last = 0.0;
        for t in [0.004, 0.009, 0.0125, 0.016] {
            let out = est.update(&SensorSample::at_rest(t));
            assert!(out.estimate.timestamp > last);
            last = out.estimate.timestamp;
        }

        let out = est.update(&SensorSample::at_rest(0.010));
        assert!(matches!(out.status, EstimateStatus::Invalid { .. }));
        assert_relative_eq!(out.estimate.timestamp, 0.016);
    }

    #[test]
    fn test_gap_beyond_timeout_is_stale_and_not_integrated() {
        let mut est = estimator();
        est.update(&SensorSample::at_rest(0.0).with_gps(HOME));
        est.update(&SensorSample::at_rest(0.004));

        // Strong acceleration reported after a long gap must not be integrated
        let sample = SensorSample::new(0.5, Vector3::new(30.0, 0.0, 9.81), Vector3::zeros());
        let out = est.update(&sample);
        match out.status {
            EstimateStatus::Stale { gap, timeout } => {
                assert_relative_eq!(gap, 0.496, epsilon = 1e-9);
                assert_relative_eq!(timeout, 0.05);
            }
            other => panic!("expected stale, got {other:?}"),
        }
        assert!(!out.estimate.valid);
        assert!(out.estimate.velocity.norm() < 1e-9);
        assert!(out.status.fault().is_some_and(|f| f.escalates()));

        // Recovers on the next regular sample, integrating only its own interval
        let held = out.estimate;
        let out = est.update(&SensorSample::at_rest(0.504));
        assert!(out.status.is_ok());
        assert_relative_eq!(out.estimate.position, held.position, epsilon = 1e-6);
        assert!(out.estimate.velocity.norm() < 1e-6);
    }

    #[test]
    fn test_check_staleness() {
        let mut est = estimator();
        est.update(&SensorSample::at_rest(1.0).with_gps(HOME));
        assert!(est.check_staleness(1.02).status.is_ok());
        let out = est.check_staleness(1.2);
        assert!(matches!(out.status, EstimateStatus::Stale { .. }));
        assert!(!out.estimate.valid);
    }

    #[test]
    fn test_missed_frames_mark_stale() {
        let mut est = estimator();
        est.update(&SensorSample::at_rest(0.0).with_gps(HOME));
        est.record_missed_frames(6);
        assert!(est.update(&SensorSample::at_rest(0.004)).status.is_ok());
        est.record_missed_frames(6);
        let out = est.update(&SensorSample::at_rest(0.008));
        assert!(matches!(out.status, EstimateStatus::Stale { .. }));

        est.record_missed_frames(0);
        assert!(est.update(&SensorSample::at_rest(0.012)).status.is_ok());
    }

    #[test]
    fn test_invalid_sample_reported() {
        let mut est = estimator();
        est.update(&SensorSample::at_rest(0.0).with_gps(HOME));
        let bad = SensorSample::new(0.004, Vector3::new(f64::NAN, 0.0, 0.0), Vector3::zeros());
        let out = est.update(&bad);
        assert!(matches!(
            out.status.fault(),
            Some(FlightError::SensorInvalid(_))
        ));
    }

    #[test]
    fn test_climb_tracked_from_accel_and_baro() {
        let mut est = estimator();
        est.update(&SensorSample::at_rest(0.0).with_gps(HOME).with_baro(488.0));

        // 1 m/s² upward for 2 s, barometer following the true trajectory
        let dt = 0.004;
        let mut out = None;
        for k in 1..=500 {
            let t = k as f64 * dt;
            let z = 0.5 * t * t;
            let mut sample = SensorSample::new(t, Vector3::new(0.0, 0.0, 9.81 + 1.0), Vector3::zeros());
            if k % 5 == 0 {
                sample = sample.with_baro(488.0 + z);
            }
            out = Some(est.update(&sample));
        }
        let out = out.unwrap();
        assert_relative_eq!(out.estimate.altitude(), 2.0, epsilon = 0.05);
        assert_relative_eq!(out.estimate.climb_rate(), 2.0, epsilon = 0.05);
    }

    #[test]
    fn test_reset() {
        let mut est = estimator();
        est.update(&SensorSample::at_rest(0.0).with_gps(HOME));
        est.reset();
        assert!(est.origin().is_none());
        assert_eq!(est.check_staleness(100.0).status, EstimateStatus::NotInitialized);
    }
}
