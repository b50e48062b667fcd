//! Flight configuration
//!
//! A typed snapshot of every static parameter the core needs, resolved once
//! at startup. Required fields carry no serde defaults, so a configuration
//! file with a missing field is rejected when it is parsed, and
//! [`FlightConfig::validate`] rejects out-of-bounds values before the
//! vehicle can arm. Components receive the snapshot by reference at
//! construction and never mutate it.

use std::f64::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

use crate::control::PidGains;
use crate::error::FlightError;
use crate::mixer::FrameKind;
use crate::sensors::GpsFix;

/// Main flight configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlightConfig {
    /// Control loop rate [Hz]
    pub loop_rate_hz: f64,
    /// Collective throttle that holds a hover (0-1)
    pub hover_throttle: f64,
    /// Spatial and kinematic limits
    pub envelope: EnvelopeConfig,
    /// PID gains per axis
    pub gains: GainsConfig,
    /// Motor mixing
    pub mixer: MixerConfig,
    /// Waypoint following
    pub navigation: NavigationConfig,
    /// Fault detection thresholds
    pub timeouts: TimeoutConfig,
    /// Sensor fusion tuning
    pub estimator: EstimatorConfig,
    /// Arming, landing and failsafe policy
    pub supervisor: SupervisorConfig,
    /// Physical sensor ranges
    pub sensors: SensorLimits,
    /// Fixed home point; when absent the first GPS fix becomes home
    #[serde(default)]
    pub home: Option<GpsFix>,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            loop_rate_hz: 250.0,
            hover_throttle: 0.5,
            envelope: EnvelopeConfig::default(),
            gains: GainsConfig::default(),
            mixer: MixerConfig::default(),
            navigation: NavigationConfig::default(),
            timeouts: TimeoutConfig::default(),
            estimator: EstimatorConfig::default(),
            supervisor: SupervisorConfig::default(),
            sensors: SensorLimits::default(),
            home: None,
        }
    }
}

/// Spatial envelope and kinematic limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvelopeConfig {
    /// Maximum altitude above home [m]
    pub max_altitude: f64,
    /// Maximum horizontal speed [m/s]
    pub max_speed: f64,
    /// Maximum climb or descent rate [m/s]
    pub max_climb_rate: f64,
    /// Maximum commanded tilt [rad]
    pub max_tilt: f64,
    /// Maximum horizontal distance from home [m]
    pub geofence_radius: f64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            max_altitude: 100.0,
            max_speed: 5.0,
            max_climb_rate: 2.0,
            max_tilt: 0.35,
            geofence_radius: 500.0,
        }
    }
}

/// PID gains for every controlled axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GainsConfig {
    /// Altitude [m] -> collective throttle offset
    pub altitude: PidGains,
    /// Roll angle [rad] -> roll torque
    pub roll: PidGains,
    /// Pitch angle [rad] -> pitch torque
    pub pitch: PidGains,
    /// Heading [rad] -> yaw torque
    pub yaw: PidGains,
    /// Horizontal velocity [m/s] -> horizontal acceleration [m/s²]
    pub velocity: PidGains,
    /// Horizontal position error [m] -> velocity setpoint [m/s]
    pub position_kp: f64,
}

impl Default for GainsConfig {
    fn default() -> Self {
        Self {
            altitude: PidGains::new(0.12, 0.03, 0.08, 2.0, 0.5),
            roll: PidGains::new(1.2, 0.1, 0.25, 0.5, 1.0),
            pitch: PidGains::new(1.2, 0.1, 0.25, 0.5, 1.0),
            yaw: PidGains::new(0.6, 0.05, 0.1, 0.5, 1.0),
            velocity: PidGains::new(1.5, 0.2, 0.0, 2.0, 4.0),
            position_kp: 0.8,
        }
    }
}

/// Motor mixing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MixerConfig {
    /// Airframe geometry
    pub frame: FrameKind,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self { frame: FrameKind::QuadX }
    }
}

/// Waypoint following configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavigationConfig {
    /// Distance at which a waypoint counts as reached [m]
    pub acceptance_radius: f64,
    /// Speed used when a waypoint has no speed constraint [m/s]
    pub cruise_speed: f64,
    /// Carrot distance ahead of the along-track projection [m]
    pub lookahead: f64,
    /// Distance to the active waypoint inside which speed tapers [m]
    pub slowdown_radius: f64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            acceptance_radius: 1.0,
            cruise_speed: 3.0,
            lookahead: 2.0,
            slowdown_radius: 5.0,
        }
    }
}

/// Fault detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Maximum gap between consumed IMU samples [s]
    pub sensor_timeout: f64,
    /// Consecutive samples overwritten before consumption that mark the estimate stale
    pub max_missed_frames: u32,
    /// Budget for delivering one actuator command [s]
    pub dispatch_deadline: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            sensor_timeout: 0.05,
            max_missed_frames: 10,
            dispatch_deadline: 0.002,
        }
    }
}

/// Sensor fusion tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EstimatorConfig {
    /// Complementary filter proportional gain on the gravity error
    pub attitude_kp: f64,
    /// Complementary filter integral gain (gyro bias learning)
    pub attitude_ki: f64,
    /// Accelerometer corrections are skipped when |a| deviates from 1 g by more than this fraction
    pub accel_rejection: f64,
    /// Process noise of the translational filters [m/s²]
    pub accel_noise: f64,
    /// Horizontal GPS noise std dev [m]
    pub gps_horizontal_noise: f64,
    /// Vertical GPS noise std dev [m]
    pub gps_vertical_noise: f64,
    /// Barometer noise std dev [m]
    pub baro_noise: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            attitude_kp: 1.0,
            attitude_ki: 0.01,
            accel_rejection: 0.2,
            accel_noise: 0.5,
            gps_horizontal_noise: 1.5,
            gps_vertical_noise: 3.0,
            baro_noise: 0.5,
        }
    }
}

/// Arming, landing and failsafe policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Motor spool-up time between arming and takeoff [s]
    pub spool_time: f64,
    /// Takeoff climb target when the mission does not start higher [m]
    pub takeoff_altitude: f64,
    /// Descent rate during landing [m/s]
    pub landing_descent_rate: f64,
    /// Altitude below which the vehicle counts as on the ground [m]
    pub touchdown_altitude: f64,
    /// Climb rate magnitude below which a touchdown is confirmed [m/s]
    pub touchdown_speed: f64,
    /// Failsafe lands at or above this altitude and cuts motors below it [m]
    pub cutoff_altitude: f64,
    /// Maximum tilt accepted by the pre-arm check [rad]
    pub max_arm_tilt: f64,
    /// Extra time allowed past the expected descent time when landing
    /// without a valid estimate [s]
    pub landing_margin: f64,
    /// Longest a landing continues without a valid estimate [s]
    pub landing_timeout: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            spool_time: 1.0,
            takeoff_altitude: 2.0,
            landing_descent_rate: 0.7,
            touchdown_altitude: 0.15,
            touchdown_speed: 0.3,
            cutoff_altitude: 1.0,
            max_arm_tilt: 0.3,
            landing_margin: 3.0,
            landing_timeout: 30.0,
        }
    }
}

/// Physical ranges of the sensors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorLimits {
    /// Accelerometer full scale [m/s²]
    pub max_accel: f64,
    /// Gyroscope full scale [rad/s]
    pub max_gyro_rate: f64,
    /// Lowest plausible barometric altitude [m]
    pub min_baro_altitude: f64,
    /// Highest plausible barometric altitude [m]
    pub max_baro_altitude: f64,
}

impl Default for SensorLimits {
    fn default() -> Self {
        Self {
            max_accel: 16.0 * crate::GRAVITY,
            max_gyro_rate: 2000f64.to_radians(),
            min_baro_altitude: -500.0,
            max_baro_altitude: 9000.0,
        }
    }
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), FlightError> {
    if condition {
        Ok(())
    } else {
        Err(FlightError::ConfigInvalid(message()))
    }
}

fn positive(name: &str, value: f64) -> Result<(), FlightError> {
    check(value.is_finite() && value > 0.0, || format!("{name} must be positive, got {value}"))
}

fn non_negative(name: &str, value: f64) -> Result<(), FlightError> {
    check(value.is_finite() && value >= 0.0, || format!("{name} must be non-negative, got {value}"))
}

impl FlightConfig {
    /// Control period [s]
    pub fn loop_period(&self) -> f64 {
        1.0 / self.loop_rate_hz
    }

    /// Reject any out-of-bounds parameter
    ///
    /// The vehicle must not arm with a configuration that fails here.
    pub fn validate(&self) -> Result<(), FlightError> {
        check(
            self.loop_rate_hz.is_finite() && (10.0..=2000.0).contains(&self.loop_rate_hz),
            || format!("loop_rate_hz must be within [10, 2000] Hz, got {}", self.loop_rate_hz),
        )?;
        check(
            self.hover_throttle.is_finite() && self.hover_throttle > 0.0 && self.hover_throttle < 1.0,
            || format!("hover_throttle must be within (0, 1), got {}", self.hover_throttle),
        )?;

        let env = &self.envelope;
        positive("envelope.max_altitude", env.max_altitude)?;
        positive("envelope.max_speed", env.max_speed)?;
        positive("envelope.max_climb_rate", env.max_climb_rate)?;
        positive("envelope.geofence_radius", env.geofence_radius)?;
        check(env.max_tilt > 0.0 && env.max_tilt < FRAC_PI_2, || {
            format!("envelope.max_tilt must be within (0, π/2), got {}", env.max_tilt)
        })?;

        self.gains.altitude.validate("gains.altitude")?;
        self.gains.roll.validate("gains.roll")?;
        self.gains.pitch.validate("gains.pitch")?;
        self.gains.yaw.validate("gains.yaw")?;
        self.gains.velocity.validate("gains.velocity")?;
        non_negative("gains.position_kp", self.gains.position_kp)?;

        self.mixer.frame.validate()?;

        let nav = &self.navigation;
        positive("navigation.acceptance_radius", nav.acceptance_radius)?;
        positive("navigation.cruise_speed", nav.cruise_speed)?;
        positive("navigation.lookahead", nav.lookahead)?;
        non_negative("navigation.slowdown_radius", nav.slowdown_radius)?;
        check(nav.cruise_speed <= env.max_speed, || {
            format!(
                "navigation.cruise_speed {} exceeds envelope.max_speed {}",
                nav.cruise_speed, env.max_speed
            )
        })?;

        let t = &self.timeouts;
        positive("timeouts.sensor_timeout", t.sensor_timeout)?;
        positive("timeouts.dispatch_deadline", t.dispatch_deadline)?;
        check(t.sensor_timeout > self.loop_period(), || {
            format!(
                "timeouts.sensor_timeout {} s must exceed the loop period {} s",
                t.sensor_timeout,
                self.loop_period()
            )
        })?;
        check(t.dispatch_deadline <= self.loop_period(), || {
            format!(
                "timeouts.dispatch_deadline {} s exceeds the loop period {} s",
                t.dispatch_deadline,
                self.loop_period()
            )
        })?;

        let est = &self.estimator;
        non_negative("estimator.attitude_kp", est.attitude_kp)?;
        non_negative("estimator.attitude_ki", est.attitude_ki)?;
        positive("estimator.accel_rejection", est.accel_rejection)?;
        positive("estimator.accel_noise", est.accel_noise)?;
        positive("estimator.gps_horizontal_noise", est.gps_horizontal_noise)?;
        positive("estimator.gps_vertical_noise", est.gps_vertical_noise)?;
        positive("estimator.baro_noise", est.baro_noise)?;

        let sup = &self.supervisor;
        non_negative("supervisor.spool_time", sup.spool_time)?;
        positive("supervisor.takeoff_altitude", sup.takeoff_altitude)?;
        positive("supervisor.landing_descent_rate", sup.landing_descent_rate)?;
        positive("supervisor.touchdown_altitude", sup.touchdown_altitude)?;
        positive("supervisor.touchdown_speed", sup.touchdown_speed)?;
        non_negative("supervisor.cutoff_altitude", sup.cutoff_altitude)?;
        positive("supervisor.max_arm_tilt", sup.max_arm_tilt)?;
        non_negative("supervisor.landing_margin", sup.landing_margin)?;
        positive("supervisor.landing_timeout", sup.landing_timeout)?;
        check(sup.takeoff_altitude <= env.max_altitude, || {
            format!(
                "supervisor.takeoff_altitude {} exceeds envelope.max_altitude {}",
                sup.takeoff_altitude, env.max_altitude
            )
        })?;
        check(sup.landing_descent_rate <= env.max_climb_rate, || {
            format!(
                "supervisor.landing_descent_rate {} exceeds envelope.max_climb_rate {}",
                sup.landing_descent_rate, env.max_climb_rate
            )
        })?;

        let s = &self.sensors;
        positive("sensors.max_accel", s.max_accel)?;
        positive("sensors.max_gyro_rate", s.max_gyro_rate)?;
        check(s.min_baro_altitude < s.max_baro_altitude, || {
            "sensors.min_baro_altitude must be below sensors.max_baro_altitude".to_string()
        })?;

        if let Some(home) = &self.home {
            check(
                home.latitude.abs() <= 90.0 && home.longitude.abs() <= 180.0 && home.altitude.is_finite(),
                || format!("home {:?} is not a valid geodetic position", home),
            )?;
        }

        Ok(())
    }
}
