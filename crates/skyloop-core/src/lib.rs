//! # Skyloop Core
//!
//! Flight-control core for a multirotor: everything that runs inside one
//! control cycle, with no threads, clocks or I/O.
//!
//! Each cycle flows through the modules in this order:
//!
//! ```text
//! SensorSample -> StateEstimator -> WaypointNavigator -> MissionSupervisor
//!              -> FlightController -> MotorMixer -> ActuatorCommand
//! ```
//!
//! ## Modules
//!
//! - [`math`]: Quaternion, rotation and angle helpers
//! - [`sensors`]: Raw sensor samples and their validation
//! - [`estimation`]: Attitude filter, per-axis Kalman filters, IMU calibration
//! - [`navigation`]: Geodetic conversion, mission storage, waypoint navigator
//! - [`control`]: PID axes and the cascaded flight controller
//! - [`mixer`]: Frame mixing matrices and saturation handling
//! - [`supervisor`]: Mission state machine and failsafe policy
//! - [`config`]: Typed, validated flight configuration
//! - [`telemetry`]: Per-cycle telemetry events and the sink trait
//!
//! ## Conventions
//!
//! The local frame is ENU (x east, y north, z up) with its origin at the home
//! point. The body frame is FLU (x forward, y left, z up). Times are seconds.

pub mod config;
pub mod control;
pub mod error;
pub mod estimation;
pub mod math;
pub mod mixer;
pub mod navigation;
pub mod sensors;
pub mod supervisor;
pub mod telemetry;

pub use config::FlightConfig;
pub use error::{ArmError, FlightError, MissionError};

use nalgebra::{UnitQuaternion, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f64>;

/// Unit quaternion type for rotations
pub type Quat = UnitQuaternion<f64>;

/// Gravity constant [m/s²]
pub const GRAVITY: f64 = 9.81;

/// Gravity vector in ENU convention: z-up
pub fn gravity_enu() -> Vec3 {
    Vec3::new(0.0, 0.0, -GRAVITY)
}
