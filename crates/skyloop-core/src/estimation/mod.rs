//! State estimation
//!
//! - Complementary (Mahony) attitude filter
//! - Position/velocity Kalman filter per ENU axis
//! - Static IMU bias calibration
//! - The estimator that fuses them into a [`StateEstimate`]

pub mod attitude;
pub mod axis;
pub mod calibration;
pub mod estimator;

pub use attitude::*;
pub use axis::*;
pub use calibration::*;
pub use estimator::*;
