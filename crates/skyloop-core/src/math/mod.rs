//! Mathematical utilities for the flight core
//!
//! Quaternion integration, Euler conversions, angle wrapping and
//! frame rotations used by the estimator and the controller.

pub mod quaternion;
pub mod rotation;

pub use quaternion::*;
pub use rotation::*;
