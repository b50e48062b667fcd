//! Navigation
//!
//! - Geodetic ↔ local ENU conversion about the home point
//! - Waypoints and the mission list
//! - The waypoint navigator producing per-cycle control references

pub mod geo;
pub mod navigator;
pub mod waypoint;

pub use geo::*;
pub use navigator::*;
pub use waypoint::*;
