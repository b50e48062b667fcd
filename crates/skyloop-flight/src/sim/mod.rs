//! Simulation
//!
//! A simulated multirotor with IMU, barometer and GPS models, exposed to the
//! flight code through the same driver traits real hardware implements.

pub mod config;
pub mod sensors;
pub mod simulator;
pub mod vehicle;
pub mod world;

pub use config::*;
pub use sensors::*;
pub use simulator::*;
pub use vehicle::*;
pub use world::*;
