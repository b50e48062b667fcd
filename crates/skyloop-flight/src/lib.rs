//! Skyloop flight runtime
//!
//! Runs the [`skyloop_core`] algorithms as a fixed-rate flight loop and
//! connects them to the outside world.
//!
//! # Architecture
//!
//! ```text
//! SensorDriver --(producer thread)--> SensorHub (one slot per sensor)
//!                                         |
//!                                         v
//!                        FlightLoop::tick (fixed rate, never blocks)
//!                          |              |                 |
//!                          v              v                 v
//!              ActuatorDispatcher   TelemetrySink     SupervisorHandle
//!              (deadline, no retry) (drop if full)    (async commands)
//! ```
//!
//! # Components
//!
//! - [`clock`]: Monotonic and manual time sources
//! - [`drivers`]: Sensor and actuator driver traits
//! - [`slot`]: Single-slot latest-sample buffers
//! - [`producer`]: Sensor acquisition thread
//! - [`dispatch`]: Bounded-latency actuator dispatch
//! - [`flight_loop`]: The control cycle and the real-time runner
//! - [`telemetry`]: Bounded telemetry channel and JSON-lines recorder
//! - [`loader`]: JSON configuration and mission files
//! - [`sim`]: Simulated vehicle, sensors and lockstep runner

pub mod clock;
pub mod dispatch;
pub mod drivers;
pub mod error;
pub mod flight_loop;
pub mod loader;
pub mod producer;
pub mod sim;
pub mod slot;
pub mod telemetry;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use dispatch::{ActuatorDispatcher, DispatchStats, DispatchStatus};
pub use drivers::{ActuatorDriver, DriverReading, SensorDriver};
pub use error::RuntimeError;
pub use flight_loop::{CycleReport, FlightLoop, RunSummary};
pub use loader::{load_config, load_mission};
pub use producer::SensorProducer;
pub use slot::SensorHub;
pub use telemetry::{ChannelTelemetry, TelemetryRecorder};
