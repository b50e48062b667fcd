//! Hardware driver interfaces
//!
//! The flight loop talks to hardware only through these traits. Both calls
//! are expected to return quickly: sensor reads never wait for a new
//! measurement, and actuator sends report failure instead of blocking.

use skyloop_core::mixer::ActuatorCommand;
use skyloop_core::sensors::SensorSample;
use skyloop_core::FlightError;

/// Result of one non-blocking sensor read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverReading {
    pub sample: SensorSample,
    /// The driver had nothing new; `sample` is the last known reading
    pub stale: bool,
}

impl DriverReading {
    pub fn fresh(sample: SensorSample) -> Self {
        Self { sample, stale: false }
    }

    pub fn stale(sample: SensorSample) -> Self {
        Self { sample, stale: true }
    }
}

/// Source of raw sensor samples
pub trait SensorDriver: Send {
    /// Latest reading, without waiting
    fn read(&mut self) -> DriverReading;
}

/// Sink for motor commands
pub trait ActuatorDriver {
    /// Deliver a command to the motors
    ///
    /// Errors are [`FlightError::ActuatorDispatchFailure`].
    fn send(&mut self, command: &ActuatorCommand) -> Result<(), FlightError>;
}

impl<A: ActuatorDriver + ?Sized> ActuatorDriver for Box<A> {
    fn send(&mut self, command: &ActuatorCommand) -> Result<(), FlightError> {
        (**self).send(command)
    }
}
