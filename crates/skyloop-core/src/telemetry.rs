//! Per-cycle telemetry
//!
//! The flight loop emits one event per artefact per cycle into a
//! [`TelemetrySink`]. Sinks must never block: an event that cannot be
//! accepted right away is dropped.

use serde::{Deserialize, Serialize};

use crate::control::{ControlOutput, ControlReference};
use crate::estimation::{EstimateStatus, StateEstimate};
use crate::mixer::ActuatorCommand;
use crate::supervisor::MissionState;

/// One telemetry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Estimate {
        estimate: StateEstimate,
        status: EstimateStatus,
    },
    Reference {
        timestamp: f64,
        reference: ControlReference,
        cursor: usize,
    },
    Control {
        timestamp: f64,
        output: ControlOutput,
    },
    Command {
        command: ActuatorCommand,
    },
    StateChange {
        timestamp: f64,
        from: MissionState,
        to: MissionState,
    },
}

impl TelemetryEvent {
    /// Time the event refers to [s]
    pub fn timestamp(&self) -> f64 {
        match self {
            TelemetryEvent::Estimate { estimate, .. } => estimate.timestamp,
            TelemetryEvent::Command { command } => command.timestamp,
            TelemetryEvent::Reference { timestamp, .. }
            | TelemetryEvent::Control { timestamp, .. }
            | TelemetryEvent::StateChange { timestamp, .. } => *timestamp,
        }
    }
}

/// Non-blocking, one-way telemetry consumer
pub trait TelemetrySink {
    /// Offer an event; returns false if it was dropped
    fn try_emit(&self, event: TelemetryEvent) -> bool;
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn try_emit(&self, _event: TelemetryEvent) -> bool {
        true
    }
}
