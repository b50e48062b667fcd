//! Bounded-latency actuator dispatch
//!
//! A command is worth sending only within the cycle that computed it. The
//! dispatcher discards commands that are already past the deadline when
//! they reach it, reports sends that overran it, and never retries:
//! the next cycle brings a fresh command anyway.

use log::warn;
use serde::{Deserialize, Serialize};

use skyloop_core::mixer::ActuatorCommand;
use skyloop_core::{FlightConfig, FlightError};

use crate::clock::Clock;
use crate::drivers::ActuatorDriver;

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchStatus {
    /// Delivered within the deadline
    Delivered { latency: f64 },
    /// Too old to send; dropped without calling the driver
    Discarded { age: f64 },
    /// Delivered, but after the deadline
    Late { latency: f64 },
    /// The driver refused the command
    Failed(FlightError),
}

impl DispatchStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchStatus::Delivered { .. })
    }

    /// The failure this status reports, if any
    pub fn fault(&self, deadline: f64) -> Option<FlightError> {
        match self {
            DispatchStatus::Delivered { .. } => None,
            DispatchStatus::Discarded { age } => Some(FlightError::ActuatorDispatchFailure(format!(
                "command {:.1} ms old at dispatch, deadline {:.1} ms",
                age * 1e3,
                deadline * 1e3
            ))),
            DispatchStatus::Late { latency } => Some(FlightError::ActuatorDispatchFailure(format!(
                "send took {:.1} ms, deadline {:.1} ms",
                latency * 1e3,
                deadline * 1e3
            ))),
            DispatchStatus::Failed(err) => Some(err.clone()),
        }
    }
}

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub delivered: u64,
    pub discarded: u64,
    pub late: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub fn failures(&self) -> u64 {
        self.discarded + self.late + self.failed
    }
}

/// Sends commands with a per-cycle deadline
#[derive(Debug, Clone)]
pub struct ActuatorDispatcher {
    /// Longest time from cycle start to completed send [s]
    deadline: f64,
    stats: DispatchStats,
}

impl ActuatorDispatcher {
    pub fn new(deadline: f64) -> Self {
        Self {
            deadline,
            stats: DispatchStats::default(),
        }
    }

    pub fn from_config(config: &FlightConfig) -> Self {
        Self::new(config.timeouts.dispatch_deadline)
    }

    pub fn deadline(&self) -> f64 {
        self.deadline
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Send `command`, computed in the cycle that started at `cycle_start`
    pub fn dispatch<A, C>(
        &mut self,
        driver: &mut A,
        command: &ActuatorCommand,
        cycle_start: f64,
        clock: &C,
    ) -> DispatchStatus
    where
        A: ActuatorDriver + ?Sized,
        C: Clock + ?Sized,
    {
        let age = clock.now() - cycle_start;
        let status = if age > self.deadline {
            self.stats.discarded += 1;
            DispatchStatus::Discarded { age }
        } else {
            match driver.send(command) {
                Ok(()) => {
                    let latency = clock.now() - cycle_start;
                    if latency > self.deadline {
                        self.stats.late += 1;
                        DispatchStatus::Late { latency }
                    } else {
                        self.stats.delivered += 1;
                        DispatchStatus::Delivered { latency }
                    }
                }
                Err(err) => {
                    self.stats.failed += 1;
                    DispatchStatus::Failed(err)
                }
            }
        };

        if let Some(err) = status.fault(self.deadline) {
            warn!("{err} (t={:.3}, {} failures so far)", cycle_start, self.stats.failures());
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use approx::assert_relative_eq;

    /// Driver that takes a fixed time per send and can be told to fail
    struct TestDriver {
        clock: ManualClock,
        send_time_us: u64,
        fail: bool,
        sent: Vec<ActuatorCommand>,
    }

    impl ActuatorDriver for TestDriver {
        fn send(&mut self, command: &ActuatorCommand) -> Result<(), FlightError> {
            self.clock.advance_us(self.send_time_us);
            if self.fail {
                return Err(FlightError::ActuatorDispatchFailure("bus error".into()));
            }
            self.sent.push(command.clone());
            Ok(())
        }
    }

    fn setup(send_time_us: u64) -> (ManualClock, TestDriver) {
        let clock = ManualClock::new();
        let driver = TestDriver {
            clock: clock.clone(),
            send_time_us,
            fail: false,
            sent: Vec::new(),
        };
        (clock, driver)
    }

    #[test]
    fn test_delivered_within_deadline() {
        let (clock, mut driver) = setup(300);
        let mut dispatcher = ActuatorDispatcher::new(0.002);
        let status = dispatcher.dispatch(&mut driver, &ActuatorCommand::zero(4, 0.0), 0.0, &clock);
        let DispatchStatus::Delivered { latency } = &status else {
            panic!("expected delivery, got {status:?}");
        };
        assert_relative_eq!(*latency, 0.0003, epsilon = 1e-12);
        assert_eq!(driver.sent.len(), 1);
        assert_eq!(dispatcher.stats().delivered, 1);
    }

    #[test]
    fn test_slow_send_reported_late_not_retried() {
        let (clock, mut driver) = setup(5000);
        let mut dispatcher = ActuatorDispatcher::new(0.002);
        let status = dispatcher.dispatch(&mut driver, &ActuatorCommand::zero(4, 0.0), 0.0, &clock);
        assert!(matches!(status, DispatchStatus::Late { .. }));
        assert!(matches!(
            status.fault(dispatcher.deadline()),
            Some(FlightError::ActuatorDispatchFailure(_))
        ));
        assert_eq!(driver.sent.len(), 1);
        assert_eq!(dispatcher.stats().late, 1);
    }

    #[test]
    fn test_stale_command_discarded_without_send() {
        let (clock, mut driver) = setup(100);
        let mut dispatcher = ActuatorDispatcher::new(0.002);
        clock.advance(0.01);
        let status = dispatcher.dispatch(&mut driver, &ActuatorCommand::zero(4, 0.0), 0.0, &clock);
        assert!(matches!(status, DispatchStatus::Discarded { .. }));
        assert!(driver.sent.is_empty());
    }

    #[test]
    fn test_driver_failure_counted_once() {
        let (clock, mut driver) = setup(100);
        driver.fail = true;
        let mut dispatcher = ActuatorDispatcher::new(0.002);
        let status = dispatcher.dispatch(&mut driver, &ActuatorCommand::zero(4, 0.0), 0.0, &clock);
        assert!(matches!(status, DispatchStatus::Failed(_)));
        assert_eq!(dispatcher.stats().failed, 1);
        assert_eq!(dispatcher.stats().failures(), 1);
    }
}
