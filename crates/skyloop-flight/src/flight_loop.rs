//! Fixed-rate flight loop
//!
//! One [`FlightLoop::tick`] is one control cycle. Within a cycle the order
//! is fixed:
//!
//! ```text
//! queued supervisor commands
//!   -> latest sensor sample -> estimator
//!   -> navigator -> supervisor -> reference shaping
//!   -> controller -> mixer -> bounded-latency dispatch
//!   -> telemetry
//! ```
//!
//! Nothing in a cycle waits: a missing sample is a staleness check, a full
//! telemetry sink drops the event, and a slow actuator is reported, not
//! retried. Supervisor commands from other threads queue behind a
//! [`SupervisorHandle`] and take effect at the start of the next cycle.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use skyloop_core::control::{ControlOutput, ControlReference, FlightController};
use skyloop_core::estimation::{
    CalibrationLimits, EstimateStatus, EstimatorOutput, ImuBias, ImuCalibrator, StateEstimate, StateEstimator,
};
use skyloop_core::mixer::{ActuatorCommand, MotorMixer, Saturation};
use skyloop_core::navigation::{Mission, Waypoint, WaypointNavigator};
use skyloop_core::sensors::SensorSample;
use skyloop_core::supervisor::{
    FailsafeAction, FailsafeReason, MissionState, MissionSupervisor, Preflight, SupervisorCommand, SupervisorHandle,
    SupervisorInputs,
};
use skyloop_core::telemetry::{TelemetryEvent, TelemetrySink};
use skyloop_core::{ArmError, FlightConfig, FlightError, MissionError};

use crate::clock::Clock;
use crate::dispatch::{ActuatorDispatcher, DispatchStats, DispatchStatus};
use crate::drivers::ActuatorDriver;
use crate::error::RuntimeError;
use crate::slot::{HubSample, SensorHub};

/// Everything one cycle produced
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Cycle start time [s]
    pub time: f64,
    /// A new sensor sample was consumed
    pub sample_received: bool,
    pub estimate: StateEstimate,
    pub status: EstimateStatus,
    pub reference: ControlReference,
    /// Active waypoint index
    pub cursor: usize,
    pub state: MissionState,
    /// Transitions applied during this cycle, in order
    pub transitions: Vec<(MissionState, MissionState)>,
    pub fault: Option<FlightError>,
    pub failsafe: Option<(FailsafeReason, FailsafeAction)>,
    pub output: ControlOutput,
    pub command: ActuatorCommand,
    pub saturation: Saturation,
    pub dispatch: DispatchStatus,
    /// Set in the cycle an IMU calibration finished
    pub calibration: Option<Result<ImuBias, FlightError>>,
}

/// Aggregate of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    /// Time of the last cycle [s]
    pub end_time: f64,
    pub final_state: Option<MissionState>,
    pub failsafe: Option<(FailsafeReason, FailsafeAction)>,
    /// Highest estimated altitude [m]
    pub max_altitude: f64,
    pub waypoints_reached: usize,
    pub saturated_cycles: u64,
    /// Cycles that ran past their period
    pub overruns: u64,
    /// Longest cycle [s]
    pub max_cycle_time: f64,
    pub watchdog_trips: u64,
    pub dispatch: DispatchStats,
    pub telemetry_dropped: u64,
}

impl RunSummary {
    pub(crate) fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.end_time = report.time;
        self.final_state = Some(report.state);
        if report.failsafe.is_some() {
            self.failsafe = report.failsafe;
        }
        if report.estimate.valid {
            self.max_altitude = self.max_altitude.max(report.estimate.altitude());
        }
        self.waypoints_reached = self.waypoints_reached.max(report.cursor);
        if report.saturation.is_saturated() {
            self.saturated_cycles += 1;
        }
    }
}

/// The control loop and everything it owns
pub struct FlightLoop<A, C, T> {
    config: Arc<FlightConfig>,
    hub: Arc<SensorHub>,
    estimator: StateEstimator,
    /// Built once the estimator knows the home position
    navigator: Option<WaypointNavigator>,
    controller: FlightController,
    mixer: MotorMixer,
    supervisor: MissionSupervisor,
    dispatcher: ActuatorDispatcher,
    mission: Mission,
    actuator: A,
    clock: C,
    telemetry: T,
    calibrator: Option<ImuCalibrator>,
    last_output: EstimatorOutput,
    last_tick: Option<f64>,
    telemetry_dropped: u64,
}

impl<A, C, T> FlightLoop<A, C, T>
where
    A: ActuatorDriver,
    C: Clock,
    T: TelemetrySink,
{
    /// Assemble the loop; fails on an invalid configuration
    pub fn new(
        config: Arc<FlightConfig>,
        hub: Arc<SensorHub>,
        actuator: A,
        clock: C,
        telemetry: T,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let mixer = MotorMixer::new(&config.mixer.frame)?;
        let estimator = StateEstimator::new(Arc::clone(&config));
        let last_output = EstimatorOutput {
            estimate: *estimator.estimate(),
            status: EstimateStatus::NotInitialized,
        };
        Ok(Self {
            hub,
            estimator,
            navigator: None,
            controller: FlightController::new(Arc::clone(&config)),
            mixer,
            supervisor: MissionSupervisor::new(Arc::clone(&config)),
            dispatcher: ActuatorDispatcher::from_config(&config),
            mission: Mission::new(config.envelope.max_altitude),
            actuator,
            clock,
            telemetry,
            calibrator: None,
            last_output,
            last_tick: None,
            telemetry_dropped: 0,
            config,
        })
    }

    pub fn config(&self) -> &Arc<FlightConfig> {
        &self.config
    }

    pub fn state(&self) -> MissionState {
        self.supervisor.state()
    }

    pub fn estimate(&self) -> &StateEstimate {
        &self.last_output.estimate
    }

    pub fn estimate_status(&self) -> &EstimateStatus {
        &self.last_output.status
    }

    pub fn mission(&self) -> &Mission {
        &self.mission
    }

    pub fn navigator(&self) -> Option<&WaypointNavigator> {
        self.navigator.as_ref()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn telemetry_dropped(&self) -> u64 {
        self.telemetry_dropped
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Handle for signalling the supervisor from other threads
    pub fn supervisor_handle(&self) -> SupervisorHandle {
        self.supervisor.signal_handle()
    }

    /// Replace the mission; only while it is unlocked
    pub fn load_mission(&mut self, mission: Mission) -> Result<(), MissionError> {
        if self.mission.is_locked() {
            return Err(MissionError::Locked);
        }
        self.mission = mission;
        if let Some(navigator) = self.navigator.as_mut() {
            navigator.load(&self.mission);
        }
        Ok(())
    }

    /// Append a waypoint, also while flying
    pub fn append_waypoint(&mut self, waypoint: Waypoint) -> Result<(), MissionError> {
        self.mission.push(waypoint)?;
        debug!("waypoint {} appended", self.mission.len() - 1);
        Ok(())
    }

    /// Average the next `limits.samples` samples into an IMU bias
    ///
    /// On success the bias is applied and the estimator restarts from it.
    pub fn start_calibration(&mut self, limits: CalibrationLimits) -> Result<(), ArmError> {
        let state = self.supervisor.state();
        if state != MissionState::Idle {
            return Err(ArmError::NotIdle(state));
        }
        info!("IMU calibration started, {} samples", limits.samples);
        self.calibrator = Some(ImuCalibrator::new(limits));
        Ok(())
    }

    pub fn calibrating(&self) -> bool {
        self.calibrator.is_some()
    }

    /// Run the pre-arm checks against the latest estimate
    pub fn arm(&mut self) -> Result<(), ArmError> {
        if self.calibrator.is_some() {
            return Err(ArmError::EstimateUnavailable("IMU calibration in progress".into()));
        }
        let origin = self.estimator.origin();
        if origin.is_none() && !self.mission.is_empty() {
            return Err(ArmError::EstimateUnavailable("no home position for the mission".into()));
        }
        let estimate = self.last_output.estimate;
        self.supervisor.request_arm(Preflight {
            config: &self.config,
            estimate: &estimate,
            status: &self.last_output.status,
            origin: origin.as_ref(),
            mission: &mut self.mission,
        })?;
        if let Some(navigator) = self.navigator.as_mut() {
            navigator.load(&self.mission);
        }
        info!("armed with {} waypoints", self.mission.len());
        Ok(())
    }

    /// Apply a supervisor command right away
    pub fn command(&mut self, command: SupervisorCommand) -> bool {
        self.supervisor.command(command)
    }

    /// Return to `Idle` after a flight; false unless `Disarmed`
    pub fn reset_after_flight(&mut self) -> bool {
        if !self.supervisor.reset() {
            return false;
        }
        self.controller.reset();
        if let Some(navigator) = self.navigator.as_mut() {
            navigator.reset();
        }
        true
    }

    /// One control cycle starting at `now`
    pub fn tick(&mut self, now: f64) -> CycleReport {
        let applied = self.supervisor.apply_pending();
        if applied > 0 {
            debug!("{applied} queued supervisor commands applied");
        }

        let mut calibration = None;
        let sample_received;
        let est_out = match self.hub.take_sample() {
            Some(HubSample { sample, missed }) => {
                sample_received = true;
                self.estimator.record_missed_frames(missed);
                let out = self.estimator.update(&sample);
                // Rejected samples never reach the bias average
                if !matches!(out.status, EstimateStatus::Invalid { .. }) {
                    calibration = self.feed_calibration(&sample);
                }
                out
            }
            None => {
                sample_received = false;
                self.estimator.check_staleness(now)
            }
        };
        let estimate = est_out.estimate;

        if self.navigator.is_none() {
            if let Some(origin) = self.estimator.origin() {
                let mut navigator = WaypointNavigator::new(Arc::clone(&self.config), origin);
                navigator.load(&self.mission);
                self.navigator = Some(navigator);
            }
        }

        let (_, _, yaw) = estimate.euler();
        let mut nav_reference = ControlReference::hold(estimate.position, yaw);
        let mut cursor = self.navigator.as_ref().map_or(0, WaypointNavigator::cursor);
        let mut mission_complete = false;
        if self.supervisor.navigation_active() {
            if let Some(navigator) = self.navigator.as_mut() {
                let nav = navigator.update(&self.mission, &estimate);
                nav_reference = nav.reference;
                cursor = nav.cursor;
                mission_complete = nav.mission_complete;
            }
        }

        let status = self.supervisor.update(SupervisorInputs {
            now,
            estimate: &estimate,
            status: &est_out.status,
            mission_complete,
            mission: &mut self.mission,
        });

        let reference = self.supervisor.shape_reference(&nav_reference, &estimate);
        let dt = match self.last_tick {
            Some(last) => now - last,
            None => self.config.loop_period(),
        };
        self.last_tick = Some(now);

        let output = self.controller.compute(&reference, &estimate, dt, status.state);
        let mix = self.mixer.mix(&output, now);
        let dispatch = self
            .dispatcher
            .dispatch(&mut self.actuator, &mix.command, now, &self.clock);

        self.emit(TelemetryEvent::Estimate {
            estimate,
            status: est_out.status.clone(),
        });
        self.emit(TelemetryEvent::Reference {
            timestamp: now,
            reference,
            cursor,
        });
        self.emit(TelemetryEvent::Control {
            timestamp: now,
            output,
        });
        self.emit(TelemetryEvent::Command {
            command: mix.command.clone(),
        });
        for &(from, to) in &status.transitions {
            self.emit(TelemetryEvent::StateChange { timestamp: now, from, to });
        }

        self.last_output = est_out.clone();

        CycleReport {
            time: now,
            sample_received,
            estimate,
            status: est_out.status,
            reference,
            cursor,
            state: status.state,
            transitions: status.transitions,
            fault: status.fault,
            failsafe: status.failsafe,
            output,
            command: mix.command,
            saturation: mix.saturation,
            dispatch,
            calibration,
        }
    }

    /// Run at the configured rate against the loop's clock until
    /// `keep_going` returns false
    ///
    /// Sleeps between cycles, so the clock must follow wall time. A cycle
    /// that finishes more than the sensor timeout past its deadline trips
    /// the watchdog failsafe.
    pub fn run<F>(&mut self, mut keep_going: F) -> RunSummary
    where
        F: FnMut(&CycleReport) -> bool,
    {
        let period = self.config.loop_period();
        let watchdog_limit = self.config.timeouts.sensor_timeout;
        let handle = self.supervisor.signal_handle();
        let mut summary = RunSummary::default();
        let mut deadline = self.clock.now() + period;

        info!("flight loop running at {:.0} Hz", self.config.loop_rate_hz);
        loop {
            let start = self.clock.now();
            let report = self.tick(start);
            summary.record(&report);

            let end = self.clock.now();
            summary.max_cycle_time = summary.max_cycle_time.max(end - start);
            if end - start > period {
                summary.overruns += 1;
            }
            let lateness = end - deadline;
            if lateness > watchdog_limit {
                warn!("cycle finished {:.1} ms late, tripping watchdog", lateness * 1e3);
                handle.send(SupervisorCommand::Failsafe(FailsafeReason::Watchdog));
                summary.watchdog_trips += 1;
            }

            if !keep_going(&report) {
                break;
            }

            if end < deadline {
                thread::sleep(Duration::from_secs_f64(deadline - end));
                deadline += period;
            } else {
                // Skip the cycles already missed
                deadline = end + period;
            }
        }

        self.finish_summary(&mut summary);
        summary
    }

    /// Fill in the loop-wide counters
    pub fn finish_summary(&self, summary: &mut RunSummary) {
        summary.dispatch = self.dispatcher.stats();
        summary.telemetry_dropped = self.telemetry_dropped;
        info!(
            "run ended after {} cycles in {:?}: max altitude {:.1} m, {} waypoints reached, {} dispatch failures",
            summary.cycles,
            self.supervisor.state(),
            summary.max_altitude,
            summary.waypoints_reached,
            summary.dispatch.failures()
        );
    }

    fn feed_calibration(&mut self, sample: &SensorSample) -> Option<Result<ImuBias, FlightError>> {
        let calibrator = self.calibrator.as_mut()?;
        if !calibrator.push(sample) {
            return None;
        }
        let result = calibrator.finish();
        self.calibrator = None;
        match &result {
            Ok(bias) => {
                info!(
                    "IMU calibrated: gyro bias {:?} rad/s, accel bias {:?} m/s²",
                    bias.gyro.as_slice(),
                    bias.accel.as_slice()
                );
                self.estimator.set_imu_bias(*bias);
                self.estimator.reset();
                self.navigator = None;
            }
            Err(err) => warn!("IMU calibration failed: {err}"),
        }
        Some(result)
    }

    fn emit(&mut self, event: TelemetryEvent) {
        if !self.telemetry.try_emit(event) {
            self.telemetry_dropped += 1;
        }
    }
}
