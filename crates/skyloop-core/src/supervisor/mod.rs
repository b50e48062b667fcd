//! Mission supervisor
//!
//! Owns the single authoritative [`MissionState`]:
//!
//! ```text
//! Idle → Arming → Airborne → Landing → Disarmed
//!   any armed state → Failsafe → Landing | Disarmed
//! ```
//!
//! A fault while `Idle` changes nothing; the pre-arm checks refuse to arm
//! until the estimate is healthy again. A landing that loses its estimate
//! cuts the motors once the vehicle must have reached the ground.
//!
//! Transitions only happen inside [`MissionSupervisor::update`],
//! [`MissionSupervisor::command`] and [`MissionSupervisor::apply_pending`],
//! all of which the flight loop calls between control computations.
//! Other threads reach the supervisor through a [`SupervisorHandle`]; their
//! commands queue until the next `apply_pending`.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::FlightConfig;
use crate::control::ControlReference;
use crate::error::{ArmError, FlightError, MissionError};
use crate::estimation::{EstimateStatus, StateEstimate};
use crate::navigation::{GeoOrigin, Mission};
use crate::Vec3;

/// Highest altitude magnitude at which the vehicle counts as on the ground for arming [m]
const ARM_MAX_ALTITUDE: f64 = 1.0;

/// Highest speed at which the vehicle counts as stationary for arming [m/s]
const ARM_MAX_SPEED: f64 = 0.5;

/// Fraction of the takeoff altitude at which the climb counts as done
const TAKEOFF_COMPLETE_FRACTION: f64 = 0.9;

/// Mission state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissionState {
    Idle,
    Arming,
    Airborne,
    Landing,
    Failsafe,
    Disarmed,
}

impl MissionState {
    /// Whether the controller produces thrust in this state
    pub fn is_flying(&self) -> bool {
        matches!(self, MissionState::Airborne | MissionState::Landing)
    }

    /// Whether the motors may be spinning
    pub fn is_armed(&self) -> bool {
        matches!(
            self,
            MissionState::Arming | MissionState::Airborne | MissionState::Landing | MissionState::Failsafe
        )
    }
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MissionState::Idle => "Idle",
            MissionState::Arming => "Arming",
            MissionState::Airborne => "Airborne",
            MissionState::Landing => "Landing",
            MissionState::Failsafe => "Failsafe",
            MissionState::Disarmed => "Disarmed",
        };
        f.write_str(name)
    }
}

/// Why a failsafe was entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailsafeReason {
    SensorStale,
    SensorInvalid,
    GeofenceBreach,
    /// Raised asynchronously, e.g. by a loop overrun watchdog
    Watchdog,
}

impl FailsafeReason {
    /// Failsafe reason for an escalating error
    pub fn from_error(error: &FlightError) -> Option<Self> {
        match error {
            FlightError::SensorStale { .. } => Some(FailsafeReason::SensorStale),
            FlightError::SensorInvalid(_) => Some(FailsafeReason::SensorInvalid),
            FlightError::GeofenceBreach { .. } => Some(FailsafeReason::GeofenceBreach),
            FlightError::ActuatorDispatchFailure(_) | FlightError::ConfigInvalid(_) => None,
        }
    }
}

/// How a failsafe is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailsafeAction {
    /// Descend at the landing rate until touchdown
    ControlledDescent,
    /// Stop the motors immediately
    MotorCutoff,
}

/// Commands accepted by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SupervisorCommand {
    /// Abort the mission and land where the vehicle is
    Land,
    /// Stop the motors now
    Disarm,
    /// Enter failsafe
    Failsafe(FailsafeReason),
}

/// Thread-safe handle for signalling the supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Queue a command for the next `apply_pending`; false if the supervisor is gone
    pub fn send(&self, command: SupervisorCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

/// Everything the pre-arm checks look at
#[derive(Debug)]
pub struct Preflight<'a> {
    pub config: &'a FlightConfig,
    pub estimate: &'a StateEstimate,
    pub status: &'a EstimateStatus,
    pub origin: Option<&'a GeoOrigin>,
    pub mission: &'a mut Mission,
}

/// Per-cycle supervisor inputs
#[derive(Debug)]
pub struct SupervisorInputs<'a> {
    /// Cycle time [s]
    pub now: f64,
    pub estimate: &'a StateEstimate,
    pub status: &'a EstimateStatus,
    pub mission_complete: bool,
    pub mission: &'a mut Mission,
}

/// Result of one supervisor update
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorStatus {
    pub state: MissionState,
    /// Transitions since the previous update, in order
    pub transitions: Vec<(MissionState, MissionState)>,
    /// Fault detected in this update
    pub fault: Option<FlightError>,
    pub failsafe: Option<(FailsafeReason, FailsafeAction)>,
}

/// Mission supervisor
#[derive(Debug)]
pub struct MissionSupervisor {
    config: Arc<FlightConfig>,
    state: MissionState,
    tx: Sender<SupervisorCommand>,
    rx: Receiver<SupervisorCommand>,
    transitions: Vec<(MissionState, MissionState)>,
    failsafe: Option<(FailsafeReason, FailsafeAction)>,
    /// A failsafe descent is in progress; further faults do not re-trigger
    failsafe_latched: bool,
    arm_time: f64,
    takeoff_complete: bool,
    /// Where the vehicle climbs to before navigating
    takeoff_target: Vec3,
    /// Horizontal position held during landing
    landing_position: Vec3,
    /// Start of the current stretch of landing without a valid estimate
    blind_since: Option<f64>,
    heading: f64,
    /// Last estimate that was valid
    last_estimate: StateEstimate,
    unlock_pending: bool,
}

impl MissionSupervisor {
    pub fn new(config: Arc<FlightConfig>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            config,
            state: MissionState::Idle,
            tx,
            rx,
            transitions: Vec::new(),
            failsafe: None,
            failsafe_latched: false,
            arm_time: 0.0,
            takeoff_complete: false,
            takeoff_target: Vec3::zeros(),
            landing_position: Vec3::zeros(),
            blind_since: None,
            heading: 0.0,
            last_estimate: StateEstimate::default(),
            unlock_pending: false,
        }
    }

    pub fn state(&self) -> MissionState {
        self.state
    }

    /// Active failsafe, if any
    pub fn failsafe(&self) -> Option<(FailsafeReason, FailsafeAction)> {
        self.failsafe
    }

    pub fn takeoff_complete(&self) -> bool {
        self.takeoff_complete
    }

    /// Whether the navigator output drives the vehicle this cycle
    pub fn navigation_active(&self) -> bool {
        self.state == MissionState::Airborne && self.takeoff_complete
    }

    pub fn signal_handle(&self) -> SupervisorHandle {
        SupervisorHandle { tx: self.tx.clone() }
    }

    /// Run the pre-arm checks and move to `Arming`
    ///
    /// On success the mission is locked against anything but appends.
    pub fn request_arm(&mut self, preflight: Preflight<'_>) -> Result<(), ArmError> {
        if self.state != MissionState::Idle {
            return Err(ArmError::NotIdle(self.state));
        }

        preflight.config.validate()?;

        if !preflight.status.is_ok() || !preflight.estimate.valid {
            return Err(ArmError::EstimateUnavailable(format!("{:?}", preflight.status)));
        }

        let estimate = preflight.estimate;
        let altitude = estimate.altitude();
        let speed = estimate.velocity.norm();
        if !altitude.is_finite()
            || !speed.is_finite()
            || altitude.abs() > ARM_MAX_ALTITUDE
            || speed > ARM_MAX_SPEED
        {
            return Err(ArmError::NotOnGround { altitude, speed });
        }

        let tilt = estimate.tilt();
        if !tilt.is_finite() || tilt > preflight.config.supervisor.max_arm_tilt {
            return Err(ArmError::Tilted(tilt));
        }

        let env = &preflight.config.envelope;
        for waypoint in preflight.mission.waypoints() {
            waypoint.validate(env.max_altitude)?;
        }
        if let Some(origin) = preflight.origin {
            for (index, waypoint) in preflight.mission.waypoints().iter().enumerate() {
                let enu = origin.to_enu(waypoint.latitude, waypoint.longitude, 0.0);
                let distance = enu.xy().norm();
                if distance > env.geofence_radius {
                    return Err(MissionError::OutsideGeofence {
                        index,
                        distance,
                        radius: env.geofence_radius,
                    }
                    .into());
                }
            }
        }

        preflight.mission.lock();
        self.arm_time = estimate.timestamp;
        self.takeoff_complete = false;
        self.failsafe = None;
        self.failsafe_latched = false;
        self.last_estimate = *estimate;
        let (_, _, yaw) = estimate.euler();
        self.heading = yaw;
        self.transition(MissionState::Arming);
        Ok(())
    }

    /// Apply a command now
    ///
    /// Returns false when the command does not apply in the current state.
    pub fn command(&mut self, command: SupervisorCommand) -> bool {
        match command {
            SupervisorCommand::Land => match self.state {
                MissionState::Airborne => {
                    self.enter_landing();
                    true
                }
                MissionState::Arming => {
                    self.enter_disarmed();
                    true
                }
                _ => false,
            },
            SupervisorCommand::Disarm => {
                if self.state.is_armed() {
                    warn!("disarm commanded while {}", self.state);
                    self.enter_disarmed();
                    true
                } else {
                    false
                }
            }
            SupervisorCommand::Failsafe(reason) => self.enter_failsafe(reason),
        }
    }

    /// Apply every command queued through a [`SupervisorHandle`]
    pub fn apply_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.rx.try_recv() {
            debug!("applying queued {:?}", command);
            self.command(command);
            applied += 1;
        }
        applied
    }

    /// Advance the state machine for one cycle
    pub fn update(&mut self, inputs: SupervisorInputs<'_>) -> SupervisorStatus {
        let estimate = inputs.estimate;
        if estimate.valid {
            self.last_estimate = *estimate;
        }

        let mut fault = inputs.status.fault();
        if fault.is_none() && estimate.valid {
            fault = self.check_geofence(estimate).err();
        }

        if let Some(err) = &fault {
            if self.state.is_armed() && !self.failsafe_latched {
                if let Some(reason) = FailsafeReason::from_error(err) {
                    warn!("{err}");
                    self.enter_failsafe(reason);
                }
            }
        }

        match self.state {
            MissionState::Arming => {
                if inputs.now - self.arm_time >= self.config.supervisor.spool_time {
                    let position = self.last_estimate.position;
                    self.takeoff_target = Vec3::new(
                        position.x,
                        position.y,
                        position.z + self.config.supervisor.takeoff_altitude,
                    );
                    self.transition(MissionState::Airborne);
                }
            }
            MissionState::Airborne => {
                if !self.takeoff_complete
                    && estimate.altitude() >= self.takeoff_target.z * TAKEOFF_COMPLETE_FRACTION
                {
                    info!("takeoff complete at {:.1} m", estimate.altitude());
                    self.takeoff_complete = true;
                }
                if self.takeoff_complete && inputs.mission_complete {
                    info!("mission complete, landing");
                    self.enter_landing();
                }
            }
            MissionState::Landing => {
                let sup = &self.config.supervisor;
                if estimate.valid {
                    self.blind_since = None;
                    if estimate.altitude() <= sup.touchdown_altitude
                        && estimate.climb_rate().abs() <= sup.touchdown_speed
                    {
                        info!("touchdown at {:.2} m", estimate.altitude());
                        self.enter_disarmed();
                    }
                } else {
                    let since = *self.blind_since.get_or_insert(inputs.now);
                    let altitude = self.last_estimate.altitude().max(0.0);
                    let limit = (altitude / sup.landing_descent_rate + sup.landing_margin)
                        .min(sup.landing_timeout);
                    if inputs.now - since >= limit {
                        let reason = fault
                            .as_ref()
                            .and_then(FailsafeReason::from_error)
                            .or_else(|| self.failsafe.map(|(reason, _)| reason))
                            .unwrap_or(FailsafeReason::SensorStale);
                        warn!(
                            "no valid estimate for {:.1} s while landing from {:.1} m, cutting motors",
                            inputs.now - since,
                            altitude
                        );
                        self.failsafe = Some((reason, FailsafeAction::MotorCutoff));
                        self.enter_disarmed();
                    }
                }
            }
            MissionState::Idle | MissionState::Failsafe | MissionState::Disarmed => {}
        }

        if self.unlock_pending {
            inputs.mission.unlock();
            self.unlock_pending = false;
        }

        SupervisorStatus {
            state: self.state,
            transitions: std::mem::take(&mut self.transitions),
            fault,
            failsafe: self.failsafe,
        }
    }

    /// Override the navigator reference where the state demands it
    ///
    /// - Takeoff: climb straight up to the takeoff altitude
    /// - Landing (commanded, mission end or failsafe): descend at the
    ///   landing rate while holding the horizontal position
    pub fn shape_reference(&self, reference: &ControlReference, estimate: &StateEstimate) -> ControlReference {
        match self.state {
            MissionState::Airborne if !self.takeoff_complete => {
                ControlReference::hold(self.takeoff_target, self.heading)
            }
            MissionState::Landing => {
                let correction =
                    (self.landing_position.xy() - estimate.position.xy()) * self.config.gains.position_kp;
                let velocity = Vec3::new(
                    correction.x,
                    correction.y,
                    -self.config.supervisor.landing_descent_rate,
                );
                ControlReference::velocity(self.landing_position, velocity, self.heading)
            }
            _ => *reference,
        }
    }

    /// Return to `Idle` after a flight; false unless `Disarmed`
    pub fn reset(&mut self) -> bool {
        if self.state != MissionState::Disarmed {
            return false;
        }
        self.failsafe = None;
        self.failsafe_latched = false;
        self.takeoff_complete = false;
        self.transition(MissionState::Idle);
        true
    }

    fn check_geofence(&self, estimate: &StateEstimate) -> Result<(), FlightError> {
        let env = &self.config.envelope;
        let distance = estimate.position.xy().norm();
        let altitude = estimate.altitude();
        if altitude > env.max_altitude || distance > env.geofence_radius {
            return Err(FlightError::GeofenceBreach { distance, altitude });
        }
        Ok(())
    }

    fn enter_failsafe(&mut self, reason: FailsafeReason) -> bool {
        if !self.state.is_armed() || self.failsafe_latched {
            return false;
        }
        let was_flying = self.state.is_flying();
        self.transition(MissionState::Failsafe);

        let altitude = self.last_estimate.altitude();
        let action = if was_flying && altitude >= self.config.supervisor.cutoff_altitude {
            FailsafeAction::ControlledDescent
        } else {
            FailsafeAction::MotorCutoff
        };
        warn!("failsafe {:?} at {:.1} m: {:?}", reason, altitude, action);
        self.failsafe = Some((reason, action));

        match action {
            FailsafeAction::ControlledDescent => {
                self.failsafe_latched = true;
                self.enter_landing();
            }
            FailsafeAction::MotorCutoff => self.enter_disarmed(),
        }
        true
    }

    fn enter_landing(&mut self) {
        self.landing_position = self.last_estimate.position;
        self.blind_since = None;
        let (_, _, yaw) = self.last_estimate.euler();
        self.heading = yaw;
        self.transition(MissionState::Landing);
    }

    fn enter_disarmed(&mut self) {
        self.unlock_pending = true;
        self.transition(MissionState::Disarmed);
    }

    fn transition(&mut self, to: MissionState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("mission state {from} -> {to}");
        self.state = to;
        self.transitions.push((from, to));
    }
}
