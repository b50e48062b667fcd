//! End-to-end flights against the simulated vehicle
//!
//! Every test runs the full flight loop in lockstep with perfect sensors,
//! so the outcomes are deterministic.

use std::sync::Arc;

use skyloop_core::estimation::CalibrationLimits;
use skyloop_core::navigation::{GeoOrigin, Mission, Waypoint};
use skyloop_core::supervisor::{FailsafeAction, FailsafeReason, MissionState, SupervisorCommand};
use skyloop_core::telemetry::{NullSink, TelemetryEvent};
use skyloop_core::{FlightConfig, Vec3};
use skyloop_flight::sim::{SimConfig, Simulation};
use skyloop_flight::{ChannelTelemetry, TelemetryRecorder};

fn config() -> Arc<FlightConfig> {
    Arc::new(FlightConfig::default())
}

fn empty_mission() -> Mission {
    Mission::new(FlightConfig::default().envelope.max_altitude)
}

/// Waypoint at a local ENU offset from the simulated home
fn waypoint_at(sim: &SimConfig, offset: Vec3) -> Waypoint {
    let fix = GeoOrigin::new(&sim.home).from_enu(&Vec3::new(offset.x, offset.y, 0.0));
    Waypoint::new(fix.latitude, fix.longitude, offset.z)
}

fn armed_simulation(mission: Mission) -> Simulation<NullSink> {
    let mut sim = Simulation::new(config(), &SimConfig::noiseless(), NullSink).unwrap();
    sim.calibrate(CalibrationLimits::default()).unwrap();
    sim.arm_with(mission, 5.0).unwrap();
    sim
}

#[test]
fn test_takeoff_climbs_to_takeoff_altitude() {
    let mut sim = armed_simulation(empty_mission());
    let takeoff = sim.flight().config().supervisor.takeoff_altitude;

    let report = sim
        .run_until(20.0, |r| r.state == MissionState::Airborne && r.estimate.altitude() >= 0.9 * takeoff)
        .expect("never reached the takeoff altitude");
    assert!(report.estimate.valid);

    // The true vehicle is where the estimate says
    let truth = sim.world().vehicle_state();
    assert!((truth.position.z - report.estimate.altitude()).abs() < 0.3);
    assert!(truth.position.xy().norm() < 0.5);

    // And it holds there with an empty mission
    sim.run_for(5.0);
    let truth = sim.world().vehicle_state();
    assert_eq!(sim.flight().state(), MissionState::Airborne);
    assert!((truth.position.z - takeoff).abs() < 0.5, "holding at {:.2} m", truth.position.z);
}

#[test]
fn test_mission_flown_to_touchdown() {
    let sim_config = SimConfig::noiseless();
    let target = Vec3::new(8.0, 4.0, 3.0);
    let mission = Mission::with_waypoints(100.0, [waypoint_at(&sim_config, target)]).unwrap();
    let mut sim = armed_simulation(mission);

    let summary = sim.fly(90.0);
    assert_eq!(summary.final_state, Some(MissionState::Disarmed));
    assert_eq!(summary.waypoints_reached, 1);
    assert!(summary.failsafe.is_none());
    assert!(summary.max_altitude > 2.5);

    // Landed near the waypoint, motors off
    let truth = sim.world().vehicle_state();
    assert!(truth.position.z < 0.2);
    assert!((truth.position.xy() - target.xy()).norm() < 2.5);
    assert!(sim.world().throttles().iter().all(|&t| t == 0.0));

    // The mission is editable again after the flight
    assert!(!sim.flight().mission().is_locked());
}

#[test]
fn test_sensor_dropout_in_flight_lands() {
    let mut sim = armed_simulation(empty_mission());
    sim.run_until(20.0, |r| r.state == MissionState::Airborne && r.estimate.altitude() >= 1.5)
        .expect("never climbed");

    sim.world().set_sensor_dropout(true);
    let dropout_time = sim.time();
    let timeout = sim.flight().config().timeouts.sensor_timeout;
    let period = sim.flight().config().loop_period();

    let report = sim
        .run_until(1.0, |r| r.transitions.iter().any(|&(_, to)| to == MissionState::Failsafe))
        .expect("dropout never detected");
    assert!(report.time - dropout_time <= timeout + 2.0 * period);
    assert_eq!(
        report.failsafe,
        Some((FailsafeReason::SensorStale, FailsafeAction::ControlledDescent))
    );
    // Above the cutoff altitude the failsafe resolves to a controlled descent
    assert_eq!(report.state, MissionState::Landing);
    assert!(report.output.thrust > 0.0);

    // With no estimate the descent ends once the vehicle must be down
    let cfg = Arc::clone(sim.flight().config());
    let limit = report.estimate.altitude() / cfg.supervisor.landing_descent_rate + cfg.supervisor.landing_margin;
    let summary = sim.fly(limit + 1.0);
    assert_eq!(summary.final_state, Some(MissionState::Disarmed));
    assert_eq!(summary.failsafe, Some((FailsafeReason::SensorStale, FailsafeAction::MotorCutoff)));
    assert!(summary.end_time - report.time <= limit + 2.0 * period);
    assert!(sim.world().throttles().iter().all(|&t| t == 0.0));
    assert!(sim.world().vehicle_state().position.z < 0.2);
}

#[test]
fn test_dropout_on_the_ground_cuts_motors() {
    let mut sim = armed_simulation(empty_mission());
    sim.run_until(0.1, |r| r.state == MissionState::Arming).expect("never armed");
    sim.world().set_sensor_dropout(true);
    let report = sim
        .run_until(1.0, |r| r.failsafe.is_some())
        .expect("dropout never detected");
    assert_eq!(report.failsafe, Some((FailsafeReason::SensorStale, FailsafeAction::MotorCutoff)));
    assert_eq!(report.state, MissionState::Disarmed);
    assert!(report.command.is_zero());
}

#[test]
fn test_watchdog_signal_from_another_thread() {
    let mut sim = armed_simulation(empty_mission());
    sim.run_until(20.0, |r| r.state == MissionState::Airborne && r.estimate.altitude() >= 1.5)
        .expect("never climbed");

    let handle = sim.flight().supervisor_handle();
    std::thread::spawn(move || handle.send(SupervisorCommand::Failsafe(FailsafeReason::Watchdog)))
        .join()
        .unwrap();

    // Applied between cycles, at the start of the next one
    let report = sim.step();
    assert_eq!(
        report.transitions,
        vec![
            (MissionState::Airborne, MissionState::Failsafe),
            (MissionState::Failsafe, MissionState::Landing)
        ]
    );

    let summary = sim.fly(30.0);
    assert_eq!(summary.final_state, Some(MissionState::Disarmed));
}

#[test]
fn test_waypoint_appended_in_flight_is_flown() {
    let sim_config = SimConfig::noiseless();
    let first = waypoint_at(&sim_config, Vec3::new(5.0, 0.0, 2.5));
    let mission = Mission::with_waypoints(100.0, [first]).unwrap();
    let mut sim = armed_simulation(mission);

    sim.run_until(20.0, |r| r.state == MissionState::Airborne && r.estimate.altitude() >= 1.5)
        .expect("never climbed");
    let second = waypoint_at(&sim_config, Vec3::new(5.0, 6.0, 2.5));
    sim.flight_mut().append_waypoint(second).unwrap();

    let summary = sim.fly(90.0);
    assert_eq!(summary.final_state, Some(MissionState::Disarmed));
    assert_eq!(summary.waypoints_reached, 2);
    let truth = sim.world().vehicle_state();
    assert!((truth.position.xy() - Vec3::new(5.0, 6.0, 0.0).xy()).norm() < 2.5);
}

#[test]
fn test_full_telemetry_channel_never_stalls_the_loop() {
    let (sink, rx) = ChannelTelemetry::bounded(8);
    let mut sim = Simulation::new(config(), &SimConfig::noiseless(), sink.clone()).unwrap();

    // Nobody drains the channel
    sim.run_for(1.0);
    assert_eq!(sim.summary().cycles, 250);
    assert_eq!(sim.flight().telemetry_dropped(), 250 * 4 - 8);
    assert_eq!(sink.dropped(), 250 * 4 - 8);

    // The first events are still the oldest ones
    let first = rx.recv().unwrap();
    assert!(matches!(first, TelemetryEvent::Estimate { .. }));
}

#[test]
fn test_recorded_telemetry_matches_flight() {
    let (sink, rx) = ChannelTelemetry::bounded(100_000);
    let buffer = SharedBuffer::default();
    let recorder = TelemetryRecorder::spawn(rx, buffer.clone());

    let mut sim = Simulation::new(config(), &SimConfig::noiseless(), sink).unwrap();
    sim.calibrate(CalibrationLimits::default()).unwrap();
    sim.arm_with(empty_mission(), 5.0).unwrap();
    sim.run_for(2.0);
    let cycles = sim.summary().cycles;
    drop(sim);

    let written = recorder.join().unwrap();
    let text = buffer.contents();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(written as usize, lines.len());

    let events: Vec<TelemetryEvent> = lines.iter().map(|l| serde_json::from_str(l).unwrap()).collect();
    let commands = events
        .iter()
        .filter(|e| matches!(e, TelemetryEvent::Command { .. }))
        .count();
    assert_eq!(commands as u64, cycles);
    assert!(events.iter().any(|e| matches!(
        e,
        TelemetryEvent::StateChange {
            to: MissionState::Airborne,
            ..
        }
    )));
}

/// In-memory writer that stays readable after the recorder took it
#[derive(Clone, Default)]
struct SharedBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl std::io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
