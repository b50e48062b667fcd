//! Lockstep simulation runner
//!
//! Runs the flight loop against the simulated world on a manual clock, as
//! fast as the host allows. Each step advances the clock by one loop
//! period, reads the simulated sensors into the hub, and runs one cycle.

use std::sync::Arc;

use log::info;

use skyloop_core::estimation::{CalibrationLimits, ImuBias};
use skyloop_core::navigation::Mission;
use skyloop_core::supervisor::MissionState;
use skyloop_core::telemetry::TelemetrySink;
use skyloop_core::{FlightConfig, FlightError};

use super::config::SimConfig;
use super::world::{SimWorld, SimulatedActuator, SimulatedSensor};
use crate::clock::{Clock, ManualClock};
use crate::drivers::SensorDriver;
use crate::error::RuntimeError;
use crate::flight_loop::{CycleReport, FlightLoop, RunSummary};
use crate::slot::SensorHub;

/// Flight loop wired to a simulated vehicle
pub struct Simulation<T> {
    world: SimWorld,
    clock: ManualClock,
    sensor: SimulatedSensor<ManualClock>,
    hub: Arc<SensorHub>,
    flight: FlightLoop<SimulatedActuator, ManualClock, T>,
    period_us: u64,
    summary: RunSummary,
}

impl<T: TelemetrySink> Simulation<T> {
    pub fn new(config: Arc<FlightConfig>, sim: &SimConfig, telemetry: T) -> Result<Self, RuntimeError> {
        let world = SimWorld::new(sim, &config.mixer.frame)?;
        let clock = ManualClock::new();
        let hub = Arc::new(SensorHub::new());
        let period_us = (config.loop_period() * 1e6).round() as u64;
        let flight = FlightLoop::new(config, Arc::clone(&hub), world.actuator(), clock.clone(), telemetry)?;
        Ok(Self {
            sensor: world.sensor(clock.clone()),
            world,
            clock,
            hub,
            flight,
            period_us,
            summary: RunSummary::default(),
        })
    }

    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    pub fn flight(&self) -> &FlightLoop<SimulatedActuator, ManualClock, T> {
        &self.flight
    }

    pub fn flight_mut(&mut self) -> &mut FlightLoop<SimulatedActuator, ManualClock, T> {
        &mut self.flight
    }

    /// Simulated time [s]
    pub fn time(&self) -> f64 {
        self.clock.now()
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Advance one loop period and run one cycle
    pub fn step(&mut self) -> CycleReport {
        self.clock.advance_us(self.period_us);
        let reading = self.sensor.read();
        if !reading.stale {
            self.hub.publish(&reading.sample);
        }
        let report = self.flight.tick(self.clock.now());
        self.summary.record(&report);
        report
    }

    /// Step for `seconds` of simulated time
    pub fn run_for(&mut self, seconds: f64) -> Option<CycleReport> {
        let end = self.time() + seconds;
        let mut last = None;
        while self.time() < end {
            last = Some(self.step());
        }
        last
    }

    /// Step until `done` holds for a cycle, or `timeout` seconds pass
    ///
    /// Returns the cycle that satisfied `done`.
    pub fn run_until<F>(&mut self, timeout: f64, mut done: F) -> Option<CycleReport>
    where
        F: FnMut(&CycleReport) -> bool,
    {
        let end = self.time() + timeout;
        while self.time() < end {
            let report = self.step();
            if done(&report) {
                return Some(report);
            }
        }
        None
    }

    /// Calibrate the IMU on the ground
    pub fn calibrate(&mut self, limits: CalibrationLimits) -> Result<ImuBias, RuntimeError> {
        self.flight.start_calibration(limits)?;
        // Two periods per sample leaves room for the odd missed frame
        let timeout = 2.0 * limits.samples as f64 * self.flight.config().loop_period() + 1.0;
        let report = self
            .run_until(timeout, |report| report.calibration.is_some())
            .ok_or_else(|| FlightError::SensorInvalid("IMU calibration did not complete".into()))?;
        match report.calibration {
            Some(result) => Ok(result?),
            None => Err(FlightError::SensorInvalid("IMU calibration did not complete".into()).into()),
        }
    }

    /// Wait for a usable estimate, load `mission` and arm
    pub fn arm_with(&mut self, mission: Mission, settle_timeout: f64) -> Result<(), RuntimeError> {
        self.run_until(settle_timeout, |report| report.status.is_ok() && report.estimate.valid);
        self.flight.load_mission(mission)?;
        self.flight.arm()?;
        Ok(())
    }

    /// Fly until the vehicle is disarmed or `timeout` seconds pass
    pub fn fly(&mut self, timeout: f64) -> RunSummary {
        let outcome = self.run_until(timeout, |report| report.state == MissionState::Disarmed);
        if outcome.is_none() {
            info!("time limit of {timeout:.1} s reached in {}", self.flight.state());
        }
        self.summarize()
    }

    /// Summary of every step so far
    pub fn summarize(&self) -> RunSummary {
        let mut summary = self.summary.clone();
        self.flight.finish_summary(&mut summary);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyloop_core::telemetry::NullSink;

    fn simulation() -> Simulation<NullSink> {
        Simulation::new(Arc::new(FlightConfig::default()), &SimConfig::noiseless(), NullSink).unwrap()
    }

    #[test]
    fn test_step_advances_one_period() {
        let mut sim = simulation();
        let report = sim.step();
        assert!(report.sample_received);
        assert_eq!(report.time, 0.004);
        assert_eq!(sim.world().time(), 0.004);
    }

    #[test]
    fn test_estimate_settles_on_the_ground() {
        let mut sim = simulation();
        let report = sim.run_for(1.0).unwrap();
        assert!(report.status.is_ok());
        assert!(report.estimate.position.norm() < 0.1);
        assert_eq!(report.state, MissionState::Idle);
        assert_eq!(sim.summary().cycles, 250);
    }

    #[test]
    fn test_calibration_of_biased_imu() {
        let mut sim_config = SimConfig::noiseless();
        sim_config.sensors.gyro_bias = skyloop_core::Vec3::new(0.01, -0.02, 0.005);
        let mut sim = Simulation::new(Arc::new(FlightConfig::default()), &sim_config, NullSink).unwrap();

        let bias = sim.calibrate(CalibrationLimits::default()).unwrap();
        approx::assert_relative_eq!(bias.gyro, sim_config.sensors.gyro_bias, epsilon = 1e-12);
    }
}
