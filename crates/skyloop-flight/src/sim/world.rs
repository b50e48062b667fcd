//! Shared simulated world and its drivers
//!
//! [`SimWorld`] owns the vehicle and its sensors behind a mutex. Physics
//! advances lazily: whoever reads the world first at a new time steps it
//! forward to that time. [`SimulatedSensor`] and [`SimulatedActuator`] are
//! the [`SensorDriver`] and [`ActuatorDriver`] views of the same world.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::info;

use skyloop_core::mixer::{ActuatorCommand, FrameKind};
use skyloop_core::sensors::SensorSample;
use skyloop_core::FlightError;

use super::config::SimConfig;
use super::sensors::SimSensors;
use super::vehicle::{SimVehicle, VehicleState};
use crate::clock::Clock;
use crate::drivers::{ActuatorDriver, DriverReading, SensorDriver};

#[derive(Debug)]
struct WorldState {
    vehicle: SimVehicle,
    sensors: SimSensors,
    time: f64,
    physics_dt: f64,
    dropout: bool,
}

impl WorldState {
    fn advance_to(&mut self, t: f64) {
        while self.time < t {
            let remaining = t - self.time;
            if remaining <= self.physics_dt {
                self.vehicle.step(remaining);
                self.time = t;
            } else {
                self.vehicle.step(self.physics_dt);
                self.time += self.physics_dt;
            }
        }
    }
}

/// Handle to the simulated world; clones share it
#[derive(Debug, Clone)]
pub struct SimWorld {
    inner: Arc<Mutex<WorldState>>,
}

impl SimWorld {
    pub fn new(config: &SimConfig, frame: &FrameKind) -> Result<Self, FlightError> {
        config.validate()?;
        let vehicle = SimVehicle::new(config.vehicle.clone(), frame)?;
        let sensors = SimSensors::new(config.sensors.clone(), &config.home);
        info!(
            "simulated {}-motor vehicle at lat {:.5}, lon {:.5}",
            vehicle.motor_count(),
            config.home.latitude,
            config.home.longitude
        );
        let state = WorldState {
            vehicle,
            sensors,
            time: 0.0,
            physics_dt: config.physics_dt,
            dropout: false,
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(state)),
        })
    }

    /// Step the physics forward to time `t`; earlier times are ignored
    pub fn advance_to(&self, t: f64) {
        self.lock().advance_to(t);
    }

    /// Simulated time [s]
    pub fn time(&self) -> f64 {
        self.lock().time
    }

    /// True vehicle state
    pub fn vehicle_state(&self) -> VehicleState {
        *self.lock().vehicle.state()
    }

    pub fn set_vehicle_state(&self, state: VehicleState) {
        self.lock().vehicle.set_state(state);
    }

    pub fn throttles(&self) -> Vec<f64> {
        self.lock().vehicle.throttles().to_vec()
    }

    /// While set, sensor reads return nothing new
    pub fn set_sensor_dropout(&self, dropout: bool) {
        let mut world = self.lock();
        if world.dropout != dropout {
            info!("sensor dropout {} at t={:.3}", if dropout { "on" } else { "off" }, world.time);
        }
        world.dropout = dropout;
    }

    pub fn sensor<C: Clock>(&self, clock: C) -> SimulatedSensor<C> {
        SimulatedSensor {
            world: self.clone(),
            clock,
            last: SensorSample::at_rest(0.0),
            last_time: None,
        }
    }

    pub fn actuator(&self) -> SimulatedActuator {
        SimulatedActuator { world: self.clone() }
    }

    // A panicked holder leaves at worst a partly advanced world
    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sensor driver reading the simulated sensors at the clock's time
#[derive(Debug)]
pub struct SimulatedSensor<C> {
    world: SimWorld,
    clock: C,
    last: SensorSample,
    last_time: Option<f64>,
}

impl<C: Clock> SensorDriver for SimulatedSensor<C> {
    fn read(&mut self) -> DriverReading {
        let now = self.clock.now();
        let mut world = self.world.lock();
        world.advance_to(now);

        let repeated = self.last_time.is_some_and(|t| now <= t);
        if world.dropout || repeated {
            return DriverReading::stale(self.last);
        }

        let state = *world.vehicle.state();
        self.last = world.sensors.sample(&state, now);
        self.last_time = Some(now);
        DriverReading::fresh(self.last)
    }
}

/// Actuator driver setting the simulated motor throttles
#[derive(Debug, Clone)]
pub struct SimulatedActuator {
    world: SimWorld,
}

impl ActuatorDriver for SimulatedActuator {
    fn send(&mut self, command: &ActuatorCommand) -> Result<(), FlightError> {
        self.world.lock().vehicle.set_throttles(&command.throttles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use approx::assert_relative_eq;

    fn world() -> SimWorld {
        SimWorld::new(&SimConfig::noiseless(), &FrameKind::QuadX).unwrap()
    }

    #[test]
    fn test_advance_lands_on_requested_time() {
        let world = world();
        world.advance_to(0.0105);
        assert_eq!(world.time(), 0.0105);
        world.advance_to(0.005);
        assert_eq!(world.time(), 0.0105);
    }

    #[test]
    fn test_sensor_repeats_are_stale() {
        let world = world();
        let clock = ManualClock::new();
        let mut sensor = world.sensor(clock.clone());

        clock.advance(0.004);
        assert!(!sensor.read().stale);
        let again = sensor.read();
        assert!(again.stale);
        assert_eq!(again.sample.timestamp, 0.004);
    }

    #[test]
    fn test_dropout_suppresses_readings() {
        let world = world();
        let clock = ManualClock::new();
        let mut sensor = world.sensor(clock.clone());

        world.set_sensor_dropout(true);
        clock.advance(0.004);
        assert!(sensor.read().stale);

        world.set_sensor_dropout(false);
        clock.advance(0.004);
        assert!(!sensor.read().stale);
    }

    #[test]
    fn test_actuator_drives_vehicle() {
        let world = world();
        let mut actuator = world.actuator();
        actuator.send(&ActuatorCommand::new(vec![0.7; 4], 4, 0.0).unwrap()).unwrap();
        assert_eq!(world.throttles(), vec![0.7; 4]);

        world.advance_to(1.0);
        let state = world.vehicle_state();
        assert!(state.position.z > 0.5);
        assert_relative_eq!(state.position.x, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_actuator_rejects_wrong_motor_count() {
        let world = world();
        let mut actuator = world.actuator();
        let err = actuator.send(&ActuatorCommand::zero(6, 0.0)).unwrap_err();
        assert!(matches!(err, FlightError::ActuatorDispatchFailure(_)));
    }
}
