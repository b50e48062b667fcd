//! Simulated multirotor
//!
//! Rigid body in the local ENU frame:
//!
//! ṗ = v
//! v̇ = g + T/m · R(q)e₃ − c_d·v
//! q̇ = 1/2 Λ(q)[0; ω]
//! Jω̇ = −ω × Jω + τ
//!
//! Motor throttles map to collective thrust and body torques through the
//! same mixing rows the flight code uses: each torque axis is the
//! projection of the throttle vector onto that axis' column, scaled to the
//! configured maximum torque. The ground is a plane at z = 0 the vehicle
//! rests on until thrust exceeds its weight.

use nalgebra::{UnitQuaternion, Vector4};
use serde::{Deserialize, Serialize};

use skyloop_core::math::{body_z_axis, integrate_body_rate};
use skyloop_core::mixer::FrameKind;
use skyloop_core::{gravity_enu, FlightError, Vec3, GRAVITY};

/// Physical vehicle parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleParams {
    /// Mass [kg]
    pub mass: f64,
    /// Principal moments of inertia [kg·m²]
    pub inertia: Vec3,
    /// Body torque at a normalised demand of 1 [N·m]
    pub max_torque: Vec3,
    /// Linear drag per unit mass [1/s]
    pub drag: f64,
    /// Throttle at which the motors together carry the vehicle's weight
    pub hover_throttle: f64,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            mass: 1.5,
            inertia: Vec3::new(0.02, 0.02, 0.04),
            max_torque: Vec3::new(1.0, 1.0, 0.2),
            drag: 0.3,
            hover_throttle: 0.5,
        }
    }
}

/// True vehicle state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Position [m] (ENU, relative to home)
    pub position: Vec3,
    /// Velocity [m/s]
    pub velocity: Vec3,
    /// Orientation (body to world)
    pub attitude: UnitQuaternion<f64>,
    /// Angular velocity [rad/s] (body frame)
    pub angular_velocity: Vec3,
    /// Linear acceleration of the last step [m/s²] (world frame)
    pub acceleration: Vec3,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            velocity: Vec3::zeros(),
            attitude: UnitQuaternion::identity(),
            angular_velocity: Vec3::zeros(),
            acceleration: Vec3::zeros(),
        }
    }
}

impl VehicleState {
    /// Body z-axis in the world frame
    pub fn thrust_direction(&self) -> Vec3 {
        body_z_axis(&self.attitude)
    }

    /// What an ideal accelerometer reads: a − g in the body frame [m/s²]
    pub fn specific_force(&self) -> Vec3 {
        self.attitude.inverse_transform_vector(&(self.acceleration - gravity_enu()))
    }

    pub fn on_ground(&self) -> bool {
        self.position.z <= 0.0 && self.velocity.z <= 0.0
    }
}

/// Simulated multirotor driven by per-motor throttles
#[derive(Debug, Clone)]
pub struct SimVehicle {
    params: VehicleParams,
    rows: Vec<Vector4<f64>>,
    /// Squared norms of the roll, pitch and yaw columns
    column_norms: Vec3,
    motor_thrust: f64,
    throttles: Vec<f64>,
    state: VehicleState,
}

impl SimVehicle {
    pub fn new(params: VehicleParams, frame: &FrameKind) -> Result<Self, FlightError> {
        frame.validate()?;
        if !(params.mass > 0.0 && params.hover_throttle > 0.0 && params.inertia.min() > 0.0) {
            return Err(FlightError::ConfigInvalid(
                "simulated vehicle needs positive mass, inertia and hover throttle".into(),
            ));
        }
        let rows = frame.rows();
        let column_norms = Vec3::from_fn(|axis, _| rows.iter().map(|r| r[axis + 1].powi(2)).sum());
        let collective: f64 = rows.iter().map(|r| r[0]).sum();
        // Motors at hover throttle carry the weight
        let motor_thrust = params.mass * GRAVITY / (collective * params.hover_throttle);
        let throttles = vec![0.0; rows.len()];
        Ok(Self {
            params,
            rows,
            column_norms,
            motor_thrust,
            throttles,
            state: VehicleState::default(),
        })
    }

    pub fn params(&self) -> &VehicleParams {
        &self.params
    }

    pub fn state(&self) -> &VehicleState {
        &self.state
    }

    pub fn set_state(&mut self, state: VehicleState) {
        self.state = state;
    }

    pub fn throttles(&self) -> &[f64] {
        &self.throttles
    }

    pub fn motor_count(&self) -> usize {
        self.rows.len()
    }

    pub fn set_throttles(&mut self, throttles: &[f64]) -> Result<(), FlightError> {
        if throttles.len() != self.throttles.len() {
            return Err(FlightError::ActuatorDispatchFailure(format!(
                "{} throttles for {} motors",
                throttles.len(),
                self.throttles.len()
            )));
        }
        for (slot, value) in self.throttles.iter_mut().zip(throttles) {
            *slot = value.clamp(0.0, 1.0);
        }
        Ok(())
    }

    /// Collective thrust [N] and body torque [N·m] of the current throttles
    pub fn wrench(&self) -> (f64, Vec3) {
        let u = &self.throttles;
        let thrust = self.rows.iter().zip(u).map(|(r, t)| r[0] * t).sum::<f64>() * self.motor_thrust;
        let demand = Vec3::from_fn(|axis, _| {
            let norm = self.column_norms[axis];
            if norm <= f64::EPSILON {
                return 0.0;
            }
            self.rows.iter().zip(u).map(|(r, t)| r[axis + 1] * t).sum::<f64>() / norm
        });
        (thrust, demand.component_mul(&self.params.max_torque))
    }

    /// Advance by `dt` seconds (semi-implicit Euler)
    pub fn step(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let (thrust, torque) = self.wrench();
        let s = &mut self.state;

        let mut acceleration =
            gravity_enu() + s.thrust_direction() * thrust / self.params.mass - s.velocity * self.params.drag;

        if s.on_ground() && acceleration.z <= 0.0 {
            // Resting: the ground carries whatever thrust does not
            s.position.z = 0.0;
            s.velocity = Vec3::zeros();
            s.angular_velocity = Vec3::zeros();
            s.acceleration = Vec3::zeros();
            return;
        }

        let omega = s.angular_velocity;
        let inertia = self.params.inertia;
        let gyroscopic = -omega.cross(&inertia.component_mul(&omega));
        let angular_acceleration = (torque + gyroscopic).component_div(&inertia);

        s.velocity += acceleration * dt;
        s.position += s.velocity * dt;
        s.angular_velocity += angular_acceleration * dt;
        s.attitude = integrate_body_rate(&s.attitude, &s.angular_velocity, dt);

        if s.position.z < 0.0 {
            // Touchdown
            s.position.z = 0.0;
            s.velocity = Vec3::zeros();
            s.angular_velocity = Vec3::zeros();
            acceleration = Vec3::zeros();
        }
        s.acceleration = acceleration;
    }
}
