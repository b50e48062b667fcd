//! Sensor models for simulation
//!
//! Noisy IMU, barometer and GPS readings of a [`VehicleState`]. The IMU is
//! read on every sample; barometer and GPS only when their period has
//! elapsed.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use skyloop_core::navigation::GeoOrigin;
use skyloop_core::sensors::{GpsFix, SensorSample};
use skyloop_core::Vec3;

use super::vehicle::VehicleState;

/// Xorshift generator; deterministic for a given seed
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Standard normal (Box-Muller)
    pub fn next_gaussian(&mut self) -> f64 {
        let u1 = self.next_f64().max(1e-10);
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    pub fn next_gaussian_vec3(&mut self, std_dev: f64) -> Vec3 {
        if std_dev == 0.0 {
            return Vec3::zeros();
        }
        Vector3::new(
            self.next_gaussian() * std_dev,
            self.next_gaussian() * std_dev,
            self.next_gaussian() * std_dev,
        )
    }
}

impl Default for SimpleRng {
    fn default() -> Self {
        Self::new(12345)
    }
}

/// Noise and rates of the simulated sensors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorModelConfig {
    /// Accelerometer noise std dev [m/s²]
    pub accel_noise: f64,
    /// Gyroscope noise std dev [rad/s]
    pub gyro_noise: f64,
    /// Constant accelerometer bias [m/s²]
    pub accel_bias: Vec3,
    /// Constant gyroscope bias [rad/s]
    pub gyro_bias: Vec3,
    /// Barometer noise std dev [m]
    pub baro_noise: f64,
    /// GPS noise std dev, horizontal [m]
    pub gps_horizontal_noise: f64,
    /// GPS noise std dev, vertical [m]
    pub gps_vertical_noise: f64,
    pub baro_rate_hz: f64,
    pub gps_rate_hz: f64,
    pub seed: u64,
}

impl Default for SensorModelConfig {
    fn default() -> Self {
        Self {
            accel_noise: 0.05,
            gyro_noise: 0.002,
            accel_bias: Vec3::new(0.05, -0.03, 0.02),
            gyro_bias: Vec3::new(0.004, -0.002, 0.003),
            baro_noise: 0.1,
            gps_horizontal_noise: 0.5,
            gps_vertical_noise: 1.0,
            baro_rate_hz: 50.0,
            gps_rate_hz: 10.0,
            seed: 12345,
        }
    }
}

impl SensorModelConfig {
    /// Perfect sensors at the default rates
    pub fn noiseless() -> Self {
        Self {
            accel_noise: 0.0,
            gyro_noise: 0.0,
            accel_bias: Vec3::zeros(),
            gyro_bias: Vec3::zeros(),
            baro_noise: 0.0,
            gps_horizontal_noise: 0.0,
            gps_vertical_noise: 0.0,
            ..Self::default()
        }
    }
}

/// Simulated sensor suite
#[derive(Debug, Clone)]
pub struct SimSensors {
    config: SensorModelConfig,
    origin: GeoOrigin,
    rng: SimpleRng,
    last_baro: Option<f64>,
    last_gps: Option<f64>,
}

impl SimSensors {
    pub fn new(config: SensorModelConfig, home: &GpsFix) -> Self {
        Self {
            rng: SimpleRng::new(config.seed),
            origin: GeoOrigin::new(home),
            config,
            last_baro: None,
            last_gps: None,
        }
    }

    /// Sample every sensor that is due at time `t`
    pub fn sample(&mut self, state: &VehicleState, t: f64) -> SensorSample {
        let cfg = &self.config;
        let accel = state.specific_force() + cfg.accel_bias + self.rng.next_gaussian_vec3(cfg.accel_noise);
        let gyro = state.angular_velocity + cfg.gyro_bias + self.rng.next_gaussian_vec3(cfg.gyro_noise);
        let mut sample = SensorSample::new(t, accel, gyro);

        if due(&mut self.last_baro, t, cfg.baro_rate_hz) {
            let noise = self.rng.next_gaussian() * cfg.baro_noise;
            sample.baro = Some(self.origin.fix().altitude + state.position.z + noise);
        }

        if due(&mut self.last_gps, t, cfg.gps_rate_hz) {
            let noise = Vec3::new(
                self.rng.next_gaussian() * cfg.gps_horizontal_noise,
                self.rng.next_gaussian() * cfg.gps_horizontal_noise,
                self.rng.next_gaussian() * cfg.gps_vertical_noise,
            );
            sample.gps = Some(self.origin.from_enu(&(state.position + noise)));
        }

        sample
    }
}

/// Whether a sensor at `rate_hz` last read at `last` produces a reading at `t`
fn due(last: &mut Option<f64>, t: f64, rate_hz: f64) -> bool {
    if rate_hz <= 0.0 {
        return false;
    }
    // Small slack so a reading lands on the nominal tick despite rounding
    let period = 1.0 / rate_hz - 1e-6;
    match *last {
        Some(previous) if t - previous < period => false,
        _ => {
            *last = Some(t);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use skyloop_core::GRAVITY;

    const HOME: GpsFix = GpsFix {
        latitude: 47.3977,
        longitude: 8.5456,
        altitude: 488.0,
    };

    #[test]
    fn test_rng_deterministic_and_bounded() {
        let mut a = SimpleRng::new(7);
        let mut b = SimpleRng::new(7);
        for _ in 0..1000 {
            let x = a.next_f64();
            assert_eq!(x, b.next_f64());
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_gaussian_moments() {
        let mut rng = SimpleRng::new(99);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.next_gaussian()).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05);
        assert!((var - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_noiseless_sensors_at_rest() {
        let mut sensors = SimSensors::new(SensorModelConfig::noiseless(), &HOME);
        let state = VehicleState::default();
        let sample = sensors.sample(&state, 0.0);
        assert_relative_eq!(sample.accel, Vec3::new(0.0, 0.0, GRAVITY), epsilon = 1e-12);
        assert_eq!(sample.gyro, Vec3::zeros());
        assert_relative_eq!(sample.baro.unwrap(), 488.0, epsilon = 1e-9);
        let fix = sample.gps.unwrap();
        assert_relative_eq!(fix.latitude, HOME.latitude, epsilon = 1e-12);
    }

    #[test]
    fn test_aiding_sensor_rates() {
        let mut sensors = SimSensors::new(SensorModelConfig::noiseless(), &HOME);
        let state = VehicleState::default();
        let mut gps = 0;
        let mut baro = 0;
        // One second at 250 Hz
        for k in 0..250 {
            let sample = sensors.sample(&state, k as f64 * 0.004);
            gps += sample.gps.is_some() as usize;
            baro += sample.baro.is_some() as usize;
        }
        assert_eq!(gps, 10);
        assert_eq!(baro, 50);
    }
}
