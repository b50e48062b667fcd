//! Single-slot sensor buffers
//!
//! Each sensor type gets one [`LatestSlot`]: producers overwrite it, the
//! flight loop takes whatever is there. Nothing queues, nothing blocks for
//! longer than a copy. A value replaced before the loop took it counts as a
//! missed frame, reported with the next take.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::trace;
use serde::{Deserialize, Serialize};

use skyloop_core::sensors::{GpsFix, SensorSample};
use skyloop_core::Vec3;

/// A value taken from a slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Taken<T> {
    pub value: T,
    /// Values overwritten since the previous take
    pub missed: u64,
}

/// Last-writer-wins cell
#[derive(Debug)]
pub struct LatestSlot<T> {
    value: Mutex<Option<T>>,
    overwritten: AtomicU64,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            overwritten: AtomicU64::new(0),
        }
    }

    /// Store `value`; returns true if it replaced one nobody took
    pub fn publish(&self, value: T) -> bool {
        let mut slot = self.lock();
        let replaced = slot.replace(value).is_some();
        // Counted under the lock so a take never sees the value without its count
        if replaced {
            self.overwritten.fetch_add(1, Ordering::AcqRel);
        }
        replaced
    }

    /// Take the latest value, if any
    pub fn take(&self) -> Option<Taken<T>> {
        let mut slot = self.lock();
        let value = slot.take()?;
        let missed = self.overwritten.swap(0, Ordering::AcqRel);
        Some(Taken { value, missed })
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Overwrites not yet reported by a take
    pub fn pending_overwrites(&self) -> u64 {
        self.overwritten.load(Ordering::Acquire)
    }

    // A producer that panicked mid-publish left a complete value or none
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Inertial part of a sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuReading {
    pub timestamp: f64,
    pub accel: Vec3,
    pub gyro: Vec3,
}

/// A sample assembled from the hub
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HubSample {
    pub sample: SensorSample,
    /// IMU frames overwritten before this one was taken
    pub missed: u32,
}

/// One slot per sensor type
///
/// GPS and barometer readings wait in their slots until the next IMU
/// reading is taken, which they are attached to.
#[derive(Debug, Default)]
pub struct SensorHub {
    imu: LatestSlot<ImuReading>,
    gps: LatestSlot<GpsFix>,
    baro: LatestSlot<f64>,
}

impl SensorHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_imu(&self, reading: ImuReading) {
        if self.imu.publish(reading) {
            trace!("imu frame at t={:.4} replaced an unread one", reading.timestamp);
        }
    }

    pub fn publish_gps(&self, fix: GpsFix) {
        self.gps.publish(fix);
    }

    pub fn publish_baro(&self, altitude: f64) {
        self.baro.publish(altitude);
    }

    /// Split a combined sample into the per-sensor slots
    pub fn publish(&self, sample: &SensorSample) {
        // Aiding readings first so a concurrent take never sees the IMU
        // reading without them
        if let Some(fix) = sample.gps {
            self.publish_gps(fix);
        }
        if let Some(altitude) = sample.baro {
            self.publish_baro(altitude);
        }
        self.publish_imu(ImuReading {
            timestamp: sample.timestamp,
            accel: sample.accel,
            gyro: sample.gyro,
        });
    }

    /// Latest IMU reading with any waiting GPS and barometer readings
    pub fn take_sample(&self) -> Option<HubSample> {
        let imu = self.imu.take()?;
        let mut sample = SensorSample::new(imu.value.timestamp, imu.value.accel, imu.value.gyro);
        sample.gps = self.gps.take().map(|t| t.value);
        sample.baro = self.baro.take().map(|t| t.value);
        Some(HubSample {
            sample,
            missed: u32::try_from(imu.missed).unwrap_or(u32::MAX),
        })
    }
}
