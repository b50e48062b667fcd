//! Sensor acquisition thread
//!
//! Polls a [`SensorDriver`] at a fixed period and publishes fresh readings
//! into the [`SensorHub`]. The flight loop never waits on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};

use crate::drivers::SensorDriver;
use crate::error::RuntimeError;
use crate::slot::SensorHub;

/// Background sensor producer
#[derive(Debug)]
pub struct SensorProducer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<u64>,
}

impl SensorProducer {
    /// Start polling `driver` every `period`
    pub fn spawn<D>(mut driver: D, hub: Arc<SensorHub>, period: Duration) -> Result<Self, RuntimeError>
    where
        D: SensorDriver + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("sensor-producer".into())
            .spawn(move || {
                let mut published = 0u64;
                while !flag.load(Ordering::Acquire) {
                    let reading = driver.read();
                    if !reading.stale {
                        hub.publish(&reading.sample);
                        published += 1;
                    }
                    thread::sleep(period);
                }
                debug!("sensor producer published {published} samples");
                published
            })?;
        info!("sensor producer started, period {:?}", period);
        Ok(Self { stop, handle })
    }

    /// Stop the thread; returns the number of samples it published
    pub fn stop(self) -> Result<u64, RuntimeError> {
        self.stop.store(true, Ordering::Release);
        self.handle
            .join()
            .map_err(|_| RuntimeError::ThreadPanicked("sensor producer"))
    }
}
