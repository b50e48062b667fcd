//! Time sources
//!
//! Everything in the flight loop works in seconds since an arbitrary epoch.
//! [`MonotonicClock`] follows the wall clock; [`ManualClock`] only moves
//! when told to, so simulations and tests run deterministically and as fast
//! as the host allows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared time source
pub trait Clock: Send + Sync {
    /// Seconds since the clock's epoch
    fn now(&self) -> f64;
}

/// Wall-clock time since construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Manually advanced clock
///
/// Clones share the same counter, so a simulation can advance the time a
/// driver or dispatcher reads.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time_us: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_us(&self) -> u64 {
        self.time_us.load(Ordering::Acquire)
    }

    pub fn advance_us(&self, us: u64) {
        self.time_us.fetch_add(us, Ordering::AcqRel);
    }

    /// Advance by `dt` seconds, rounded to the microsecond
    pub fn advance(&self, dt: f64) {
        self.advance_us((dt.max(0.0) * 1e6).round() as u64);
    }

    pub fn set_us(&self, us: u64) {
        self.time_us.store(us, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now_us() as f64 * 1e-6
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> f64 {
        (**self).now()
    }
}
