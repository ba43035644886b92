//! Host monotonic time source

use std::sync::Arc;
use std::time::Instant;

/// Source of the host's monotonic time, in microseconds.
///
/// The clock core never sleeps and never reads wall-clock time; everything it
/// needs from the platform is a monotonically non-decreasing microsecond
/// counter. Production code uses [`MonotonicClock`]; tests inject a manually
/// stepped implementation.
pub trait HostClock: Send + Sync {
    /// Current host time in microseconds. Must never decrease.
    fn now(&self) -> i64;
}

/// Monotonic host clock backed by a base `Instant`
///
/// All returned values are microseconds elapsed since the base, so every
/// component sharing the same base observes the same timeline.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    base: Arc<Instant>,
}

impl MonotonicClock {
    /// Create a clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            base: Arc::new(Instant::now()),
        }
    }

    /// Create a clock from an existing base instant
    ///
    /// Use this to share the same timebase between components.
    pub fn from_instant(base: Instant) -> Self {
        Self {
            base: Arc::new(base),
        }
    }

    /// Get the base instant for sharing with other components
    pub fn base(&self) -> Instant {
        *self.base
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for MonotonicClock {
    fn now(&self) -> i64 {
        self.base.elapsed().as_micros() as i64
    }
}

/// Manually stepped clock for deterministic tests.
#[cfg(test)]
pub(crate) struct ManualClock {
    now: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new(start: i64) -> Self {
        Self {
            now: std::sync::atomic::AtomicI64::new(start),
        }
    }

    pub(crate) fn set(&self, now: i64) {
        self.now.store(now, std::sync::atomic::Ordering::Relaxed);
    }

    pub(crate) fn advance(&self, delta: i64) {
        self.now.fetch_add(delta, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
impl HostClock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(std::sync::atomic::Ordering::Relaxed)
    }
}
