//! Health counters for the synchronization path

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Health metrics for the clock and pacer
///
/// Tracks counters that show whether the synchronization core is keeping the
/// output on schedule. All fields use atomic operations for thread-safe
/// access from the demuxer, the output, and the control threads at once.
pub struct SyncHealth {
    /// Number of timestamp conversions served
    pub conversions: AtomicU64,

    /// Number of conversions whose result was already in the past
    pub late_conversions: AtomicU64,

    /// Number of unannounced stream discontinuities recovered from
    pub discontinuities: AtomicU64,

    /// Number of resets forced by the continuous-late watchdog
    pub watchdog_resets: AtomicU64,

    /// Number of conversions rejected by the caller-supplied bound
    pub bound_rejections: AtomicU64,

    /// Number of frames released on schedule by the pacer
    pub frames_paced: AtomicU64,

    /// Number of frames the pacer dropped (no reference, past bound, overflow)
    pub frames_dropped: AtomicU64,

    /// Host time (µs) of the last paced frame
    pub last_frame_time: AtomicI64,
}

impl SyncHealth {
    /// Create a new health metrics instance
    pub fn new() -> Self {
        Self {
            conversions: AtomicU64::new(0),
            late_conversions: AtomicU64::new(0),
            discontinuities: AtomicU64::new(0),
            watchdog_resets: AtomicU64::new(0),
            bound_rejections: AtomicU64::new(0),
            frames_paced: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            last_frame_time: AtomicI64::new(0),
        }
    }

    /// Record a served timestamp conversion
    pub fn record_conversion(&self) {
        self.conversions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a conversion whose presentation date was already missed
    pub fn record_late_conversion(&self) {
        self.late_conversions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a recovered stream discontinuity
    pub fn record_discontinuity(&self) {
        self.discontinuities.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reset forced by the continuous-late watchdog
    pub fn record_watchdog_reset(&self) {
        self.watchdog_resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a conversion rejected by the caller's bound
    pub fn record_bound_rejection(&self) {
        self.bound_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame released on schedule at host time `now` (µs)
    pub fn record_paced_frame(&self, now: i64) {
        self.frames_paced.fetch_add(1, Ordering::Relaxed);
        self.last_frame_time.store(now, Ordering::Relaxed);
    }

    /// Record a dropped frame
    pub fn record_dropped_frame(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conversions(&self) -> u64 {
        self.conversions.load(Ordering::Relaxed)
    }

    pub fn late_conversions(&self) -> u64 {
        self.late_conversions.load(Ordering::Relaxed)
    }

    pub fn discontinuities(&self) -> u64 {
        self.discontinuities.load(Ordering::Relaxed)
    }

    pub fn watchdog_resets(&self) -> u64 {
        self.watchdog_resets.load(Ordering::Relaxed)
    }

    pub fn bound_rejections(&self) -> u64 {
        self.bound_rejections.load(Ordering::Relaxed)
    }

    pub fn frames_paced(&self) -> u64 {
        self.frames_paced.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Calculate the share of conversions that were late, as a percentage
    pub fn late_rate(&self) -> f64 {
        let late = self.late_conversions();
        let total = self.conversions();
        if total == 0 {
            return 0.0;
        }
        (late as f64 / total as f64) * 100.0
    }

    /// Check if the pacer has stalled (no frames released for `threshold`),
    /// given the current host time in µs
    pub fn is_stalled(&self, threshold: Duration, now: i64) -> bool {
        let last = self.last_frame_time.load(Ordering::Relaxed);
        now.saturating_sub(last) > threshold.as_micros() as i64
    }

    /// Get a snapshot of the health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            conversions: self.conversions(),
            late_conversions: self.late_conversions(),
            discontinuities: self.discontinuities(),
            watchdog_resets: self.watchdog_resets(),
            bound_rejections: self.bound_rejections(),
            frames_paced: self.frames_paced(),
            frames_dropped: self.frames_dropped(),
            late_rate: self.late_rate(),
        }
    }
}

impl Default for SyncHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the synchronization health metrics
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub conversions: u64,
    pub late_conversions: u64,
    pub discontinuities: u64,
    pub watchdog_resets: u64,
    pub bound_rejections: u64,
    pub frames_paced: u64,
    pub frames_dropped: u64,
    pub late_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sync: {} conversions ({} late, {:.2}%), {} discontinuities, {} watchdog resets, {} bound rejections, {} paced, {} dropped",
            self.conversions,
            self.late_conversions,
            self.late_rate,
            self.discontinuities,
            self.watchdog_resets,
            self.bound_rejections,
            self.frames_paced,
            self.frames_dropped
        )
    }
}
