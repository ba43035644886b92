//! Tuning knobs for the input clock and the pacer stage

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::RATE_DEFAULT;

/// Configuration for the input clock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Initial playback rate in thousandths (1000 = 1.0x)
    pub initial_rate: i64,
    /// Initial end-to-end output delay budget; raised later by the engine's
    /// buffering policy through `set_jitter`
    pub pts_delay: Duration,
    /// Divider of the legacy drift IIR; `set_jitter` clamps updates to >= 10
    pub cr_average: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            initial_rate: RATE_DEFAULT,
            pts_delay: Duration::ZERO,
            cr_average: 10,
        }
    }
}

/// Configuration for the pacer stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Reject conversions landing further than this past the delay and
    /// buffering budget; `None` accepts any presentation date
    pub ts_bound: Option<Duration>,
    /// How far past its deadline a frame may be before it counts as late
    pub late_threshold: Duration,
    /// Maximum number of frames buffered while waiting for their deadline
    pub max_queue: usize,
    /// Scheduling granularity when no deadline is pending
    pub tick: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            ts_bound: None,
            late_threshold: Duration::from_millis(16), // one 60 Hz frame
            max_queue: 120,
            tick: Duration::from_millis(5),
        }
    }
}
