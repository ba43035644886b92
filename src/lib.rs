//! castsync: input clock and playout pacing for a streaming media engine
//!
//! A playing host has two time bases to reconcile: the stream clock the
//! producer stamped into the container (PCR/PTS) and the host's own monotonic
//! clock. This crate answers, for every incoming stream timestamp, "at what
//! host time should this sample become visible", absorbing network jitter,
//! bounded clock drift, rate changes and pause/resume along the way.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use castsync::{ClockConfig, InputClock, MediaKind};
//!
//! let clock = Arc::new(InputClock::new(ClockConfig::default()));
//!
//! // Demuxer thread: feed every (stream, system) observation.
//! clock.update(33_333, 1_000_000, false, false);
//!
//! // Output thread: convert stream timestamps to presentation dates.
//! let conv = clock.convert_ts(66_666, None, None, MediaKind::Video)?;
//! println!("present at host time {}us", conv.ts0);
//! # Ok::<(), castsync::ClockError>(())
//! ```
//!
//! For a full pipeline, wrap the clock in a [`PacerStage`]: it buffers
//! decoded frames and releases each one when its converted date arrives.

pub mod clock;
pub mod config;
pub mod pipeline;

// Re-exports for convenience
pub use clock::host::{HostClock, MonotonicClock};
pub use clock::{CLOCK_FREQ, ClockError, ClockSpan, Conversion, InputClock, RATE_DEFAULT};
pub use config::{ClockConfig, PacerConfig};
pub use pipeline::{
    HealthSummary, MediaFrame, MediaKind, PacedFrame, PacerStage, PipelineStage, SyncHealth,
    Timestamp,
};
