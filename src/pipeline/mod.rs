//! Playback pipeline layer
//!
//! Glue between the input clock and the engine's media path:
//! - Stages run in their own async task and communicate via channels
//! - [`PacerStage`] holds decoded frames and releases them at the
//!   presentation dates the clock computes
//! - [`SyncHealth`] tracks whether the output is keeping schedule
//!
//! The clock itself lives in [`crate::clock`] and never sleeps; this layer is
//! where the waiting happens.

pub mod health;
pub mod pacer;
pub mod stage;
pub mod types;

pub use health::{HealthSummary, SyncHealth};
pub use pacer::{PacedFrame, PacerStage};
pub use stage::PipelineStage;
pub use types::{MediaFrame, MediaKind, Timestamp};
