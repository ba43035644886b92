//! Core types shared between the clock and the pacing stage

use bytes::Bytes;
use std::time::Duration;

/// Microsecond timestamp
///
/// Carries either a stream-domain date (PTS/DTS authored by the producer) or
/// a host-domain date (monotonic system clock); which one is meant follows
/// from context. Frames enter the pacer with stream dates and leave it with
/// host dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Microseconds
    pub micros: i64,
}

impl Timestamp {
    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Create a timestamp from a duration since the domain's origin
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            micros: duration.as_micros() as i64,
        }
    }

    /// Convert to a duration (negative values clamp to zero)
    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.micros.max(0) as u64)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}us", self.micros)
    }
}

/// Kind of media data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Video frame data
    Video,
    /// Audio sample data
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
        }
    }
}

/// A decoded media frame waiting for its presentation date
///
/// The timestamps are stream-domain: they carry the producer's cadence, not
/// the host's. The pacer converts them through the input clock right before
/// release.
#[derive(Clone)]
pub struct MediaFrame {
    /// Kind of media (video or audio)
    pub kind: MediaKind,

    /// Decoded or passthrough media data
    pub data: Bytes,

    /// Presentation timestamp in the stream domain
    pub pts: Timestamp,

    /// Decode timestamp in the stream domain; differs from PTS only for
    /// reordered video
    pub dts: Timestamp,

    /// Whether this is a keyframe (video) or another resync point
    pub is_keyframe: bool,
}

impl MediaFrame {
    /// Create a new video frame
    pub fn video(data: Bytes, pts: Timestamp, dts: Timestamp, is_keyframe: bool) -> Self {
        Self {
            kind: MediaKind::Video,
            data,
            pts,
            dts,
            is_keyframe,
        }
    }

    /// Create a new audio frame
    pub fn audio(data: Bytes, pts: Timestamp) -> Self {
        Self {
            kind: MediaKind::Audio,
            data,
            pts,
            dts: pts, // Audio DTS = PTS
            is_keyframe: false,
        }
    }

    /// Get the size of the frame data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for MediaFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFrame")
            .field("kind", &self.kind)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("is_keyframe", &self.is_keyframe)
            .field("size", &self.size())
            .finish()
    }
}
