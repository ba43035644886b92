//! Stream/system clock points and the arrival-history ring

/// Sentinel for "no timestamp". Valid timestamps are strictly greater.
pub const TS_INVALID: i64 = -1;

/// Number of recent (stream, system) pairs kept for arrival back-solving.
pub const BUFFERED_PTS_COUNT: usize = 100;

/// A matched pair of timestamps: where the stream clock and the host clock
/// stood at the same delivery instant. Both are microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockPoint {
    /// Stream-domain timestamp (PCR/PTS tick converted to µs)
    pub stream: i64,
    /// Host-domain monotonic timestamp (µs)
    pub system: i64,
}

impl ClockPoint {
    /// The invalid point, used before any reference exists
    pub const INVALID: ClockPoint = ClockPoint {
        stream: TS_INVALID,
        system: TS_INVALID,
    };

    /// Create a point from a (stream, system) pair
    pub fn new(stream: i64, system: i64) -> Self {
        Self { stream, system }
    }
}

/// Ring of the most recent delivery points
///
/// Every demuxer update appends one point. When a decoded frame comes back
/// for conversion, the ring is searched backwards to recover the host time at
/// which that frame's stream timestamp arrived, which is what the decoder
/// latency estimate is measured against.
pub struct PointRing {
    points: [ClockPoint; BUFFERED_PTS_COUNT],
    /// Next insert position
    index: usize,
}

impl PointRing {
    pub fn new() -> Self {
        Self {
            points: [ClockPoint::INVALID; BUFFERED_PTS_COUNT],
            index: 0,
        }
    }

    /// Append a delivery point, overwriting the oldest entry
    pub fn push(&mut self, point: ClockPoint) {
        self.points[self.index] = point;
        self.index = (self.index + 1) % BUFFERED_PTS_COUNT;
    }

    /// Back-solve the host time at which `stream` was delivered
    ///
    /// Searches from the newest entry towards the oldest. An exact match
    /// returns its recorded system time; otherwise the nearest earlier entry
    /// is extrapolated at real speed (`stream - entry.stream + entry.system`).
    /// Returns [`TS_INVALID`] when the whole ring is newer than the query.
    pub fn arrival_system_for(&self, stream: i64) -> i64 {
        let newest = (self.index + BUFFERED_PTS_COUNT - 1) % BUFFERED_PTS_COUNT;
        let mut i = newest;
        loop {
            let p = self.points[i];
            if p.stream == stream {
                return p.system;
            }
            if p.stream < stream {
                return stream - p.stream + p.system;
            }
            i = (i + BUFFERED_PTS_COUNT - 1) % BUFFERED_PTS_COUNT;
            if i == newest {
                return TS_INVALID;
            }
        }
    }
}

impl Default for PointRing {
    fn default() -> Self {
        Self::new()
    }
}
