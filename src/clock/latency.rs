//! Decoder latency estimator
//!
//! Measures how long a stream timestamp takes from demuxer delivery to the
//! moment the output asks to convert it, which bounds how much headroom the
//! presentation date needs so the decoder can keep up. Tracked as a windowed
//! mean plus a weighted, slowly decaying peak; conversions budget the peak.

/// Initial latency assumption until real samples arrive (1 s is plenty).
pub const INIT_DECODER_LATENCY: i64 = 1_000_000;

/// Samples per statistics window (~3 s of video at two queries per frame).
const LATENCY_WINDOW: i64 = 180;

/// Sample count the peak stamp is parked at until the first real peak; keeps
/// the decay branch disabled while `max` still holds the init seed.
const MAX_COUNT_PARKED: i64 = 205_000;

/// Windowed mean/peak statistics over decoder latency samples
pub struct LatencyStats {
    means: i64,
    residue: i64,
    count: i64,
    max: i64,
    /// Sample count at which `max` last moved up
    max_count: i64,
}

impl LatencyStats {
    pub fn new() -> Self {
        let mut stats = Self {
            means: 0,
            residue: 0,
            count: 0,
            max: 0,
            max_count: 0,
        };
        stats.init();
        stats
    }

    /// Seed the statistics for a fresh reference
    pub fn init(&mut self) {
        self.count = 0;
        self.means = INIT_DECODER_LATENCY;
        self.residue = 0;
        self.max = INIT_DECODER_LATENCY;
        self.max_count = MAX_COUNT_PARKED;
    }

    /// Feed one latency sample (µs)
    pub fn update(&mut self, latency: i64) {
        let index = self.count % LATENCY_WINDOW;
        if index == 0 {
            self.means = 0;
            self.residue = 0;
        }
        let tmp = self.means * index + latency + self.residue;
        self.means = tmp / (index + 1);
        self.residue = tmp % (index + 1);

        if latency > self.max || self.max == INIT_DECODER_LATENCY {
            if self.max == INIT_DECODER_LATENCY {
                // First real sample replaces the seed with the measured mean.
                self.max = self.means;
            } else {
                self.max = (3 * latency + self.max) / 4;
            }
            self.max_count = self.count;
        }
        if self.count - self.max_count >= 2 {
            // No new peak for two samples: drift down towards recent reality.
            self.max = (self.means + latency) / 2;
            self.max_count = self.count;
        }

        self.count += 1;
    }

    /// Current latency budget, in µs (the tracked peak)
    pub fn get(&self) -> i64 {
        self.max
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_before_first_sample() {
        let stats = LatencyStats::new();
        assert_eq!(stats.get(), INIT_DECODER_LATENCY);
    }

    #[test]
    fn test_first_sample_replaces_seed() {
        let mut stats = LatencyStats::new();
        stats.update(20_000);
        // The seed is dropped for the measured mean, not blended with it.
        assert_eq!(stats.get(), 20_000);
    }

    #[test]
    fn test_peak_follows_spikes() {
        let mut stats = LatencyStats::new();
        stats.update(20_000);
        stats.update(80_000);
        // Weighted towards the spike: (3*80_000 + 20_000) / 4.
        assert_eq!(stats.get(), 65_000);
    }

    #[test]
    fn test_peak_decays_when_quiet() {
        let mut stats = LatencyStats::new();
        stats.update(20_000);
        stats.update(80_000);
        let peak = stats.get();
        for _ in 0..10 {
            stats.update(20_000);
        }
        assert!(stats.get() < peak);
    }

    #[test]
    fn test_init_restores_seed() {
        let mut stats = LatencyStats::new();
        stats.update(20_000);
        stats.init();
        assert_eq!(stats.get(), INIT_DECODER_LATENCY);
    }
}
