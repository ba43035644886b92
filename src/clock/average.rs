//! Drift estimator
//!
//! When the source paces us (network playback), the affine stream-to-system
//! mapping anchored on a single reference point slowly accumulates error:
//! both clocks drift and the anchor never moves. The estimator low-pass
//! filters the residual between the mapping's prediction and each observed
//! arrival. The filtered mean is the low-frequency component (true clock
//! drift) and is fed back into every conversion; the high-frequency component
//! left over is network jitter, summarized as a decaying maximum so the
//! playout delay budget can absorb it.
//!
//! All arithmetic is signed 64-bit microseconds. Divisions truncate and the
//! truncation error is carried in explicit residues so long sample runs stay
//! bias-free.

/// Samples per statistics window (~10 s at one sample per 33 ms frame).
const DRIFT_WINDOW: i64 = 300;

/// Running drift statistic over mapping residuals
///
/// Maintains two filters in parallel:
/// - a first-order IIR (`value`/`residue`/`divider`), the long-memory filter
///   whose divider is tuned by the buffering controller;
/// - a windowed arithmetic mean and variance over [`DRIFT_WINDOW`] samples,
///   which recovers much faster after a reference reset.
///
/// [`get`](DriftAverage::get) returns the windowed mean. The IIR state is
/// kept up to date so that [`rescale`](DriftAverage::rescale) remains
/// lossless when the divider changes mid-stream.
pub struct DriftAverage {
    value: i64,
    residue: i64,
    divider: i64,

    means: i64,
    residue_means: i64,
    variance: i64,
    residue_variance: i64,

    /// Decaying maximum of |sample - means|, the network-jitter bound
    max_offset: i64,
    /// Sample count at which `max_offset` last increased
    start_count: i64,

    count: i64,
}

impl DriftAverage {
    pub fn new(divider: i64) -> Self {
        let mut avg = Self {
            value: 0,
            residue: 0,
            divider,
            means: 0,
            residue_means: 0,
            variance: 0,
            residue_variance: 0,
            max_offset: 0,
            start_count: 0,
            count: 0,
        };
        avg.reset();
        avg
    }

    /// Clear all filter state, keeping the configured divider
    pub fn reset(&mut self) {
        self.value = 0;
        self.residue = 0;
        self.means = 0;
        self.residue_means = 0;
        self.variance = 0;
        self.residue_variance = 0;
        self.max_offset = 0;
        self.start_count = 0;
        self.count = 0;
    }

    /// Feed one residual sample (predicted stream time minus observed)
    pub fn update(&mut self, sample: i64) {
        // IIR: new = (f0*value + f1*sample + residue) / divider, f1 weighting
        // the incoming sample heavily until `count` reaches the divider.
        let f0 = (self.divider - 1).min(self.count);
        let f1 = self.divider - f0;
        let tmp = f0 * self.value + f1 * sample + self.residue;
        self.value = tmp / self.divider;
        self.residue = tmp % self.divider;

        let index = self.count % DRIFT_WINDOW;
        let mut last_variance = 0;
        if index == 0 {
            // New window: the old variance seeds the new one at half weight
            // so the jitter bound does not collapse at every boundary.
            last_variance = self.variance / 2;
            self.means = 0;
            self.residue_means = 0;
            self.variance = 0;
            self.residue_variance = 0;
        }

        let tmp = self.means * index + sample + self.residue_means;
        self.means = tmp / (index + 1);
        self.residue_means = tmp % (index + 1);

        let offset = (sample - self.means).abs();
        let tmp = self.variance * index + offset * offset + self.residue_variance + last_variance;
        self.variance = tmp / (index + 1);
        self.residue_variance = tmp % (index + 1);

        if offset > self.max_offset {
            self.max_offset = (3 * offset + self.max_offset) / 4;
            self.start_count = self.count;
        }
        if self.count - self.start_count >= 2 {
            // No new peak for two samples: fall back towards one standard
            // deviation, which still covers the bulk of the distribution.
            self.max_offset = (self.variance as f64).sqrt() as i64;
            self.start_count = self.count;
        }

        self.count += 1;
    }

    /// Current drift correction, in µs (the windowed mean)
    pub fn get(&self) -> i64 {
        self.means
    }

    /// Current network-jitter bound, in µs
    pub fn max_offset(&self) -> i64 {
        self.max_offset
    }

    pub fn divider(&self) -> i64 {
        self.divider
    }

    /// Change the IIR divider without losing the accumulated value
    pub fn rescale(&mut self, divider: i64) {
        let tmp = self.value * self.divider + self.residue;
        self.divider = divider;
        self.value = tmp / divider;
        self.residue = tmp % divider;
    }

    #[cfg(test)]
    pub(crate) fn iir_value(&self) -> (i64, i64) {
        (self.value, self.residue)
    }
}
