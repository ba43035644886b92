//! Input clock: reconciles the stream clock with the host clock
//!
//! A streaming source timestamps its packets with its own clock (PCR/PTS);
//! the host plays them against its monotonic clock. The two advance at
//! slightly different speeds and the network adds jitter on top, so every
//! incoming stream timestamp has to be answered with "at what host time
//! should this sample become visible" in a way that preserves the producer's
//! cadence. That answer is this module.
//!
//! # Architecture
//!
//! - A reference point anchors an affine stream-to-system mapping; the
//!   playback rate rotates the mapping, pause/resume and origin changes
//!   translate it.
//! - A drift estimator low-pass filters the residual between the mapping and
//!   observed arrivals; its mean corrects every conversion and its jitter
//!   bound feeds the delay budget.
//! - A decoder-latency estimator measures delivery-to-conversion time via a
//!   ring of recent arrival points and adds the peak to the same budget.
//! - A continuous-late watchdog rebuilds the reference when conversions keep
//!   landing in the past, so a broken estimate cannot freeze playback.
//!
//! All state lives behind a single mutex; no operation blocks or sleeps, and
//! [`InputClock::get_wakeup`] only advises the caller when to wake up.

pub mod average;
pub mod host;
pub mod late;
pub mod latency;
pub mod points;

use std::sync::{Arc, Mutex};

use log::{debug, error, warn};
use thiserror::Error;

use crate::config::ClockConfig;
use crate::pipeline::health::SyncHealth;
use crate::pipeline::types::MediaKind;

use average::DriftAverage;
use host::{HostClock, MonotonicClock};
use late::LateWindow;
use latency::LatencyStats;
use points::{ClockPoint, PointRing, TS_INVALID};

/// Ticks per second of both time domains (µs).
pub const CLOCK_FREQ: i64 = 1_000_000;

/// Rate value meaning 1.0x playback.
pub const RATE_DEFAULT: i64 = 1000;

/// Largest stream gap accepted before declaring a discontinuity.
const CR_MAX_GAP: i64 = 60 * CLOCK_FREQ;

/// Offset applied to the new reference after a discontinuity, so conversions
/// cannot travel backwards past dates already handed out.
const CR_MEAN_PTS_GAP: i64 = 300_000;

/// Extra read-ahead accumulation rate, in 1/256 of the stream gap.
const BUFFERING_RATE: i64 = 48;

/// Cap on the extra read-ahead, in stream-domain µs.
const BUFFERING_TARGET: i64 = 100_000;

/// A conversion landing this far in the past counts as late (one 60 Hz frame).
const LATE_DISPLAY_THRESHOLD: i64 = 16_000;

/// Consecutive late conversions tolerated before the watchdog rebuilds the
/// reference (~2 s at 66 conversions per second).
const CONTINUOUS_LATE_LIMIT: u32 = 132;

/// Hold-off applied to drift sampling after an origin change.
const DRIFT_RESUME_DELAY: i64 = 33_000;

/// Error type of the conversion and state readout paths
#[derive(Debug, Error)]
pub enum ClockError {
    /// No reference point yet: nothing was fed by the demuxer, or a reset
    /// dropped the mapping
    #[error("no reference point to convert timestamps against")]
    NoReference,

    /// The converted date lies beyond the caller's bound; the values are
    /// reported but must be discarded
    #[error("converted timestamp {ts0} past bound (delay {delay}, buffering {buffering}, bound {bound})")]
    PastBound {
        ts0: i64,
        ts1: Option<i64>,
        delay: i64,
        buffering: i64,
        bound: i64,
    },
}

/// Result of a successful timestamp conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    /// Playback rate in force at conversion time (thousandths)
    pub rate: i64,
    /// Converted primary timestamp (host domain, delay budget included)
    pub ts0: i64,
    /// Converted secondary timestamp, if one was passed
    pub ts1: Option<i64>,
}

/// Reference and progress snapshot of the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSpan {
    /// Stream date of the reference point
    pub stream_start: i64,
    /// Host date of the reference point
    pub system_start: i64,
    /// Stream time elapsed since the reference
    pub stream_duration: i64,
    /// Host time elapsed since the reference
    pub system_duration: i64,
}

/// Everything the lock protects.
struct ClockInner {
    /// Anchor of the affine stream/system mapping
    reference: ClockPoint,
    has_reference: bool,

    /// Most recent observed point, used to detect unexpected discontinuities
    last: ClockPoint,

    /// Largest host date already returned by `convert_ts`
    ts_max: i64,

    /// Extra read-ahead accumulated while the source lets us pace it
    /// (stream-domain µs)
    buffering_duration: i64,

    /// Host date after which the next drift sample may be taken
    next_drift_update: i64,
    drift: DriftAverage,

    /// Recent lateness observations
    late: LateWindow,
    continuous_late_count: u32,

    /// Origin for relative `change_system_origin` calls
    external_clock: i64,
    has_external_clock: bool,

    paused: bool,
    pause_date: i64,

    /// Playback rate in thousandths (1000 = 1.0x)
    rate: i64,
    /// Configured output delay
    pts_delay: i64,

    /// Recent delivery points for arrival back-solving
    points: PointRing,
    /// Decoder latency statistics
    latency: LatencyStats,
}

impl ClockInner {
    /// Stream date to host date through the reference, at the current rate.
    fn stream_to_system(&self, stream: i64) -> i64 {
        (stream - self.reference.stream) * self.rate / RATE_DEFAULT + self.reference.system
    }

    /// Host date back to stream date. Needs a valid reference.
    fn system_to_stream(&self, system: i64) -> i64 {
        debug_assert!(self.has_reference);
        (system - self.reference.system) * RATE_DEFAULT / self.rate + self.reference.stream
    }

    /// Display offset caused by rate changes rotating the mapping around
    /// `last` instead of the configured delay point.
    fn ts_offset(&self) -> i64 {
        self.pts_delay * (self.rate - RATE_DEFAULT) / RATE_DEFAULT
    }

    fn network_jitter(&self) -> i64 {
        self.drift.max_offset()
    }

    fn decoder_latency(&self) -> i64 {
        self.latency.get()
    }

    fn update_decoder_latency(&mut self, stream: i64, now: i64) {
        let arrival = self.points.arrival_system_for(stream);
        // +500 keeps the sample non-zero on hosts with ms-resolution clocks.
        self.latency.update(now + 500 - arrival);
    }

    /// Drop the mapping. Rate, pause state and pts_delay survive.
    fn clear_reference(&mut self) {
        self.has_reference = false;
        self.reference = ClockPoint::INVALID;
        self.has_external_clock = false;
        self.ts_max = TS_INVALID;
    }
}

/// The input clock of the playback pipeline
///
/// Fed by the demuxer through [`update`](Self::update), queried by the
/// elementary-stream output through [`convert_ts`](Self::convert_ts), and
/// steered by the playback controller through the rate/pause/origin/jitter
/// operations. Every entry point serializes on one internal mutex, so the
/// handle can be shared freely across threads.
pub struct InputClock {
    host: Arc<dyn HostClock>,
    health: Arc<SyncHealth>,
    inner: Mutex<ClockInner>,
}

impl InputClock {
    /// Create a clock driven by the process-wide monotonic host clock
    pub fn new(config: ClockConfig) -> Self {
        Self::with_host(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a clock with an explicit host time source
    pub fn with_host(config: ClockConfig, host: Arc<dyn HostClock>) -> Self {
        Self {
            host,
            health: Arc::new(SyncHealth::new()),
            inner: Mutex::new(ClockInner {
                reference: ClockPoint::INVALID,
                has_reference: false,
                last: ClockPoint::INVALID,
                ts_max: TS_INVALID,
                buffering_duration: 0,
                next_drift_update: TS_INVALID,
                drift: DriftAverage::new(config.cr_average),
                late: LateWindow::new(),
                continuous_late_count: 0,
                external_clock: TS_INVALID,
                has_external_clock: false,
                paused: false,
                pause_date: TS_INVALID,
                rate: config.initial_rate,
                pts_delay: config.pts_delay.as_micros() as i64,
                points: PointRing::new(),
                latency: LatencyStats::new(),
            }),
        }
    }

    /// Health counters shared with the rest of the pipeline
    pub fn health(&self) -> Arc<SyncHealth> {
        self.health.clone()
    }

    /// The host time source this clock reads from
    pub fn host(&self) -> Arc<dyn HostClock> {
        self.host.clone()
    }

    /// Feed one (stream, system) observation from the demuxer
    ///
    /// `can_pace` tells whether the source reads at our pace (file/pipe) or
    /// at its own (network); drift is only estimated in the latter case.
    /// `buffering_allowed` enables the extra read-ahead accumulation.
    ///
    /// Returns whether the delivery was late; the current implementation
    /// always answers `false` and leaves lateness detection to
    /// [`convert_ts`](Self::convert_ts).
    pub fn update(
        &self,
        stream: i64,
        system: i64,
        can_pace: bool,
        buffering_allowed: bool,
    ) -> bool {
        assert!(stream > TS_INVALID && system > TS_INVALID);

        let mut cl = self.inner.lock().unwrap();

        let mut reset_reference = false;
        if !cl.has_reference {
            reset_reference = true;
        } else if cl.last.stream > TS_INVALID && (cl.last.stream - stream).abs() > CR_MAX_GAP {
            // Unannounced discontinuity (edited stream, PCR wrap, source
            // glitch): the old mapping is meaningless from here on.
            warn!(
                "InputClock: stream gap {} -> {}, rebuilding reference",
                cl.last.stream, stream
            );
            cl.ts_max = TS_INVALID;
            reset_reference = true;
            self.health.record_discontinuity();
        }

        if reset_reference {
            cl.next_drift_update = TS_INVALID;
            cl.drift.reset();
            cl.latency.init();

            cl.has_reference = true;
            // Never anchor earlier than dates already handed out.
            cl.reference = ClockPoint::new(stream, (cl.ts_max + CR_MEAN_PTS_GAP).max(system));
            cl.has_external_clock = false;
            debug!(
                "InputClock: new reference ({}, {})",
                cl.reference.stream, cl.reference.system
            );
        }

        // Drift between the two clocks only exists when the source paces us.
        if !can_pace && cl.next_drift_update < system {
            let predicted = cl.system_to_stream(system);
            cl.drift.update(predicted - stream);
            cl.next_drift_update = system;
        }

        // Extra read-ahead: read BUFFERING_RATE/256 faster than real time
        // until the target is banked, so short stalls do not drain the pipes.
        if !can_pace || reset_reference {
            cl.buffering_duration = 0;
        } else if buffering_allowed {
            let gap = (stream - cl.last.stream).max(0);
            cl.buffering_duration =
                (cl.buffering_duration + (gap * BUFFERING_RATE + 255) / 256).min(BUFFERING_TARGET);
        }

        cl.last = ClockPoint::new(stream, system);
        let last = cl.last;
        cl.points.push(last);

        false
    }

    /// Convert stream timestamps to presentation dates in the host domain
    ///
    /// `ts0` is the primary timestamp and advances the returned-date ceiling;
    /// `ts1` is converted with the same correction but leaves the ceiling
    /// alone. `ts_bound`, when set, rejects dates further than the bound past
    /// the current delay and buffering budget. Video conversions feed the
    /// decoder-latency estimate.
    pub fn convert_ts(
        &self,
        ts0: i64,
        ts1: Option<i64>,
        ts_bound: Option<i64>,
        kind: MediaKind,
    ) -> Result<Conversion, ClockError> {
        let now = self.host.now();
        let mut cl = self.inner.lock().unwrap();

        if !cl.has_reference {
            drop(cl);
            error!("InputClock: timestamp conversion failed for {ts0}: no reference");
            return Err(ClockError::NoReference);
        }

        if kind == MediaKind::Video {
            cl.update_decoder_latency(ts0, now);
        }

        let rate = cl.rate;
        let ts_buffering = cl.buffering_duration * rate / RATE_DEFAULT;
        let ts_delay = cl.ts_offset() + cl.network_jitter() + cl.decoder_latency();

        let mut out0 = ts0;
        if ts0 > TS_INVALID {
            let converted = cl.stream_to_system(ts0 + cl.drift.get());
            if converted > cl.ts_max {
                cl.ts_max = converted;
            }
            out0 = converted + ts_delay;
        }

        // The ceiling is deliberately not advanced for the second timestamp.
        let out1 = ts1.map(|ts| {
            if ts > TS_INVALID {
                cl.stream_to_system(ts + cl.drift.get()) + ts_delay
            } else {
                ts
            }
        });

        // Watchdog: if the corrected dates keep landing in the past, the
        // estimate is broken and only a fresh reference can recover it.
        if ts0 > TS_INVALID {
            if now - out0 >= LATE_DISPLAY_THRESHOLD {
                cl.late.record(now - out0);
                cl.continuous_late_count += 1;
                self.health.record_late_conversion();
                if cl.continuous_late_count > CONTINUOUS_LATE_LIMIT {
                    error!(
                        "InputClock: continuously late for ~2s, rebuilding reference ({:?})",
                        *cl
                    );
                    cl.clear_reference();
                    cl.continuous_late_count = 0;
                    self.health.record_watchdog_reset();
                }
            } else {
                cl.continuous_late_count = 0;
            }
        }

        drop(cl);
        self.health.record_conversion();

        if let Some(bound) = ts_bound
            && ts0 > TS_INVALID
            && out0 >= now + ts_delay + ts_buffering + bound
        {
            error!(
                "InputClock: conversion past bound (delay {ts_delay}, buffering {ts_buffering}, bound {bound})"
            );
            self.health.record_bound_rejection();
            return Err(ClockError::PastBound {
                ts0: out0,
                ts1: out1,
                delay: ts_delay,
                buffering: ts_buffering,
                bound,
            });
        }

        Ok(Conversion {
            rate,
            ts0: out0,
            ts1: out1,
        })
    }

    /// Drop the reference mapping
    ///
    /// The next demuxer update rebuilds it. Rate, pause state and the
    /// configured delay survive.
    pub fn reset(&self) {
        let mut cl = self.inner.lock().unwrap();
        cl.clear_reference();
    }

    /// Change the playback rate (thousandths, 1000 = 1.0x)
    ///
    /// The mapping is rotated around the last observed point, as if playback
    /// had run at the new rate from the start, so the date of the most recent
    /// sample does not jump.
    pub fn change_rate(&self, rate: i64) {
        let mut cl = self.inner.lock().unwrap();
        if cl.has_reference {
            cl.reference.system =
                cl.last.system - (cl.last.system - cl.reference.system) * rate / cl.rate;
        }
        cl.rate = rate;
    }

    /// Pause or resume at host date `now`
    ///
    /// On resume the whole mapping shifts forward by the pause duration, so
    /// playback continues exactly where it stopped.
    pub fn change_pause(&self, paused: bool, now: i64) {
        let mut cl = self.inner.lock().unwrap();
        assert_ne!(cl.paused, paused, "pause state must flip");

        if cl.paused {
            let duration = now - cl.pause_date;
            if cl.has_reference && duration > 0 {
                cl.reference.system += duration;
                cl.last.system += duration;
            }
        }
        cl.pause_date = now;
        cl.paused = paused;
    }

    /// Move the host-domain origin of the mapping
    ///
    /// Absolute: the reference lands on `system` (minus the rate-induced
    /// display offset). Relative: the first call records `system` as the
    /// external origin and later calls shift by the difference to it.
    /// Requires a reference.
    pub fn change_system_origin(&self, absolute: bool, system: i64) {
        let mut cl = self.inner.lock().unwrap();
        assert!(cl.has_reference);

        let offset = if absolute {
            system - cl.reference.system - cl.ts_offset()
        } else {
            if !cl.has_external_clock {
                cl.has_external_clock = true;
                cl.external_clock = system;
            }
            system - cl.external_clock
        };

        cl.reference.system += offset;
        cl.last.system += offset;
    }

    /// Suspend drift sampling until shortly after host date `system`
    ///
    /// Lets an origin change settle before its transient pollutes the
    /// estimator. Requires a reference.
    pub fn change_drift_start_point(&self, system: i64) {
        let mut cl = self.inner.lock().unwrap();
        assert!(cl.has_reference);
        cl.next_drift_update = system + DRIFT_RESUME_DELAY;
    }

    /// Raise the configured output delay and retune the drift IIR
    ///
    /// Stored lateness observations are rebased against the delay change so
    /// the jitter report keeps meaning. The delay only ever grows here;
    /// shrinking it safely would need a rebuffering cycle.
    pub fn set_jitter(&self, pts_delay: i64, cr_average: i64) {
        let mut cl = self.inner.lock().unwrap();

        let delta = pts_delay - cl.pts_delay;
        cl.late.rebase(delta);

        if cl.pts_delay < pts_delay {
            cl.pts_delay = pts_delay;
        }

        let cr_average = cr_average.max(10);
        if cl.drift.divider() != cr_average {
            cl.drift.rescale(cr_average);
        }
    }

    /// Current delay estimate: configured delay plus the lateness median
    pub fn get_jitter(&self) -> i64 {
        let cl = self.inner.lock().unwrap();
        cl.pts_delay + cl.late.median()
    }

    /// Advisory host date at which the demuxer should wake up and read more
    ///
    /// Earlier than real time by the banked read-ahead. Returns 0 without a
    /// reference (read immediately).
    pub fn get_wakeup(&self) -> i64 {
        let cl = self.inner.lock().unwrap();
        if cl.has_reference {
            cl.stream_to_system(cl.last.stream + cl.drift.get() - cl.buffering_duration)
        } else {
            0
        }
    }

    /// Reference point and elapsed durations in both domains
    pub fn state(&self) -> Result<ClockSpan, ClockError> {
        let cl = self.inner.lock().unwrap();
        if !cl.has_reference {
            return Err(ClockError::NoReference);
        }
        Ok(ClockSpan {
            stream_start: cl.reference.stream,
            system_start: cl.reference.system,
            stream_duration: cl.last.stream - cl.reference.stream,
            system_duration: cl.last.system - cl.reference.system,
        })
    }

    /// Current playback rate (thousandths)
    pub fn rate(&self) -> i64 {
        self.inner.lock().unwrap().rate
    }

    /// Host-domain origin of the mapping and the configured delay, if a
    /// reference exists
    pub fn system_origin(&self) -> Option<(i64, i64)> {
        let cl = self.inner.lock().unwrap();
        cl.has_reference
            .then(|| (cl.reference.system, cl.pts_delay))
    }
}

impl std::fmt::Debug for ClockInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputClock")
            .field("reference", &self.reference)
            .field("last", &self.last)
            .field("ts_max", &self.ts_max)
            .field("rate", &self.rate)
            .field("pts_delay", &self.pts_delay)
            .field("drift", &self.drift.get())
            .field("network_jitter", &self.network_jitter())
            .field("decoder_latency", &self.decoder_latency())
            .field("buffering", &self.buffering_duration)
            .finish()
    }
}

impl std::fmt::Debug for InputClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.lock().unwrap().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::host::ManualClock;

    const INIT_LATENCY: i64 = latency::INIT_DECODER_LATENCY;

    fn manual_clock(start: i64) -> (Arc<ManualClock>, InputClock) {
        let host = Arc::new(ManualClock::new(start));
        let clock = InputClock::with_host(ClockConfig::default(), host.clone());
        (host, clock)
    }

    #[test]
    fn test_update_sets_last_point_and_reference() {
        let (_, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);

        let span = clock.state().unwrap();
        assert_eq!(span.stream_start, 0);
        assert_eq!(span.system_start, 1_000_000);
        assert_eq!(span.stream_duration, 0);
        assert_eq!(span.system_duration, 0);

        clock.update(33_333, 1_033_333, true, true);
        let span = clock.state().unwrap();
        assert_eq!(span.stream_duration, 33_333);
        assert_eq!(span.system_duration, 33_333);
    }

    #[test]
    fn test_steady_state_buffering_accretion() {
        let (_, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        for k in 1..=10 {
            clock.update(k * 33_333, 1_000_000 + k * 33_333, true, true);
        }

        // 10 gaps of 33_333: each banks (33_333*48 + 255)/256 = 6_250 of
        // read-ahead. The wakeup date is early by exactly that amount.
        let wakeup = clock.get_wakeup();
        assert_eq!(wakeup, 333_330 - 62_500 + 1_000_000);
    }

    #[test]
    fn test_buffering_saturates_at_target() {
        let (_, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        for k in 1..=200 {
            clock.update(k * 33_333, 1_000_000 + k * 33_333, true, true);
        }
        let wakeup = clock.get_wakeup();
        let last_stream = 200 * 33_333;
        assert_eq!(wakeup, last_stream - 100_000 + 1_000_000);
    }

    #[test]
    fn test_no_pacing_clears_buffering() {
        let (_, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        clock.update(33_333, 1_033_333, true, true);
        // Source stops letting us pace: the bank is gone.
        clock.update(66_666, 1_066_666, false, true);
        assert_eq!(clock.get_wakeup(), 66_666 + 1_000_000);
    }

    #[test]
    fn test_discontinuity_resets_reference() {
        let (_, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        clock.update(70 * CLOCK_FREQ, 1_000_100, true, true);

        let span = clock.state().unwrap();
        assert_eq!(span.stream_start, 70 * CLOCK_FREQ);
        // ts_max was invalid, so the reference lands on the system date.
        assert_eq!(span.system_start, 1_000_100);
        assert_eq!(clock.health().discontinuities(), 1);
    }

    #[test]
    fn test_discontinuity_clears_returned_date_ceiling() {
        let (host, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        host.set(1_000_100);
        let far = clock
            .convert_ts(50 * CLOCK_FREQ, None, None, MediaKind::Audio)
            .unwrap();

        // Discontinuity: the ceiling is dropped with the mapping, so the new
        // reference anchors on the fresh system date and converted dates may
        // legitimately go backward.
        clock.update(200 * CLOCK_FREQ, 1_000_200, true, true);
        let conv = clock
            .convert_ts(200 * CLOCK_FREQ, None, None, MediaKind::Audio)
            .unwrap();
        assert!(conv.ts0 < far.ts0);
        assert_eq!(clock.state().unwrap().system_start, 1_000_200);
    }

    #[test]
    fn test_convert_without_reference_fails() {
        let (_, clock) = manual_clock(0);
        let err = clock
            .convert_ts(1_000, None, None, MediaKind::Audio)
            .unwrap_err();
        assert!(matches!(err, ClockError::NoReference));
    }

    #[test]
    fn test_convert_identity_at_default_rate() {
        let (host, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        host.set(1_033_333);

        let conv = clock
            .convert_ts(33_333, Some(30_000), None, MediaKind::Audio)
            .unwrap();
        assert_eq!(conv.rate, RATE_DEFAULT);
        // Zero drift, zero pts_delay: only the seeded decoder latency shifts
        // the dates, identically for both timestamps.
        assert_eq!(conv.ts0, 1_033_333 + INIT_LATENCY);
        assert_eq!(conv.ts1, Some(1_030_000 + INIT_LATENCY));
    }

    #[test]
    fn test_invalid_secondary_timestamp_passes_through() {
        let (_, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        let conv = clock
            .convert_ts(33_333, Some(TS_INVALID), None, MediaKind::Audio)
            .unwrap();
        assert_eq!(conv.ts1, Some(TS_INVALID));
    }

    #[test]
    fn test_pause_resume_shifts_conversions() {
        let (host, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        host.set(1_100_000);

        let before = clock
            .convert_ts(200_000, None, None, MediaKind::Audio)
            .unwrap();

        clock.change_pause(true, 1_500_000);
        clock.change_pause(false, 2_000_000);
        host.set(2_000_000);

        let after = clock
            .convert_ts(200_000, None, None, MediaKind::Audio)
            .unwrap();
        assert_eq!(after.ts0 - before.ts0, 500_000);
    }

    #[test]
    fn test_rate_change_rotates_around_last_point() {
        let (_, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        clock.update(1_000_000, 2_000_000, true, true);

        clock.change_rate(500);

        let span = clock.state().unwrap();
        assert_eq!(span.system_start, 2_000_000 - (2_000_000 - 1_000_000) * 500 / 1000);
        assert_eq!(clock.rate(), 500);

        // The last observed point converts to the same date as before.
        let conv = clock
            .convert_ts(1_000_000, None, None, MediaKind::Audio)
            .unwrap();
        assert_eq!(conv.ts0 - INIT_LATENCY, 2_000_000);
    }

    #[test]
    fn test_ts_max_monotone_across_conversions() {
        let (host, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);

        let mut previous = 0;
        for k in 1..=20 {
            host.set(1_000_000 + k * 33_333);
            let conv = clock
                .convert_ts(k * 33_333, None, None, MediaKind::Audio)
                .unwrap();
            assert!(conv.ts0 >= previous);
            previous = conv.ts0;
        }
    }

    #[test]
    fn test_watchdog_resets_after_continuous_lateness() {
        let (host, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        // Host clock far ahead of every converted date: everything is late.
        host.set(20_000_000);

        for _ in 0..132 {
            assert!(clock.convert_ts(1_000, None, None, MediaKind::Audio).is_ok());
        }
        assert_eq!(clock.health().watchdog_resets(), 0);

        // 133rd consecutive late conversion trips the watchdog.
        assert!(clock.convert_ts(1_000, None, None, MediaKind::Audio).is_ok());
        assert_eq!(clock.health().watchdog_resets(), 1);
        assert!(matches!(
            clock.convert_ts(1_000, None, None, MediaKind::Audio),
            Err(ClockError::NoReference)
        ));
    }

    #[test]
    fn test_on_time_conversion_clears_late_streak() {
        let (host, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);

        host.set(20_000_000);
        for _ in 0..100 {
            clock.convert_ts(1_000, None, None, MediaKind::Audio).unwrap();
        }
        // One on-time conversion resets the streak.
        host.set(1_000_000);
        clock.convert_ts(1_000, None, None, MediaKind::Audio).unwrap();

        host.set(20_000_000);
        for _ in 0..132 {
            clock.convert_ts(1_000, None, None, MediaKind::Audio).unwrap();
        }
        assert_eq!(clock.health().watchdog_resets(), 0);
    }

    #[test]
    fn test_bound_check_rejects_far_future_dates() {
        let (host, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        host.set(1_000_000);

        // A date 10 s out with a 1 s bound: rejected, values still reported.
        let err = clock
            .convert_ts(10 * CLOCK_FREQ, None, Some(CLOCK_FREQ), MediaKind::Audio)
            .unwrap_err();
        match err {
            ClockError::PastBound { ts0, bound, .. } => {
                assert_eq!(ts0, 11_000_000 + INIT_LATENCY);
                assert_eq!(bound, CLOCK_FREQ);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(clock.health().bound_rejections(), 1);

        // Without a bound the same conversion is accepted.
        assert!(clock
            .convert_ts(10 * CLOCK_FREQ, None, None, MediaKind::Audio)
            .is_ok());
    }

    #[test]
    fn test_drift_corrects_conversions() {
        let (_, clock) = manual_clock(1_000_000);
        // Network source: we cannot pace it.
        clock.update(0, 1_000_000, false, false);

        // Stream clock runs 1 ms slow per 100 ms against the host clock, so
        // each update contributes a residual of k*1_000 µs.
        for k in 1..=50i64 {
            let stream = k * 100_000 - k * 1_000;
            let system = 1_000_000 + k * 100_000;
            clock.update(stream, system, false, false);
        }

        // 51 samples 0, 1_000, ..., 50_000: exact mean 25_000. The wakeup
        // date carries the correction verbatim (no delay budget there).
        let last_stream = 50 * 100_000 - 50 * 1_000;
        assert_eq!(clock.get_wakeup(), last_stream + 25_000 + 1_000_000);
    }

    #[test]
    fn test_set_jitter_rebases_late_window() {
        let (host, clock) = manual_clock(1_000_000);
        clock.set_jitter(2_000, 10);
        clock.update(0, 1_000_000, true, true);

        // Manufacture three late conversions with known lateness. At 1.0x
        // the delay budget is exactly the seeded decoder latency, so setting
        // the host clock that far past the converted date of ts=0 yields the
        // wanted lateness sample.
        for late in [25_000, 27_000, 24_000] {
            host.set(1_000_000 + INIT_LATENCY + late);
            clock.convert_ts(0, None, None, MediaKind::Audio).unwrap();
        }
        assert_eq!(clock.get_jitter(), 2_000 + 25_000);

        clock.set_jitter(3_000, 10);
        // Every stored sample dropped by the 1_000 delay increase.
        assert_eq!(clock.get_jitter(), 3_000 + 24_000);
    }

    #[test]
    fn test_set_jitter_never_lowers_delay() {
        let (_, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);

        clock.set_jitter(5_000, 10);
        assert_eq!(clock.system_origin().unwrap().1, 5_000);
        clock.set_jitter(1_000, 10);
        // Lower request ignored; the delay budget only grows.
        assert_eq!(clock.system_origin().unwrap().1, 5_000);
    }

    #[test]
    fn test_system_origin_relative_shift() {
        let (_, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);

        // First relative call records the external origin: no shift yet.
        clock.change_system_origin(false, 5_000_000);
        assert_eq!(clock.state().unwrap().system_start, 1_000_000);

        // Later calls shift by the delta to that origin.
        clock.change_system_origin(false, 5_250_000);
        assert_eq!(clock.state().unwrap().system_start, 1_250_000);
    }

    #[test]
    fn test_system_origin_absolute_shift() {
        let (_, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);

        clock.change_system_origin(true, 3_000_000);
        assert_eq!(clock.state().unwrap().system_start, 3_000_000);
    }

    #[test]
    fn test_reset_drops_reference_but_keeps_rate() {
        let (_, clock) = manual_clock(1_000_000);
        clock.change_rate(2_000);
        clock.update(0, 1_000_000, true, true);

        clock.reset();
        assert!(clock.state().is_err());
        assert!(clock.system_origin().is_none());
        assert_eq!(clock.rate(), 2_000);

        // The next update rebuilds the mapping at the kept rate.
        clock.update(5_000_000, 2_000_000, true, true);
        assert_eq!(clock.state().unwrap().stream_start, 5_000_000);
    }

    #[test]
    fn test_drift_start_point_suspends_sampling() {
        let (_, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, false, false);
        clock.change_drift_start_point(1_000_000);

        // Updates within the hold-off leave the estimator untouched even
        // though their residual is enormous.
        clock.update(500_000, 1_010_000, false, false);
        assert_eq!(clock.get_wakeup(), 500_000 + 1_000_000);

        // Past the hold-off, sampling resumes: the new residual moves the
        // drift mean, which the wakeup date carries.
        clock.update(600_000, 1_040_000, false, false);
        let residual = (1_040_000 - 1_000_000) - 600_000;
        let mean = (0 + residual) / 2;
        assert_eq!(clock.get_wakeup(), 600_000 + mean + 1_000_000);
    }

    #[test]
    fn test_video_conversions_adapt_latency_budget() {
        let (host, clock) = manual_clock(1_000_000);
        clock.update(0, 1_000_000, true, true);
        clock.update(33_333, 1_033_333, true, true);

        // First video conversion replaces the 1 s latency seed with the
        // measured delivery-to-conversion time.
        host.set(1_053_333);
        let conv = clock
            .convert_ts(33_333, None, None, MediaKind::Video)
            .unwrap();
        let latency = 1_053_333 + 500 - 1_033_333;
        assert_eq!(conv.ts0, 1_033_333 + latency);
    }

    #[test]
    fn test_get_wakeup_without_reference() {
        let (_, clock) = manual_clock(0);
        assert_eq!(clock.get_wakeup(), 0);
    }
}
