//! Pacing stage for the playback pipeline
//!
//! The input clock only answers "when should this sample become visible";
//! something still has to hold decoded frames until that moment. This stage
//! buffers incoming frames, converts their stream timestamps through the
//! clock, sleeps until the returned host date, and forwards each frame with
//! its presentation deadline attached. Frames whose conversion fails (no
//! reference, past the configured bound) cannot be scheduled and are dropped
//! with a counter; frames that come out late are only reported, dropping
//! them is the sink's call.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::clock::host::HostClock;
use crate::clock::InputClock;
use crate::config::PacerConfig;
use crate::pipeline::PipelineStage;
use crate::pipeline::health::SyncHealth;
use crate::pipeline::types::{MediaFrame, Timestamp};

/// A frame annotated with its presentation date
#[derive(Debug, Clone)]
pub struct PacedFrame {
    pub frame: MediaFrame,
    /// Host-domain presentation date, delay budget included
    pub deadline: Timestamp,
    /// Playback rate in force when the date was computed (thousandths)
    pub rate: i64,
}

/// Pacing stage: schedules decoded frames on the input clock's timeline
pub struct PacerStage {
    clock: Arc<InputClock>,
    host: Arc<dyn HostClock>,
    health: Arc<SyncHealth>,
    config: PacerConfig,
    /// Frames waiting for their deadline, in arrival order
    queue: VecDeque<MediaFrame>,
    /// Input: decoded frames with stream-domain timestamps
    input_rx: Option<mpsc::Receiver<MediaFrame>>,
    /// Output: frames released at their presentation date
    output_tx: Option<mpsc::Sender<PacedFrame>>,
    /// Statistics
    frames_released: u64,
    frames_dropped: u64,
}

impl PacerStage {
    /// Create a new pacer driven by `clock` and its host time source
    pub fn new(clock: Arc<InputClock>, config: PacerConfig) -> Self {
        let host = clock.host();
        let health = clock.health();
        Self {
            clock,
            host,
            health,
            config,
            queue: VecDeque::new(),
            input_rx: None,
            output_tx: None,
            frames_released: 0,
            frames_dropped: 0,
        }
    }

    /// Set the input channel
    pub fn set_input(&mut self, rx: mpsc::Receiver<MediaFrame>) {
        self.input_rx = Some(rx);
    }

    /// Get the output channel
    pub fn take_output(&mut self) -> mpsc::Receiver<PacedFrame> {
        let (tx, rx) = mpsc::channel::<PacedFrame>(8);
        self.output_tx = Some(tx);
        rx
    }

    /// Enqueue a frame, evicting the oldest when the queue is full
    fn push_frame(&mut self, frame: MediaFrame) {
        if self.queue.len() >= self.config.max_queue {
            self.queue.pop_front();
            self.frames_dropped += 1;
            self.health.record_dropped_frame();
            warn!("PacerStage: queue full, dropped oldest frame");
        }
        self.queue.push_back(frame);
    }

    /// Release every frame whose presentation date has arrived
    ///
    /// Returns the released frames and, if a frame is still waiting, its
    /// deadline so the caller knows when to come back.
    fn process_queue(&mut self, now: i64) -> (Vec<PacedFrame>, Option<i64>) {
        let mut released = Vec::new();
        let bound = self.config.ts_bound.map(|d| d.as_micros() as i64);
        let late_threshold = self.config.late_threshold.as_micros() as i64;

        while let Some(front) = self.queue.front() {
            let (pts, dts, kind) = (front.pts, front.dts, front.kind);
            let ts1 = (dts != pts).then(|| dts.micros);

            match self.clock.convert_ts(pts.micros, ts1, bound, kind) {
                Ok(conv) => {
                    if conv.ts0 > now {
                        return (released, Some(conv.ts0));
                    }
                    let frame = self.queue.pop_front().unwrap();
                    if now - conv.ts0 >= late_threshold {
                        debug!("PacerStage: frame released {}us late", now - conv.ts0);
                    }
                    self.frames_released += 1;
                    self.health.record_paced_frame(now);
                    released.push(PacedFrame {
                        frame,
                        deadline: Timestamp::from_micros(conv.ts0),
                        rate: conv.rate,
                    });
                }
                Err(err) => {
                    // No usable presentation date: the frame cannot be
                    // scheduled at all.
                    warn!("PacerStage: dropping frame: {err}");
                    self.queue.pop_front();
                    self.frames_dropped += 1;
                    self.health.record_dropped_frame();
                }
            }
        }

        (released, None)
    }
}

#[async_trait]
impl PipelineStage for PacerStage {
    async fn run(&mut self) -> Result<()> {
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No input channel"))?;
        let output_tx = self
            .output_tx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No output channel"))?;

        info!("PacerStage: started (tick {:?})", self.config.tick);
        let mut last_stats_log = Instant::now();

        loop {
            let now = self.host.now();
            let (ready, next_deadline) = self.process_queue(now);
            for paced in ready {
                if output_tx.send(paced).await.is_err() {
                    info!("PacerStage: output channel closed");
                    return Ok(());
                }
            }

            // Wake at the pending deadline when it is near, on the coarse
            // tick otherwise; new input interrupts the sleep either way.
            let sleep_for = match next_deadline {
                Some(deadline) => {
                    Duration::from_micros((deadline - now).max(0) as u64).min(self.config.tick)
                }
                None => self.config.tick,
            };

            tokio::select! {
                frame = input_rx.recv() => {
                    match frame {
                        Some(frame) => self.push_frame(frame),
                        None => {
                            info!("PacerStage: input closed");
                            // Flush whatever is left without pacing it.
                            let now = self.host.now();
                            while let Some(frame) = self.queue.pop_front() {
                                self.frames_released += 1;
                                let _ = output_tx
                                    .send(PacedFrame {
                                        frame,
                                        deadline: Timestamp::from_micros(now),
                                        rate: self.clock.rate(),
                                    })
                                    .await;
                            }
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }

            // Log stats periodically
            if last_stats_log.elapsed().as_secs() >= 30 {
                info!(
                    "PacerStage: {} released, {} dropped, queue: {}",
                    self.frames_released,
                    self.frames_dropped,
                    self.queue.len()
                );
                last_stats_log = Instant::now();
            }
        }

        info!(
            "PacerStage: finished ({} released, {} dropped)",
            self.frames_released, self.frames_dropped
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "PacerStage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::host::ManualClock;
    use crate::config::ClockConfig;
    use bytes::Bytes;

    const INIT_LATENCY: i64 = crate::clock::latency::INIT_DECODER_LATENCY;

    fn make_frame(pts_us: i64) -> MediaFrame {
        MediaFrame::audio(Bytes::from_static(b"pcm"), Timestamp::from_micros(pts_us))
    }

    fn paced_setup() -> (Arc<ManualClock>, Arc<InputClock>, PacerStage) {
        let host = Arc::new(ManualClock::new(1_000_000));
        let clock = Arc::new(InputClock::with_host(ClockConfig::default(), host.clone()));
        let stage = PacerStage::new(clock.clone(), PacerConfig::default());
        (host, clock, stage)
    }

    #[test]
    fn test_releases_due_frames() {
        let (host, clock, mut stage) = paced_setup();
        clock.update(0, 1_000_000, true, true);

        stage.push_frame(make_frame(0));
        stage.push_frame(make_frame(500_000));

        // The first frame's date (1_000_000 + seeded latency) has arrived,
        // the second one's has not.
        host.set(2_000_000);
        let (released, next) = stage.process_queue(2_000_000);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].deadline.micros, 2_000_000);
        assert_eq!(released[0].rate, 1000);
        assert_eq!(next, Some(2_500_000));
    }

    #[test]
    fn test_holds_future_frames() {
        let (_, clock, mut stage) = paced_setup();
        clock.update(0, 1_000_000, true, true);

        stage.push_frame(make_frame(500_000));
        let (released, next) = stage.process_queue(1_000_000);
        assert!(released.is_empty());
        assert_eq!(next, Some(1_500_000 + INIT_LATENCY));
    }

    #[test]
    fn test_drops_frames_without_reference() {
        let (_, _, mut stage) = paced_setup();

        stage.push_frame(make_frame(0));
        let (released, next) = stage.process_queue(1_000_000);
        assert!(released.is_empty());
        assert_eq!(next, None);
        assert_eq!(stage.frames_dropped, 1);
        assert!(stage.queue.is_empty());
    }

    #[test]
    fn test_queue_overflow_evicts_oldest() {
        let (_, clock, _) = paced_setup();
        clock.update(0, 1_000_000, true, true);
        let mut stage = PacerStage::new(
            clock,
            PacerConfig {
                max_queue: 2,
                ..Default::default()
            },
        );

        stage.push_frame(make_frame(100));
        stage.push_frame(make_frame(200));
        stage.push_frame(make_frame(300));

        assert_eq!(stage.queue.len(), 2);
        assert_eq!(stage.frames_dropped, 1);
        assert_eq!(stage.queue.front().unwrap().pts.micros, 200);
    }

    #[tokio::test]
    async fn test_run_paces_and_flushes() {
        let _ = env_logger::builder().is_test(true).try_init();

        let (host, clock, mut stage) = paced_setup();
        clock.update(0, 1_000_000, true, true);
        // Everything is already due.
        host.set(5_000_000);

        let (tx, rx) = mpsc::channel(8);
        stage.set_input(rx);
        let mut out = stage.take_output();

        let handle = tokio::spawn(async move {
            stage.run().await.unwrap();
            stage
        });

        tx.send(make_frame(0)).await.unwrap();
        tx.send(make_frame(33_000)).await.unwrap();

        let first = out.recv().await.unwrap();
        let second = out.recv().await.unwrap();
        assert_eq!(first.frame.pts.micros, 0);
        assert_eq!(second.frame.pts.micros, 33_000);
        assert_eq!(first.deadline.micros, 1_000_000 + INIT_LATENCY);

        drop(tx);
        let stage = handle.await.unwrap();
        assert_eq!(stage.frames_released, 2);
    }
}
