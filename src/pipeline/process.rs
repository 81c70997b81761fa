use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use super::stats::bump;
use super::worker::MaskWorker;
use super::Shared;
use crate::capture::{LatestSlot, Take};
use crate::compositor::composite;
use crate::effect::{EffectConfig, EffectHandle};
use crate::error::{Error, Failure, Stage};
use crate::frame::Frame;
use crate::output::FrameSink;

/// Stats are logged every this many processed frames
const LOG_EVERY: u64 = 30;

/// Timing knobs of the per-frame loop
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pacing {
    pub mask_deadline: Duration,
    pub capture_timeout: Duration,
    pub show_matte: bool,
}

/// The per-frame loop: acquire, mask, composite, write
pub(crate) struct ProcessLoop<'a> {
    pub shared: &'a Shared,
    pub slot: &'a LatestSlot<Frame>,
    pub faults: &'a Receiver<Failure>,
    pub effect: &'a EffectHandle,
    pub pacing: Pacing,
}

impl ProcessLoop<'_> {
    /// Run until cancelled or a resource-level failure occurs
    pub fn run(&self, worker: &mut MaskWorker, sink: &mut dyn FrameSink) -> Result<(), Failure> {
        let frame_interval = sink.format().fps.interval();
        let (width, height) = sink.format().dimensions();
        let stats = &self.shared.stats;

        let mut effect_source = self.effect.load();
        let mut effect: EffectConfig = effect_source.prepared_for(width, height);
        let mut last_attempt: Option<Instant> = None;

        tracing::info!("Starting main pipeline loop");

        loop {
            if self.shared.cancel.load(Ordering::Acquire) {
                return Ok(());
            }

            let frame = match self.slot.take(self.pacing.capture_timeout) {
                Take::Item(frame) => frame,
                Take::TimedOut => {
                    bump(&stats.capture_timeouts);
                    tracing::debug!("No frame within {:?}", self.pacing.capture_timeout);
                    continue;
                }
                Take::Closed => {
                    return match self.faults.try_recv() {
                        Ok(failure) => Err(failure),
                        Err(_) => Ok(()),
                    };
                }
            };
            let _span = tracing::debug_span!("process_frame", seq = frame.sequence()).entered();

            if self.shared.camera_switched.swap(false, Ordering::AcqRel) {
                worker.restart_stream();
            }

            let result = worker.mask_for(&frame, self.pacing.mask_deadline)?;
            if let Some(reason) = worker.take_demotion() {
                self.shared.degrade(reason);
            }

            // re-fit the replacement image only when the config changed
            let current = self.effect.load();
            if !Arc::ptr_eq(&current, &effect_source) {
                effect = current.prepared_for(width, height);
                effect_source = current;
            }

            let composite_start = Instant::now();
            let output = if self.pacing.show_matte {
                result
                    .mask
                    .to_frame(frame.format())
                    .map_err(|e| Failure::new(Stage::Compositor, e))?
            } else {
                composite(&frame, &result.mask, &effect)
                    .map_err(|e| Failure::new(Stage::Compositor, e))?
            };
            let composite_time = composite_start.elapsed();

            // never faster than the sink frame rate
            if let Some(last) = last_attempt {
                let next = last + frame_interval;
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                }
            }
            last_attempt = Some(Instant::now());

            let write_start = Instant::now();
            match sink.write(&output) {
                Ok(()) => bump(&stats.sent),
                Err(Error::SinkBackpressure) => {
                    bump(&stats.dropped);
                    tracing::debug!("Sink busy, dropped frame {}", frame.sequence());
                }
                Err(e) => return Err(Failure::new(Stage::Sink, e)),
            }
            let write_time = write_start.elapsed();

            stats.record_frame(result.waited, composite_time, write_time);

            let processed = stats.processed.load(Ordering::Relaxed);
            if processed % LOG_EVERY == 0 {
                let snapshot = self.shared.stats_snapshot();
                tracing::info!(
                    "Frame {}: mask={:.1}ms, composite={:.1}ms, write={:.1}ms, fps={:.1}, dropped={}, stale={}",
                    processed,
                    snapshot.avg_mask_ms,
                    snapshot.avg_composite_ms,
                    snapshot.avg_write_ms,
                    snapshot.output_fps,
                    snapshot.frames_dropped,
                    snapshot.stale_masks
                );
            }
        }
    }
}
