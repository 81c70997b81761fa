use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::stats::{bump, StatsCounters};
use crate::capture::{LatestSlot, Take};
use crate::error::{Error, Failure, Stage};
use crate::frame::Frame;
use crate::mask::{BackendKind, Mask, MaskEngine};

/// How often an idle worker re-checks its inbox
const IDLE_WAIT: Duration = Duration::from_millis(500);

enum WorkerOutput {
    Mask(Mask),
    Demoted(String),
    Failed { sequence: u64, error: Error },
    Exhausted(Error),
}

/// Mask for one frame and how long the process path waited for it
pub(crate) struct MaskResult {
    pub mask: Mask,
    pub waited: Duration,
}

/// Runs `MaskEngine` on its own thread
///
/// Frames go in through a latest-wins slot: while the engine is busy, a newer frame
/// replaces the one still waiting, so the next computation always starts from the
/// newest frame. Results are awaited at most until the per-frame deadline; after
/// that the latest available mask is reused.
pub(crate) struct MaskWorker {
    jobs: Arc<LatestSlot<Frame>>,
    restart: Arc<AtomicBool>,
    results: Receiver<WorkerOutput>,
    handle: Option<JoinHandle<()>>,
    latest: Option<Mask>,
    demotion: Option<String>,
    stats: Arc<StatsCounters>,
}

impl MaskWorker {
    pub fn spawn(engine: MaskEngine, stats: Arc<StatsCounters>) -> std::io::Result<Self> {
        let jobs = Arc::new(LatestSlot::new());
        let restart = Arc::new(AtomicBool::new(false));
        let (result_tx, result_rx) = unbounded();

        let handle = {
            let jobs = jobs.clone();
            let restart = restart.clone();
            thread::Builder::new()
                .name("mask-worker".into())
                .spawn(move || run(engine, jobs, restart, result_tx))?
        };

        Ok(Self {
            jobs,
            restart,
            results: result_rx,
            handle: Some(handle),
            latest: None,
            demotion: None,
            stats,
        })
    }

    /// Mask to composite `frame` with, fresh if it arrives before `deadline` passes
    ///
    /// Before any mask has ever completed the result is all background, so an
    /// unprocessed background is never shown.
    pub fn mask_for(&mut self, frame: &Frame, deadline: Duration) -> Result<MaskResult, Failure> {
        let started = Instant::now();
        if self.jobs.is_closed() {
            return Err(worker_gone());
        }
        if let Some(skipped) = self.jobs.publish(frame.clone()) {
            tracing::debug!(
                "Frame {} replaced pending mask job {}",
                frame.sequence(),
                skipped.sequence()
            );
        }

        let until = started + deadline;
        loop {
            let remaining = until.saturating_duration_since(Instant::now());
            let output = match self.results.recv_timeout(remaining) {
                Ok(output) => output,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Err(worker_gone()),
            };

            match output {
                WorkerOutput::Mask(mask) if mask.sequence() == frame.sequence() => {
                    self.latest = Some(mask.clone());
                    return Ok(MaskResult {
                        mask,
                        waited: started.elapsed(),
                    });
                }
                WorkerOutput::Mask(mask) => {
                    tracing::debug!("Late mask for frame {} arrived", mask.sequence());
                    self.latest = Some(mask);
                }
                WorkerOutput::Demoted(reason) => self.demotion = Some(reason),
                WorkerOutput::Failed { sequence, error } => {
                    tracing::debug!("Mask for frame {} failed: {}", sequence, error);
                    if sequence == frame.sequence() {
                        break;
                    }
                }
                WorkerOutput::Exhausted(e) => return Err(Failure::new(Stage::MaskEngine, e)),
            }
        }

        let mask = match &self.latest {
            Some(latest) => latest
                .reuse_for(frame.sequence())
                .map_err(|e| Failure::new(Stage::MaskEngine, e))?,
            None => Mask::background_for(frame),
        };
        if mask.is_stale() {
            bump(&self.stats.stale_masks);
            tracing::debug!(
                "Reusing mask from frame {} for frame {}",
                mask.sequence(),
                frame.sequence()
            );
        }
        Ok(MaskResult {
            mask,
            waited: started.elapsed(),
        })
    }

    /// Drop temporal state before the next computation, e.g. after a camera switch
    pub fn restart_stream(&self) {
        self.restart.store(true, Ordering::Release);
    }

    /// Reason for a backend demotion reported since the last call
    pub fn take_demotion(&mut self) -> Option<String> {
        self.demotion.take()
    }

    /// Stop the worker and release the engine
    pub fn shutdown(&mut self) {
        self.jobs.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Mask worker panicked");
            }
        }
    }
}

impl Drop for MaskWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_gone() -> Failure {
    Failure::new(
        Stage::MaskEngine,
        Error::ComputeBackendFailure {
            backend: BackendKind::Cpu,
            reason: "mask worker exited".into(),
        },
    )
}

fn run(
    mut engine: MaskEngine,
    jobs: Arc<LatestSlot<Frame>>,
    restart: Arc<AtomicBool>,
    results: Sender<WorkerOutput>,
) {
    tracing::debug!("Mask worker started on {}", engine.backend());

    loop {
        let frame = match jobs.take(IDLE_WAIT) {
            Take::Item(frame) => frame,
            Take::TimedOut => continue,
            Take::Closed => break,
        };
        if restart.swap(false, Ordering::AcqRel) {
            engine.restart_stream();
        }

        let outcome = engine.compute_mask(&frame);

        if let Some(reason) = engine.take_demotion() {
            if results.send(WorkerOutput::Demoted(reason)).is_err() {
                break;
            }
        }

        let output = match outcome {
            Ok(mask) => WorkerOutput::Mask(mask),
            Err(e) if engine.is_exhausted() => WorkerOutput::Exhausted(e),
            Err(error) => WorkerOutput::Failed {
                sequence: frame.sequence(),
                error,
            },
        };
        let exhausted = matches!(output, WorkerOutput::Exhausted(_));
        if results.send(output).is_err() || exhausted {
            break;
        }
    }

    jobs.close();
    tracing::debug!("Mask worker finished");
}
