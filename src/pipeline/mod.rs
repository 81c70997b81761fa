//! Session orchestration: capture, mask, composite, write.
//!
//! A session runs on three threads. `capture` owns the camera and publishes into a
//! latest-wins slot, `mask-worker` owns the `MaskEngine`, and `pipeline` opens every
//! resource, runs the per-frame loop and releases everything in order when the
//! session ends. The `Pipeline` handle only flips flags and sends messages, so every
//! control call returns immediately.

mod capture;
mod events;
mod process;
mod state;
mod stats;
mod worker;

pub use events::PipelineEvent;
pub use state::PipelineState;
pub use stats::{PerformanceGrade, PipelineStats};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::capture::{ensure_dimensions, CameraProvider, CaptureRequest, DeviceInfo, LatestSlot};
use crate::effect::{EffectConfig, EffectHandle};
use crate::error::{Error, Failure, Result, Stage};
use crate::frame::Frame;
use crate::mask::{BackendKind, BackendPreference, BackendStatus, MaskEngine, MaskSettings};
use crate::output::{FrameSink, SinkFormat, SinkProvider};
use crate::segmentation::BackendProvider;
use capture::{CaptureCommand, CaptureSetup, CaptureThread};
use events::EventBus;
use process::{Pacing, ProcessLoop};
use state::StateCell;
use stats::StatsCounters;
use worker::MaskWorker;

/// Default wait for a mask before the previous one is reused
pub const DEFAULT_MASK_DEADLINE: Duration = Duration::from_millis(33);

/// Default wait for a captured frame before the miss is counted as a timeout
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_millis(200);

/// Device factories a pipeline opens its resources through
#[derive(Clone)]
pub struct PipelineParts {
    pub cameras: Arc<dyn CameraProvider>,
    pub sinks: Arc<dyn SinkProvider>,
    pub backends: Arc<dyn BackendProvider>,
}

/// Session parameters, fixed when a session starts
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub capture: CaptureRequest,
    pub sink: SinkFormat,
    pub backend: BackendPreference,
    pub mask: MaskSettings,
    pub mask_deadline: Duration,
    pub capture_timeout: Duration,
    /// Emit the mask as a grey image instead of compositing
    pub show_matte: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        let sink = SinkFormat::default();
        let (width, height) = sink.dimensions();
        Self {
            capture: CaptureRequest {
                device: 0,
                width,
                height,
                fps: sink.fps.fps(),
            },
            sink,
            backend: BackendPreference::Auto,
            mask: MaskSettings::default(),
            mask_deadline: DEFAULT_MASK_DEADLINE,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            show_matte: false,
        }
    }
}

/// State shared between the control handle and the session threads
#[derive(Default)]
pub(crate) struct Shared {
    state: StateCell,
    events: EventBus,
    stats: Arc<StatsCounters>,
    cancel: AtomicBool,
    /// Set by the capture thread when frames start coming from another camera
    camera_switched: AtomicBool,
    slot: Mutex<Option<Arc<LatestSlot<Frame>>>>,
    commands: Mutex<Option<Sender<CaptureCommand>>>,
    backend: Mutex<Option<Arc<BackendStatus>>>,
}

impl Shared {
    fn set_state(&self, to: PipelineState) -> bool {
        match self.state.transition(to) {
            Some(from) => {
                tracing::info!("Pipeline {} -> {}", from, to);
                self.events.emit(PipelineEvent::StateChanged { from, to });
                true
            }
            None => false,
        }
    }

    fn fail(&self, failure: Failure) {
        if let Some(from) = self.state.fail(failure.clone()) {
            tracing::error!("Pipeline failed: {} ({})", failure, failure.remediation());
            self.events.emit(PipelineEvent::StateChanged {
                from,
                to: PipelineState::Failed,
            });
            self.events.emit(PipelineEvent::Failed(failure));
        }
    }

    fn degrade(&self, reason: String) {
        tracing::warn!("Pipeline degraded: {}", reason);
        if self.set_state(PipelineState::Degraded) {
            self.events.emit(PipelineEvent::Degraded { reason });
        }
    }

    fn stats_snapshot(&self) -> PipelineStats {
        let backend = self.backend.lock().as_ref().map(|status| status.current());
        self.stats.snapshot(backend)
    }
}

/// Control surface of the effect pipeline
///
/// Every method is thread-safe and returns without waiting for the session;
/// use `wait_for`, `join` or `subscribe` to observe progress.
pub struct Pipeline {
    parts: PipelineParts,
    options: Mutex<PipelineOptions>,
    effect: EffectHandle,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(parts: PipelineParts, options: PipelineOptions, effect: EffectConfig) -> Self {
        Self {
            parts,
            options: Mutex::new(options),
            effect: EffectHandle::new(effect),
            shared: Arc::new(Shared::default()),
            supervisor: Mutex::new(None),
        }
    }

    /// Start a session in the background
    ///
    /// Returns false if a session is already active. Progress and failures are
    /// reported through the state and the event stream.
    pub fn start(&self) -> bool {
        let mut supervisor = self.supervisor.lock();
        if self.shared.state.get().is_active() {
            return false;
        }
        self.shared.cancel.store(false, Ordering::Release);
        if !self.shared.set_state(PipelineState::Starting) {
            return false;
        }
        if let Some(previous) = supervisor.take() {
            let _ = previous.join();
        }

        let session = SessionPlan {
            parts: self.parts.clone(),
            options: self.options.lock().clone(),
            effect: self.effect.clone(),
            shared: self.shared.clone(),
        };
        match thread::Builder::new()
            .name("pipeline".into())
            .spawn(move || session.run())
        {
            Ok(handle) => {
                *supervisor = Some(handle);
                true
            }
            Err(e) => {
                let device = self.options.lock().capture.device;
                self.shared.fail(Failure::new(
                    Stage::Capture,
                    Error::DeviceUnavailable {
                        device,
                        reason: format!("cannot spawn pipeline thread: {}", e),
                    },
                ));
                false
            }
        }
    }

    /// Ask the session to stop; idempotent
    pub fn stop(&self) {
        if !matches!(
            self.shared.state.get(),
            PipelineState::Starting | PipelineState::Running | PipelineState::Degraded
        ) {
            return;
        }
        self.shared.cancel.store(true, Ordering::Release);
        self.shared.set_state(PipelineState::Stopping);
        if let Some(slot) = self.shared.slot.lock().as_ref() {
            slot.close();
        }
    }

    /// Replace the effect; applies from the next frame
    pub fn set_effect(&self, config: EffectConfig) {
        tracing::info!("Effect set to {} at intensity {}", config.kind(), config.intensity());
        self.effect.store(config);
    }

    /// Derive a new effect from the current one and return it
    pub fn update_effect(
        &self,
        f: impl FnOnce(&EffectConfig) -> EffectConfig,
    ) -> Arc<EffectConfig> {
        let config = self.effect.update(f);
        tracing::info!("Effect set to {} at intensity {}", config.kind(), config.intensity());
        config
    }

    /// Current effect snapshot
    pub fn effect(&self) -> Arc<EffectConfig> {
        self.effect.load()
    }

    /// Switch cameras
    ///
    /// While streaming, the capture thread tries the new camera with the session
    /// format and reports `DeviceSwitched` or `DeviceSwitchRejected`. The choice is
    /// also remembered for the next session.
    pub fn select_device(&self, device: u32) {
        self.options.lock().capture.device = device;
        let sent = self
            .shared
            .commands
            .lock()
            .as_ref()
            .map(|tx| tx.send(CaptureCommand::SwitchDevice(device)).is_ok())
            .unwrap_or(false);
        if !sent {
            tracing::info!("Camera {} will be used when the pipeline starts", device);
        }
    }

    pub fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.parts.cameras.devices()
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state.get()
    }

    /// Failure that ended the last session, if it failed
    pub fn failure(&self) -> Option<Failure> {
        self.shared.state.failure()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats_snapshot()
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }

    /// Wait until `predicate` holds for the state, at most `timeout`
    pub fn wait_for(&self, predicate: impl Fn(PipelineState) -> bool, timeout: Duration) -> bool {
        self.shared.state.wait_for(predicate, timeout)
    }

    /// Wait for the current session to end and return the final state
    pub fn join(&self) -> PipelineState {
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Pipeline thread panicked");
            }
        }
        self.state()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

/// Everything a session needs, moved onto the supervisor thread
struct SessionPlan {
    parts: PipelineParts,
    options: PipelineOptions,
    effect: EffectHandle,
    shared: Arc<Shared>,
}

/// Resources of a running session
///
/// Fields drop in declaration order, which is the release order: camera first,
/// then the mask engine, then the sink.
#[derive(Default)]
struct Session {
    capture: Option<CaptureThread>,
    worker: Option<MaskWorker>,
    sink: Option<Box<dyn FrameSink>>,
}

impl Session {
    fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.release();
            tracing::debug!("Capture released");
        }
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
            tracing::debug!("Mask engine released");
        }
        if self.sink.take().is_some() {
            tracing::debug!("Sink released");
        }
    }
}

impl SessionPlan {
    fn run(self) {
        let mut session = Session::default();
        let outcome = self.start_and_process(&mut session);

        session.release();
        *self.shared.slot.lock() = None;
        *self.shared.commands.lock() = None;

        match outcome {
            Ok(()) => {
                // a session can also end on its own, e.g. the slot closed without a fault
                self.shared.set_state(PipelineState::Stopping);
                self.shared.set_state(PipelineState::Stopped);
            }
            Err(failure) => self.shared.fail(failure),
        }
    }

    fn cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::Acquire)
    }

    fn start_and_process(&self, session: &mut Session) -> std::result::Result<(), Failure> {
        let shared = &self.shared;
        let options = &self.options;
        shared.stats.reset();
        shared.camera_switched.store(false, Ordering::Release);
        *shared.backend.lock() = None;

        let slot = Arc::new(LatestSlot::new());
        *shared.slot.lock() = Some(slot.clone());
        if self.cancelled() {
            return Ok(());
        }
        let (command_tx, command_rx) = unbounded();
        *shared.commands.lock() = Some(command_tx);
        let (fault_tx, fault_rx) = unbounded();

        let setup = CaptureSetup {
            provider: self.parts.cameras.clone(),
            request: options.capture,
            slot: slot.clone(),
            commands: command_rx,
            faults: fault_tx,
            shared: shared.clone(),
        };
        let Some((capture, granted)) = CaptureThread::spawn(setup)? else {
            return Ok(());
        };
        session.capture = Some(capture);
        tracing::info!(
            "Capture: camera {} at {}x{}@{}",
            granted.device,
            granted.width,
            granted.height,
            granted.fps
        );

        ensure_dimensions(&granted, options.sink.dimensions())
            .map_err(|e| Failure::new(Stage::Capture, e))?;
        if self.cancelled() {
            return Ok(());
        }

        let sink = self
            .parts
            .sinks
            .open(options.sink)
            .map_err(|e| Failure::new(Stage::Sink, e))?;
        tracing::info!("Output: {}", sink.format());
        let sink = session.sink.insert(sink);

        let mut engine = MaskEngine::open(
            self.parts.backends.as_ref(),
            options.backend,
            options.mask,
            granted.dimensions(),
        )
        .map_err(|e| Failure::new(Stage::MaskEngine, e))?;
        let demotion = engine.take_demotion();
        *shared.backend.lock() = Some(engine.status());

        let worker = MaskWorker::spawn(engine, shared.stats.clone()).map_err(|e| {
            Failure::new(
                Stage::MaskEngine,
                Error::ComputeBackendFailure {
                    backend: BackendKind::Cpu,
                    reason: format!("cannot spawn mask worker: {}", e),
                },
            )
        })?;
        let worker = session.worker.insert(worker);

        if self.cancelled() {
            return Ok(());
        }
        match demotion {
            Some(reason) => shared.degrade(reason),
            None => {
                shared.set_state(PipelineState::Running);
            }
        }
        if !shared.state.get().is_streaming() {
            return Ok(());
        }

        let process = ProcessLoop {
            shared,
            slot: &slot,
            faults: &fault_rx,
            effect: &self.effect,
            pacing: Pacing {
                mask_deadline: options.mask_deadline,
                capture_timeout: options.capture_timeout,
                show_matte: options.show_matte,
            },
        };
        process.run(worker, &mut **sink)
    }
}
