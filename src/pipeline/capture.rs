use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use super::events::PipelineEvent;
use super::stats::bump;
use super::Shared;
use crate::capture::{
    open_with_fallback, CameraProvider, CaptureFormat, CaptureRequest, FrameSource, LatestSlot,
};
use crate::error::{Error, Failure, Result, Stage};
use crate::frame::Frame;

/// How long the supervisor waits for the capture thread to exit before detaching it
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Requests handed to the capture thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureCommand {
    SwitchDevice(u32),
}

pub(crate) struct CaptureSetup {
    pub provider: Arc<dyn CameraProvider>,
    pub request: CaptureRequest,
    pub slot: Arc<LatestSlot<Frame>>,
    pub commands: Receiver<CaptureCommand>,
    pub faults: Sender<Failure>,
    pub shared: Arc<Shared>,
}

/// Thread that owns the camera and publishes into the latest-wins slot
pub(crate) struct CaptureThread {
    handle: Option<JoinHandle<()>>,
    finished: Receiver<()>,
    stop: Arc<AtomicBool>,
    slot: Arc<LatestSlot<Frame>>,
}

impl CaptureThread {
    /// Start capturing and wait for the camera to report its granted format
    ///
    /// Returns `Ok(None)` if the pipeline was cancelled while the camera was opening.
    pub fn spawn(setup: CaptureSetup) -> std::result::Result<Option<(Self, CaptureFormat)>, Failure> {
        let (ready_tx, ready_rx) = bounded::<Result<CaptureFormat>>(1);
        let (finished_tx, finished_rx) = bounded::<()>(0);
        let stop = Arc::new(AtomicBool::new(false));
        let slot = setup.slot.clone();
        let shared = setup.shared.clone();
        let device = setup.request.device;

        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                let _finished = finished_tx;
                run(setup, ready_tx, thread_stop);
            })
            .map_err(|e| {
                Failure::new(
                    Stage::Capture,
                    Error::DeviceUnavailable {
                        device,
                        reason: format!("cannot spawn capture thread: {}", e),
                    },
                )
            })?;

        let thread = Self {
            handle: Some(handle),
            finished: finished_rx,
            stop,
            slot,
        };

        loop {
            match ready_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(Ok(format)) => return Ok(Some((thread, format))),
                Ok(Err(e)) => return Err(Failure::new(Stage::Capture, e)),
                Err(RecvTimeoutError::Timeout) => {
                    if shared.cancel.load(Ordering::Acquire) {
                        return Ok(None);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Failure::new(
                        Stage::Capture,
                        Error::DeviceUnavailable {
                            device,
                            reason: "capture thread exited during open".into(),
                        },
                    ))
                }
            }
        }
    }

    /// Stop the thread and release the camera
    pub fn release(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.slot.close();
        let Some(handle) = self.handle.take() else {
            return;
        };
        match self.finished.recv_timeout(JOIN_TIMEOUT) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("Capture thread did not exit within {:?}, detaching it", JOIN_TIMEOUT);
            }
            _ => {
                if handle.join().is_err() {
                    tracing::warn!("Capture thread panicked");
                }
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.release();
    }
}

fn run(setup: CaptureSetup, ready: Sender<Result<CaptureFormat>>, stop: Arc<AtomicBool>) {
    let mut source = match open_with_fallback(setup.provider.as_ref(), &setup.request) {
        Ok(source) => source,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let mut format = source.format();
    if ready.send(Ok(format)).is_err() {
        return;
    }
    drop(ready);

    let stats = &setup.shared.stats;
    let mut sequence = 0u64;

    while !stop.load(Ordering::Acquire) && !setup.slot.is_closed() {
        while let Ok(command) = setup.commands.try_recv() {
            match command {
                CaptureCommand::SwitchDevice(device) => {
                    switch_device(&setup, &mut source, &mut format, device)
                }
            }
        }

        match source.next_frame(sequence + 1) {
            Ok(frame) => {
                sequence += 1;
                bump(&stats.captured);
                if setup.slot.publish(frame).is_some() && !setup.slot.is_closed() {
                    bump(&stats.overwritten);
                }
            }
            Err(e) if e.is_transient() => {
                bump(&stats.capture_timeouts);
                tracing::debug!("Camera {}: {}", format.device, e);
            }
            Err(e) => {
                tracing::error!("Camera {} failed: {}", format.device, e);
                let _ = setup.faults.send(Failure::new(Stage::Capture, e));
                setup.slot.close();
                break;
            }
        }
    }

    drop(source);
    tracing::debug!("Camera {} released", format.device);
}

/// Open `device` with the session format; keep the current camera if it can't match
fn switch_device(
    setup: &CaptureSetup,
    source: &mut Box<dyn FrameSource>,
    format: &mut CaptureFormat,
    device: u32,
) {
    if device == format.device {
        tracing::debug!("Camera {} already active", device);
        return;
    }

    let request = CaptureRequest {
        device,
        width: format.width,
        height: format.height,
        fps: format.fps,
    };
    let rejection = match setup.provider.open(&request) {
        Ok(candidate) if candidate.format().dimensions() == format.dimensions() => {
            *source = candidate;
            *format = source.format();
            // before the new camera's first frame is published
            setup.shared.camera_switched.store(true, Ordering::Release);
            tracing::info!(
                "Switched to camera {} ({}x{}@{})",
                device,
                format.width,
                format.height,
                format.fps
            );
            setup.shared.events.emit(PipelineEvent::DeviceSwitched { device });
            return;
        }
        Ok(candidate) => {
            let granted = candidate.format();
            format!(
                "camera granted {}x{}, session needs {}x{}",
                granted.width, granted.height, format.width, format.height
            )
        }
        Err(e) => e.to_string(),
    };

    tracing::warn!("Keeping camera {}, switch to {} rejected: {}", format.device, device, rejection);
    setup.shared.events.emit(PipelineEvent::DeviceSwitchRejected {
        device,
        reason: rejection,
    });
}
