use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::smoothing::{refine_edges, TemporalSmoother, DEFAULT_SMOOTHING};
use super::Mask;
use crate::error::{Error, Result};
use crate::frame::{Frame, PixelFormat};
use crate::segmentation::{BackendProvider, SegmentationModel};

/// Consecutive GPU failures that demote the session to CPU
pub const GPU_FAILURE_LIMIT: u32 = 2;

/// Consecutive CPU failures after which no fallback is left
pub const CPU_FAILURE_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Gpu,
    Cpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Gpu => f.write_str("GPU"),
            BackendKind::Cpu => f.write_str("CPU"),
        }
    }
}

/// Which backend the session should try first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Probe the GPU, fall back to CPU (and degrade) if it is unusable
    #[default]
    Auto,
    /// CPU only, no probe; this is a choice, not a degradation
    Cpu,
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "gpu" => Ok(BackendPreference::Auto),
            "cpu" => Ok(BackendPreference::Cpu),
            other => Err(format!("unknown backend '{}', expected auto or cpu", other)),
        }
    }
}

/// Tunables for mask post-processing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskSettings {
    pub temporal_smoothing: bool,
    /// Weight of the previous mask in the moving average
    pub smoothing: f32,
    pub edge_smoothing: bool,
}

impl Default for MaskSettings {
    fn default() -> Self {
        Self {
            temporal_smoothing: true,
            smoothing: DEFAULT_SMOOTHING,
            edge_smoothing: true,
        }
    }
}

const GPU: u8 = 0;
const CPU: u8 = 1;

/// One-way record of the active compute backend
///
/// Demotion is a compare-exchange: the first report past the threshold wins and
/// every later report is a no-op. There is no way back to the GPU.
#[derive(Debug)]
pub struct BackendStatus(AtomicU8);

impl BackendStatus {
    pub fn new(kind: BackendKind) -> Self {
        Self(AtomicU8::new(match kind {
            BackendKind::Gpu => GPU,
            BackendKind::Cpu => CPU,
        }))
    }

    pub fn current(&self) -> BackendKind {
        match self.0.load(Ordering::Acquire) {
            GPU => BackendKind::Gpu,
            _ => BackendKind::Cpu,
        }
    }

    /// Returns true only for the call that performed the demotion
    pub fn demote(&self) -> bool {
        self.0
            .compare_exchange(GPU, CPU, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Computes smoothed foreground masks on the best available backend
pub struct MaskEngine {
    gpu: Option<Box<dyn SegmentationModel>>,
    cpu: Box<dyn SegmentationModel>,
    status: Arc<BackendStatus>,
    gpu_failures: u32,
    cpu_failures: u32,
    smoother: TemporalSmoother,
    settings: MaskSettings,
    pending_demotion: Option<String>,
}

impl MaskEngine {
    /// Load the backends and probe the GPU once
    ///
    /// The probe loads the GPU model and runs one warm-up inference on a black
    /// frame of `probe_size`. If either step fails the engine starts on the CPU and
    /// `take_demotion` reports why. A CPU model that cannot load is fatal.
    pub fn open(
        provider: &dyn BackendProvider,
        preference: BackendPreference,
        settings: MaskSettings,
        probe_size: (u32, u32),
    ) -> Result<Self> {
        let cpu = provider.cpu().map_err(|e| Error::ComputeBackendFailure {
            backend: BackendKind::Cpu,
            reason: format!("{:#}", e),
        })?;

        let mut engine = Self {
            gpu: None,
            cpu,
            status: Arc::new(BackendStatus::new(BackendKind::Cpu)),
            gpu_failures: 0,
            cpu_failures: 0,
            smoother: TemporalSmoother::new(settings.smoothing),
            settings,
            pending_demotion: None,
        };

        if preference == BackendPreference::Cpu {
            tracing::info!("Mask engine using CPU backend");
            return Ok(engine);
        }

        match Self::probe_gpu(provider, probe_size) {
            Ok(gpu) => {
                tracing::info!("GPU probe succeeded, mask engine using GPU backend");
                engine.gpu = Some(gpu);
                engine.status = Arc::new(BackendStatus::new(BackendKind::Gpu));
            }
            Err(reason) => {
                tracing::warn!("GPU probe failed, using CPU: {}", reason);
                engine.pending_demotion = Some(format!("GPU probe failed: {}", reason));
            }
        }
        Ok(engine)
    }

    fn probe_gpu(
        provider: &dyn BackendProvider,
        (width, height): (u32, u32),
    ) -> std::result::Result<Box<dyn SegmentationModel>, String> {
        let _span = tracing::debug_span!("gpu_probe").entered();
        let mut gpu = provider.gpu().map_err(|e| format!("{:#}", e))?;
        let blank = Frame::solid(width, height, PixelFormat::Rgb, 0, [0; 3])
            .map_err(|e| e.to_string())?;
        gpu.segment(&blank).map_err(|e| format!("warm-up failed: {:#}", e))?;
        gpu.reset_state();
        Ok(gpu)
    }

    pub fn backend(&self) -> BackendKind {
        self.status.current()
    }

    /// Shared view of the active backend
    pub fn status(&self) -> Arc<BackendStatus> {
        self.status.clone()
    }

    /// Reason for a demotion that has not been reported yet
    pub fn take_demotion(&mut self) -> Option<String> {
        self.pending_demotion.take()
    }

    /// True once the CPU fallback has failed too often to continue
    pub fn is_exhausted(&self) -> bool {
        self.cpu_failures >= CPU_FAILURE_LIMIT
    }

    /// Forget temporal state, e.g. after the camera changed
    pub fn restart_stream(&mut self) {
        self.smoother.reset();
        match (self.status.current(), self.gpu.as_mut()) {
            (BackendKind::Gpu, Some(gpu)) => gpu.reset_state(),
            _ => self.cpu.reset_state(),
        }
    }

    /// Compute the mask for `frame`
    ///
    /// A single GPU failure is returned as a transient `ComputeBackendFailure`; the
    /// second consecutive one demotes the session and recomputes on the CPU.
    pub fn compute_mask(&mut self, frame: &Frame) -> Result<Mask> {
        let _span = tracing::debug_span!("compute_mask", seq = frame.sequence()).entered();

        let attempt = match (self.status.current(), self.gpu.as_mut()) {
            (BackendKind::Gpu, Some(gpu)) => Some(gpu.segment(frame)),
            _ => None,
        };

        let raw = match attempt {
            Some(Ok(values)) => {
                self.gpu_failures = 0;
                values
            }
            Some(Err(e)) => {
                self.gpu_failures += 1;
                let reason = format!("{:#}", e);
                tracing::warn!(
                    "GPU segmentation failed ({}/{}): {}",
                    self.gpu_failures,
                    GPU_FAILURE_LIMIT,
                    reason
                );
                if self.gpu_failures < GPU_FAILURE_LIMIT {
                    return Err(Error::ComputeBackendFailure {
                        backend: BackendKind::Gpu,
                        reason,
                    });
                }
                self.demote(format!(
                    "GPU failed {} times in a row: {}",
                    self.gpu_failures, reason
                ));
                self.run_cpu(frame)?
            }
            None => self.run_cpu(frame)?,
        };

        self.finish(frame, raw)
    }

    fn run_cpu(&mut self, frame: &Frame) -> Result<Vec<f32>> {
        match self.cpu.segment(frame) {
            Ok(values) => {
                self.cpu_failures = 0;
                Ok(values)
            }
            Err(e) => {
                self.cpu_failures += 1;
                tracing::warn!(
                    "CPU segmentation failed ({}/{}): {:#}",
                    self.cpu_failures,
                    CPU_FAILURE_LIMIT,
                    e
                );
                Err(Error::ComputeBackendFailure {
                    backend: BackendKind::Cpu,
                    reason: format!("{:#}", e),
                })
            }
        }
    }

    fn demote(&mut self, reason: String) {
        if !self.status.demote() {
            return;
        }
        tracing::warn!("Demoting mask engine to CPU: {}", reason);
        // release the GPU model for the rest of the session
        self.gpu = None;
        self.smoother.reset();
        self.cpu.reset_state();
        self.pending_demotion = Some(reason);
    }

    fn finish(&mut self, frame: &Frame, raw: Vec<f32>) -> Result<Mask> {
        if raw.len() != frame.pixel_count() {
            return Err(Error::mismatch(format!(
                "model returned {} mask values for a {}x{} frame",
                raw.len(),
                frame.width(),
                frame.height()
            )));
        }

        let refined = if self.settings.edge_smoothing {
            refine_edges(&raw, frame.width(), frame.height())
        } else {
            raw
        };

        let smoothed = if self.settings.temporal_smoothing {
            self.smoother.apply(frame.sequence(), refined)
        } else {
            refined
        };

        Mask::new(frame.width(), frame.height(), frame.sequence(), smoothed)
    }
}

impl Drop for MaskEngine {
    fn drop(&mut self) {
        tracing::debug!("Mask engine released ({} backend)", self.backend());
    }
}
