//! Scripted devices for exercising the pipeline without hardware.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::bail;
use parking_lot::Mutex;

use crate::capture::{CameraProvider, CaptureFormat, CaptureRequest, DeviceInfo, FrameSource};
use crate::error::{Error, Result};
use crate::frame::{Frame, PixelFormat};
use crate::output::{ensure_frame_matches, FrameSink, SinkFormat, SinkProvider};
use crate::segmentation::{BackendProvider, Matte, SegmentationModel};

/// Camera provider with scripted devices and open failures
#[derive(Clone)]
pub(crate) struct ScriptedCamera {
    width: u32,
    height: u32,
    devices: Vec<u32>,
    sizes: HashMap<u32, (u32, u32)>,
    always_fail: HashSet<u32>,
    fail_first: Arc<Mutex<HashMap<u32, u32>>>,
    attempts: Arc<Mutex<Vec<u32>>>,
    interval: Duration,
    lost_after: Option<u64>,
}

impl ScriptedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            devices: vec![0],
            sizes: HashMap::new(),
            always_fail: HashSet::new(),
            fail_first: Arc::default(),
            attempts: Arc::default(),
            interval: Duration::from_millis(1),
            lost_after: None,
        }
    }

    pub fn with_devices(mut self, ids: &[u32]) -> Self {
        self.devices = ids.to_vec();
        self
    }

    /// Size a specific device grants instead of the default
    pub fn device_size(mut self, id: u32, width: u32, height: u32) -> Self {
        self.sizes.insert(id, (width, height));
        self
    }

    pub fn failing_device(mut self, id: u32) -> Self {
        self.always_fail.insert(id);
        self
    }

    /// Fail the first `count` opens of `id`
    pub fn failing_opens(self, id: u32, count: u32) -> Self {
        self.fail_first.lock().insert(id, count);
        self
    }

    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Report the device lost after this many frames
    pub fn lost_after(mut self, frames: u64) -> Self {
        self.lost_after = Some(frames);
        self
    }

    pub fn open_attempts(&self) -> Vec<u32> {
        self.attempts.lock().clone()
    }
}

impl CameraProvider for ScriptedCamera {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .devices
            .iter()
            .map(|&id| DeviceInfo {
                id,
                name: format!("Scripted camera {}", id),
            })
            .collect())
    }

    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn FrameSource>> {
        let id = request.device;
        self.attempts.lock().push(id);

        let unavailable = |reason: &str| Error::DeviceUnavailable {
            device: id,
            reason: reason.into(),
        };
        if self.always_fail.contains(&id) || !self.devices.contains(&id) {
            return Err(unavailable("scripted failure"));
        }
        if let Some(remaining) = self.fail_first.lock().get_mut(&id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(unavailable("scripted transient failure"));
            }
        }

        let (width, height) = self.sizes.get(&id).copied().unwrap_or((self.width, self.height));
        Ok(Box::new(ScriptedSource {
            format: CaptureFormat {
                device: id,
                width,
                height,
                fps: request.fps,
            },
            interval: self.interval,
            lost_after: self.lost_after,
            served: 0,
        }))
    }
}

struct ScriptedSource {
    format: CaptureFormat,
    interval: Duration,
    lost_after: Option<u64>,
    served: u64,
}

impl FrameSource for ScriptedSource {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn next_frame(&mut self, sequence: u64) -> Result<Frame> {
        thread::sleep(self.interval);
        if self.lost_after.is_some_and(|n| self.served >= n) {
            return Err(Error::DeviceLost {
                device: self.format.device,
                reason: "scripted unplug".into(),
            });
        }
        self.served += 1;
        let shade = (self.format.device as u8).wrapping_mul(40).wrapping_add(60);
        Frame::solid(
            self.format.width,
            self.format.height,
            PixelFormat::Rgb,
            sequence,
            [shade, 120, 200],
        )
    }
}

#[derive(Default)]
struct SinkLog {
    opens: AtomicUsize,
    attempts: AtomicUsize,
    first_success: Mutex<Option<usize>>,
    written: Mutex<Vec<Frame>>,
}

/// Sink provider that records what reaches the virtual camera
#[derive(Clone, Default)]
pub(crate) struct RecordingSinks {
    log: Arc<SinkLog>,
    backpressure: usize,
    unavailable: bool,
}

impl RecordingSinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the first `writes` writes with backpressure
    pub fn with_backpressure(mut self, writes: usize) -> Self {
        self.backpressure = writes;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn opens(&self) -> usize {
        self.log.opens.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.log.attempts.load(Ordering::SeqCst)
    }

    /// 1-based index of the first write that went through
    pub fn first_success_attempt(&self) -> Option<usize> {
        *self.log.first_success.lock()
    }

    /// Sequence numbers of written frames
    pub fn written(&self) -> Vec<u64> {
        self.log.written.lock().iter().map(Frame::sequence).collect()
    }

    pub fn written_frames(&self) -> Vec<Frame> {
        self.log.written.lock().clone()
    }
}

impl SinkProvider for RecordingSinks {
    fn open(&self, format: SinkFormat) -> Result<Box<dyn FrameSink>> {
        if self.unavailable {
            return Err(Error::SinkUnavailable("scripted missing device".into()));
        }
        self.log.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingSink {
            log: self.log.clone(),
            format,
            backpressure: self.backpressure,
        }))
    }
}

struct RecordingSink {
    log: Arc<SinkLog>,
    format: SinkFormat,
    backpressure: usize,
}

impl FrameSink for RecordingSink {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let attempt = self.log.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.backpressure {
            return Err(Error::SinkBackpressure);
        }
        ensure_frame_matches(&self.format, frame)?;
        self.log.first_success.lock().get_or_insert(attempt);
        self.log.written.lock().push(frame.clone());
        Ok(())
    }
}

/// Segmentation model with scripted output, failures and latency
///
/// Clones share the call counter, so a test can keep a handle on a model it gave
/// to a backend provider.
#[derive(Clone)]
pub(crate) struct ScriptedModel {
    values: Vec<f32>,
    cycle: bool,
    fail_always: bool,
    fail_calls: Vec<usize>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedModel {
    fn with_values(values: Vec<f32>) -> Self {
        Self {
            values,
            cycle: false,
            fail_always: false,
            fail_calls: Vec::new(),
            delay: Duration::ZERO,
            calls: Arc::default(),
        }
    }

    pub fn constant(value: f32) -> Self {
        Self::with_values(vec![value])
    }

    /// One value per call; the last one repeats
    pub fn sequence(values: &[f32]) -> Self {
        Self::with_values(values.to_vec())
    }

    /// One value per call, starting over after the last
    pub fn cycling(values: &[f32]) -> Self {
        Self {
            cycle: true,
            ..Self::with_values(values.to_vec())
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_always: true,
            ..Self::constant(0.0)
        }
    }

    /// Fail on these 1-based call numbers
    pub fn fail_calls(mut self, calls: &[usize]) -> Self {
        self.fail_calls = calls.to_vec();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SegmentationModel for ScriptedModel {
    fn segment(&mut self, frame: &Frame) -> anyhow::Result<Matte> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.fail_always || self.fail_calls.contains(&call) {
            bail!("scripted inference failure on call {}", call);
        }
        let index = if self.cycle && !self.values.is_empty() {
            (call - 1) % self.values.len()
        } else {
            call - 1
        };
        let value = self
            .values
            .get(index)
            .or(self.values.last())
            .copied()
            .unwrap_or(0.0);
        Ok(vec![value; frame.pixel_count()])
    }

    fn input_size(&self) -> (u32, u32) {
        (0, 0)
    }
}

/// Backend provider handing out scripted models
#[derive(Clone)]
pub(crate) struct ScriptedBackends {
    gpu: ScriptedModel,
    cpu: ScriptedModel,
    gpu_loadable: bool,
    cpu_loadable: bool,
    gpu_loads: Arc<AtomicUsize>,
}

impl ScriptedBackends {
    pub fn new(gpu: ScriptedModel, cpu: ScriptedModel) -> Self {
        Self {
            gpu,
            cpu,
            gpu_loadable: true,
            cpu_loadable: true,
            gpu_loads: Arc::default(),
        }
    }

    pub fn without_gpu(mut self) -> Self {
        self.gpu_loadable = false;
        self
    }

    pub fn without_cpu(mut self) -> Self {
        self.cpu_loadable = false;
        self
    }

    pub fn gpu_loads(&self) -> usize {
        self.gpu_loads.load(Ordering::SeqCst)
    }
}

impl BackendProvider for ScriptedBackends {
    fn gpu(&self) -> anyhow::Result<Box<dyn SegmentationModel>> {
        self.gpu_loads.fetch_add(1, Ordering::SeqCst);
        if !self.gpu_loadable {
            bail!("no CUDA device");
        }
        Ok(Box::new(self.gpu.clone()))
    }

    fn cpu(&self) -> anyhow::Result<Box<dyn SegmentationModel>> {
        if !self.cpu_loadable {
            bail!("model file unreadable");
        }
        Ok(Box::new(self.cpu.clone()))
    }
}
