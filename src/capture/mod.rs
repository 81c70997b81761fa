mod slot;
mod v4l_capture;

pub use slot::{LatestSlot, Take};
pub use v4l_capture::{WebcamCapture, WebcamProvider};

use crate::error::{Error, Result};
use crate::frame::Frame;

/// Information about a camera device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: u32,
    pub name: String,
}

/// What the caller asks the camera for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub device: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// What the camera actually granted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub device: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureFormat {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// An open camera stream
pub trait FrameSource {
    /// Format negotiated when the device was opened
    fn format(&self) -> CaptureFormat;

    /// Capture the next frame, stamping it with `sequence`
    ///
    /// Returns `CaptureTimeout` for a transient miss and `DeviceLost` once the
    /// device is gone for good.
    fn next_frame(&mut self, sequence: u64) -> Result<Frame>;
}

/// Enumerates and opens cameras
///
/// Sources are opened on the capture thread, so only the provider has to be `Send`.
pub trait CameraProvider: Send + Sync {
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn FrameSource>>;
}

/// Open the requested camera, falling back to another enumerated device
///
/// The secondary device gets one retry. When everything fails the primary's error
/// is returned.
pub fn open_with_fallback(
    provider: &dyn CameraProvider,
    request: &CaptureRequest,
) -> Result<Box<dyn FrameSource>> {
    let primary_err = match provider.open(request) {
        Ok(source) => return Ok(source),
        Err(e) => e,
    };
    tracing::warn!("Camera {} failed to open: {}", request.device, primary_err);

    let secondary = match provider.devices() {
        Ok(devices) => devices.into_iter().find(|d| d.id != request.device),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {}", e);
            None
        }
    };
    let Some(secondary) = secondary else {
        return Err(primary_err);
    };

    let fallback = CaptureRequest {
        device: secondary.id,
        ..*request
    };
    for attempt in 1..=2 {
        tracing::info!(
            "Trying secondary camera {} ({}), attempt {}",
            secondary.id,
            secondary.name,
            attempt
        );
        match provider.open(&fallback) {
            Ok(source) => return Ok(source),
            Err(e) => tracing::warn!("Secondary camera {} failed: {}", secondary.id, e),
        }
    }

    Err(primary_err)
}

/// Check that a granted capture format can feed a sink of the given size
pub fn ensure_dimensions(granted: &CaptureFormat, sink: (u32, u32)) -> Result<()> {
    if granted.dimensions() != sink {
        return Err(Error::mismatch(format!(
            "camera {} delivers {}x{} but the virtual camera was opened at {}x{}",
            granted.device, granted.width, granted.height, sink.0, sink.1
        )));
    }
    Ok(())
}
