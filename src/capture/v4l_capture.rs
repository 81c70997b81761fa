use super::{CameraProvider, CaptureFormat, CaptureRequest, DeviceInfo, FrameSource};
use crate::error::{Error, Result};
use crate::frame::{Frame, PixelFormat};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;

/// Consecutive failed reads after which the device counts as lost
const LOST_AFTER_FAILURES: u32 = 5;

/// Opens webcams through nokhwa
#[derive(Debug, Default, Clone, Copy)]
pub struct WebcamProvider;

impl CameraProvider for WebcamProvider {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let devices = nokhwa::query(ApiBackend::Auto).map_err(|e| Error::DeviceUnavailable {
            device: 0,
            reason: format!("enumeration failed: {}", e),
        })?;

        Ok(devices
            .into_iter()
            .enumerate()
            .map(|(n, d)| DeviceInfo {
                id: d.index().as_index().unwrap_or(n as u32),
                name: d.human_name().to_string(),
            })
            .collect())
    }

    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(WebcamCapture::open(request)?))
    }
}

pub struct WebcamCapture {
    camera: Camera,
    format: CaptureFormat,
    failures: u32,
}

impl WebcamCapture {
    pub fn open(request: &CaptureRequest) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}@{}",
            request.device,
            request.width,
            request.height,
            request.fps
        );

        let unavailable = |reason: String| Error::DeviceUnavailable {
            device: request.device,
            reason,
        };

        let index = CameraIndex::Index(request.device);
        let wanted = CameraFormat::new(
            Resolution::new(request.width, request.height),
            FrameFormat::MJPEG,
            request.fps,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let mut camera =
            Camera::new(index, requested).map_err(|e| unavailable(format!("open failed: {}", e)))?;

        camera
            .open_stream()
            .map_err(|e| unavailable(format!("stream failed: {}", e)))?;

        let resolution = camera.resolution();
        let format = CaptureFormat {
            device: request.device,
            width: resolution.width(),
            height: resolution.height(),
            fps: camera.frame_rate(),
        };

        tracing::info!(
            "Webcam {} granted {}x{}@{}",
            format.device,
            format.width,
            format.height,
            format.fps
        );

        Ok(Self {
            camera,
            format,
            failures: 0,
        })
    }

    fn read_failed(&mut self, reason: String) -> Error {
        self.failures += 1;
        if self.failures >= LOST_AFTER_FAILURES {
            Error::DeviceLost {
                device: self.format.device,
                reason,
            }
        } else {
            tracing::debug!("Webcam read failed ({}): {}", self.failures, reason);
            Error::CaptureTimeout(std::time::Duration::from_secs(1) / self.format.fps.max(1))
        }
    }
}

impl FrameSource for WebcamCapture {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn next_frame(&mut self, sequence: u64) -> Result<Frame> {
        let buffer = match self.camera.frame() {
            Ok(buffer) => buffer,
            Err(e) => return Err(self.read_failed(format!("capture failed: {}", e))),
        };

        let decoded = match buffer.decode_image::<RgbFormat>() {
            Ok(decoded) => decoded,
            Err(e) => return Err(self.read_failed(format!("decode failed: {}", e))),
        };
        self.failures = 0;

        let (width, height) = (decoded.width(), decoded.height());
        Frame::new(width, height, PixelFormat::Rgb, sequence, decoded.into_raw())
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::debug!("Webcam {} stop failed: {}", self.format.device, e);
        }
        tracing::debug!("Webcam {} released", self.format.device);
    }
}
