use std::fmt;
use std::time::Duration;

use crate::mask::BackendKind;

/// Errors raised by the frame pipeline.
///
/// Context is carried as strings so a failure can be stored for `Pipeline::failure`
/// and broadcast to subscribers at the same time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("camera {device} unavailable: {reason}")]
    DeviceUnavailable { device: u32, reason: String },

    #[error("camera {device} lost: {reason}")]
    DeviceLost { device: u32, reason: String },

    #[error("no frame captured within {0:?}")]
    CaptureTimeout(Duration),

    #[error("virtual camera sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("virtual camera sink cannot accept frames fast enough")]
    SinkBackpressure,

    #[error("{backend} compute backend failed: {reason}")]
    ComputeBackendFailure { backend: BackendKind, reason: String },

    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(String),
}

impl Error {
    pub fn mismatch(reason: impl Into<String>) -> Self {
        Error::ConfigurationMismatch(reason.into())
    }

    /// Per-frame conditions that are absorbed by dropping the frame or reusing a mask.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::CaptureTimeout(_) | Error::SinkBackpressure)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Capture,
    MaskEngine,
    Compositor,
    Sink,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Capture => "capture",
            Stage::MaskEngine => "mask engine",
            Stage::Compositor => "compositor",
            Stage::Sink => "sink",
        };
        f.write_str(name)
    }
}

/// A resource-level failure, reported once when the pipeline enters `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub stage: Stage,
    pub error: Error,
}

impl Failure {
    pub fn new(stage: Stage, error: Error) -> Self {
        Self { stage, error }
    }

    /// Short hint for the user interface.
    pub fn remediation(&self) -> &'static str {
        match &self.error {
            Error::DeviceUnavailable { .. } | Error::DeviceLost { .. } => {
                "switch camera or check that no other application holds it"
            }
            Error::CaptureTimeout(_) => "camera stopped delivering frames, switch camera",
            Error::SinkUnavailable(_) | Error::SinkBackpressure => {
                "check that the v4l2loopback device exists and is writable"
            }
            Error::ComputeBackendFailure { backend: BackendKind::Gpu, .. } => {
                "GPU unavailable, using CPU"
            }
            Error::ComputeBackendFailure { .. } => {
                "segmentation model failed on CPU, check the model file"
            }
            Error::ConfigurationMismatch(_) => {
                "capture and virtual camera formats disagree, pick matching resolutions"
            }
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::SinkBackpressure.is_transient());
        assert!(Error::CaptureTimeout(Duration::from_millis(5)).is_transient());
        assert!(!Error::SinkUnavailable("gone".into()).is_transient());
        assert!(!Error::mismatch("720p vs 1080p").is_transient());
    }

    #[test]
    fn test_failure_mentions_stage_and_resource() {
        let failure = Failure::new(
            Stage::Capture,
            Error::DeviceUnavailable {
                device: 2,
                reason: "busy".into(),
            },
        );
        let text = failure.to_string();
        assert!(text.contains("capture"));
        assert!(text.contains("camera 2"));
        assert!(failure.remediation().contains("switch camera"));
    }
}
