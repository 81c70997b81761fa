mod loopback;

pub use loopback::{rgb_to_yuyv, LoopbackProvider, V4L2Output};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::Frame;

/// Output resolutions a virtual camera session can be opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "480p")]
    R480p,
    #[default]
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "1080p")]
    R1080p,
    #[serde(rename = "4k")]
    R4k,
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::R480p,
        Resolution::R720p,
        Resolution::R1080p,
        Resolution::R4k,
    ];

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::R480p => (640, 480),
            Resolution::R720p => (1280, 720),
            Resolution::R1080p => (1920, 1080),
            Resolution::R4k => (3840, 2160),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Resolution::R480p => "480p",
            Resolution::R720p => "720p",
            Resolution::R1080p => "1080p",
            Resolution::R4k => "4k",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|r| r.name() == lower)
            .ok_or_else(|| format!("unknown resolution '{}' (480p, 720p, 1080p, 4k)", s))
    }
}

/// Output frame rate, one of 15, 24, 30 or 60
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct FrameRate(u32);

impl FrameRate {
    pub const SUPPORTED: [u32; 4] = [15, 24, 30, 60];

    pub fn new(fps: u32) -> Result<Self> {
        if Self::SUPPORTED.contains(&fps) {
            Ok(Self(fps))
        } else {
            Err(Error::mismatch(format!(
                "{} fps is not supported (15, 24, 30, 60)",
                fps
            )))
        }
    }

    pub fn fps(self) -> u32 {
        self.0
    }

    /// Time budget of one output frame
    pub fn interval(self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.0 as f64)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self(30)
    }
}

impl TryFrom<u32> for FrameRate {
    type Error = String;

    fn try_from(fps: u32) -> std::result::Result<Self, Self::Error> {
        Self::new(fps).map_err(|e| e.to_string())
    }
}

impl From<FrameRate> for u32 {
    fn from(rate: FrameRate) -> u32 {
        rate.0
    }
}

/// Wire format written to the virtual camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkPixelFormat {
    /// Packed 4:2:2, Y0 U Y1 V
    #[default]
    Yuyv,
}

impl SinkPixelFormat {
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            SinkPixelFormat::Yuyv => *b"YUYV",
        }
    }

    /// Bytes of one frame in this format
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        match self {
            SinkPixelFormat::Yuyv => width as usize * height as usize * 2,
        }
    }
}

/// Format agreed with the sink at open; fixed for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkFormat {
    pub resolution: Resolution,
    pub fps: FrameRate,
    pub pixel_format: SinkPixelFormat,
}

impl SinkFormat {
    pub fn new(resolution: Resolution, fps: FrameRate) -> Self {
        Self {
            resolution,
            fps,
            pixel_format: SinkPixelFormat::Yuyv,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.resolution.dimensions()
    }
}

impl fmt::Display for SinkFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{}x{}@{}", w, h, self.fps.fps())
    }
}

/// Destination for composited frames
pub trait FrameSink: Send {
    /// Format agreed at open
    fn format(&self) -> SinkFormat;

    /// Write one frame without blocking
    ///
    /// `SinkBackpressure` means the consumer is behind and the frame was not
    /// written. A frame whose size differs from the agreed format is a
    /// `ConfigurationMismatch`.
    fn write(&mut self, frame: &Frame) -> Result<()>;
}

/// Opens sinks for a session
pub trait SinkProvider: Send + Sync {
    fn open(&self, format: SinkFormat) -> Result<Box<dyn FrameSink>>;
}

/// Check a frame against the agreed sink size
pub fn ensure_frame_matches(format: &SinkFormat, frame: &Frame) -> Result<()> {
    if frame.dimensions() != format.dimensions() {
        let (w, h) = format.dimensions();
        return Err(Error::mismatch(format!(
            "frame {}x{} written to {}x{} sink",
            frame.width(),
            frame.height(),
            w,
            h
        )));
    }
    Ok(())
}
