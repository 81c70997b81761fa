use super::{ensure_frame_matches, FrameSink, SinkFormat, SinkProvider};
use crate::error::{Error, Result};
use crate::frame::Frame;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use v4l::video::output::Parameters;
use v4l::video::Output;
use v4l::{Device, FourCC, Fraction};

/// Non-blocking writer for a v4l2loopback device
pub struct V4L2Output {
    file: File,
    path: PathBuf,
    format: SinkFormat,
    buffer: Vec<u8>,
}

impl V4L2Output {
    /// Open the loopback device and agree on a YUYV output format and frame rate
    ///
    /// The driver may adjust the requested size and frame interval; anything other
    /// than the exact requested size or rate makes the sink unavailable for this
    /// session.
    pub fn open<P: AsRef<Path>>(device_path: P, format: SinkFormat) -> Result<Self> {
        let path = device_path.as_ref();
        let (width, height) = format.dimensions();
        tracing::info!(
            "Opening v4l2loopback device at {} ({})",
            path.display(),
            format
        );

        if !path.exists() {
            return Err(Error::SinkUnavailable(format!(
                "{} not found; load v4l2loopback (modprobe v4l2loopback video_nr=10 exclusive_caps=1)",
                path.display()
            )));
        }

        let device = Device::with_path(path).map_err(|e| {
            Error::SinkUnavailable(format!("cannot open {}: {}", path.display(), e))
        })?;
        let requested = v4l::Format::new(width, height, FourCC::new(&format.pixel_format.fourcc()));
        let granted = Output::set_format(&device, &requested).map_err(|e| {
            Error::SinkUnavailable(format!("{} rejected {}: {}", path.display(), format, e))
        })?;
        if (granted.width, granted.height) != (width, height) {
            return Err(Error::SinkUnavailable(format!(
                "{} granted {}x{} instead of {}x{}",
                path.display(),
                granted.width,
                granted.height,
                width,
                height
            )));
        }

        let fps = format.fps.fps();
        let params = Output::set_params(&device, &Parameters::with_fps(fps)).map_err(|e| {
            Error::SinkUnavailable(format!("{} rejected {} fps: {}", path.display(), fps, e))
        })?;
        ensure_granted_fps(path, fps, params.interval)?;
        drop(device);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| {
                Error::SinkUnavailable(format!(
                    "cannot open {} for writing: {}",
                    path.display(),
                    e
                ))
            })?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            format,
            buffer: Vec::with_capacity(format.pixel_format.frame_size(width, height)),
        })
    }
}

/// Rounded frames per second of a time-per-frame interval
fn interval_fps(interval: Fraction) -> Option<u32> {
    if interval.numerator == 0 || interval.denominator == 0 {
        return None;
    }
    Some((interval.denominator as f64 / interval.numerator as f64).round() as u32)
}

fn ensure_granted_fps(path: &Path, requested: u32, granted: Fraction) -> Result<()> {
    match interval_fps(granted) {
        Some(fps) if fps == requested => Ok(()),
        _ => Err(Error::SinkUnavailable(format!(
            "{} granted a frame interval of {}/{} s instead of 1/{}",
            path.display(),
            granted.numerator,
            granted.denominator,
            requested
        ))),
    }
}

/// Convert a frame to packed YUYV (BT.601, studio range)
///
/// Each horizontal pixel pair shares the average of its chroma samples. An odd
/// last column is paired with itself.
pub fn rgb_to_yuyv(frame: &Frame, out: &mut Vec<u8>) {
    let (width, height) = frame.dimensions();
    let format = frame.format();
    out.clear();
    out.reserve(width as usize * height as usize * 2);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let pixel1 = format.to_rgb(frame.pixel(x, y));
            let pixel2 = if x + 1 < width {
                format.to_rgb(frame.pixel(x + 1, y))
            } else {
                pixel1
            };

            let (y1, u1, v1) = rgb_to_yuv(pixel1);
            let (y2, u2, v2) = rgb_to_yuv(pixel2);

            // YUYV format: Y0 U Y1 V
            out.push(y1);
            out.push(((u1 as u16 + u2 as u16 + 1) / 2) as u8);
            out.push(y2);
            out.push(((v1 as u16 + v2 as u16 + 1) / 2) as u8);
        }
    }
}

fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

impl FrameSink for V4L2Output {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let _span = tracing::debug_span!("sink_write", seq = frame.sequence()).entered();
        ensure_frame_matches(&self.format, frame)?;

        rgb_to_yuyv(frame, &mut self.buffer);

        match self.file.write(&self.buffer) {
            Ok(n) if n == self.buffer.len() => Ok(()),
            Ok(n) => {
                tracing::debug!("Short write to {} ({} of {} bytes)", self.path.display(), n, self.buffer.len());
                Err(Error::SinkBackpressure)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(Error::SinkBackpressure),
            Err(e) => Err(Error::SinkUnavailable(format!(
                "write to {} failed: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

impl Drop for V4L2Output {
    fn drop(&mut self) {
        tracing::debug!("v4l2loopback output {} closed", self.path.display());
    }
}

/// Opens `V4L2Output` on a fixed device path
#[derive(Debug, Clone)]
pub struct LoopbackProvider {
    path: PathBuf,
}

impl LoopbackProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SinkProvider for LoopbackProvider {
    fn open(&self, format: SinkFormat) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(V4L2Output::open(&self.path, format)?))
    }
}
