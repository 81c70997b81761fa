//! Captured video frames.

use std::sync::Arc;

use image::RgbImage;

use crate::error::{Error, Result};

/// Channel order of an 8-bit, three channel frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    #[default]
    Rgb,
    Bgr,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: usize = 3;

    /// Reorders an RGB triple into this format.
    pub fn from_rgb(self, rgb: [u8; 3]) -> [u8; 3] {
        match self {
            PixelFormat::Rgb => rgb,
            PixelFormat::Bgr => [rgb[2], rgb[1], rgb[0]],
        }
    }

    /// Reorders a pixel in this format into an RGB triple.
    pub fn to_rgb(self, px: [u8; 3]) -> [u8; 3] {
        // the swap is its own inverse
        self.from_rgb(px)
    }
}

/// An immutable video frame.
///
/// Pixel data sits behind an `Arc`, so handing a frame to the next stage moves a
/// pointer and no stage can mutate what another one sees.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    sequence: u64,
    data: Arc<[u8]>,
}

impl Frame {
    /// Wraps packed pixel data; the buffer must hold exactly `width * height * 3` bytes.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * PixelFormat::BYTES_PER_PIXEL;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(Error::mismatch(format!(
                "frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            sequence,
            data: data.into(),
        })
    }

    /// A frame filled with one RGB colour.
    pub fn solid(
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
        rgb: [u8; 3],
    ) -> Result<Self> {
        let px = format.from_rgb(rgb);
        let data: Vec<u8> = px
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * PixelFormat::BYTES_PER_PIXEL)
            .collect();
        Self::new(width, height, format, sequence, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Pixel at (x, y) in the frame's own channel order.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Copy of the frame as an RGB image, swapping channels for BGR frames.
    pub fn to_rgb_image(&self) -> RgbImage {
        let data = match self.format {
            PixelFormat::Rgb => self.data.to_vec(),
            PixelFormat::Bgr => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };
        // length was validated on construction
        RgbImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_buffer() {
        let err = Frame::new(4, 4, PixelFormat::Rgb, 0, vec![0; 10]).unwrap_err();
        assert!(matches!(err, Error::ConfigurationMismatch(_)));
    }

    #[test]
    fn test_bgr_to_rgb_image() {
        let frame = Frame::new(1, 1, PixelFormat::Bgr, 3, vec![10, 20, 30]).unwrap();
        let image = frame.to_rgb_image();
        assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn test_solid_respects_channel_order() {
        let frame = Frame::solid(2, 1, PixelFormat::Bgr, 0, [255, 0, 0]).unwrap();
        assert_eq!(frame.pixel(1, 0), [0, 0, 255]);
        assert_eq!(frame.format().to_rgb(frame.pixel(1, 0)), [255, 0, 0]);
    }

    #[test]
    fn test_zero_sized_frames_rejected() {
        assert!(Frame::solid(0, 4, PixelFormat::Rgb, 0, [1, 2, 3]).is_err());
        assert!(Frame::solid(4, 0, PixelFormat::Rgb, 0, [1, 2, 3]).is_err());
        assert!(Frame::new(0, 0, PixelFormat::Rgb, 0, Vec::new()).is_err());
    }
}
