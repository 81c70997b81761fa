use anyhow::{ensure, Result};
use image::imageops;
use ndarray::Array4;

use crate::frame::Frame;

/// Preprocessor for converting frames to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess a frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Convert to RGB and resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, frame: &Frame) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let image = frame.to_rgb_image();
        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                &image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image
        };

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }

        Ok(tensor)
    }

    /// Postprocess model output matte back to frame dimensions
    ///
    /// Returns: Resized matte flattened in row-major order
    pub fn postprocess_matte(
        matte: &[f32],
        matte_width: u32,
        matte_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Vec<f32>> {
        let _span = tracing::debug_span!("postprocess").entered();

        ensure!(
            matte.len() == (matte_width * matte_height) as usize,
            "matte holds {} values, expected {}x{}",
            matte.len(),
            matte_width,
            matte_height
        );

        if matte_width == target_width && matte_height == target_height {
            return Ok(matte.iter().map(|v| v.clamp(0.0, 1.0)).collect());
        }

        // Go through an f32 luma image so resizing keeps full precision
        let gray = image::ImageBuffer::<image::Luma<f32>, Vec<f32>>::from_raw(
            matte_width,
            matte_height,
            matte.to_vec(),
        )
        .ok_or_else(|| anyhow::anyhow!("matte buffer does not match its dimensions"))?;

        let resized = imageops::resize(
            &gray,
            target_width,
            target_height,
            imageops::FilterType::Triangle,
        );

        Ok(resized.into_raw().into_iter().map(|v| v.clamp(0.0, 1.0)).collect())
    }
}
