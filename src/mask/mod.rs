//! Foreground masks and the engine that computes them.

mod engine;
mod smoothing;

pub use engine::{
    BackendKind, BackendPreference, BackendStatus, MaskEngine, MaskSettings, CPU_FAILURE_LIMIT,
    GPU_FAILURE_LIMIT,
};
pub use smoothing::{refine_edges, TemporalSmoother, DEFAULT_SMOOTHING, MAX_SEQUENCE_GAP};

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::frame::{Frame, PixelFormat};

/// Per-pixel foreground probability aligned to a captured frame.
///
/// `sequence` is the frame the mask was computed from; `target` is the frame it is
/// applied to. They only differ for a mask explicitly reused through
/// [`Mask::reuse_for`].
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    sequence: u64,
    target: u64,
    values: Arc<[f32]>,
}

impl Mask {
    /// Builds a mask, clamping every value into [0, 1] (NaN becomes background).
    pub fn new(width: u32, height: u32, sequence: u64, mut values: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(Error::mismatch(format!(
                "mask {}x{} needs {} values, got {}",
                width,
                height,
                expected,
                values.len()
            )));
        }
        for v in values.iter_mut() {
            *v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        }
        Ok(Self {
            width,
            height,
            sequence,
            target: sequence,
            values: values.into(),
        })
    }

    /// A mask with the same value everywhere.
    pub fn filled(width: u32, height: u32, sequence: u64, value: f32) -> Self {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        Self {
            width,
            height,
            sequence,
            target: sequence,
            values: vec![value; width as usize * height as usize].into(),
        }
    }

    /// All-background mask for `frame`, used before any real mask exists.
    pub fn background_for(frame: &Frame) -> Self {
        Self::filled(frame.width(), frame.height(), frame.sequence(), 0.0)
    }

    /// Reuse this mask for a later frame (stale-mask fallback).
    pub fn reuse_for(&self, target: u64) -> Result<Self> {
        if target <= self.sequence {
            return Err(Error::mismatch(format!(
                "mask from frame {} cannot be reused for earlier frame {}",
                self.sequence, target
            )));
        }
        Ok(Self {
            target,
            ..self.clone()
        })
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

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn is_stale(&self) -> bool {
        self.target != self.sequence
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn value(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    /// Greyscale visualisation of the mask (white = foreground).
    pub fn to_frame(&self, format: PixelFormat) -> Result<Frame> {
        let data: Vec<u8> = self
            .values
            .iter()
            .flat_map(|&v| {
                let g = (v * 255.0).round().clamp(0.0, 255.0) as u8;
                [g, g, g]
            })
            .collect();
        Frame::new(self.width, self.height, format, self.target, data)
    }
}
