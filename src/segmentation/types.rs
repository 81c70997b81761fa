use anyhow::Result;

use crate::frame::Frame;

/// Per-pixel person probability, row-major at the frame's resolution
pub type Matte = Vec<f32>;

/// A person segmentation model bound to one compute backend
///
/// The engine treats it as an opaque function from frame to matte.
pub trait SegmentationModel: Send {
    /// Compute the matte for `frame`; values outside [0, 1] are clamped by the caller
    fn segment(&mut self, frame: &Frame) -> Result<Matte>;

    /// Drop recurrent state, called after a backend demotion
    fn reset_state(&mut self) {}

    /// (width, height) the model resizes frames to, (0, 0) if it takes any size
    fn input_size(&self) -> (u32, u32);
}

/// Loads the model for each compute backend
pub trait BackendProvider: Send + Sync {
    /// GPU model; an error means no usable GPU
    fn gpu(&self) -> Result<Box<dyn SegmentationModel>>;

    fn cpu(&self) -> Result<Box<dyn SegmentationModel>>;
}
