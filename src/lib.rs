//! Live background effects for a webcam, published as a virtual camera.
//!
//! Frames flow camera → [`mask::MaskEngine`] → [`compositor`] → v4l2loopback sink,
//! coordinated by a [`Pipeline`] that owns the threads and exposes the controls.

pub mod capture;
pub mod compositor;
pub mod effect;
pub mod error;
pub mod frame;
pub mod mask;
pub mod output;
pub mod pipeline;
pub mod segmentation;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;

pub use effect::{EffectConfig, EffectKind};
pub use error::{Error, Failure, Result, Stage};
pub use frame::{Frame, PixelFormat};
pub use pipeline::{
    Pipeline, PipelineEvent, PipelineOptions, PipelineParts, PipelineState, PipelineStats,
};
pub use settings::Settings;
