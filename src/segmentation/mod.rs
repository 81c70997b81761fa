mod onnx;
mod preprocess;
pub mod types;

pub use onnx::{ExecutionTarget, OnnxBackends, OnnxSegmenter, DEFAULT_INPUT_SIZE};
pub use preprocess::Preprocessor;
pub use types::{BackendProvider, Matte, SegmentationModel};

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::frame::Frame;

/// Treats the whole frame as foreground
///
/// Used when no model is configured, so the pipeline still runs end to end.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughModel;

impl SegmentationModel for PassthroughModel {
    fn segment(&mut self, frame: &Frame) -> Result<Matte> {
        Ok(vec![1.0; frame.pixel_count()])
    }

    fn input_size(&self) -> (u32, u32) {
        (0, 0)
    }
}

/// Backends for running without a model: CPU passthrough only
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughBackends;

impl BackendProvider for PassthroughBackends {
    fn gpu(&self) -> Result<Box<dyn SegmentationModel>> {
        bail!("passthrough mode has no GPU backend")
    }

    fn cpu(&self) -> Result<Box<dyn SegmentationModel>> {
        Ok(Box::new(PassthroughModel))
    }
}

/// Create the default backends: the ONNX model if a path is given, else passthrough
pub fn create_default_backends(
    model_path: Option<&Path>,
    input_size: (u32, u32),
) -> Arc<dyn BackendProvider> {
    match model_path {
        Some(path) => Arc::new(OnnxBackends {
            model_path: path.to_path_buf(),
            input_size,
        }),
        None => Arc::new(PassthroughBackends),
    }
}
