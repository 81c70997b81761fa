use super::preprocess::Preprocessor;
use super::types::{BackendProvider, Matte, SegmentationModel};
use crate::frame::Frame;
use anyhow::{bail, Context, Result};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};

/// Default model input size (MediaPipe-style 16:9 selfie segmentation)
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (512, 288);

/// Where ONNX Runtime executes the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionTarget {
    Cuda,
    Cpu,
}

/// Single-input person segmentation model run through ONNX Runtime
///
/// Expects an NCHW [1, 3, H, W] input in [0, 1] and produces the alpha matte as its
/// first output, either [1, 1, h, w] or [1, h, w, 1].
pub struct OnnxSegmenter {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,
}

impl OnnxSegmenter {
    /// Create a segmenter from an ONNX file
    ///
    /// For `ExecutionTarget::Cuda` the CUDA execution provider must register, so a
    /// machine without a usable GPU fails here instead of silently running on CPU.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        target: ExecutionTarget,
        input_size: (u32, u32),
    ) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading segmentation model from {} ({:?})", path.display(), target);

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        if target == ExecutionTarget::Cuda {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .build()
                    .error_on_failure()])
                .context("CUDA execution provider unavailable")?;
        }

        let session = builder
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("Segmentation model loaded successfully");

        let (width, height) = input_size;
        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height),
            width,
            height,
        })
    }
}

impl SegmentationModel for OnnxSegmenter {
    fn segment(&mut self, frame: &Frame) -> Result<Matte> {
        let _span = tracing::debug_span!("onnx_segment").entered();

        let input = self.preprocessor.preprocess(frame)?;
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let input = Tensor::from_array((shape, input.into_raw_vec()))?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![input])
            .context("Failed to run inference")?;
        drop(_infer_span);

        let (_, alpha) = outputs
            .iter()
            .next()
            .context("Model produced no output")?;
        let (shape, data) = alpha.try_extract_tensor::<f32>()?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        let (matte_width, matte_height) = matte_dimensions(&dims)?;

        Preprocessor::postprocess_matte(
            data,
            matte_width,
            matte_height,
            frame.width(),
            frame.height(),
        )
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Spatial size of an alpha output in NCHW or NHWC layout
fn matte_dimensions(dims: &[i64]) -> Result<(u32, u32)> {
    match dims {
        [1, 1, h, w] | [1, h, w, 1] if *h > 0 && *w > 0 => Ok((*w as u32, *h as u32)),
        [1, h, w] if *h > 0 && *w > 0 => Ok((*w as u32, *h as u32)),
        other => bail!("unexpected matte shape {:?}", other),
    }
}

/// Loads the same ONNX file for both compute backends
#[derive(Debug, Clone)]
pub struct OnnxBackends {
    pub model_path: PathBuf,
    pub input_size: (u32, u32),
}

impl OnnxBackends {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

impl BackendProvider for OnnxBackends {
    fn gpu(&self) -> Result<Box<dyn SegmentationModel>> {
        let model = OnnxSegmenter::load(&self.model_path, ExecutionTarget::Cuda, self.input_size)?;
        Ok(Box::new(model))
    }

    fn cpu(&self) -> Result<Box<dyn SegmentationModel>> {
        let model = OnnxSegmenter::load(&self.model_path, ExecutionTarget::Cpu, self.input_size)?;
        Ok(Box::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matte_layouts() {
        assert_eq!(matte_dimensions(&[1, 1, 288, 512]).unwrap(), (512, 288));
        assert_eq!(matte_dimensions(&[1, 256, 256, 1]).unwrap(), (256, 256));
        assert_eq!(matte_dimensions(&[1, 144, 256]).unwrap(), (256, 144));
        assert!(matte_dimensions(&[1, 3, 288, 512]).is_err());
        assert!(matte_dimensions(&[1, 1, -1, 512]).is_err());
    }
}
