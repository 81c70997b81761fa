//! Persisted configuration, stored as JSON in the user's config directory.
//!
//! Every field has a default, so a partial file only overrides what it names.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::CaptureRequest;
use crate::effect::{ChromaKey, EffectConfig, EffectKind, DEFAULT_INTENSITY};
use crate::mask::{BackendPreference, MaskSettings, DEFAULT_SMOOTHING};
use crate::output::{FrameRate, Resolution, SinkFormat};
use crate::pipeline::{PipelineOptions, DEFAULT_CAPTURE_TIMEOUT, DEFAULT_MASK_DEADLINE};
use crate::segmentation::DEFAULT_INPUT_SIZE;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("no config directory on this system")]
    NoConfigDir,

    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot load background image {path}: {source}")]
    Background {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub device: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        let (width, height) = Resolution::default().dimensions();
        Self {
            device: 0,
            width,
            height,
            fps: FrameRate::default().fps(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// v4l2loopback device node
    pub device: PathBuf,
    pub resolution: Resolution,
    pub fps: FrameRate,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video10"),
            resolution: Resolution::default(),
            fps: FrameRate::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    pub kind: EffectKind,
    pub intensity: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<PathBuf>,
    pub chroma_key: ChromaKey,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            kind: EffectKind::default(),
            intensity: DEFAULT_INTENSITY,
            background: None,
            chroma_key: ChromaKey::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// ONNX model; without one every pixel counts as foreground
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<PathBuf>,
    pub backend: BackendPreference,
    pub model_width: u32,
    pub model_height: u32,
    pub temporal_smoothing: bool,
    pub smoothing: f32,
    pub edge_smoothing: bool,
    pub deadline_ms: u64,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        let (model_width, model_height) = DEFAULT_INPUT_SIZE;
        Self {
            model: None,
            backend: BackendPreference::Auto,
            model_width,
            model_height,
            temporal_smoothing: true,
            smoothing: DEFAULT_SMOOTHING,
            edge_smoothing: true,
            deadline_ms: DEFAULT_MASK_DEADLINE.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub camera: CameraSettings,
    pub output: OutputSettings,
    pub effect: EffectSettings,
    pub segmentation: SegmentationSettings,
}

impl Settings {
    /// `<config dir>/streamblur/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("streamblur");
            p.push("config.json");
            p
        })
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, else the default file if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SettingsError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading settings from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io_error = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_error)
    }

    /// Initial effect, with the background image decoded
    pub fn effect_config(&self) -> Result<EffectConfig, SettingsError> {
        let mut config = EffectConfig::new(self.effect.kind, self.effect.intensity)
            .with_chroma_key(self.effect.chroma_key);
        if let Some(path) = &self.effect.background {
            let image = image::open(path).map_err(|source| SettingsError::Background {
                path: path.clone(),
                source,
            })?;
            config = config.with_replacement(image.to_rgb8());
        }
        Ok(config)
    }

    pub fn mask_settings(&self) -> MaskSettings {
        MaskSettings {
            temporal_smoothing: self.segmentation.temporal_smoothing,
            smoothing: self.segmentation.smoothing,
            edge_smoothing: self.segmentation.edge_smoothing,
        }
    }

    pub fn sink_format(&self) -> SinkFormat {
        SinkFormat::new(self.output.resolution, self.output.fps)
    }

    pub fn capture_request(&self) -> CaptureRequest {
        CaptureRequest {
            device: self.camera.device,
            width: self.camera.width,
            height: self.camera.height,
            fps: self.camera.fps,
        }
    }

    pub fn model_input_size(&self) -> (u32, u32) {
        (self.segmentation.model_width, self.segmentation.model_height)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            capture: self.capture_request(),
            sink: self.sink_format(),
            backend: self.segmentation.backend,
            mask: self.mask_settings(),
            mask_deadline: Duration::from_millis(self.segmentation.deadline_ms.max(1)),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            show_matte: false,
        }
    }
}
