use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::RgbImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::compositor::fit_cover;

pub const MIN_INTENSITY: u8 = 1;
pub const MAX_INTENSITY: u8 = 50;
pub const DEFAULT_INTENSITY: u8 = 20;

/// Background treatment applied outside the foreground mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectKind {
    #[default]
    GaussianBlur,
    BokehBlur,
    BackgroundReplace,
    ChromaKey,
}

impl EffectKind {
    pub const ALL: [EffectKind; 4] = [
        EffectKind::GaussianBlur,
        EffectKind::BokehBlur,
        EffectKind::BackgroundReplace,
        EffectKind::ChromaKey,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EffectKind::GaussianBlur => "gaussian-blur",
            EffectKind::BokehBlur => "bokeh-blur",
            EffectKind::BackgroundReplace => "background-replace",
            EffectKind::ChromaKey => "chroma-key",
        }
    }

    /// The following kind, wrapping around
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|k| *k == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown effect '{}'", s))
    }
}

/// Key colour and tolerance for chroma keying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromaKey {
    /// RGB
    pub color: [u8; 3],
    /// Euclidean RGB distance still treated as key colour
    pub tolerance: u8,
}

impl Default for ChromaKey {
    fn default() -> Self {
        Self {
            color: [0, 177, 64],
            tolerance: 60,
        }
    }
}

/// Immutable snapshot of the effect parameters
///
/// Built once and swapped whole through `EffectHandle`, so the compositor never
/// sees a half-updated configuration.
#[derive(Debug, Clone)]
pub struct EffectConfig {
    kind: EffectKind,
    intensity: u8,
    replacement: Option<Arc<RgbImage>>,
    chroma: ChromaKey,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self::new(EffectKind::default(), DEFAULT_INTENSITY)
    }
}

impl EffectConfig {
    pub fn new(kind: EffectKind, intensity: u8) -> Self {
        Self {
            kind,
            intensity: intensity.clamp(MIN_INTENSITY, MAX_INTENSITY),
            replacement: None,
            chroma: ChromaKey::default(),
        }
    }

    pub fn with_kind(mut self, kind: EffectKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_intensity(mut self, intensity: u8) -> Self {
        self.intensity = intensity.clamp(MIN_INTENSITY, MAX_INTENSITY);
        self
    }

    pub fn with_replacement(mut self, image: RgbImage) -> Self {
        self.replacement = Some(Arc::new(image));
        self
    }

    pub fn with_chroma_key(mut self, chroma: ChromaKey) -> Self {
        self.chroma = chroma;
        self
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn intensity(&self) -> u8 {
        self.intensity.clamp(MIN_INTENSITY, MAX_INTENSITY)
    }

    pub fn replacement(&self) -> Option<&RgbImage> {
        self.replacement.as_deref()
    }

    pub fn chroma_key(&self) -> ChromaKey {
        self.chroma
    }

    /// Copy with the replacement image already cover-fitted to `width`x`height`
    ///
    /// The compositor then skips the per-frame resize.
    pub fn prepared_for(&self, width: u32, height: u32) -> Self {
        let replacement = match &self.replacement {
            Some(image) if image.dimensions() != (width, height) => {
                Some(Arc::new(fit_cover(image, width, height)))
            }
            other => other.clone(),
        };
        Self {
            replacement,
            ..self.clone()
        }
    }
}

/// Shared, atomically swapped effect configuration
///
/// The lock guards a single `Arc` clone; readers take a snapshot per frame.
#[derive(Debug, Clone, Default)]
pub struct EffectHandle {
    current: Arc<Mutex<Arc<EffectConfig>>>,
}

impl EffectHandle {
    pub fn new(config: EffectConfig) -> Self {
        Self {
            current: Arc::new(Mutex::new(Arc::new(config))),
        }
    }

    pub fn load(&self) -> Arc<EffectConfig> {
        self.current.lock().clone()
    }

    pub fn store(&self, config: EffectConfig) {
        *self.current.lock() = Arc::new(config);
    }

    /// Replace the config with `f(current)` under one lock, returning the new config
    pub fn update(&self, f: impl FnOnce(&EffectConfig) -> EffectConfig) -> Arc<EffectConfig> {
        let mut guard = self.current.lock();
        *guard = Arc::new(f(&guard));
        guard.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_intensity_clamped() {
        assert_eq!(EffectConfig::new(EffectKind::GaussianBlur, 0).intensity(), 1);
        assert_eq!(EffectConfig::new(EffectKind::GaussianBlur, 200).intensity(), 50);
        assert_eq!(
            EffectConfig::new(EffectKind::BokehBlur, 10)
                .with_intensity(99)
                .intensity(),
            50
        );
    }

    #[test]
    fn test_kind_names_and_cycle() {
        for kind in EffectKind::ALL {
            assert_eq!(kind.as_str().parse::<EffectKind>().unwrap(), kind);
        }
        assert!("sepia".parse::<EffectKind>().is_err());
        assert_eq!(EffectKind::ChromaKey.next(), EffectKind::GaussianBlur);
        assert_eq!(EffectKind::GaussianBlur.next(), EffectKind::BokehBlur);

        let json = serde_json::to_string(&EffectKind::BackgroundReplace).unwrap();
        assert_eq!(json, "\"background-replace\"");
    }

    #[test]
    fn test_prepared_for_fits_replacement() {
        let image = RgbImage::from_pixel(40, 10, Rgb([1, 2, 3]));
        let config = EffectConfig::new(EffectKind::BackgroundReplace, 5).with_replacement(image);
        let prepared = config.prepared_for(16, 9);
        assert_eq!(prepared.replacement().unwrap().dimensions(), (16, 9));
        assert_eq!(prepared.intensity(), 5);
        // original untouched
        assert_eq!(config.replacement().unwrap().dimensions(), (40, 10));
    }

    #[test]
    fn test_handle_swaps_whole_config() {
        let handle = EffectHandle::new(EffectConfig::new(EffectKind::GaussianBlur, 10));
        let before = handle.load();
        handle.store(EffectConfig::new(EffectKind::ChromaKey, 30));
        let after = handle.load();
        assert_eq!(before.kind(), EffectKind::GaussianBlur);
        assert_eq!(before.intensity(), 10);
        assert_eq!(after.kind(), EffectKind::ChromaKey);
        assert_eq!(after.intensity(), 30);

        let updated = handle.update(|c| c.clone().with_intensity(c.intensity() + 2));
        assert_eq!(updated.intensity(), 32);
        assert_eq!(handle.load().intensity(), 32);
    }
}
