//! Blends a frame's foreground over a processed background.

mod backdrop;
mod blur;
mod chroma;

pub use backdrop::{backdrop_bytes, fit_cover};
pub use blur::{bokeh_blur, bokeh_radius, blur_radius, gaussian_blur, MAX_BLUR_RADIUS, MAX_BOKEH_RADIUS};
pub use chroma::chroma_alpha;

use std::borrow::Cow;

use crate::effect::{EffectConfig, EffectKind};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::mask::Mask;

/// Composite `frame` over its background effect using `mask` as alpha
///
/// `output = mask * frame + (1 - mask) * background`, per channel, rounded. Pure and
/// deterministic. The mask must have the frame's dimensions and must have been
/// targeted at this frame.
pub fn composite(frame: &Frame, mask: &Mask, config: &EffectConfig) -> Result<Frame> {
    let _span = tracing::debug_span!("composite", seq = frame.sequence()).entered();

    if mask.dimensions() != frame.dimensions() {
        return Err(Error::mismatch(format!(
            "mask {}x{} does not match frame {}x{}",
            mask.width(),
            mask.height(),
            frame.width(),
            frame.height()
        )));
    }
    if mask.target() != frame.sequence() {
        return Err(Error::mismatch(format!(
            "mask targeted at frame {} applied to frame {}",
            mask.target(),
            frame.sequence()
        )));
    }

    let (width, height) = frame.dimensions();
    let intensity = config.intensity();

    let background = match config.kind() {
        EffectKind::GaussianBlur => gaussian_blur(frame.data(), width, height, blur_radius(intensity)),
        EffectKind::BokehBlur => bokeh_blur(frame.data(), width, height, bokeh_radius(intensity)),
        EffectKind::BackgroundReplace => backdrop_bytes(config.replacement(), frame),
        EffectKind::ChromaKey => match config.replacement() {
            Some(image) => backdrop_bytes(Some(image), frame),
            None => gaussian_blur(frame.data(), width, height, blur_radius(intensity)),
        },
    };

    let alpha: Cow<'_, [f32]> = match config.kind() {
        EffectKind::ChromaKey => Cow::Owned(chroma_alpha(frame, config.chroma_key())),
        _ => Cow::Borrowed(mask.values()),
    };

    let data = blend(frame.data(), &background, &alpha);
    Frame::new(width, height, frame.format(), frame.sequence(), data)
}

fn blend(foreground: &[u8], background: &[u8], alpha: &[f32]) -> Vec<u8> {
    foreground
        .chunks_exact(3)
        .zip(background.chunks_exact(3))
        .zip(alpha)
        .flat_map(|((fg, bg), &a)| {
            let a = a.clamp(0.0, 1.0);
            let mix = |f: u8, b: u8| (a * f as f32 + (1.0 - a) * b as f32).round().clamp(0.0, 255.0) as u8;
            [mix(fg[0], bg[0]), mix(fg[1], bg[1]), mix(fg[2], bg[2])]
        })
        .collect()
}
