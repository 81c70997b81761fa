use crate::effect::ChromaKey;
use crate::frame::Frame;

/// Distance beyond the tolerance over which alpha ramps from 0 to 1
const SOFTNESS: f32 = 32.0;

/// Foreground alpha from the key colour: 0 on the key, 1 well away from it
pub fn chroma_alpha(frame: &Frame, key: ChromaKey) -> Vec<f32> {
    let format = frame.format();
    let [kr, kg, kb] = key.color.map(|c| c as f32);
    let tolerance = key.tolerance as f32;

    frame
        .data()
        .chunks_exact(3)
        .map(|px| {
            let [r, g, b] = format.to_rgb([px[0], px[1], px[2]]).map(|c| c as f32);
            let distance = ((r - kr).powi(2) + (g - kg).powi(2) + (b - kb).powi(2)).sqrt();
            ((distance - tolerance) / SOFTNESS).clamp(0.0, 1.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    #[test]
    fn test_key_colour_is_transparent() {
        let key = ChromaKey::default();
        let green = Frame::solid(2, 2, PixelFormat::Bgr, 0, key.color).unwrap();
        assert!(chroma_alpha(&green, key).iter().all(|a| *a == 0.0));

        let white = Frame::solid(2, 2, PixelFormat::Rgb, 0, [255, 255, 255]).unwrap();
        assert!(chroma_alpha(&white, key).iter().all(|a| *a == 1.0));
    }

    #[test]
    fn test_ramp_between_thresholds() {
        let key = ChromaKey {
            color: [0, 0, 0],
            tolerance: 10,
        };
        let frame = Frame::solid(1, 1, PixelFormat::Rgb, 0, [26, 0, 0]).unwrap();
        let alpha = chroma_alpha(&frame, key)[0];
        assert!((alpha - 0.5).abs() < 1e-6);
    }
}
