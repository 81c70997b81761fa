use image::{imageops, RgbImage};

use crate::frame::{Frame, PixelFormat};

/// Scale `image` to cover `width`x`height` keeping its aspect ratio, then crop the centre
pub fn fit_cover(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (iw, ih) = image.dimensions();
    if (iw, ih) == (width, height) {
        return image.clone();
    }
    if iw == 0 || ih == 0 || width == 0 || height == 0 {
        return RgbImage::new(width, height);
    }

    let scale = (width as f64 / iw as f64).max(height as f64 / ih as f64);
    let scaled_w = ((iw as f64 * scale).ceil() as u32).max(width);
    let scaled_h = ((ih as f64 * scale).ceil() as u32).max(height);

    let scaled = imageops::resize(image, scaled_w, scaled_h, imageops::FilterType::Triangle);
    let x = (scaled_w - width) / 2;
    let y = (scaled_h - height) / 2;
    imageops::crop_imm(&scaled, x, y, width, height).to_image()
}

/// Replacement background as raw bytes in the frame's layout
///
/// Falls back to black when there is no image.
pub fn backdrop_bytes(image: Option<&RgbImage>, frame: &Frame) -> Vec<u8> {
    let (width, height) = frame.dimensions();
    let Some(image) = image else {
        return vec![0; frame.data().len()];
    };

    let fitted;
    let image = if image.dimensions() == (width, height) {
        image
    } else {
        fitted = fit_cover(image, width, height);
        &fitted
    };

    match frame.format() {
        PixelFormat::Rgb => image.as_raw().clone(),
        PixelFormat::Bgr => image
            .as_raw()
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_cover_crops_wide_image() {
        // left half red, right half blue; a 1:1 crop keeps the centre seam
        let image = RgbImage::from_fn(200, 50, |x, _| {
            if x < 100 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        let fitted = fit_cover(&image, 40, 40);
        assert_eq!(fitted.dimensions(), (40, 40));
        assert_eq!(fitted.get_pixel(2, 20)[0], 255);
        assert_eq!(fitted.get_pixel(37, 20)[2], 255);
    }

    #[test]
    fn test_cover_upscales_small_image() {
        let image = RgbImage::from_pixel(4, 3, Rgb([9, 8, 7]));
        let fitted = fit_cover(&image, 64, 36);
        assert_eq!(fitted.dimensions(), (64, 36));
        assert_eq!(*fitted.get_pixel(32, 18), Rgb([9, 8, 7]));
    }

    #[test]
    fn test_backdrop_matches_frame_layout() {
        let image = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let bgr = Frame::solid(4, 4, PixelFormat::Bgr, 0, [0, 0, 0]).unwrap();
        let bytes = backdrop_bytes(Some(&image), &bgr);
        assert_eq!(&bytes[..3], &[30, 20, 10]);

        let rgb = Frame::solid(4, 4, PixelFormat::Rgb, 0, [0, 0, 0]).unwrap();
        assert_eq!(&backdrop_bytes(Some(&image), &rgb)[..3], &[10, 20, 30]);
        assert!(backdrop_bytes(None, &rgb).iter().all(|b| *b == 0));
    }
}
