//! Background blur kernels on interleaved 3-channel buffers.
//!
//! Everything here is integer arithmetic over running window sums, so the cost per
//! pixel does not depend on the radius and results are bit-for-bit reproducible.

const CHANNELS: usize = 3;

pub const MAX_BLUR_RADIUS: u32 = 64;
pub const MAX_BOKEH_RADIUS: u32 = 96;

/// Gaussian blur radius in pixels for an effect intensity
pub fn blur_radius(intensity: u8) -> u32 {
    ((intensity as f32 * 1.5).round() as u32).min(MAX_BLUR_RADIUS)
}

/// Bokeh aperture radius in pixels, always at least the gaussian radius
pub fn bokeh_radius(intensity: u8) -> u32 {
    (blur_radius(intensity) * 3 / 2).min(MAX_BOKEH_RADIUS)
}

/// Box sizes whose successive application approximates a gaussian of `sigma`
fn boxes_for_gauss(sigma: f32, n: usize) -> Vec<usize> {
    let ideal = (12.0 * sigma * sigma / n as f32 + 1.0).sqrt();
    let mut lower = ideal.floor() as i64;
    if lower % 2 == 0 {
        lower -= 1;
    }
    let lower = lower.max(1);
    let upper = lower + 2;
    let m_ideal = (12.0 * sigma * sigma
        - (n as i64 * lower * lower) as f32
        - (4 * n as i64 * lower) as f32
        - (3 * n) as f32)
        / (-4 * lower - 4) as f32;
    let m = m_ideal.round().max(0.0) as usize;
    (0..n)
        .map(|i| if i < m { lower as usize } else { upper as usize })
        .collect()
}

/// Approximate gaussian blur (three box passes, sigma = radius / 2)
pub fn gaussian_blur(data: &[u8], width: u32, height: u32, radius: u32) -> Vec<u8> {
    let _span = tracing::debug_span!("gaussian_blur", radius).entered();
    if radius == 0 || width == 0 || height == 0 {
        return data.to_vec();
    }
    let (w, h) = (width as usize, height as usize);
    let mut current = data.to_vec();
    let mut scratch = vec![0u8; current.len()];
    for size in boxes_for_gauss(radius as f32 / 2.0, 3) {
        let r = (size - 1) / 2;
        if r == 0 {
            continue;
        }
        box_horizontal(&current, &mut scratch, w, h, r);
        box_vertical(&scratch, &mut current, w, h, r);
    }
    current
}

fn box_horizontal(src: &[u8], dst: &mut [u8], w: usize, h: usize, r: usize) {
    let window = (2 * r + 1) as u32;
    let last = w - 1;
    for y in 0..h {
        let row = y * w;
        for c in 0..CHANNELS {
            let at = |x: usize| src[(row + x) * CHANNELS + c] as u32;
            let mut sum: u32 = (0..=2 * r).map(|i| at(i.saturating_sub(r).min(last))).sum();
            for x in 0..w {
                dst[(row + x) * CHANNELS + c] = ((sum + window / 2) / window) as u8;
                let incoming = at((x + r + 1).min(last));
                let outgoing = at(x.saturating_sub(r));
                sum = sum + incoming - outgoing;
            }
        }
    }
}

fn box_vertical(src: &[u8], dst: &mut [u8], w: usize, h: usize, r: usize) {
    let window = (2 * r + 1) as u32;
    let last = h - 1;
    for x in 0..w {
        for c in 0..CHANNELS {
            let at = |y: usize| src[(y * w + x) * CHANNELS + c] as u32;
            let mut sum: u32 = (0..=2 * r).map(|i| at(i.saturating_sub(r).min(last))).sum();
            for y in 0..h {
                dst[(y * w + x) * CHANNELS + c] = ((sum + window / 2) / window) as u8;
                let incoming = at((y + r + 1).min(last));
                let outgoing = at(y.saturating_sub(r));
                sum = sum + incoming - outgoing;
            }
        }
    }
}

/// Weight of a pixel in the bokeh average; grows with luma squared
fn highlight_weight(px: &[u8]) -> u64 {
    let luma = (77 * px[0] as u64 + 150 * px[1] as u64 + 29 * px[2] as u64) >> 8;
    1 + luma * luma / 256
}

/// Defocus-style blur: bright spots dominate their neighbourhood
///
/// Two passes of a separable box blur where every sample is weighted by its
/// brightness. Channel order does not matter for the weighting beyond luma.
pub fn bokeh_blur(data: &[u8], width: u32, height: u32, radius: u32) -> Vec<u8> {
    let _span = tracing::debug_span!("bokeh_blur", radius).entered();
    if radius == 0 || width == 0 || height == 0 {
        return data.to_vec();
    }
    let (w, h) = (width as usize, height as usize);
    let r = radius as usize;
    let mut current = data.to_vec();
    let mut scratch = vec![0u8; current.len()];
    for _ in 0..2 {
        weighted_pass(&current, &mut scratch, w, h, r, Axis::Horizontal);
        weighted_pass(&scratch, &mut current, w, h, r, Axis::Vertical);
    }
    current
}

#[derive(Clone, Copy)]
enum Axis {
    Horizontal,
    Vertical,
}

fn weighted_pass(src: &[u8], dst: &mut [u8], w: usize, h: usize, r: usize, axis: Axis) {
    let (lines, len) = match axis {
        Axis::Horizontal => (h, w),
        Axis::Vertical => (w, h),
    };
    let index = |line: usize, pos: usize| match axis {
        Axis::Horizontal => (line * w + pos) * CHANNELS,
        Axis::Vertical => (pos * w + line) * CHANNELS,
    };
    let last = len - 1;

    for line in 0..lines {
        let sample = |pos: usize| {
            let i = index(line, pos.min(last));
            let px = &src[i..i + CHANNELS];
            let weight = highlight_weight(px);
            [
                weight,
                weight * px[0] as u64,
                weight * px[1] as u64,
                weight * px[2] as u64,
            ]
        };

        let mut acc = [0u64; 4];
        for i in 0..=2 * r {
            let s = sample(i.saturating_sub(r));
            for k in 0..4 {
                acc[k] += s[k];
            }
        }

        for pos in 0..len {
            let out = index(line, pos);
            for c in 0..CHANNELS {
                dst[out + c] = ((acc[c + 1] + acc[0] / 2) / acc[0]).min(255) as u8;
            }
            let incoming = sample(pos + r + 1);
            let outgoing = sample(pos.saturating_sub(r));
            for k in 0..4 {
                acc[k] = acc[k] + incoming[k] - outgoing[k];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(width: u32, height: u32, value: u8) -> Vec<u8> {
        let mut data = vec![0u8; (width * height) as usize * CHANNELS];
        let center = ((height / 2) * width + width / 2) as usize * CHANNELS;
        data[center..center + CHANNELS].fill(value);
        data
    }

    #[test]
    fn test_radius_monotonic_and_clamped() {
        let mut prev_blur = 0;
        let mut prev_bokeh = 0;
        for intensity in 1..=u8::MAX {
            let b = blur_radius(intensity);
            let k = bokeh_radius(intensity);
            assert!(b >= prev_blur && k >= prev_bokeh);
            assert!(b <= MAX_BLUR_RADIUS && k <= MAX_BOKEH_RADIUS);
            assert!(k >= b);
            prev_blur = b;
            prev_bokeh = k;
        }
        assert_eq!(blur_radius(1), 2);
        assert_eq!(blur_radius(20), 30);
        assert_eq!(blur_radius(50), 64);
    }

    #[test]
    fn test_boxes_approximate_sigma() {
        let sizes = boxes_for_gauss(5.0, 3);
        assert_eq!(sizes.len(), 3);
        assert!(sizes.iter().all(|s| s % 2 == 1));
        // variance of n boxes of size s is n * (s^2 - 1) / 12
        let variance: f32 = sizes.iter().map(|&s| ((s * s - 1) as f32) / 12.0).sum();
        assert!((variance.sqrt() - 5.0).abs() < 1.0);
    }

    #[test]
    fn test_uniform_image_unchanged() {
        let data = vec![123u8; 20 * 10 * CHANNELS];
        assert_eq!(gaussian_blur(&data, 20, 10, 8), data);
        assert_eq!(bokeh_blur(&data, 20, 10, 8), data);
    }

    #[test]
    fn test_zero_radius_is_identity() {
        let data = dot(9, 9, 255);
        assert_eq!(gaussian_blur(&data, 9, 9, 0), data);
        assert_eq!(bokeh_blur(&data, 9, 9, 0), data);
    }

    #[test]
    fn test_empty_buffer_is_left_alone() {
        assert!(gaussian_blur(&[], 0, 4, 8).is_empty());
        assert!(bokeh_blur(&[], 4, 0, 8).is_empty());
    }

    #[test]
    fn test_gaussian_spreads_energy() {
        let data = dot(31, 31, 255);
        let out = gaussian_blur(&data, 31, 31, 6);
        let center = (15 * 31 + 15) * CHANNELS;
        let beside = (15 * 31 + 17) * CHANNELS;
        assert!(out[center] < 255);
        assert!(out[beside] > 0);
        assert!(out[center] >= out[beside]);
    }

    #[test]
    fn test_bokeh_favours_highlights() {
        // bright dot: a plain average would make the neighbourhood very dark
        let data = dot(21, 21, 255);
        let out = bokeh_blur(&data, 21, 21, 2);
        let beside = (10 * 21 + 11) * CHANNELS;

        let mut plain = vec![0u8; data.len()];
        let mut tmp = vec![0u8; data.len()];
        box_horizontal(&data, &mut tmp, 21, 21, 2);
        box_vertical(&tmp, &mut plain, 21, 21, 2);

        assert!(out[beside] > plain[beside]);
    }
}
