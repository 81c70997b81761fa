/// Weight of the previous mask in the temporal moving average
pub const DEFAULT_SMOOTHING: f32 = 0.7;

/// Largest sequence gap still treated as the same stream
///
/// Frames skipped by latest-wins buffering or a busy mask worker leave gaps of a
/// few sequence numbers; anything longer means the stream stalled or restarted.
pub const MAX_SEQUENCE_GAP: u64 = 15;

/// Exponential moving average across successive masks
///
/// Suppresses flicker along silhouette edges. The average carries over while
/// sequence numbers move forward by at most `MAX_SEQUENCE_GAP`; a longer gap, a
/// backwards step or a size change starts a new one.
#[derive(Debug)]
pub struct TemporalSmoother {
    weight: f32,
    previous: Option<(u64, Vec<f32>)>,
}

impl TemporalSmoother {
    pub fn new(weight: f32) -> Self {
        Self {
            weight: weight.clamp(0.0, 0.99),
            previous: None,
        }
    }

    pub fn apply(&mut self, sequence: u64, current: Vec<f32>) -> Vec<f32> {
        let smoothed = match self.previous.take() {
            Some((prev_seq, prev))
                if sequence > prev_seq
                    && sequence - prev_seq <= MAX_SEQUENCE_GAP
                    && prev.len() == current.len() =>
            {
                let w = self.weight;
                prev.iter()
                    .zip(&current)
                    .map(|(p, c)| w * p + (1.0 - w) * c)
                    .collect()
            }
            Some((prev_seq, _)) => {
                tracing::debug!(
                    "Mask discontinuity {} -> {}, resetting smoothing",
                    prev_seq,
                    sequence
                );
                current
            }
            None => current,
        };
        self.previous = Some((sequence, smoothed.clone()));
        smoothed
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

/// Morphological close followed by a 3x3 box blur
///
/// Fills pinholes in the silhouette and softens the staircase the model leaves at
/// low resolution.
pub fn refine_edges(values: &[f32], width: u32, height: u32) -> Vec<f32> {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 || values.len() != w * h {
        return values.to_vec();
    }
    let dilated = neighbourhood(values, w, h, |acc, v| acc.max(v), f32::MIN);
    let closed = neighbourhood(&dilated, w, h, |acc, v| acc.min(v), f32::MAX);

    let mut out = vec![0.0; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0;
            let mut count = 0.0;
            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    sum += closed[ny * w + nx];
                    count += 1.0;
                }
            }
            out[y * w + x] = sum / count;
        }
    }
    out
}

fn neighbourhood(values: &[f32], w: usize, h: usize, fold: fn(f32, f32) -> f32, init: f32) -> Vec<f32> {
    let mut out = vec![0.0; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = init;
            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    acc = fold(acc, values[ny * w + nx]);
                }
            }
            out[y * w + x] = acc;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_weights_previous_mask() {
        let mut smoother = TemporalSmoother::new(0.7);
        assert_eq!(smoother.apply(1, vec![1.0]), vec![1.0]);
        let out = smoother.apply(2, vec![0.0]);
        assert!((out[0] - 0.7).abs() < 1e-6);
        let out = smoother.apply(3, vec![0.0]);
        assert!((out[0] - 0.49).abs() < 1e-6);
    }

    #[test]
    fn test_skipped_frames_keep_averaging() {
        let mut smoother = TemporalSmoother::new(0.7);
        smoother.apply(1, vec![1.0]);
        // frames 2..=4 dropped upstream
        let out = smoother.apply(5, vec![0.0]);
        assert!((out[0] - 0.7).abs() < 1e-6);
        let out = smoother.apply(5 + MAX_SEQUENCE_GAP, vec![0.0]);
        assert!((out[0] - 0.49).abs() < 1e-6);
    }

    #[test]
    fn test_stream_break_resets_accumulator() {
        let mut smoother = TemporalSmoother::new(0.7);
        smoother.apply(1, vec![1.0]);
        assert_eq!(smoother.apply(2 + MAX_SEQUENCE_GAP, vec![0.0]), vec![0.0]);
        // the reset frame seeds the next average
        let out = smoother.apply(3 + MAX_SEQUENCE_GAP, vec![1.0]);
        assert!((out[0] - 0.3).abs() < 1e-6);

        // backwards and resized masks also restart
        assert_eq!(smoother.apply(1, vec![0.0]), vec![0.0]);
        assert_eq!(smoother.apply(2, vec![1.0, 1.0]), vec![1.0, 1.0]);
    }

    #[test]
    fn test_explicit_reset() {
        let mut smoother = TemporalSmoother::default();
        smoother.apply(1, vec![1.0]);
        smoother.reset();
        assert_eq!(smoother.apply(2, vec![0.0]), vec![0.0]);
    }

    #[test]
    fn test_refine_fills_pinhole() {
        let mut values = vec![1.0; 25];
        values[12] = 0.0;
        let refined = refine_edges(&values, 5, 5);
        assert!((refined[12] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_refine_keeps_range() {
        let values: Vec<f32> = (0..16).map(|i| (i % 2) as f32).collect();
        let refined = refine_edges(&values, 4, 4);
        assert!(refined.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
