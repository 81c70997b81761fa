use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::mask::BackendKind;

/// Coarse rating of how well the session keeps up
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PerformanceGrade {
    Poor,
    Acceptable,
    Good,
    Excellent,
}

impl PerformanceGrade {
    /// Grade from output frame rate and average per-frame processing time
    pub fn from_measurements(fps: f64, processing_ms: f64) -> Self {
        if fps >= 25.0 && processing_ms <= 40.0 {
            PerformanceGrade::Excellent
        } else if fps >= 20.0 && processing_ms <= 60.0 {
            PerformanceGrade::Good
        } else if fps >= 15.0 && processing_ms <= 80.0 {
            PerformanceGrade::Acceptable
        } else {
            PerformanceGrade::Poor
        }
    }
}

impl fmt::Display for PerformanceGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PerformanceGrade::Excellent => "excellent",
            PerformanceGrade::Good => "good",
            PerformanceGrade::Acceptable => "acceptable",
            PerformanceGrade::Poor => "poor",
        };
        f.write_str(name)
    }
}

/// Snapshot of the current session's counters
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStats {
    pub frames_captured: u64,
    /// Captured frames replaced in the slot before processing picked them up
    pub frames_overwritten: u64,
    pub frames_processed: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub stale_masks: u64,
    pub capture_timeouts: u64,
    pub avg_mask_ms: f64,
    pub avg_composite_ms: f64,
    pub avg_write_ms: f64,
    pub output_fps: f64,
    pub backend: Option<BackendKind>,
    pub grade: PerformanceGrade,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "captured={} processed={} sent={} dropped={} stale={} timeouts={} mask={:.1}ms composite={:.1}ms write={:.1}ms fps={:.1} ({})",
            self.frames_captured,
            self.frames_processed,
            self.frames_sent,
            self.frames_dropped,
            self.stale_masks,
            self.capture_timeouts,
            self.avg_mask_ms,
            self.avg_composite_ms,
            self.avg_write_ms,
            self.output_fps,
            self.grade
        )?;
        if let Some(backend) = self.backend {
            write!(f, " on {}", backend)?;
        }
        Ok(())
    }
}

/// Lock-free counters written by the session threads
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub captured: AtomicU64,
    pub overwritten: AtomicU64,
    pub processed: AtomicU64,
    pub sent: AtomicU64,
    pub dropped: AtomicU64,
    pub stale_masks: AtomicU64,
    pub capture_timeouts: AtomicU64,
    mask_nanos: AtomicU64,
    composite_nanos: AtomicU64,
    write_nanos: AtomicU64,
    started: Mutex<Option<Instant>>,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn nanos(d: Duration) -> u64 {
    d.as_nanos().min(u64::MAX as u128) as u64
}

impl StatsCounters {
    pub fn reset(&self) {
        for counter in [
            &self.captured,
            &self.overwritten,
            &self.processed,
            &self.sent,
            &self.dropped,
            &self.stale_masks,
            &self.capture_timeouts,
            &self.mask_nanos,
            &self.composite_nanos,
            &self.write_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.started.lock() = Some(Instant::now());
    }

    pub fn record_frame(&self, mask: Duration, composite: Duration, write: Duration) {
        self.mask_nanos.fetch_add(nanos(mask), Ordering::Relaxed);
        self.composite_nanos.fetch_add(nanos(composite), Ordering::Relaxed);
        self.write_nanos.fetch_add(nanos(write), Ordering::Relaxed);
        bump(&self.processed);
    }

    pub fn snapshot(&self, backend: Option<BackendKind>) -> PipelineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let processed = load(&self.processed);
        let avg_ms = |c: &AtomicU64| {
            if processed == 0 {
                0.0
            } else {
                load(c) as f64 / processed as f64 / 1_000_000.0
            }
        };
        let sent = load(&self.sent);
        let started = *self.started.lock();
        let elapsed = started.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
        let output_fps = if elapsed > 0.0 { sent as f64 / elapsed } else { 0.0 };

        let avg_mask_ms = avg_ms(&self.mask_nanos);
        let avg_composite_ms = avg_ms(&self.composite_nanos);
        let avg_write_ms = avg_ms(&self.write_nanos);

        PipelineStats {
            frames_captured: load(&self.captured),
            frames_overwritten: load(&self.overwritten),
            frames_processed: processed,
            frames_sent: sent,
            frames_dropped: load(&self.dropped),
            stale_masks: load(&self.stale_masks),
            capture_timeouts: load(&self.capture_timeouts),
            avg_mask_ms,
            avg_composite_ms,
            avg_write_ms,
            output_fps,
            backend,
            grade: PerformanceGrade::from_measurements(
                output_fps,
                avg_mask_ms + avg_composite_ms + avg_write_ms,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(PerformanceGrade::from_measurements(30.0, 20.0), PerformanceGrade::Excellent);
        assert_eq!(PerformanceGrade::from_measurements(30.0, 50.0), PerformanceGrade::Good);
        assert_eq!(PerformanceGrade::from_measurements(22.0, 30.0), PerformanceGrade::Good);
        assert_eq!(PerformanceGrade::from_measurements(16.0, 75.0), PerformanceGrade::Acceptable);
        assert_eq!(PerformanceGrade::from_measurements(10.0, 10.0), PerformanceGrade::Poor);
        assert_eq!(PerformanceGrade::from_measurements(30.0, 120.0), PerformanceGrade::Poor);
    }

    #[test]
    fn test_snapshot_averages() {
        let stats = StatsCounters::default();
        stats.reset();
        stats.record_frame(Duration::from_millis(10), Duration::from_millis(4), Duration::from_millis(2));
        stats.record_frame(Duration::from_millis(20), Duration::from_millis(6), Duration::from_millis(2));
        bump(&stats.sent);

        let snap = stats.snapshot(Some(BackendKind::Cpu));
        assert_eq!(snap.frames_processed, 2);
        assert_eq!(snap.frames_sent, 1);
        assert!((snap.avg_mask_ms - 15.0).abs() < 1e-6);
        assert!((snap.avg_composite_ms - 5.0).abs() < 1e-6);
        assert!((snap.avg_write_ms - 2.0).abs() < 1e-6);

        stats.reset();
        assert_eq!(stats.snapshot(None).frames_processed, 0);
    }
}
