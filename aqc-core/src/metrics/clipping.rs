//! Digital clipping detection.
//!
//! An event is a maximal run of consecutive samples with `|x| >= threshold`.
//! Runs shorter than `min_run` samples are ignored.

use serde::Serialize;

use crate::audio::AudioBuffer;

#[derive(Debug, Clone)]
pub struct ClippingDetector {
    /// Absolute amplitude at or above which a sample counts as clipped.
    threshold: f32,
    /// Minimum consecutive clipped samples for a run to count as an event.
    min_run: usize,
}

/// Clipping events found in one buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClippingReport {
    pub count: usize,
    /// Start of each counted event, `round(start_sample * 1000 / sr)` ms.
    pub onsets_ms: Vec<u64>,
}

impl ClippingDetector {
    pub fn new(threshold: f32, min_run: usize) -> Self {
        Self { threshold, min_run }
    }

    pub fn detect(&self, audio: &AudioBuffer) -> ClippingReport {
        self.detect_samples(audio.samples(), audio.sample_rate())
    }

    fn detect_samples(&self, x: &[f32], sample_rate: u32) -> ClippingReport {
        if x.is_empty() || sample_rate == 0 {
            return ClippingReport::default();
        }

        let mut report = ClippingReport::default();
        let mut run_start: Option<usize> = None;

        // Iterate one past the end so a run touching the last sample is closed.
        for i in 0..=x.len() {
            let clipped = x.get(i).is_some_and(|s| s.abs() >= self.threshold);
            match (clipped, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    if i - start >= self.min_run {
                        report.count += 1;
                        report
                            .onsets_ms
                            .push((start as f64 * 1000.0 / f64::from(sample_rate)).round() as u64);
                    }
                    run_start = None;
                }
                _ => {}
            }
        }

        report
    }
}

impl Default for ClippingDetector {
    fn default() -> Self {
        Self::new(0.99, 10)
    }
}
