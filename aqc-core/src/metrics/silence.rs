//! Frame-wise silence detection.
//!
//! A frame is *active* when its RMS level exceeds the dBFS threshold. The
//! buffer is silent when fewer than `active_ratio` of its frames are active.
//! Buffers shorter than one frame fall back to a single whole-buffer level
//! test.

use super::rms_dbfs;
use crate::audio::AudioBuffer;

#[derive(Debug, Clone)]
pub struct SilenceDetector {
    /// Level (dBFS) a frame must exceed to count as active.
    threshold_dbfs: f64,
    /// Analysis frame length in ms. Default: 20.
    frame_ms: u32,
    /// Hop between frame starts in ms. Default: 10.
    hop_ms: u32,
    /// Minimum active-frame ratio for the buffer to be non-silent. Default: 0.05.
    active_ratio: f64,
}

impl SilenceDetector {
    pub fn new(threshold_dbfs: f64) -> Self {
        Self {
            threshold_dbfs,
            frame_ms: 20,
            hop_ms: 10,
            active_ratio: 0.05,
        }
    }

    pub fn with_framing(mut self, frame_ms: u32, hop_ms: u32) -> Self {
        self.frame_ms = frame_ms;
        self.hop_ms = hop_ms;
        self
    }

    pub fn with_active_ratio(mut self, active_ratio: f64) -> Self {
        self.active_ratio = active_ratio;
        self
    }

    pub fn is_silent(&self, audio: &AudioBuffer) -> bool {
        self.is_silent_samples(audio.samples(), audio.sample_rate())
    }

    fn is_silent_samples(&self, x: &[f32], sample_rate: u32) -> bool {
        if x.is_empty() || sample_rate == 0 {
            return true;
        }

        let frame_len = (sample_rate as u64 * self.frame_ms as u64 / 1000) as usize;
        let hop = (sample_rate as u64 * self.hop_ms as u64 / 1000) as usize;
        if frame_len == 0 || hop == 0 || x.len() < frame_len {
            return rms_dbfs(x) <= self.threshold_dbfs;
        }

        let n_frames = 1 + (x.len() - frame_len) / hop;
        let active = (0..n_frames)
            .filter(|i| {
                let start = i * hop;
                rms_dbfs(&x[start..start + frame_len]) > self.threshold_dbfs
            })
            .count();

        let ratio = active as f64 / n_frames.max(1) as f64;
        ratio < self.active_ratio
    }
}

impl Default for SilenceDetector {
    fn default() -> Self {
        Self::new(-60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16_000;

    fn sine(amplitude: f32, freq: f32, seconds: f32) -> Vec<f32> {
        let n = (SR as f32 * seconds) as usize;
        (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn buffer(samples: Vec<f32>) -> AudioBuffer {
        AudioBuffer::new(samples, SR).expect("valid buffer")
    }

    #[test]
    fn all_zero_two_seconds_is_silent() {
        let det = SilenceDetector::new(-60.0);
        assert!(det.is_silent(&buffer(vec![0.0; SR as usize * 2])));
    }

    #[test]
    fn minus_26_dbfs_tone_is_not_silent() {
        // RMS of a sine is A/√2, so A = √2 · 10^(-26/20) ≈ 0.0709 gives -26 dBFS.
        let amplitude = std::f32::consts::SQRT_2 * 10f32.powf(-26.0 / 20.0);
        let det = SilenceDetector::new(-60.0);
        assert!(!det.is_silent(&buffer(sine(amplitude, 440.0, 2.0))));
    }

    #[test]
    fn quiet_low_tone_is_not_silent() {
        let det = SilenceDetector::new(-60.0);
        assert!(!det.is_silent(&buffer(sine(0.05, 440.0, 2.0))));
    }

    #[test]
    fn sparse_activity_below_ratio_is_silent() {
        // 2 s of zeros with a 40 ms burst → at most ~5 of 199 frames active (< 5 %).
        let mut samples = vec![0.0f32; SR as usize * 2];
        for s in samples.iter_mut().skip(8_000).take(640) {
            *s = 0.5;
        }
        let det = SilenceDetector::new(-60.0);
        assert!(det.is_silent(&buffer(samples)));
    }

    #[test]
    fn shorter_than_one_frame_uses_whole_buffer_level() {
        let det = SilenceDetector::new(-60.0);
        // 10 samples < 320-sample frame.
        assert!(det.is_silent(&buffer(vec![0.0; 10])));
        assert!(!det.is_silent(&buffer(vec![0.1; 10])));
    }

    #[test]
    fn empty_slice_is_silent() {
        let det = SilenceDetector::default();
        assert!(det.is_silent_samples(&[], SR));
    }
}
