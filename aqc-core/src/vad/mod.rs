//! Voice Activity Detection (VAD) collaborators.
//!
//! The `SpeechDetector` trait is the extensibility point for the inference
//! stage: `EnergyDetector` (always available) and `SileroDetector` (`onnx`
//! feature) both implement it, as do the scripted detectors in the tests.
//! The orchestrator never calls a detector directly; it goes through
//! [`InferenceBackend`](crate::inference::InferenceBackend) behind the
//! admission gate.

pub mod energy;

#[cfg(feature = "onnx")]
pub mod silero;

pub use energy::{EnergyDetector, EnergyVadConfig};

#[cfg(feature = "onnx")]
pub use silero::SileroDetector;

use std::path::Path;

use crate::error::Result;
use crate::metrics::SpeechInterval;

/// Whether a given analysis frame contains speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Contract for VAD backends.
///
/// `&mut self` on `detect` expresses that detectors are stateful (hangover
/// counters, recurrent hidden state). Implementors reset that state at the
/// start of every file.
pub trait SpeechDetector: Send + 'static {
    /// One-time warm-up: load weights, run a dummy window. Called once per
    /// instance before the first request.
    ///
    /// # Errors
    /// Returns an error if model files are missing or corrupt.
    fn warm_up(&mut self) -> Result<()>;

    /// Produce speech intervals (ms) for a mono 16 kHz PCM WAV file.
    ///
    /// Intervals need not be sorted or disjoint.
    fn detect(&mut self, pcm_path: &Path) -> Result<Vec<SpeechInterval>>;
}

/// Collapse per-frame decisions into intervals.
///
/// Frame `i` covers samples `[i·frame_len, (i+1)·frame_len)`, clamped to
/// `total_samples`. Intervals shorter than `min_speech_ms` are dropped.
pub(crate) fn decisions_to_intervals(
    decisions: &[VadDecision],
    frame_len: usize,
    total_samples: usize,
    sample_rate: u32,
    min_speech_ms: u64,
) -> Vec<SpeechInterval> {
    let to_ms = |sample: usize| -> u64 {
        (sample.min(total_samples) as f64 * 1000.0 / f64::from(sample_rate)).round() as u64
    };

    let mut out = Vec::new();
    let mut open: Option<usize> = None;
    for (i, decision) in decisions.iter().chain(std::iter::once(&VadDecision::Silence)).enumerate() {
        match (decision.is_speech(), open) {
            (true, None) => open = Some(i),
            (false, Some(start)) => {
                let iv = SpeechInterval::new(to_ms(start * frame_len), to_ms(i * frame_len));
                if iv.len_ms() >= min_speech_ms.max(1) {
                    out.push(iv);
                }
                open = None;
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use VadDecision::{Silence as S, Speech as V};

    #[test]
    fn runs_become_intervals() {
        // 30 ms frames at 16 kHz = 480 samples
        let d = [S, V, V, S, S, V, S];
        let out = decisions_to_intervals(&d, 480, 480 * d.len(), 16_000, 0);
        assert_eq!(out, vec![SpeechInterval::new(30, 90), SpeechInterval::new(150, 180)]);
    }

    #[test]
    fn short_runs_are_dropped() {
        let d = [V, S, V, V, V];
        let out = decisions_to_intervals(&d, 480, 480 * d.len(), 16_000, 60);
        assert_eq!(out, vec![SpeechInterval::new(60, 150)]);
    }

    #[test]
    fn trailing_partial_frame_is_clamped() {
        let d = [S, V];
        // second frame only has 100 real samples
        let out = decisions_to_intervals(&d, 480, 580, 16_000, 0);
        assert_eq!(out, vec![SpeechInterval::new(30, 36)]);
    }
}
