//! Energy-based VAD using an RMS-dBFS threshold + hangover counter.
//!
//! ## Algorithm
//!
//! 1. Split the file into `frame_ms` frames (the last one may be short).
//! 2. If the frame level ≥ `threshold_dbfs` → `Speech`, reload the hangover
//!    counter.
//! 3. If below threshold and the hangover counter > 0 → `Speech`, decrement
//!    (keeps syllable endings).
//! 4. Otherwise → `Silence`.
//! 5. Consecutive `Speech` frames form an interval; intervals shorter than
//!    `min_speech_ms` are dropped.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{decisions_to_intervals, SpeechDetector, VadDecision};
use crate::audio::read_wav;
use crate::error::Result;
use crate::metrics::{rms_dbfs, SpeechInterval};

/// Tunables for [`EnergyDetector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyVadConfig {
    pub frame_ms: u32,
    /// Frames at or above this level count as speech.
    pub threshold_dbfs: f64,
    /// Trailing below-threshold frames still reported as speech.
    pub hangover_frames: u32,
    pub min_speech_ms: u64,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            frame_ms: 30,
            threshold_dbfs: -40.0,
            hangover_frames: 8,
            min_speech_ms: 90,
        }
    }
}

/// A simple energy-based speech detector.
#[derive(Debug, Clone)]
pub struct EnergyDetector {
    config: EnergyVadConfig,
    hangover_counter: u32,
}

impl EnergyDetector {
    pub fn new(config: EnergyVadConfig) -> Self {
        Self {
            config,
            hangover_counter: 0,
        }
    }

    fn classify(&mut self, frame: &[f32]) -> VadDecision {
        if !frame.is_empty() && rms_dbfs(frame) >= self.config.threshold_dbfs {
            self.hangover_counter = self.config.hangover_frames;
            VadDecision::Speech
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {
        self.hangover_counter = 0;
    }

    /// Run detection over in-memory samples.
    pub fn detect_samples(&mut self, samples: &[f32], sample_rate: u32) -> Vec<SpeechInterval> {
        self.reset();
        let frame_len = ((sample_rate as u64 * self.config.frame_ms as u64) / 1000).max(1) as usize;

        let decisions: Vec<VadDecision> =
            samples.chunks(frame_len).map(|f| self.classify(f)).collect();

        decisions_to_intervals(
            &decisions,
            frame_len,
            samples.len(),
            sample_rate,
            self.config.min_speech_ms,
        )
    }
}

impl Default for EnergyDetector {
    fn default() -> Self {
        Self::new(EnergyVadConfig::default())
    }
}

impl SpeechDetector for EnergyDetector {
    fn warm_up(&mut self) -> Result<()> {
        debug!("EnergyDetector::warm_up: no-op");
        Ok(())
    }

    fn detect(&mut self, pcm_path: &Path) -> Result<Vec<SpeechInterval>> {
        let pcm = read_wav(pcm_path)?;
        let intervals = self.detect_samples(&pcm.samples, pcm.sample_rate);
        debug!(count = intervals.len(), "energy vad intervals");
        Ok(intervals)
    }
}
