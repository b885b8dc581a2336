//! Rule-based clarity score.
//!
//! ## Algorithm
//!
//! ```text
//! samples ──► STFT power (Hann, fixed hop, no padding)
//!    │             ├──► HF ratio   = E[hf_lo, hf_hi] / E[0, hf_hi]
//!    │             └──► flatness   = mean over frames of geo/arith mean
//!    └──► SNR from the VAD speech mask
//!
//! snr_score  = clamp01((snr - snr_min) / (snr_max - snr_min))
//! hf_score   = clamp01(hf_ratio / hf_ref)
//! flat_score = 1 - clamp01(flatness / flat_ref)
//! clarity    = 100 · Σ wᵢ·scoreᵢ   (weights renormalized to sum 1)
//! ```
//!
//! ## Noise estimate
//!
//! Noise power comes from the samples *outside* the speech mask. When fewer
//! than one second of such samples exist, the whole signal is used instead.
//! For clips that are almost entirely speech this makes the SNR optimistic;
//! the behaviour is kept as-is because callers compare scores across
//! releases.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use super::{clamp01, round_to, segments::SpeechInterval, EPS};
use crate::audio::{ms_to_samples, AudioBuffer};

/// SNR reported when no speech interval overlaps the buffer.
pub const NO_SPEECH_SNR_DB: f64 = -100.0;

/// Smallest analysis window, in samples.
const MIN_WINDOW: usize = 256;

/// Tunables for [`ClarityScorer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarityConfig {
    /// STFT window length in ms (never fewer than 256 samples).
    pub win_ms: u32,
    /// STFT hop in ms.
    pub hop_ms: u32,
    /// Lower edge of the high-frequency band (Hz).
    pub hf_lo_hz: f64,
    /// Upper edge of the analysis band; capped at Nyquist.
    pub hf_hi_hz: f64,
    /// SNR mapped to score 0.
    pub snr_min_db: f64,
    /// SNR mapped to score 1.
    pub snr_max_db: f64,
    /// HF ratio mapped to score 1.
    pub hf_ref: f64,
    /// Flatness mapped to score 0.
    pub flat_ref: f64,
    pub w_snr: f64,
    pub w_hf: f64,
    pub w_flat: f64,
}

impl Default for ClarityConfig {
    fn default() -> Self {
        Self {
            win_ms: 20,
            hop_ms: 10,
            hf_lo_hz: 3_000.0,
            hf_hi_hz: 8_000.0,
            snr_min_db: -5.0,
            snr_max_db: 10.0,
            hf_ref: 0.02,
            flat_ref: 0.10,
            w_snr: 0.50,
            w_hf: 0.30,
            w_flat: 0.20,
        }
    }
}

/// Raw clarity measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClarityDetail {
    pub snr_db: f64,
    pub hf_ratio: f64,
    pub spectral_flatness: f64,
}

/// Normalized sub-scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubScores {
    pub snr: f64,
    pub hf: f64,
    pub flat: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClarityReport {
    /// `[0, 100]`, rounded to 4 decimal places.
    pub score: f64,
    pub detail: ClarityDetail,
}

impl ClarityConfig {
    /// Map raw measurements onto `[0, 1]` sub-scores.
    pub fn normalize(&self, detail: &ClarityDetail) -> SubScores {
        let span = self.snr_max_db - self.snr_min_db;
        let snr = if span > 0.0 {
            clamp01((detail.snr_db - self.snr_min_db) / span)
        } else {
            0.0
        };
        let hf = if self.hf_ref > 0.0 {
            clamp01(detail.hf_ratio / self.hf_ref)
        } else {
            0.0
        };
        let flat = if self.flat_ref > 0.0 {
            1.0 - clamp01(detail.spectral_flatness / self.flat_ref)
        } else {
            0.0
        };
        SubScores { snr, hf, flat }
    }

    /// Weights renormalized to sum to 1. Falls back to the defaults when the
    /// configured weights do not sum to a positive value.
    pub fn weights(&self) -> (f64, f64, f64) {
        let (a, b, c) = (self.w_snr, self.w_hf, self.w_flat);
        let sum = a + b + c;
        if sum > 0.0 {
            (a / sum, b / sum, c / sum)
        } else {
            let d = Self::default();
            (d.w_snr, d.w_hf, d.w_flat)
        }
    }

    /// Weighted blend of sub-scores on a 0–100 scale, rounded to 4 places.
    pub fn blend(&self, sub: &SubScores) -> f64 {
        let (w_snr, w_hf, w_flat) = self.weights();
        let raw = 100.0 * (w_snr * sub.snr + w_hf * sub.hf + w_flat * sub.flat);
        round_to(raw.clamp(0.0, 100.0), 4)
    }
}

/// Computes the clarity score for decoded buffers.
pub struct ClarityScorer {
    config: ClarityConfig,
    planner: parking_lot::Mutex<FftPlanner<f64>>,
}

impl ClarityScorer {
    pub fn new(config: ClarityConfig) -> Self {
        Self {
            config,
            planner: parking_lot::Mutex::new(FftPlanner::new()),
        }
    }

    pub fn config(&self) -> &ClarityConfig {
        &self.config
    }

    /// Per-frame energies over the configured window, hop and band, with the
    /// upper edge capped at Nyquist.
    pub fn frame_energies<'a>(&self, audio: &'a AudioBuffer) -> FrameEnergies<'a> {
        let sr = audio.sample_rate();
        let window = ((sr as u64 * self.config.win_ms as u64 / 1000) as usize).max(MIN_WINDOW);
        let hop = ((sr as u64 * self.config.hop_ms as u64 / 1000) as usize).max(1);
        let fft = self.planner.lock().plan_fft_forward(window);
        let nyquist = f64::from(sr) / 2.0;
        FrameEnergies::new(
            audio.samples(),
            sr,
            window,
            hop,
            fft,
            (self.config.hf_lo_hz, self.config.hf_hi_hz.min(nyquist)),
        )
    }

    pub fn score(&self, audio: &AudioBuffer, speech: &[SpeechInterval]) -> ClarityReport {
        let totals = SpectralTotals::accumulate(self.frame_energies(audio));
        let detail = ClarityDetail {
            snr_db: snr_db(audio.samples(), audio.sample_rate(), speech),
            hf_ratio: totals.band_ratio(),
            spectral_flatness: totals.mean_flatness(),
        };

        let sub = self.config.normalize(&detail);
        ClarityReport {
            score: self.config.blend(&sub),
            detail,
        }
    }
}

impl Default for ClarityScorer {
    fn default() -> Self {
        Self::new(ClarityConfig::default())
    }
}

impl std::fmt::Debug for ClarityScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClarityScorer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// SNR in dB from a per-sample speech mask built out of `speech`.
pub fn snr_db(x: &[f32], sample_rate: u32, speech: &[SpeechInterval]) -> f64 {
    let n = x.len();
    if n == 0 {
        return NO_SPEECH_SNR_DB;
    }

    let mut mask = vec![false; n];
    for iv in speech {
        let s = ms_to_samples(iv.start_ms, sample_rate).min(n);
        let e = ms_to_samples(iv.end_ms, sample_rate).min(n);
        if e > s {
            mask[s..e].iter_mut().for_each(|m| *m = true);
        }
    }

    let (mut speech_sum, mut speech_n) = (0.0f64, 0usize);
    let (mut noise_sum, mut noise_n) = (0.0f64, 0usize);
    for (&s, &is_speech) in x.iter().zip(&mask) {
        let p = f64::from(s) * f64::from(s);
        if is_speech {
            speech_sum += p;
            speech_n += 1;
        } else {
            noise_sum += p;
            noise_n += 1;
        }
    }

    if speech_n == 0 {
        return NO_SPEECH_SNR_DB;
    }

    let speech_power = speech_sum / speech_n as f64 + EPS;
    let noise_power = if noise_n < sample_rate as usize {
        (speech_sum + noise_sum) / n as f64 + EPS
    } else {
        noise_sum / noise_n as f64 + EPS
    };

    10.0 * (speech_power / noise_power).log10()
}

/// Band energies and flatness of one STFT frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEnergy {
    /// First sample of the frame.
    pub start: usize,
    /// Power in `[0, hi]`.
    pub base: f64,
    /// Power in `[lo, hi]`.
    pub band: f64,
    /// Geometric over arithmetic mean of the floored power spectrum.
    pub flatness: f64,
}

/// Streaming STFT over a buffer. Frames are produced one at a time so only
/// one window of spectrum is ever held in memory.
pub struct FrameEnergies<'a> {
    x: &'a [f32],
    hop: usize,
    hann: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
    buf: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    bin_hz: f64,
    lo_hz: f64,
    hi_hz: f64,
    next: usize,
    n_frames: usize,
}

impl<'a> FrameEnergies<'a> {
    fn new(
        x: &'a [f32],
        sample_rate: u32,
        window: usize,
        hop: usize,
        fft: Arc<dyn Fft<f64>>,
        (lo_hz, hi_hz): (f64, f64),
    ) -> Self {
        let n_frames = if x.len() < window {
            0
        } else {
            1 + (x.len() - window) / hop
        };
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            x,
            hop,
            hann: build_hann_window(window),
            fft,
            buf: vec![Complex::new(0.0, 0.0); window],
            scratch,
            bin_hz: f64::from(sample_rate) / window as f64,
            lo_hz,
            hi_hz,
            next: 0,
            n_frames,
        }
    }

    /// Window length in samples.
    pub fn window(&self) -> usize {
        self.buf.len()
    }

    /// Hop in samples.
    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Effective `(lo, hi)` band edges in Hz.
    pub fn band_hz(&self) -> (f64, f64) {
        (self.lo_hz, self.hi_hz)
    }
}

impl Iterator for FrameEnergies<'_> {
    type Item = FrameEnergy;

    fn next(&mut self) -> Option<FrameEnergy> {
        if self.next >= self.n_frames {
            return None;
        }
        let start = self.next * self.hop;
        self.next += 1;

        let x = self.x;
        let frame = &x[start..start + self.buf.len()];
        for ((slot, &s), &w) in self.buf.iter_mut().zip(frame).zip(&self.hann) {
            *slot = Complex::new(f64::from(s) * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buf, &mut self.scratch);

        let n_bins = self.buf.len() / 2 + 1;
        let (mut base, mut band, mut log_sum, mut floored_sum) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        for (k, c) in self.buf[..n_bins].iter().enumerate() {
            let p = c.norm_sqr();
            let f = k as f64 * self.bin_hz;
            if f <= self.hi_hz {
                base += p;
                if f >= self.lo_hz {
                    band += p;
                }
            }
            let floored = p.max(EPS);
            log_sum += floored.ln();
            floored_sum += floored;
        }
        let n = n_bins as f64;
        let flatness = (log_sum / n).exp() / (floored_sum / n).max(EPS);

        Some(FrameEnergy {
            start,
            base,
            band,
            flatness,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.n_frames - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for FrameEnergies<'_> {}

/// Running sums over all frames of a buffer.
#[derive(Debug, Default, Clone, Copy)]
struct SpectralTotals {
    base: f64,
    band: f64,
    flatness_sum: f64,
    frames: usize,
}

impl SpectralTotals {
    fn accumulate(frames: impl Iterator<Item = FrameEnergy>) -> Self {
        frames.fold(Self::default(), |mut acc, fr| {
            acc.base += fr.base;
            acc.band += fr.band;
            acc.flatness_sum += fr.flatness;
            acc.frames += 1;
            acc
        })
    }

    /// Energy in `[lo, hi]` over energy in `[0, hi]`.
    fn band_ratio(&self) -> f64 {
        self.band / (self.base + EPS)
    }

    /// With no frames the signal is treated as fully noise-like.
    fn mean_flatness(&self) -> f64 {
        if self.frames == 0 {
            return 1.0;
        }
        self.flatness_sum / self.frames as f64
    }
}

/// Periodic Hann window.
fn build_hann_window(n: usize) -> Vec<f64> {
    use std::f64::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / n as f64).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: u32 = 16_000;

    fn buffer(samples: Vec<f32>) -> AudioBuffer {
        AudioBuffer::new(samples, SR).expect("valid buffer")
    }

    fn sine(amplitude: f32, freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    /// Deterministic uniform noise in [-amp, amp].
    fn noise(amplitude: f32, n: usize, mut seed: u64) -> Vec<f32> {
        (0..n)
            .map(|_| {
                seed = seed
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                let unit = (seed >> 11) as f64 / (1u64 << 53) as f64;
                amplitude * (2.0 * unit as f32 - 1.0)
            })
            .collect()
    }

    fn frames_of(x: &[f32]) -> FrameEnergies<'_> {
        let fft = FftPlanner::<f64>::new().plan_fft_forward(320);
        FrameEnergies::new(x, SR, 320, 160, fft, (3_000.0, 8_000.0))
    }

    fn totals_of(x: &[f32]) -> SpectralTotals {
        SpectralTotals::accumulate(frames_of(x))
    }

    #[test]
    fn silent_buffer_hits_sentinel_and_scores_low() {
        let report = ClarityScorer::default().score(&buffer(vec![0.0; SR as usize * 2]), &[]);
        assert_eq!(report.detail.snr_db, NO_SPEECH_SNR_DB);
        assert_eq!(report.detail.hf_ratio, 0.0);
        assert_abs_diff_eq!(report.detail.spectral_flatness, 1.0, epsilon = 1e-9);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn score_stays_in_range_for_varied_inputs() {
        let scorer = ClarityScorer::default();
        let speech = [SpeechInterval::new(0, 1_000)];
        let inputs = [
            sine(0.5, 440.0, SR as usize * 2),
            sine(0.9, 5_000.0, SR as usize * 2),
            noise(0.8, SR as usize * 2, 7),
            vec![0.0; 100],
        ];
        for x in inputs {
            let report = scorer.score(&buffer(x), &speech);
            assert!((0.0..=100.0).contains(&report.score), "{report:?}");
        }
    }

    #[test]
    fn snr_uses_non_speech_region_as_noise() {
        // 1.5 s at 0.01 then 1.5 s at 0.1 (constant magnitude) → 20 dB.
        let mut x = vec![0.01f32; 24_000];
        x.extend(vec![0.1f32; 24_000]);
        let snr = snr_db(&x, SR, &[SpeechInterval::new(1_500, 3_000)]);
        assert_abs_diff_eq!(snr, 20.0, epsilon = 1e-3);
    }

    #[test]
    fn snr_falls_back_to_whole_signal_when_noise_is_short() {
        // Speech covers 2.5 s of 3 s: only 0.5 s of non-speech → whole-signal noise.
        let mut x = vec![0.1f32; 40_000];
        x.extend(vec![0.01f32; 8_000]);
        let snr = snr_db(&x, SR, &[SpeechInterval::new(0, 2_500)]);

        let speech_p = 0.01f64;
        let whole_p = (40_000.0 * 0.01 + 8_000.0 * 0.0001) / 48_000.0;
        let expected = 10.0 * ((speech_p + EPS) / (whole_p + EPS)).log10();
        assert_abs_diff_eq!(snr, expected, epsilon = 1e-3);
        assert!(snr < 1.0, "fallback keeps the estimate near 0 dB: {snr}");
    }

    #[test]
    fn snr_intervals_outside_buffer_are_clamped() {
        let x = vec![0.1f32; 1_600];
        assert_eq!(snr_db(&x, SR, &[SpeechInterval::new(5_000, 6_000)]), NO_SPEECH_SNR_DB);
    }

    #[test]
    fn hf_ratio_separates_low_and_high_tones() {
        let low = totals_of(&sine(0.5, 500.0, SR as usize));
        let high = totals_of(&sine(0.5, 4_000.0, SR as usize));
        assert!(low.band_ratio() < 0.01);
        assert!(high.band_ratio() > 0.99);
    }

    #[test]
    fn flatness_is_low_for_tones_and_high_for_noise() {
        let tone = totals_of(&sine(0.5, 1_000.0, SR as usize)).mean_flatness();
        let hiss = totals_of(&noise(0.5, SR as usize, 42)).mean_flatness();
        assert!(tone < 0.05, "tone flatness {tone}");
        assert!(hiss > 0.3, "noise flatness {hiss}");
    }

    #[test]
    fn shorter_than_window_has_no_frames() {
        let x = [0.5f32; 100];
        assert_eq!(frames_of(&x).len(), 0);
        let totals = totals_of(&x);
        assert_eq!(totals.band_ratio(), 0.0);
        assert_eq!(totals.mean_flatness(), 1.0);
    }

    #[test]
    fn frame_count_has_no_padding() {
        // 1 + (1000 - 320) / 160 = 5 frames
        let x = [0.1f32; 1_000];
        let starts: Vec<usize> = frames_of(&x).map(|f| f.start).collect();
        assert_eq!(starts, vec![0, 160, 320, 480, 640]);
    }

    #[test]
    fn frames_sum_to_the_scored_totals() {
        let x = sine(0.5, 4_000.0, SR as usize);
        let per_frame: Vec<FrameEnergy> = frames_of(&x).collect();
        let band: f64 = per_frame.iter().map(|f| f.band).sum();
        let base: f64 = per_frame.iter().map(|f| f.base).sum();
        assert!(per_frame.iter().all(|f| f.band <= f.base + 1e-9));
        assert_abs_diff_eq!(band / (base + EPS), totals_of(&x).band_ratio(), epsilon = 1e-12);
    }

    #[test]
    fn scorer_frames_use_config_geometry() {
        let scorer = ClarityScorer::default();
        let audio = buffer(vec![0.1; SR as usize]);
        let frames = scorer.frame_energies(&audio);
        assert_eq!(frames.window(), 320);
        assert_eq!(frames.hop(), 160);
        assert_eq!(frames.band_hz(), (3_000.0, 8_000.0));
        assert_eq!(frames.len(), 1 + (16_000 - 320) / 160);
    }

    #[test]
    fn blend_is_monotonic_in_each_sub_score() {
        let cfg = ClarityConfig::default();
        let base = SubScores {
            snr: 0.4,
            hf: 0.4,
            flat: 0.4,
        };
        let b0 = cfg.blend(&base);
        assert!(cfg.blend(&SubScores { snr: 0.8, ..base }) > b0);
        assert!(cfg.blend(&SubScores { hf: 0.8, ..base }) > b0);
        assert!(cfg.blend(&SubScores { flat: 0.8, ..base }) > b0);
        assert!(cfg.blend(&SubScores { snr: 0.1, ..base }) < b0);
    }

    #[test]
    fn weights_are_renormalized() {
        let cfg = ClarityConfig {
            w_snr: 5.0,
            w_hf: 3.0,
            w_flat: 2.0,
            ..ClarityConfig::default()
        };
        let (a, b, c) = cfg.weights();
        assert_abs_diff_eq!(a + b + c, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(a, 0.5, epsilon = 1e-12);

        let all_ones = SubScores {
            snr: 1.0,
            hf: 1.0,
            flat: 1.0,
        };
        assert_eq!(cfg.blend(&all_ones), 100.0);
    }

    #[test]
    fn non_positive_weights_fall_back_to_defaults() {
        let cfg = ClarityConfig {
            w_snr: 0.0,
            w_hf: 0.0,
            w_flat: 0.0,
            ..ClarityConfig::default()
        };
        assert_eq!(cfg.weights(), (0.5, 0.3, 0.2));

        let cfg = ClarityConfig {
            w_snr: 1.0,
            w_hf: -2.0,
            w_flat: 0.5,
            ..ClarityConfig::default()
        };
        assert_eq!(cfg.weights(), (0.5, 0.3, 0.2));
    }

    #[test]
    fn negative_weights_are_renormalized_as_given() {
        let cfg = ClarityConfig {
            w_snr: 2.0,
            w_hf: -1.0,
            w_flat: 1.0,
            ..ClarityConfig::default()
        };
        let (a, b, c) = cfg.weights();
        assert_abs_diff_eq!(a, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b, -0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(c, 0.5, epsilon = 1e-12);

        let only_hf = SubScores {
            snr: 0.0,
            hf: 1.0,
            flat: 0.0,
        };
        assert_eq!(cfg.blend(&only_hf), 0.0);
    }

    #[test]
    fn normalize_maps_reference_points() {
        let cfg = ClarityConfig::default();
        let sub = cfg.normalize(&ClarityDetail {
            snr_db: 10.0,
            hf_ratio: 0.02,
            spectral_flatness: 0.0,
        });
        assert_eq!(sub, SubScores { snr: 1.0, hf: 1.0, flat: 1.0 });

        let sub = cfg.normalize(&ClarityDetail {
            snr_db: -5.0,
            hf_ratio: 0.0,
            spectral_flatness: 0.5,
        });
        assert_eq!(sub, SubScores { snr: 0.0, hf: 0.0, flat: 0.0 });
    }
}
