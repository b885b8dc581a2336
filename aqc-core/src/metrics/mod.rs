//! Deterministic signal metrics computed per request.
//!
//! Every detector here is pure: it reads an [`AudioBuffer`](crate::audio::AudioBuffer)
//! and returns a value. None of them can fail once the buffer exists.

pub mod clarity;
pub mod clipping;
pub mod segments;
pub mod silence;

pub use clarity::{
    ClarityConfig, ClarityDetail, ClarityReport, ClarityScorer, FrameEnergies, FrameEnergy,
};
pub use clipping::{ClippingDetector, ClippingReport};
pub use segments::{merge_segments, speech_ms, SpeechInterval};
pub use silence::SilenceDetector;

/// Floor used wherever a power or amplitude would otherwise hit zero.
pub const EPS: f64 = 1e-12;

/// Clamp to `[0, 1]`.
pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// `20 * log10(max(sqrt(mean(x^2) + eps), eps))`.
///
/// Empty input is treated as digital silence.
pub fn rms_dbfs(samples: &[f32]) -> f64 {
    let mean_sq = if samples.is_empty() {
        0.0
    } else {
        samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum::<f64>() / samples.len() as f64
    };
    let rms = (mean_sq + EPS).sqrt();
    20.0 * rms.max(EPS).log10()
}

/// Round to `places` decimal places.
pub fn round_to(x: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (x * factor).round() / factor
}
