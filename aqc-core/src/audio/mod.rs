//! Per-request audio: decode collaborator, WAV reader, validated sample buffer.
//!
//! ```text
//! upload ──► AudioDecoder::decode ──► 16 kHz mono WAV ──► read_wav ──► PcmData
//!                                                                      │
//!                                                         AudioBuffer::new (validates)
//! ```

pub mod decode;
pub mod wav;

pub use decode::{AudioDecoder, FfmpegDecoder};
pub use wav::{read_wav, PcmData};

use crate::error::{AqcError, Result};

/// Sample rate every decoded file must arrive at.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// A validated block of mono PCM samples owned by one request.
///
/// Construction guarantees a positive sample rate, at least one sample, and
/// no NaN/Inf values. The buffer is never mutated after that.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    duration_ms: u64,
}

impl AudioBuffer {
    /// Validate and wrap decoded samples.
    ///
    /// # Errors
    /// `AqcError::InvalidAudio` if the rate is zero, the buffer is empty, or
    /// any sample is non-finite.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(AqcError::InvalidAudio("sample rate is zero".into()));
        }
        if samples.is_empty() {
            return Err(AqcError::InvalidAudio("no samples".into()));
        }
        if let Some(idx) = samples.iter().position(|s| !s.is_finite()) {
            return Err(AqcError::InvalidAudio(format!(
                "non-finite sample at index {idx}"
            )));
        }

        let duration_ms = duration_ms(samples.len(), sample_rate);
        Ok(Self {
            samples,
            sample_rate,
            duration_ms,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// `round(len * 1000 / sample_rate)`.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always `false` for a constructed buffer; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Duration of `len` samples at `sample_rate`, rounded to whole milliseconds.
pub fn duration_ms(len: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (len as f64 * 1000.0 / f64::from(sample_rate)).round() as u64
}

/// Convert a millisecond offset to a sample index, `round(ms * sr / 1000)`.
pub fn ms_to_samples(ms: u64, sample_rate: u32) -> usize {
    (ms as f64 * f64::from(sample_rate) / 1000.0).round() as usize
}
