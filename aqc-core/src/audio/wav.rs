//! WAV → mono f32 reader built on `hound`.
//!
//! The decoder is expected to hand over 16 kHz mono `pcm_s16le`, but the reader
//! accepts any integer width up to 32 bits or 32-bit float, and averages
//! multi-channel frames down to mono. Rate and value checks are left to the
//! caller so each failure maps to its own status code.

use std::path::Path;

use crate::error::{AqcError, Result};

/// Raw decoded PCM, not yet validated.
#[derive(Debug, Clone)]
pub struct PcmData {
    /// Mono samples, normalized to [-1, 1] for integer formats.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the source file before downmixing.
    pub channels: u16,
}

/// Read a WAV file into mono f32 samples.
///
/// # Errors
/// `AqcError::AudioRead` when the file cannot be opened or parsed, or the
/// header describes an unsupported layout.
pub fn read_wav(path: &Path) -> Result<PcmData> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| AqcError::AudioRead(e.to_string()))?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(AqcError::AudioRead("wav header reports zero channels".into()));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => {
            if spec.bits_per_sample != 32 {
                return Err(AqcError::AudioRead(format!(
                    "unsupported float width: {} bits",
                    spec.bits_per_sample
                )));
            }
            reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| AqcError::AudioRead(e.to_string()))?
        }
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(AqcError::AudioRead(format!(
                    "unsupported integer width: {} bits",
                    spec.bits_per_sample
                )));
            }
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| AqcError::AudioRead(e.to_string()))?
        }
    };

    let samples = downmix(&interleaved, spec.channels as usize);
    Ok(PcmData {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn write_i16(path: &Path, channels: u16, sample_rate: u32, frames: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
        for s in frames {
            writer.write_sample(*s).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }

    #[test]
    fn reads_mono_i16_normalized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mono.wav");
        write_i16(&path, 1, 16_000, &[0, 16_384, -32_768]);

        let pcm = read_wav(&path).expect("read wav");
        assert_eq!(pcm.sample_rate, 16_000);
        assert_eq!(pcm.channels, 1);
        assert_eq!(pcm.samples.len(), 3);
        assert_abs_diff_eq!(pcm.samples[1], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(pcm.samples[2], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stereo.wav");
        write_i16(&path, 2, 8_000, &[16_384, 0, -16_384, -16_384]);

        let pcm = read_wav(&path).expect("read wav");
        assert_eq!(pcm.sample_rate, 8_000);
        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.samples.len(), 2);
        assert_abs_diff_eq!(pcm.samples[0], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(pcm.samples[1], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn reads_float_samples_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
        for s in [0.25f32, -0.75] {
            writer.write_sample(s).expect("write sample");
        }
        writer.finalize().expect("finalize wav");

        let pcm = read_wav(&path).expect("read wav");
        assert_eq!(pcm.samples, vec![0.25, -0.75]);
    }

    #[test]
    fn garbage_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"definitely not riff").expect("write garbage");

        let err = read_wav(&path).unwrap_err();
        assert!(matches!(err, AqcError::AudioRead(_)));
    }
}
