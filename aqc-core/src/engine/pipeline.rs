//! The per-request QC stages.
//!
//! ```text
//! size ─► decode ─► read ─► rate ─► validate ─► duration ─► silence
//!                                                              │
//!            verdict ◄─ clarity ◄─ clipping ◄─ merge ◄─ [gate] VAD
//! ```
//!
//! Strictly sequential and fail-fast: the first failing stage decides the
//! status code and nothing after it runs. CPU-bound stages go through
//! `spawn_blocking`; the VAD stage is the only one behind the admission gate.
//! The scratch directory holding the decoded WAV lives for the whole call
//! and is removed on every exit path.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{QcEngine, QcFailure, QcOutcome};
use crate::audio::{read_wav, AudioBuffer, TARGET_SAMPLE_RATE};
use crate::error::{AqcError, Result};
use crate::metrics::{clamp01, merge_segments, round_to, speech_ms, ClarityDetail};
use crate::wire::{QcVerdict, StatusCode, VadSummary};

/// Minimum merged speech for `has_speech`.
pub const MIN_SPEECH_MS: u64 = 300;

const DECODED_NAME: &str = "input_16k_mono.wav";

pub(crate) async fn run_stages(engine: &QcEngine, upload: &Path, size_bytes: u64) -> QcOutcome {
    let cfg = &engine.config;

    // ── 1. size ──────────────────────────────────────────────────────────
    let max_bytes = cfg.max_file_size_bytes();
    if size_bytes > max_bytes {
        warn!(size_bytes, max_bytes, "file too large");
        return Err(QcFailure::new(StatusCode::FileTooLarge));
    }

    // ── 2. decode ────────────────────────────────────────────────────────
    let workdir = tempfile::Builder::new()
        .prefix("aqc_")
        .tempdir()
        .map_err(|e| {
            error!(error = %e, "could not create scratch dir");
            QcFailure::caused_by(StatusCode::DecodeFailed, e.into())
        })?;
    let wav_path = workdir.path().join(DECODED_NAME);

    info!(size_bytes, "decoding upload");
    {
        let decoder = Arc::clone(&engine.decoder);
        let input = upload.to_path_buf();
        let output = wav_path.clone();
        blocking(move || decoder.decode(&input, &output))
            .await
            .map_err(|e| {
                error!(error = %e, "decode failed");
                QcFailure::caused_by(StatusCode::DecodeFailed, e)
            })?;
    }
    debug!(wav = %wav_path.display(), "decode complete");

    // ── 3. read + validate ───────────────────────────────────────────────
    let pcm = {
        let path = wav_path.clone();
        blocking(move || read_wav(&path)).await.map_err(|e| {
            error!(error = %e, "could not read decoded wav");
            QcFailure::caused_by(StatusCode::InvalidAudio, e)
        })?
    };

    if pcm.sample_rate != TARGET_SAMPLE_RATE {
        warn!(sample_rate = pcm.sample_rate, "decoded audio has wrong sample rate");
        return Err(QcFailure::new(StatusCode::ResampleFailed));
    }

    let audio = AudioBuffer::new(pcm.samples, pcm.sample_rate).map_err(|e| {
        warn!(error = %e, "decoded audio rejected");
        QcFailure::caused_by(StatusCode::InvalidAudio, e)
    })?;
    info!(
        sample_rate = audio.sample_rate(),
        duration_ms = audio.duration_ms(),
        channels = pcm.channels,
        "audio loaded"
    );

    // ── 4. duration ──────────────────────────────────────────────────────
    let duration_ms = audio.duration_ms();
    if !(cfg.min_duration_ms..=cfg.max_duration_ms).contains(&duration_ms) {
        warn!(
            duration_ms,
            min = cfg.min_duration_ms,
            max = cfg.max_duration_ms,
            "duration out of range"
        );
        return Err(QcFailure::new(StatusCode::DurationOutOfRange));
    }

    let audio = Arc::new(audio);

    // ── 5. silence ───────────────────────────────────────────────────────
    let is_silent = {
        let audio = Arc::clone(&audio);
        let detector = engine.silence.clone();
        blocking(move || Ok(detector.is_silent(&audio)))
            .await
            .map_err(|e| QcFailure::caused_by(StatusCode::InvalidAudio, e))?
    };
    info!(is_silent, "silence check done");

    // ── 6. gated VAD ─────────────────────────────────────────────────────
    let raw_segments = detect_speech(engine, &wav_path).await.map_err(|e| {
        error!(error = %e, "vad inference failed");
        QcFailure::caused_by(StatusCode::VadInferFailed, e)
    })?;
    debug!(segments = ?raw_segments, "raw vad segments");

    // ── 7. merge + ratio ─────────────────────────────────────────────────
    let merged = merge_segments(&raw_segments, cfg.merge_gap_ms);
    debug!(merge_gap_ms = cfg.merge_gap_ms, segments = ?merged, "merged vad segments");
    let speech = speech_ms(&merged);
    let speech_ratio = round_to(clamp01(speech as f64 / duration_ms.max(1) as f64), 4);
    let has_speech = speech >= MIN_SPEECH_MS;
    info!(speech_ms = speech, speech_ratio, has_speech, "speech analysis done");

    // ── 8–9. clipping + clarity ──────────────────────────────────────────
    let need_clarity = cfg.need_clarity;
    let (clipping, clarity) = {
        let audio = Arc::clone(&audio);
        let clip_detector = engine.clipping.clone();
        let scorer = Arc::clone(&engine.clarity);
        let merged = merged.clone();
        blocking(move || {
            let clipping = clip_detector.detect(&audio);
            let clarity = need_clarity.then(|| scorer.score(&audio, &merged));
            Ok((clipping, clarity))
        })
        .await
        .map_err(|e| QcFailure::caused_by(StatusCode::InvalidAudio, e))?
    };
    info!(clip_count = clipping.count, "clipping check done");
    if let Some(report) = &clarity {
        info!(clarity = report.score, snr_db = report.detail.snr_db, "clarity scored");
    }

    // ── 10. verdict ──────────────────────────────────────────────────────
    Ok(QcVerdict {
        is_silent,
        has_speech,
        speech_ratio,
        clip_count: clipping.count,
        clip_times_ms: clipping.onsets_ms,
        clarity: clarity.as_ref().map(|r| r.score),
        clarity_detail: clarity.map(|r| rounded_detail(&r.detail)),
        vad: VadSummary {
            segments_ms: if cfg.return_segments { merged } else { Vec::new() },
            speech_ms: speech,
        },
    })
}

/// Acquire a gate slot, run the detector under the timeout, release.
async fn detect_speech(
    engine: &QcEngine,
    wav_path: &Path,
) -> Result<Vec<crate::metrics::SpeechInterval>> {
    let _permit = engine.gate.acquire().await?;
    debug!(available = engine.gate.available(), "vad slot held");

    let timeout = engine.config.vad_timeout();
    match tokio::time::timeout(timeout, engine.backend.detect(wav_path.to_path_buf())).await {
        Ok(result) => result,
        Err(_) => Err(AqcError::InferenceTimeout {
            timeout_ms: engine.config.vad_timeout_ms,
        }),
    }
}

fn rounded_detail(d: &ClarityDetail) -> ClarityDetail {
    ClarityDetail {
        snr_db: round_to(d.snr_db, 4),
        hf_ratio: round_to(d.hf_ratio, 6),
        spectral_flatness: round_to(d.spectral_flatness, 6),
    }
}

/// Run `f` on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AqcError::Other(anyhow::anyhow!("blocking task failed: {e}")))?
}
