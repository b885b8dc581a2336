//! Service configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or a missing section) is a
//! valid configuration. `load_config` parses and then validates.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AqcError, Result};
use crate::inference::InferenceStrategy;
use crate::metrics::ClarityConfig;
use crate::vad::EnergyVadConfig;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio_qc: AudioQcConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Reported in the health endpoint.
    pub version: String,
    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Upper bound on the blocking pool (decode, file I/O, metrics).
    pub threadpool_workers: usize,
    /// Admission gate slots around the VAD call.
    #[serde(alias = "gpu_infer_concurrency")]
    pub infer_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".into(),
            log_level: "info".into(),
            threadpool_workers: 8,
            infer_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadBackend {
    #[default]
    Energy,
    /// Requires the `onnx` feature and `silero_model_path`.
    Silero,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioQcConfig {
    pub vad_backend: VadBackend,
    pub vad_strategy: InferenceStrategy,
    /// Detector instances for the pool strategy.
    pub vad_num_workers: usize,
    pub vad_timeout_ms: u64,
    pub silero_model_path: Option<PathBuf>,
    pub silero_threshold: f32,

    pub ffmpeg_program: String,
    pub decode_timeout_ms: u64,

    pub return_segments: bool,
    pub merge_gap_ms: u64,
    pub silence_dbfs: f64,
    pub clip_threshold: f32,
    pub clip_min_run: usize,

    pub max_file_size_mb: u64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,

    pub need_clarity: bool,
    pub clarity: ClarityConfig,
    pub energy_vad: EnergyVadConfig,
}

impl Default for AudioQcConfig {
    fn default() -> Self {
        Self {
            vad_backend: VadBackend::Energy,
            vad_strategy: InferenceStrategy::Shared,
            vad_num_workers: 2,
            vad_timeout_ms: 300_000,
            silero_model_path: None,
            silero_threshold: 0.5,
            ffmpeg_program: "ffmpeg".into(),
            decode_timeout_ms: 120_000,
            return_segments: true,
            merge_gap_ms: 120,
            silence_dbfs: -60.0,
            clip_threshold: 0.99,
            clip_min_run: 10,
            max_file_size_mb: 300,
            min_duration_ms: 180_000,
            max_duration_ms: 3_300_000,
            need_clarity: true,
            clarity: ClarityConfig::default(),
            energy_vad: EnergyVadConfig::default(),
        }
    }
}

impl AudioQcConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn vad_timeout(&self) -> Duration {
        Duration::from_millis(self.vad_timeout_ms)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }
}

impl AppConfig {
    /// Reject configurations the service cannot run with.
    ///
    /// # Errors
    /// `AqcError::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        let a = &self.audio_qc;
        let c = &a.clarity;

        let checks: [(bool, &str); 17] = [
            (s.threadpool_workers == 0, "server.threadpool_workers must be > 0"),
            (s.infer_concurrency == 0, "server.infer_concurrency must be > 0"),
            (a.vad_num_workers == 0, "audio_qc.vad_num_workers must be > 0"),
            (a.vad_timeout_ms == 0, "audio_qc.vad_timeout_ms must be > 0"),
            (a.decode_timeout_ms == 0, "audio_qc.decode_timeout_ms must be > 0"),
            (a.max_file_size_mb == 0, "audio_qc.max_file_size_mb must be > 0"),
            (a.max_duration_ms == 0, "audio_qc.max_duration_ms must be > 0"),
            (
                a.min_duration_ms > a.max_duration_ms,
                "audio_qc.min_duration_ms must be <= audio_qc.max_duration_ms",
            ),
            (
                !(a.clip_threshold > 0.0 && a.clip_threshold <= 1.0),
                "audio_qc.clip_threshold must be in (0, 1]",
            ),
            (a.clip_min_run == 0, "audio_qc.clip_min_run must be > 0"),
            (
                !(0.0..=1.0).contains(&a.silero_threshold),
                "audio_qc.silero_threshold must be in [0, 1]",
            ),
            (c.win_ms == 0, "audio_qc.clarity.win_ms must be > 0"),
            (c.hop_ms == 0, "audio_qc.clarity.hop_ms must be > 0"),
            (
                c.snr_max_db <= c.snr_min_db,
                "audio_qc.clarity.snr_max_db must be > snr_min_db",
            ),
            (c.hf_ref <= 0.0, "audio_qc.clarity.hf_ref must be > 0"),
            (c.flat_ref <= 0.0, "audio_qc.clarity.flat_ref must be > 0"),
            (a.energy_vad.frame_ms == 0, "audio_qc.energy_vad.frame_ms must be > 0"),
        ];

        if let Some((_, msg)) = checks.iter().find(|(bad, _)| *bad) {
            return Err(AqcError::Config((*msg).to_string()));
        }

        if a.vad_backend == VadBackend::Silero && a.silero_model_path.is_none() {
            return Err(AqcError::Config(
                "audio_qc.silero_model_path is required for vad_backend = \"silero\"".into(),
            ));
        }

        Ok(())
    }
}

/// Parse TOML text into a validated config.
pub fn parse_config(text: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(text).map_err(|e| AqcError::Config(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Read, parse and validate a config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| AqcError::Config(format!("{}: {e}", path.display())))?;
    let cfg = parse_config(&text)?;
    info!(path = %path.display(), "configuration loaded");
    Ok(cfg)
}
