//! # aqc-core
//!
//! Audio quality-control engine: objective QC verdicts (silence, clipping,
//! speech presence/ratio, clarity) for uploaded audio files.
//!
//! ## Architecture
//!
//! ```text
//! upload ─► intake (spool, size limit) ─► QcEngine::run
//!                                            │
//!                       AudioDecoder (spawn_blocking, ffmpeg)
//!                                            │
//!                          read_wav ─► AudioBuffer (validated)
//!                                            │
//!              silence ─► AdmissionGate ─► InferenceBackend (shared | pool)
//!                                            │
//!                    merge_segments ─► clipping ─► clarity ─► QcVerdict
//! ```
//!
//! Decode and metrics run unthrottled on the blocking pool; only the VAD call
//! is bounded by the admission gate.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod inference;
pub mod intake;
pub mod metrics;
pub mod stats;
pub mod vad;
pub mod wire;

// Convenience re-exports for downstream crates
pub use audio::{AudioBuffer, AudioDecoder, FfmpegDecoder};
pub use config::{load_config, AppConfig};
pub use engine::{QcEngine, QcFailure, QcOutcome};
pub use error::{AqcError, Result};
pub use inference::{AdmissionGate, DetectorFactory, InferenceBackend, InferenceStrategy};
pub use intake::handle_upload;
pub use metrics::SpeechInterval;
pub use stats::{ServiceStats, StatsSnapshot};
pub use vad::{EnergyDetector, SpeechDetector};
pub use wire::{ApiResponse, HealthReport, QcVerdict, StatusCode};

#[cfg(feature = "onnx")]
pub use vad::SileroDetector;
