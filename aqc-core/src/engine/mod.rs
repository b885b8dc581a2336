//! `QcEngine`: long-lived QC service state shared by every request.
//!
//! ## Lifecycle
//!
//! ```text
//! QcEngine::builder(config)
//!     └─► build()        → detectors built + warmed (blocking)
//!         └─► run() × N  → one QcOutcome per upload (async, concurrent)
//!             └─► shutdown() → gate closed, pool workers joined
//! ```
//!
//! `QcEngine` is `Send + Sync`; wrap it in an `Arc` to share between tasks.

pub mod pipeline;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, info_span, Instrument};

use crate::audio::{AudioDecoder, FfmpegDecoder};
use crate::config::{AppConfig, AudioQcConfig, VadBackend};
use crate::error::{AqcError, Result};
use crate::inference::{AdmissionGate, DetectorFactory, InferenceBackend};
use crate::metrics::{ClarityScorer, ClippingDetector, SilenceDetector};
use crate::stats::ServiceStats;
use crate::vad::{EnergyDetector, SpeechDetector};
use crate::wire::{ApiResponse, HealthReport, QcVerdict, StatusCode};

/// A request that ended with a non-OK status.
#[derive(Debug, thiserror::Error)]
#[error("{code}")]
pub struct QcFailure {
    pub code: StatusCode,
    /// Underlying collaborator error, when there is one.
    #[source]
    pub source: Option<AqcError>,
}

impl QcFailure {
    pub fn new(code: StatusCode) -> Self {
        Self { code, source: None }
    }

    pub fn caused_by(code: StatusCode, source: AqcError) -> Self {
        Self {
            code,
            source: Some(source),
        }
    }
}

pub type QcOutcome = std::result::Result<QcVerdict, QcFailure>;

pub struct QcEngine {
    version: String,
    config: AudioQcConfig,
    decoder: Arc<dyn AudioDecoder>,
    backend: InferenceBackend,
    gate: AdmissionGate,
    stats: Arc<ServiceStats>,
    silence: SilenceDetector,
    clipping: ClippingDetector,
    clarity: Arc<ClarityScorer>,
}

impl QcEngine {
    pub fn builder(config: AppConfig) -> QcEngineBuilder {
        QcEngineBuilder {
            config,
            decoder: None,
            factory: None,
            stats: None,
        }
    }

    /// Run the QC pipeline for one spooled upload of `size_bytes` bytes.
    ///
    /// Records exactly one begin and one terminal transition in the stats.
    pub async fn run(&self, request_id: &str, upload: &Path, size_bytes: u64) -> QcOutcome {
        let span = info_span!("qc", request_id = %request_id);
        async {
            let ticket = self.stats.ticket(request_id);
            let outcome = pipeline::run_stages(self, upload, size_bytes).await;
            match &outcome {
                Ok(_) => ticket.succeed(),
                Err(_) => ticket.fail(),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// [`run`](Self::run) wrapped in the response envelope.
    pub async fn process(&self, request_id: &str, upload: &Path, size_bytes: u64) -> ApiResponse {
        match self.run(request_id, upload, size_bytes).await {
            Ok(verdict) => ApiResponse::ok(request_id, verdict),
            Err(failure) => ApiResponse::failure(request_id, failure.code),
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::healthy(self.version.clone(), self.stats.snapshot())
    }

    pub fn config(&self) -> &AudioQcConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<ServiceStats> {
        &self.stats
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Close the admission gate, then stop pool workers.
    ///
    /// Requests already holding a slot finish; waiting ones fail with
    /// VAD_INFER_FAILED.
    pub fn shutdown(&self) {
        self.gate.close();
        self.backend.shutdown();
        info!("qc engine stopped");
    }
}

impl std::fmt::Debug for QcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QcEngine")
            .field("version", &self.version)
            .field("strategy", &self.backend.strategy())
            .field("infer_concurrency", &self.gate.limit())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`QcEngine`]. Decoder and detector default to the ones named
/// in the config; tests swap in fakes.
pub struct QcEngineBuilder {
    config: AppConfig,
    decoder: Option<Arc<dyn AudioDecoder>>,
    factory: Option<DetectorFactory>,
    stats: Option<Arc<ServiceStats>>,
}

impl QcEngineBuilder {
    pub fn decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn detector_factory(mut self, factory: DetectorFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn stats(mut self, stats: Arc<ServiceStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Validate the config, build and warm up the detectors. Blocking.
    pub fn build(self) -> Result<QcEngine> {
        self.config.validate()?;
        let AppConfig { server, audio_qc } = self.config;

        let decoder = match self.decoder {
            Some(d) => d,
            None => Arc::new(FfmpegDecoder::new(
                audio_qc.ffmpeg_program.clone(),
                audio_qc.decode_timeout(),
            )),
        };
        let factory = match self.factory {
            Some(f) => f,
            None => detector_factory(&audio_qc)?,
        };

        info!(
            backend = ?audio_qc.vad_backend,
            strategy = ?audio_qc.vad_strategy,
            workers = audio_qc.vad_num_workers,
            infer_concurrency = server.infer_concurrency,
            "building qc engine"
        );
        let backend = InferenceBackend::build(audio_qc.vad_strategy, factory, audio_qc.vad_num_workers)?;

        Ok(QcEngine {
            version: server.version,
            gate: AdmissionGate::new(server.infer_concurrency),
            stats: self.stats.unwrap_or_default(),
            silence: SilenceDetector::new(audio_qc.silence_dbfs),
            clipping: ClippingDetector::new(audio_qc.clip_threshold, audio_qc.clip_min_run),
            clarity: Arc::new(ClarityScorer::new(audio_qc.clarity.clone())),
            decoder,
            backend,
            config: audio_qc,
        })
    }
}

/// Factory for the detector named by `vad_backend`.
pub fn detector_factory(cfg: &AudioQcConfig) -> Result<DetectorFactory> {
    match cfg.vad_backend {
        VadBackend::Energy => {
            let energy = cfg.energy_vad.clone();
            Ok(Arc::new(move || {
                Ok(Box::new(EnergyDetector::new(energy.clone())) as Box<dyn SpeechDetector>)
            }))
        }
        #[cfg(feature = "onnx")]
        VadBackend::Silero => {
            let path = cfg
                .silero_model_path
                .clone()
                .ok_or_else(|| AqcError::Config("audio_qc.silero_model_path is not set".into()))?;
            let threshold = cfg.silero_threshold;
            let min_speech_ms = cfg.energy_vad.min_speech_ms;
            Ok(Arc::new(move || {
                let detector = crate::vad::SileroDetector::new(&path, threshold, min_speech_ms)?;
                Ok(Box::new(detector) as Box<dyn SpeechDetector>)
            }))
        }
        #[cfg(not(feature = "onnx"))]
        VadBackend::Silero => Err(AqcError::Config(
            "vad_backend = \"silero\" requires the `onnx` feature".into(),
        )),
    }
}
