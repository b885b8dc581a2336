//! Speech-detector execution strategies.
//!
//! The orchestrator sees one async call, [`InferenceBackend::detect`]. Behind
//! it sits one of two isolation strategies:
//!
//! - `Shared`: a single detector behind `DetectorHandle`'s
//!   `parking_lot::Mutex`, invoked on the blocking pool. True concurrency 1.
//! - `Pool`: `W` detectors, each owned by its own worker thread
//!   ([`DetectorPool`]). True parallelism `W`.
//!
//! Neither strategy bounds admission; that is [`AdmissionGate`]'s job.

pub mod gate;
pub mod pool;

pub use gate::{AdmissionGate, GatePermit};
pub use pool::DetectorPool;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AqcError, Result};
use crate::metrics::SpeechInterval;
use crate::vad::SpeechDetector;

/// Builds a fresh, un-warmed detector. Called once for the shared strategy
/// and once per worker thread for the pool strategy.
pub type DetectorFactory = Arc<dyn Fn() -> Result<Box<dyn SpeechDetector>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceStrategy {
    #[default]
    Shared,
    Pool,
}

/// Thread-safe reference-counted handle to any `SpeechDetector` implementor.
///
/// `parking_lot::Mutex` does not poison, so a panicking detector call leaves
/// the handle usable for the next request.
#[derive(Clone)]
pub struct DetectorHandle(pub Arc<Mutex<dyn SpeechDetector>>);

impl DetectorHandle {
    pub fn new<D: SpeechDetector>(detector: D) -> Self {
        Self(Arc::new(Mutex::new(detector)))
    }

    pub fn from_boxed(detector: Box<dyn SpeechDetector>) -> Self {
        Self(Arc::new(Mutex::new(BoxedDetector(detector))))
    }
}

impl std::fmt::Debug for DetectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorHandle").finish_non_exhaustive()
    }
}

/// Adapts a factory-built `Box<dyn SpeechDetector>` into a sized detector.
struct BoxedDetector(Box<dyn SpeechDetector>);

impl SpeechDetector for BoxedDetector {
    fn warm_up(&mut self) -> Result<()> {
        self.0.warm_up()
    }

    fn detect(&mut self, pcm_path: &std::path::Path) -> Result<Vec<SpeechInterval>> {
        self.0.detect(pcm_path)
    }
}

#[derive(Debug, Clone)]
pub enum InferenceBackend {
    Shared(DetectorHandle),
    Pool(Arc<DetectorPool>),
}

impl InferenceBackend {
    /// Build and warm up the detectors for `strategy`. Blocking.
    ///
    /// `workers` is ignored for the shared strategy.
    pub fn build(strategy: InferenceStrategy, factory: DetectorFactory, workers: usize) -> Result<Self> {
        match strategy {
            InferenceStrategy::Shared => {
                let handle = DetectorHandle::from_boxed(factory()?);
                handle.0.lock().warm_up()?;
                info!("shared vad detector ready");
                Ok(Self::Shared(handle))
            }
            InferenceStrategy::Pool => Ok(Self::Pool(Arc::new(DetectorPool::start(workers, factory)?))),
        }
    }

    pub fn strategy(&self) -> InferenceStrategy {
        match self {
            Self::Shared(_) => InferenceStrategy::Shared,
            Self::Pool(_) => InferenceStrategy::Pool,
        }
    }

    /// Run the detector over a decoded PCM file.
    pub async fn detect(&self, pcm_path: PathBuf) -> Result<Vec<SpeechInterval>> {
        match self {
            Self::Shared(handle) => {
                let handle = handle.clone();
                tokio::task::spawn_blocking(move || handle.0.lock().detect(&pcm_path))
                    .await
                    .map_err(|e| AqcError::Inference(format!("detector task failed: {e}")))?
            }
            Self::Pool(pool) => pool.detect(pcm_path).await,
        }
    }

    /// Stop pool workers. No-op for the shared strategy.
    pub fn shutdown(&self) {
        if let Self::Pool(pool) = self {
            pool.shutdown();
        }
    }
}
