use thiserror::Error;

/// All errors produced by aqc-core.
#[derive(Debug, Error)]
pub enum AqcError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("missing command `{command}` on PATH")]
    CommandMissing { command: String },

    #[error("command timed out after {timeout_ms}ms: `{command}`")]
    CommandTimedOut { command: String, timeout_ms: u64 },

    #[error("audio read failed: {0}")]
    AudioRead(String),

    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("inference exceeded {timeout_ms}ms")]
    InferenceTimeout { timeout_ms: u64 },

    #[error("admission gate is closed")]
    GateClosed,

    #[error("inference worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[cfg(feature = "onnx")]
    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AqcError>;
