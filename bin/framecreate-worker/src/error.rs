//! Request-level error taxonomy.
//!
//! Every failure inside a request is caught at the request boundary and
//! turned into an error response; [`WorkerError::wire_code`] maps each
//! variant to its stable wire code.  Only [`WorkerError::EngineUnavailable`]
//! is fatal, and only at startup.

use std::path::PathBuf;

use thiserror::Error;

use framecreate_diffusion::EngineError;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The inference engine cannot be initialized at process start.
    #[error("inference engine unavailable: {0}")]
    EngineUnavailable(String),

    /// A request line is not parseable JSON.
    #[error("request line is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("unknown action: {0:?}")]
    UnknownAction(String),

    #[error("model not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("lora not found: {}", .0.display())]
    LoraNotFound(PathBuf),

    /// A cancellation marker was observed before or during generation.
    #[error("generation cancelled")]
    Cancelled,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WorkerError::Io {
            path: path.into(),
            source,
        }
    }

    /// The stable error code written to the response stream.  Variants
    /// outside the fixed taxonomy surface their display text instead.
    pub fn wire_code(&self) -> String {
        match self {
            WorkerError::EngineUnavailable(_) => "engine_unavailable".to_owned(),
            WorkerError::InvalidJson(_) => "invalid_json".to_owned(),
            WorkerError::UnknownAction(_) => "unknown_action".to_owned(),
            WorkerError::ModelNotFound(_) => "model_not_found".to_owned(),
            WorkerError::LoraNotFound(path) => format!("lora_not_found:{}", path.display()),
            WorkerError::Cancelled => "cancelled".to_owned(),
            other => other.to_string(),
        }
    }
}
