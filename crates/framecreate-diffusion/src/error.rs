use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::params::Architecture;

/// Errors surfaced by an inference engine or one of its pipelines.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine itself could not be initialized.  Fatal at worker startup.
    #[error("inference engine unavailable: {reason}")]
    Unavailable { reason: String },

    /// One loader variant rejected the checkpoint.  Collected per
    /// architecture and aggregated into [`EngineError::LoadFailed`].
    #[error("{arch} loader rejected the checkpoint: {reason}")]
    UnsupportedModel { arch: Architecture, reason: String },

    /// No loader variant accepted the checkpoint.
    #[error("failed to load model {}: {attempts}", path.display())]
    LoadFailed { path: PathBuf, attempts: String },

    #[error("failed to load adapter {name}: {reason}")]
    AdapterLoadFailed { name: String, reason: String },

    #[error("image generation failed: {0}")]
    GenerationFailed(String),

    #[error("latent decode failed: {0}")]
    DecodeFailed(String),

    /// The per-step callback asked the engine to abort mid-generation.
    #[error("generation interrupted by step callback")]
    Interrupted,
}

impl EngineError {
    /// Aggregate the per-architecture failures of a full fallback chain
    /// into a single load error.
    pub fn load_failed(path: &Path, failures: &[(Architecture, EngineError)]) -> Self {
        let attempts = failures
            .iter()
            .map(|(arch, err)| format!("{arch}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        EngineError::LoadFailed {
            path: path.to_path_buf(),
            attempts,
        }
    }
}
