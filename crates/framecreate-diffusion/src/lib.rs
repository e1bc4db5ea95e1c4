//! Inference-engine boundary for the framecreate worker.
//!
//! The heavy numerical engine is an external collaborator; this crate
//! specifies its Rust surface: loading a model into a [`Pipeline`],
//! scheduler and adapter rebinding, and a generation call with an optional
//! per-step callback that can abort mid-computation.
//!
//! # Example
//! ```
//! use framecreate_diffusion::{load_with_fallback, GenParams};
//! use framecreate_diffusion::mock::MockEngine;
//!
//! let engine = MockEngine::new();
//! let dir = std::env::temp_dir().join("framecreate-doc");
//! std::fs::create_dir_all(&dir).unwrap();
//! let model = dir.join("model.safetensors");
//! std::fs::write(&model, b"weights").unwrap();
//!
//! let mut pipeline = load_with_fallback(&engine, &model).unwrap();
//! let image = pipeline
//!     .generate(&GenParams::with_prompt("a lovely cat sitting on a roof"), None)
//!     .unwrap();
//! assert!(!image.data.is_empty());
//! ```

use std::path::Path;

mod error;
pub mod mock;
mod params;
mod pipeline;

pub use error::EngineError;
pub use params::*;
pub use pipeline::{LatentDecoder, Pipeline, StepContext, StepControl, StepFn};

/// An inference engine: a factory for model pipelines.
pub trait Engine: std::fmt::Debug {
    /// Load the checkpoint at `model_path` as the given architecture.
    fn load_pipeline(
        &self,
        arch: Architecture,
        model_path: &Path,
    ) -> Result<Box<dyn Pipeline>, EngineError>;

    /// Release any device memory not owned by a live pipeline.  Default
    /// is a no-op; CUDA-backed engines empty their allocator caches here.
    fn reclaim_memory(&self) {}
}

/// Load a single-file checkpoint, trying each [`Architecture::PREFERENCE`]
/// variant in order.  First success wins; when every loader rejects the
/// file the failures are aggregated into one [`EngineError::LoadFailed`].
pub fn load_with_fallback(
    engine: &dyn Engine,
    model_path: &Path,
) -> Result<Box<dyn Pipeline>, EngineError> {
    let mut failures = Vec::new();
    for arch in Architecture::PREFERENCE {
        match engine.load_pipeline(arch, model_path) {
            Ok(pipeline) => return Ok(pipeline),
            Err(err) => failures.push((arch, err)),
        }
    }
    Err(EngineError::load_failed(model_path, &failures))
}
