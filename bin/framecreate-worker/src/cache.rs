//! Single-slot pipeline cache.
//!
//! Model loading is the single most expensive operation in the worker, so
//! consecutive requests for the same model must reuse the loaded pipeline.
//! The cache holds at most one (model identity, pipeline) pair; any identity
//! mismatch or explicit `reload` discards it.

use std::path::Path;

use tracing::info;

use framecreate_diffusion::{load_with_fallback, Device, Engine, Pipeline, VramMode};

use crate::error::WorkerError;

struct CachedPipeline {
    /// Canonical model identity: the requested path, as a string.
    identity: String,
    pipeline: Box<dyn Pipeline>,
}

#[derive(Default)]
pub struct PipelineCache {
    slot: Option<CachedPipeline>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard the cached pipeline, if any.
    pub fn clear(&mut self) {
        self.slot = None;
    }

    /// Return a pipeline for `model_path`, loading it if the cache is empty
    /// or holds a different model.
    ///
    /// A fresh load verifies the checkpoint exists, runs the architecture
    /// fallback chain, places the pipeline on the configured device, and
    /// strips the content-safety post-filter (worker policy: generation
    /// output is never filtered here).  A cache hit does none of that.
    pub fn ensure(
        &mut self,
        engine: &dyn Engine,
        model_path: &Path,
        device: Device,
        vram_mode: VramMode,
    ) -> Result<&mut dyn Pipeline, WorkerError> {
        let identity = model_path.to_string_lossy().into_owned();

        let matches = self
            .slot
            .as_ref()
            .is_some_and(|cached| cached.identity == identity);
        if !matches {
            // Drop the stale pipeline before loading so its device memory
            // is reclaimable during the new load.
            self.slot = None;

            if !model_path.exists() {
                return Err(WorkerError::ModelNotFound(model_path.to_path_buf()));
            }

            info!(model = %identity, "loading pipeline");
            let mut pipeline = load_with_fallback(engine, model_path)?;
            pipeline.to_device(device, vram_mode)?;
            pipeline.disable_safety_checker();
            self.slot = Some(CachedPipeline { identity, pipeline });
        }

        let cached = self.slot.as_mut().expect("slot populated above");
        Ok(cached.pipeline.as_mut())
    }
}
