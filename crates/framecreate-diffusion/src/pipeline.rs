use std::path::Path;

use crate::error::EngineError;
use crate::params::{
    AdapterWeight, Device, GenParams, Latent, PixelImage, SchedulerSpec, VramMode,
};

/// Decision returned by a per-step callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    /// Abort the whole generation.  The engine surfaces this as
    /// [`EngineError::Interrupted`].
    Abort,
}

/// Context handed to the per-step callback, once per denoising step.
pub struct StepContext<'a> {
    /// Zero-based denoising step index.
    pub step: u32,

    /// Current intermediate state.
    pub latent: &'a Latent,

    /// Decoder for turning `latent` into a viewable image.  Backed by the
    /// generating pipeline itself.
    pub decoder: &'a dyn LatentDecoder,
}

/// Per-step callback invoked synchronously by the engine during a
/// [`Pipeline::generate`] call.
pub type StepFn<'a> = dyn FnMut(StepContext<'_>) -> StepControl + 'a;

/// Decodes an intermediate latent into a viewable image.
pub trait LatentDecoder {
    fn decode_latent(&self, latent: &Latent) -> Result<PixelImage, EngineError>;
}

/// A loaded, configurable generation pipeline for one model.
///
/// Scheduler and adapter state are per-job: workers rebind both on every
/// generation even when the pipeline itself is reused.
pub trait Pipeline: LatentDecoder + std::fmt::Debug {
    /// Current scheduler configuration, including the trained
    /// noise-schedule parameters from the checkpoint.
    fn scheduler(&self) -> SchedulerSpec;

    /// Replace the active scheduler.
    fn set_scheduler(&mut self, spec: SchedulerSpec);

    /// Move the pipeline onto the given compute device.
    fn to_device(&mut self, device: Device, vram_mode: VramMode) -> Result<(), EngineError>;

    /// Strip any content-safety post-filter from the pipeline.
    fn disable_safety_checker(&mut self);

    /// Unload every bound adapter.  Idempotent when none are bound.
    fn unload_adapters(&mut self);

    /// Load adapter weights from `path` under `name`.
    fn load_adapter(&mut self, name: &str, path: &Path) -> Result<(), EngineError>;

    /// Activate the given adapter set simultaneously, replacing any
    /// previously active set.  Weights are applied as-is, unnormalized.
    fn set_adapters(&mut self, adapters: &[AdapterWeight]) -> Result<(), EngineError>;

    /// Run one full generation, producing exactly one image.
    ///
    /// When `on_step` is supplied it is invoked once per denoising step;
    /// a [`StepControl::Abort`] return aborts the generation with
    /// [`EngineError::Interrupted`].
    fn generate(
        &mut self,
        params: &GenParams,
        on_step: Option<&mut StepFn<'_>>,
    ) -> Result<PixelImage, EngineError>;
}
