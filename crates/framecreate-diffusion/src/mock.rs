//! Deterministic mock engine.
//!
//! The default runtime for local development and tests: renders a seeded
//! gradient instead of running a diffusion model, while exercising the full
//! pipeline contract (architecture fallback, device placement, scheduler and
//! adapter rebinds, per-step callbacks).  Observable counters in
//! [`MockStats`] let callers probe load and step behavior.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::EngineError;
use crate::params::{
    AdapterWeight, Architecture, Device, GenParams, Latent, PixelImage, SchedulerSpec, VramMode,
};
use crate::pipeline::{LatentDecoder, Pipeline, StepContext, StepControl, StepFn};
use crate::Engine;

/// Shared observable counters for a [`MockEngine`] and its pipelines.
#[derive(Debug, Default)]
pub struct MockStats {
    /// Successful pipeline loads.
    pub pipelines_loaded: AtomicUsize,
    /// Entered [`Pipeline::generate`] calls.
    pub generations: AtomicUsize,
    /// Denoising steps executed across all generations.
    pub steps: AtomicUsize,
    /// [`Engine::reclaim_memory`] calls.
    pub reclaims: AtomicUsize,
}

impl MockStats {
    pub fn loaded(&self) -> usize {
        self.pipelines_loaded.load(Ordering::SeqCst)
    }

    pub fn generated(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn steps_run(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }
}

/// Engine that fabricates images without any model weights.
#[derive(Debug, Default)]
pub struct MockEngine {
    stats: Arc<MockStats>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the engine's counters; stays valid after the engine is
    /// boxed as `dyn Engine`.
    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

/// Pixel-buffer length in bytes.  Widened to `usize` before multiplying so
/// dimensions near the `u32` range cannot overflow the product.
fn buffer_len(width: u32, height: u32, channels: u32) -> usize {
    width as usize * height as usize * channels as usize
}

/// Mirror of single-file checkpoint sniffing: the XL loader only accepts
/// checkpoints whose file stem looks like an SDXL model.
fn looks_like_sdxl(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.to_ascii_lowercase().contains("xl"))
}

impl Engine for MockEngine {
    fn load_pipeline(
        &self,
        arch: Architecture,
        model_path: &Path,
    ) -> Result<Box<dyn Pipeline>, EngineError> {
        if arch == Architecture::Sdxl && !looks_like_sdxl(model_path) {
            return Err(EngineError::UnsupportedModel {
                arch,
                reason: "checkpoint does not look like an SDXL single file".to_owned(),
            });
        }
        self.stats.pipelines_loaded.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPipeline {
            arch,
            model_path: model_path.to_path_buf(),
            scheduler: SchedulerSpec::default(),
            active_adapters: Vec::new(),
            loaded_adapters: Vec::new(),
            device: Device::Auto,
            vram_mode: VramMode::Balanced,
            safety_checker: true,
            stats: Some(Arc::clone(&self.stats)),
        }))
    }

    fn reclaim_memory(&self) {
        self.stats.reclaims.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pipeline produced by [`MockEngine`].
#[derive(Debug)]
pub struct MockPipeline {
    arch: Architecture,
    model_path: PathBuf,
    scheduler: SchedulerSpec,
    active_adapters: Vec<AdapterWeight>,
    loaded_adapters: Vec<String>,
    device: Device,
    vram_mode: VramMode,
    safety_checker: bool,
    stats: Option<Arc<MockStats>>,
}

impl MockPipeline {
    /// Construct a pipeline that is not attached to any engine counters.
    /// Intended for tests that need a pipeline without a [`MockEngine`].
    pub fn detached(arch: Architecture, model_path: PathBuf) -> Self {
        Self {
            arch,
            model_path,
            scheduler: SchedulerSpec::default(),
            active_adapters: Vec::new(),
            loaded_adapters: Vec::new(),
            device: Device::Auto,
            vram_mode: VramMode::Balanced,
            safety_checker: true,
            stats: None,
        }
    }

    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn device(&self) -> (Device, VramMode) {
        (self.device, self.vram_mode)
    }

    pub fn safety_checker_enabled(&self) -> bool {
        self.safety_checker
    }

    pub fn active_adapters(&self) -> &[AdapterWeight] {
        &self.active_adapters
    }

    pub fn loaded_adapters(&self) -> &[String] {
        &self.loaded_adapters
    }

    fn bump(&self, pick: impl Fn(&MockStats) -> &AtomicUsize) {
        if let Some(stats) = &self.stats {
            pick(stats).fetch_add(1, Ordering::SeqCst);
        }
    }

    /// The final gradient image for the given parameters.
    fn render(params: &GenParams) -> PixelImage {
        let (w, h) = (params.width.max(1), params.height.max(1));
        let mut data = Vec::with_capacity(buffer_len(w, h, 3));
        let blue = 24 + params.seed.rem_euclid(128) as u8;
        for y in 0..h {
            for x in 0..w {
                data.push(((x as f32 / w as f32) * 213.0).round() as u8);
                data.push(((y as f32 / h as f32) * 140.0).round() as u8);
                data.push(blue);
            }
        }
        PixelImage {
            width: w,
            height: h,
            channels: 3,
            data,
        }
    }

    /// Intermediate state after `step + 1` of `steps` steps: the final
    /// gradient scaled by how far denoising has progressed.
    fn render_latent(params: &GenParams, step: u32, steps: u32) -> Latent {
        let fraction = (step + 1) as f32 / steps as f32;
        let image = Self::render(params);
        Latent {
            width: image.width,
            height: image.height,
            channels: image.channels,
            data: image
                .data
                .iter()
                .map(|&byte| (byte as f32 / 255.0) * fraction)
                .collect(),
        }
    }
}

impl LatentDecoder for MockPipeline {
    fn decode_latent(&self, latent: &Latent) -> Result<PixelImage, EngineError> {
        let expected = buffer_len(latent.width, latent.height, latent.channels);
        if latent.data.len() != expected {
            return Err(EngineError::DecodeFailed(format!(
                "latent has {} values, expected {expected}",
                latent.data.len()
            )));
        }
        Ok(PixelImage {
            width: latent.width,
            height: latent.height,
            channels: latent.channels,
            data: latent
                .data
                .iter()
                .map(|&value| (value.clamp(0.0, 1.0) * 255.0).round() as u8)
                .collect(),
        })
    }
}

impl Pipeline for MockPipeline {
    fn scheduler(&self) -> SchedulerSpec {
        self.scheduler.clone()
    }

    fn set_scheduler(&mut self, spec: SchedulerSpec) {
        self.scheduler = spec;
    }

    fn to_device(&mut self, device: Device, vram_mode: VramMode) -> Result<(), EngineError> {
        self.device = device;
        self.vram_mode = vram_mode;
        Ok(())
    }

    fn disable_safety_checker(&mut self) {
        self.safety_checker = false;
    }

    fn unload_adapters(&mut self) {
        self.active_adapters.clear();
        self.loaded_adapters.clear();
    }

    fn load_adapter(&mut self, name: &str, _path: &Path) -> Result<(), EngineError> {
        self.loaded_adapters.push(name.to_owned());
        Ok(())
    }

    fn set_adapters(&mut self, adapters: &[AdapterWeight]) -> Result<(), EngineError> {
        for adapter in adapters {
            if !self.loaded_adapters.contains(&adapter.name) {
                return Err(EngineError::AdapterLoadFailed {
                    name: adapter.name.clone(),
                    reason: "adapter was never loaded".to_owned(),
                });
            }
        }
        self.active_adapters = adapters.to_vec();
        Ok(())
    }

    fn generate(
        &mut self,
        params: &GenParams,
        mut on_step: Option<&mut StepFn<'_>>,
    ) -> Result<PixelImage, EngineError> {
        self.bump(|stats| &stats.generations);
        let steps = params.steps.max(1);
        for step in 0..steps {
            self.bump(|stats| &stats.steps);
            if let Some(callback) = on_step.as_deref_mut() {
                let latent = Self::render_latent(params, step, steps);
                let control = callback(StepContext {
                    step,
                    latent: &latent,
                    decoder: self,
                });
                if control == StepControl::Abort {
                    return Err(EngineError::Interrupted);
                }
            }
        }
        Ok(Self::render(params))
    }
}
