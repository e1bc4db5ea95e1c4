//! End-to-end execution of one `generate` request.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use framecreate_diffusion::{
    Engine, EngineError, GenParams, PixelImage, StepContext,
};

use crate::adapters::bind_adapters;
use crate::cache::PipelineCache;
use crate::config::Config;
use crate::error::WorkerError;
use crate::monitor::StepMonitor;
use crate::protocol::GenerateRequest;
use crate::scheduler::bind_scheduler;

/// Run one generation: ensure a pipeline, rebind scheduler and adapters,
/// then invoke the engine with the cancellation/preview monitor wired in as
/// the per-step callback.  Returns the written output path.
pub fn run_generate(
    engine: &dyn Engine,
    cache: &mut PipelineCache,
    config: &Config,
    request: &GenerateRequest,
) -> Result<PathBuf, WorkerError> {
    let pipeline = cache.ensure(engine, &request.model_path, config.device, config.vram_mode)?;

    bind_scheduler(pipeline, &request.sampler, &request.scheduler);
    bind_adapters(pipeline, &request.loras)?;

    let monitor = StepMonitor::from_request(request);
    monitor.preflight()?;

    let params = GenParams {
        prompt: request.prompt.clone(),
        negative_prompt: request.negative_prompt.clone(),
        width: request.width,
        height: request.height,
        steps: request.steps,
        cfg_scale: request.cfg,
        seed: request.seed,
    };

    let result = if monitor.is_active() {
        let mut on_step = |ctx: StepContext<'_>| monitor.on_step(ctx);
        pipeline.generate(&params, Some(&mut on_step))
    } else {
        pipeline.generate(&params, None)
    };

    let image = match result {
        Ok(image) => image,
        // A callback abort means the cancellation marker was observed.
        Err(EngineError::Interrupted) => return Err(WorkerError::Cancelled),
        Err(err) => return Err(err.into()),
    };

    save_image(&image, &request.output)?;
    info!(output = %request.output.display(), steps = request.steps, "generation complete");
    Ok(request.output.clone())
}

/// Convert an engine image into an `image`-crate RGB buffer.
pub(crate) fn into_rgb(image: PixelImage) -> Result<image::RgbImage, WorkerError> {
    if image.channels != 3 {
        return Err(
            EngineError::DecodeFailed(format!("expected 3 channels, got {}", image.channels))
                .into(),
        );
    }
    image::RgbImage::from_raw(image.width, image.height, image.data).ok_or_else(|| {
        EngineError::DecodeFailed("pixel buffer does not match image dimensions".to_owned()).into()
    })
}

/// Write the final image to `path`, creating parent directories as needed.
/// The format follows the file extension, defaulting to PNG.
fn save_image(image: &PixelImage, path: &Path) -> Result<(), WorkerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| WorkerError::io(parent, e))?;
        }
    }

    let rgb = into_rgb(image.clone())?;
    match image::ImageFormat::from_path(path) {
        Ok(format) => rgb.save_with_format(path, format)?,
        Err(_) => rgb.save_with_format(path, image::ImageFormat::Png)?,
    }
    Ok(())
}
