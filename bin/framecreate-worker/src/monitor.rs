//! Cancellation and preview control.
//!
//! Both concerns are evaluated once per denoising step, synchronously,
//! inside the engine's step callback.  Cancellation is a filesystem marker
//! polled at a point the worker controls; worst-case latency is one step.
//! Previews are best-effort: a decode or write failure is logged and
//! skipped, never request-fatal.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use tracing::{debug, warn};

use framecreate_diffusion::{Latent, LatentDecoder, StepContext, StepControl};

use crate::error::WorkerError;
use crate::protocol::GenerateRequest;

const PREVIEW_JPEG_QUALITY: u8 = 80;

struct PreviewSink {
    /// Steps between previews, clamped to at least 1.
    interval: u32,
    path: PathBuf,
}

/// Per-request cancellation and preview state.
pub struct StepMonitor {
    cancel_path: Option<PathBuf>,
    preview: Option<PreviewSink>,
}

impl StepMonitor {
    pub fn from_request(request: &GenerateRequest) -> Self {
        let cancel_path = (!request.cancel_path.is_empty())
            .then(|| PathBuf::from(&request.cancel_path));
        let preview = (request.preview_enabled && !request.preview_path.is_empty()).then(|| {
            PreviewSink {
                interval: request.preview_interval.max(1),
                path: PathBuf::from(&request.preview_path),
            }
        });
        Self {
            cancel_path,
            preview,
        }
    }

    /// Whether the engine needs a per-step callback at all.
    pub fn is_active(&self) -> bool {
        self.cancel_path.is_some() || self.preview.is_some()
    }

    fn cancelled(&self) -> bool {
        self.cancel_path
            .as_deref()
            .is_some_and(Path::exists)
    }

    /// Pre-flight cancellation check, run before any inference step so a
    /// pre-existing marker short-circuits the request.
    pub fn preflight(&self) -> Result<(), WorkerError> {
        if self.cancelled() {
            Err(WorkerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Per-step check: abort on a cancellation marker, otherwise emit a
    /// preview on interval steps and continue.
    pub fn on_step(&self, ctx: StepContext<'_>) -> StepControl {
        if self.cancelled() {
            debug!(step = ctx.step, "cancellation marker observed");
            return StepControl::Abort;
        }

        if let Some(preview) = &self.preview {
            if ctx.step % preview.interval == 0 {
                if let Err(err) = preview.write(ctx.latent, ctx.decoder) {
                    warn!(step = ctx.step, error = %err, "preview write failed");
                }
            }
        }

        StepControl::Continue
    }
}

impl PreviewSink {
    /// Decode the latent and overwrite the preview file ("last preview
    /// wins"; no history is kept).
    fn write(&self, latent: &Latent, decoder: &dyn LatentDecoder) -> Result<(), WorkerError> {
        let image = decoder.decode_latent(latent)?;
        let rgb = crate::executor::into_rgb(image)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| WorkerError::io(parent, e))?;
            }
        }
        let file = fs::File::create(&self.path).map_err(|e| WorkerError::io(&self.path, e))?;
        let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), PREVIEW_JPEG_QUALITY);
        rgb.write_with_encoder(encoder)?;
        Ok(())
    }
}
