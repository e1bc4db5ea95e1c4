use strum::{Display, EnumString};

// ── Device placement ─────────────────────────────────────────────────────────

/// Compute device a pipeline is placed on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Device {
    /// Pick CUDA when available, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    Cuda,
}

/// VRAM usage profile applied during device placement.
///
/// `Low` trades speed for memory (attention slicing, CPU offload in real
/// backends); `Balanced` is the default full-device placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum VramMode {
    Low,
    #[default]
    Balanced,
}

// ── Model architectures ──────────────────────────────────────────────────────

/// Closed, ranked set of model architecture loaders.
///
/// Single-file checkpoints do not declare their architecture, so loading is
/// a fallback chain: each variant in [`Architecture::PREFERENCE`] is tried in
/// order and the first loader that accepts the file wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Architecture {
    /// Stable Diffusion XL.
    Sdxl,
    /// Stable Diffusion 1.x / 2.x.
    Sd,
}

impl Architecture {
    /// Loader preference order: SDXL first, base SD as the fallback.
    pub const PREFERENCE: [Architecture; 2] = [Architecture::Sdxl, Architecture::Sd];
}

// ── Generation parameters ────────────────────────────────────────────────────

/// Parameters for a single text-to-image generation call.
#[derive(Debug, Clone)]
pub struct GenParams {
    /// Positive (desired) text prompt.
    pub prompt: String,

    /// Negative (undesired) text prompt.
    pub negative_prompt: String,

    /// Output image width in pixels.
    pub width: u32,

    /// Output image height in pixels.
    pub height: u32,

    /// Number of denoising steps.
    pub steps: u32,

    /// Classifier-Free Guidance scale (text guidance strength).
    pub cfg_scale: f32,

    /// RNG seed.  The engine derives a deterministic generator from it.
    pub seed: i64,
}

impl Default for GenParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            width: 1024,
            height: 1024,
            steps: 30,
            cfg_scale: 7.5,
            seed: 0,
        }
    }
}

impl GenParams {
    /// Convenience constructor – sets only the prompt and uses defaults.
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

// ── Samplers and schedulers ──────────────────────────────────────────────────

/// Denoising sampler algorithms a pipeline scheduler can be rebound to.
///
/// String forms are the job-facing sampler names; parsing is done through
/// [`SamplerKind::parse`], which trims and lowercases first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum SamplerKind {
    #[strum(serialize = "euler")]
    Euler,
    #[strum(serialize = "euler_a")]
    EulerAncestral,
    #[strum(serialize = "heun")]
    Heun,
    #[strum(serialize = "lms")]
    Lms,
    #[strum(serialize = "ddim")]
    Ddim,
    #[strum(serialize = "pndm")]
    Pndm,
    #[strum(serialize = "dpm2")]
    KDpm2,
    #[strum(serialize = "dpm2_a")]
    KDpm2Ancestral,
    #[strum(serialize = "dpmpp_2m")]
    DpmSolverMultistep,
    #[strum(serialize = "dpmpp_sde")]
    DpmSolverSde,
    #[strum(serialize = "unipc")]
    UniPc,
}

impl SamplerKind {
    /// Parse a job-supplied sampler name.
    ///
    /// Returns `None` for empty or unknown names; callers treat that as
    /// "keep the pipeline's current scheduler".
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return None;
        }
        normalized.parse().ok()
    }

    /// Whether this sampler belongs to the `dpmpp` solver family.
    pub fn is_dpm_solver(self) -> bool {
        matches!(self, SamplerKind::DpmSolverMultistep | SamplerKind::DpmSolverSde)
    }

    /// Whether the constructed scheduler exposes a solver-variant knob.
    pub fn has_solver_variant(self) -> bool {
        self.is_dpm_solver()
    }

    /// Whether the constructed scheduler exposes sigma-schedule flags
    /// (Karras / exponential).  DDIM, PNDM and the ancestral Euler sampler
    /// have no such option.
    pub fn has_sigma_schedule(self) -> bool {
        !matches!(
            self,
            SamplerKind::Ddim | SamplerKind::Pndm | SamplerKind::EulerAncestral
        )
    }
}

/// Solver variant for the `dpmpp` sampler family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SolverVariant {
    #[default]
    Standard,
    /// The "dpmsolver++" variant.
    PlusPlus,
}

/// Sigma-schedule override applied on top of a sampler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SigmaSchedule {
    #[default]
    Default,
    Karras,
    Exponential,
}

/// Trained noise-schedule parameters.
///
/// These come from the model checkpoint and must survive scheduler rebinds:
/// a new scheduler is always constructed from the current scheduler's trained
/// parameters, never from library defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedSchedule {
    pub num_train_timesteps: u32,
    pub beta_start: f32,
    pub beta_end: f32,
}

impl Default for TrainedSchedule {
    fn default() -> Self {
        Self {
            num_train_timesteps: 1000,
            beta_start: 0.000_85,
            beta_end: 0.012,
        }
    }
}

/// Full scheduler configuration of a pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerSpec {
    /// Active sampler algorithm.  `None` means the model's own default.
    pub algorithm: Option<SamplerKind>,

    /// Solver variant; only meaningful for samplers where
    /// [`SamplerKind::has_solver_variant`] is true.
    pub solver: SolverVariant,

    /// Sigma-schedule override; only meaningful for samplers where
    /// [`SamplerKind::has_sigma_schedule`] is true.
    pub sigma_schedule: SigmaSchedule,

    /// Trained noise-schedule parameters carried over from the checkpoint.
    pub trained: TrainedSchedule,
}

impl SchedulerSpec {
    /// Construct a fresh scheduler for `algorithm`, preserving the trained
    /// noise-schedule parameters and resetting every algorithm-specific knob
    /// to its default.
    pub fn for_algorithm(algorithm: SamplerKind, trained: TrainedSchedule) -> Self {
        Self {
            algorithm: Some(algorithm),
            trained,
            ..Default::default()
        }
    }
}

// ── Adapters ─────────────────────────────────────────────────────────────────

/// One entry of the active adapter set: a loaded adapter name plus the
/// weight it is applied with.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterWeight {
    pub name: String,
    pub weight: f32,
}

// ── Intermediate and final images ────────────────────────────────────────────

/// Intermediate denoising state handed to the per-step callback.
///
/// The representation is engine-specific; workers only forward it to
/// [`crate::LatentDecoder::decode_latent`] for preview rendering.
#[derive(Debug, Clone)]
pub struct Latent {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub data: Vec<f32>,
}

/// A decoded image in row-major, channel-last (HWC) order.
///
/// For RGB images `channels == 3`.
#[derive(Debug, Clone)]
pub struct PixelImage {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Raw pixel data (`width * height * channels` bytes).
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_parse_trims_and_lowercases() {
        assert_eq!(SamplerKind::parse("  Euler_A "), Some(SamplerKind::EulerAncestral));
        assert_eq!(SamplerKind::parse("DPMPP_2M"), Some(SamplerKind::DpmSolverMultistep));
        assert_eq!(SamplerKind::parse(""), None);
        assert_eq!(SamplerKind::parse("   "), None);
        assert_eq!(SamplerKind::parse("plms"), None);
    }

    #[test]
    fn sampler_capabilities() {
        assert!(SamplerKind::DpmSolverMultistep.has_solver_variant());
        assert!(SamplerKind::DpmSolverSde.has_solver_variant());
        assert!(!SamplerKind::Euler.has_solver_variant());

        assert!(SamplerKind::Euler.has_sigma_schedule());
        assert!(SamplerKind::UniPc.has_sigma_schedule());
        assert!(!SamplerKind::Ddim.has_sigma_schedule());
        assert!(!SamplerKind::Pndm.has_sigma_schedule());
        assert!(!SamplerKind::EulerAncestral.has_sigma_schedule());
    }

    #[test]
    fn fresh_scheduler_preserves_trained_params() {
        let trained = TrainedSchedule {
            num_train_timesteps: 1100,
            beta_start: 0.001,
            beta_end: 0.02,
        };
        let spec = SchedulerSpec::for_algorithm(SamplerKind::Heun, trained.clone());
        assert_eq!(spec.algorithm, Some(SamplerKind::Heun));
        assert_eq!(spec.trained, trained);
        assert_eq!(spec.solver, SolverVariant::Standard);
        assert_eq!(spec.sigma_schedule, SigmaSchedule::Default);
    }

    #[test]
    fn architecture_preference_tries_sdxl_first() {
        assert_eq!(
            Architecture::PREFERENCE,
            [Architecture::Sdxl, Architecture::Sd]
        );
    }
}
