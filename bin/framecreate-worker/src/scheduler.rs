//! Scheduler selection.
//!
//! Rebinding happens on every generation, even on a cache-reused pipeline:
//! scheduler choice is a per-job parameter, not a per-model one.

use framecreate_diffusion::{Pipeline, SamplerKind, SchedulerSpec, SigmaSchedule, SolverVariant};

/// Rebind the pipeline's scheduler for `sampler` and `scheduler_mode`.
///
/// An empty or unknown sampler name leaves the current scheduler untouched;
/// that is the fallback-to-default path, not an error.  A recognized name
/// constructs a fresh scheduler from the current one's trained
/// noise-schedule parameters, then applies two family-specific adjustments:
/// the `dpmpp` family is forced onto the "++" solver variant, and a
/// `karras` / `exponential` mode sets the matching sigma flag where the
/// sampler supports one (`karras` is checked first; the modes are mutually
/// exclusive).
pub fn bind_scheduler(pipeline: &mut dyn Pipeline, sampler: &str, scheduler_mode: &str) {
    let Some(kind) = SamplerKind::parse(sampler) else {
        return;
    };

    let current = pipeline.scheduler();
    let mut next = SchedulerSpec::for_algorithm(kind, current.trained);

    if kind.has_solver_variant() {
        next.solver = SolverVariant::PlusPlus;
    }

    if kind.has_sigma_schedule() {
        let mode = scheduler_mode.trim().to_ascii_lowercase();
        if mode == "karras" {
            next.sigma_schedule = SigmaSchedule::Karras;
        } else if mode == "exponential" {
            next.sigma_schedule = SigmaSchedule::Exponential;
        }
    }

    pipeline.set_scheduler(next);
}
