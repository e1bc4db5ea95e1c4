//! framecreate-worker – entry point.
//!
//! Startup order:
//! 1. Parse the CLI and configuration from environment variables.
//! 2. Initialise structured tracing on stderr (stdout carries responses).
//! 3. Resolve the inference engine; failure here is the sole fatal
//!    condition and emits a single `engine_unavailable` response.
//! 4. Run either the persistent request loop (`serve`, the default) or a
//!    one-shot generation (`generate`).

mod adapters;
mod cache;
mod config;
mod error;
mod executor;
mod monitor;
mod protocol;
mod scheduler;
mod serve;
#[cfg(test)]
mod tests;

use std::io;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use framecreate_diffusion::mock::MockEngine;
use framecreate_diffusion::Engine;

use crate::cache::PipelineCache;
use crate::config::Config;
use crate::error::WorkerError;
use crate::protocol::{GenerateRequest, LoraSpec, Response};
use crate::serve::write_response;

#[derive(Debug, Parser)]
#[command(name = "framecreate-worker", version, about = "framecreate text-to-image generation worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve generation requests line by line on stdin/stdout (default).
    Serve,
    /// Render a single image and exit.
    Generate(GenerateArgs),
}

/// One-shot flags: a direct projection of the `generate` request fields.
#[derive(Debug, Args)]
struct GenerateArgs {
    /// Path to the model checkpoint.
    #[arg(long)]
    model: PathBuf,

    #[arg(long)]
    prompt: String,

    /// Negative prompt.
    #[arg(long, default_value = "")]
    negative: String,

    #[arg(long, default_value_t = 1024)]
    width: u32,

    #[arg(long, default_value_t = 1024)]
    height: u32,

    #[arg(long, default_value_t = 30)]
    steps: u32,

    /// Guidance scale.
    #[arg(long, default_value_t = 7.5)]
    cfg: f32,

    #[arg(long, default_value_t = 0)]
    seed: i64,

    /// Sampler name; empty keeps the pipeline default.
    #[arg(long, default_value = "")]
    sampler: String,

    /// Sigma-schedule mode (`karras` / `exponential`).
    #[arg(long, default_value = "")]
    scheduler: String,

    /// Weighted adapter, `path|weight`.  Repeatable; order matters.
    #[arg(long = "lora")]
    loras: Vec<String>,

    /// Cancellation marker path.
    #[arg(long)]
    cancel_path: Option<PathBuf>,

    /// Preview output path; previews are enabled when set.
    #[arg(long)]
    preview_path: Option<PathBuf>,

    /// Steps between previews.
    #[arg(long, default_value_t = 1)]
    preview_interval: u32,

    #[arg(long)]
    output: PathBuf,
}

impl GenerateArgs {
    fn into_request(self) -> GenerateRequest {
        GenerateRequest {
            model_path: self.model,
            prompt: self.prompt,
            negative_prompt: self.negative,
            width: self.width,
            height: self.height,
            steps: self.steps,
            cfg: self.cfg,
            seed: self.seed,
            sampler: self.sampler,
            scheduler: self.scheduler,
            loras: self
                .loras
                .iter()
                .filter_map(|raw| LoraSpec::parse_cli(raw))
                .collect(),
            preview_enabled: self.preview_path.is_some(),
            preview_interval: self.preview_interval,
            preview_path: self
                .preview_path
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            cancel_path: self
                .cancel_path
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            output: self.output,
        }
    }
}

/// Resolve the configured inference runtime.  Unknown names are reported as
/// `engine_unavailable`; real GPU runtimes plug in here.
fn resolve_engine(config: &Config) -> Result<Box<dyn Engine>, WorkerError> {
    match config.runtime.as_str() {
        "mock" => Ok(Box::new(MockEngine::new())),
        other => Err(WorkerError::EngineUnavailable(format!(
            "unknown runtime {other:?}"
        ))),
    }
}

fn init_tracing(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(true);

    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_tracing(&config);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let command = cli.command.unwrap_or(Command::Serve);
    let engine = match resolve_engine(&config) {
        Ok(engine) => engine,
        Err(err) => {
            write_response(&mut out, &Response::from_error(&err))?;
            match command {
                Command::Serve => return Ok(()),
                Command::Generate(_) => std::process::exit(1),
            }
        }
    };
    info!(runtime = %config.runtime, device = %config.device, "engine ready");

    match command {
        Command::Serve => {
            let stdin = io::stdin();
            serve::serve(engine.as_ref(), &config, stdin.lock(), &mut out)?;
        }
        Command::Generate(args) => {
            let request = args.into_request();
            let mut cache = PipelineCache::new();
            match executor::run_generate(engine.as_ref(), &mut cache, &config, &request) {
                Ok(path) => {
                    write_response(&mut out, &Response::ok(path.display().to_string()))?;
                }
                Err(err) => {
                    write_response(&mut out, &Response::from_error(&err))?;
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
