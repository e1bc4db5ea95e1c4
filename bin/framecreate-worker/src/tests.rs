use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use framecreate_diffusion::mock::MockEngine;
use framecreate_diffusion::{
    AdapterWeight, Architecture, Device, Engine, EngineError, GenParams, Latent, LatentDecoder,
    Pipeline, PixelImage, SamplerKind, SchedulerSpec, SigmaSchedule, SolverVariant, StepContext,
    StepControl, StepFn, VramMode,
};

use crate::adapters::bind_adapters;
use crate::cache::PipelineCache;
use crate::config::Config;
use crate::executor::run_generate;
use crate::protocol::{GenerateRequest, LoraSpec, Response, Status};
use crate::scheduler::bind_scheduler;

// ── Test fixtures ─────────────────────────────────────────────────────────────

/// Fresh scratch directory for one test.
fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "framecreate-worker-{name}-{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

fn touch(path: &Path) {
    fs::write(path, b"weights").expect("write fixture file");
}

/// Run the request loop over a fixed input and collect the response lines.
fn run_lines(engine: &dyn Engine, input: &str) -> Vec<Response> {
    let config = Config::default();
    let mut out = Vec::new();
    crate::serve::serve(engine, &config, Cursor::new(input.to_owned()), &mut out)
        .expect("serve should not fail on i/o");
    String::from_utf8(out)
        .expect("responses are utf-8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("response line parses"))
        .collect()
}

fn generate_line(model: &Path, fields: serde_json::Value) -> String {
    let mut value = json!({
        "action": "generate",
        "model_path": model,
        "prompt": "a lovely cat sitting on a roof",
        "width": 8,
        "height": 8,
        "steps": 4,
    });
    value
        .as_object_mut()
        .unwrap()
        .extend(fields.as_object().cloned().unwrap_or_default());
    value.to_string()
}

fn parse_request(line: &str) -> GenerateRequest {
    serde_json::from_str(line).expect("request parses")
}

// ── Fake engine with scripted per-step side effects ───────────────────────────

#[derive(Default)]
struct FakeStats {
    loads: AtomicUsize,
    generations: AtomicUsize,
    steps: AtomicUsize,
    decodes: AtomicUsize,
}

type StepHook = Arc<dyn Fn(u32) + Send + Sync>;

/// Engine whose pipelines run a scripted step loop; a step hook lets tests
/// mutate the filesystem mid-generation.
#[derive(Default)]
struct FakeEngine {
    stats: Arc<FakeStats>,
    step_hook: Option<StepHook>,
}

impl std::fmt::Debug for FakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeEngine").finish_non_exhaustive()
    }
}

impl FakeEngine {
    fn with_step_hook(hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        Self {
            stats: Arc::default(),
            step_hook: Some(Arc::new(hook)),
        }
    }
}

impl Engine for FakeEngine {
    fn load_pipeline(
        &self,
        arch: Architecture,
        _model_path: &Path,
    ) -> Result<Box<dyn Pipeline>, EngineError> {
        if arch != Architecture::Sd {
            return Err(EngineError::UnsupportedModel {
                arch,
                reason: "fake engine only builds sd pipelines".to_owned(),
            });
        }
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePipeline {
            stats: Arc::clone(&self.stats),
            step_hook: self.step_hook.clone(),
            ..FakePipeline::default()
        }))
    }
}

#[derive(Default)]
struct FakePipeline {
    stats: Arc<FakeStats>,
    step_hook: Option<StepHook>,
    scheduler: SchedulerSpec,
    active: Vec<AdapterWeight>,
    loaded: Vec<String>,
}

impl std::fmt::Debug for FakePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakePipeline").finish_non_exhaustive()
    }
}

impl LatentDecoder for FakePipeline {
    fn decode_latent(&self, _latent: &Latent) -> Result<PixelImage, EngineError> {
        self.stats.decodes.fetch_add(1, Ordering::SeqCst);
        Ok(PixelImage {
            width: 2,
            height: 2,
            channels: 3,
            data: vec![128; 12],
        })
    }
}

impl Pipeline for FakePipeline {
    fn scheduler(&self) -> SchedulerSpec {
        self.scheduler.clone()
    }

    fn set_scheduler(&mut self, spec: SchedulerSpec) {
        self.scheduler = spec;
    }

    fn to_device(&mut self, _device: Device, _vram_mode: VramMode) -> Result<(), EngineError> {
        Ok(())
    }

    fn disable_safety_checker(&mut self) {}

    fn unload_adapters(&mut self) {
        self.active.clear();
        self.loaded.clear();
    }

    fn load_adapter(&mut self, name: &str, _path: &Path) -> Result<(), EngineError> {
        self.loaded.push(name.to_owned());
        Ok(())
    }

    fn set_adapters(&mut self, adapters: &[AdapterWeight]) -> Result<(), EngineError> {
        self.active = adapters.to_vec();
        Ok(())
    }

    fn generate(
        &mut self,
        params: &GenParams,
        mut on_step: Option<&mut StepFn<'_>>,
    ) -> Result<PixelImage, EngineError> {
        self.stats.generations.fetch_add(1, Ordering::SeqCst);
        let latent = Latent {
            width: 2,
            height: 2,
            channels: 3,
            data: vec![0.5; 12],
        };
        for step in 0..params.steps.max(1) {
            self.stats.steps.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = &self.step_hook {
                hook(step);
            }
            if let Some(callback) = on_step.as_deref_mut() {
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
        self.decode_latent(&latent)
    }
}

// ── Pipeline cache ────────────────────────────────────────────────────────────

#[test]
fn consecutive_requests_for_same_model_load_once() {
    let dir = scratch("cache-reuse");
    let model = dir.join("model-a.safetensors");
    touch(&model);

    let engine = MockEngine::new();
    let stats = engine.stats();
    let line = generate_line(&model, json!({ "output": dir.join("out.png") }));
    let responses = run_lines(&engine, &format!("{line}\n{line}\n"));

    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r.status == Status::Ok));
    assert_eq!(stats.loaded(), 1, "second request must reuse the pipeline");
}

#[test]
fn switching_models_reloads_exactly_once() {
    let dir = scratch("cache-switch");
    let model_a = dir.join("model-a.safetensors");
    let model_b = dir.join("model-b.safetensors");
    touch(&model_a);
    touch(&model_b);

    let engine = MockEngine::new();
    let stats = engine.stats();
    let input = format!(
        "{}\n{}\n",
        generate_line(&model_a, json!({ "output": dir.join("a.png") })),
        generate_line(&model_b, json!({ "output": dir.join("b.png") })),
    );
    let responses = run_lines(&engine, &input);

    assert!(responses.iter().all(|r| r.status == Status::Ok));
    assert_eq!(stats.loaded(), 2);
}

#[test]
fn reload_clears_the_cache() {
    let dir = scratch("cache-reload");
    let model = dir.join("model.safetensors");
    touch(&model);

    let engine = MockEngine::new();
    let stats = engine.stats();
    let line = generate_line(&model, json!({ "output": dir.join("out.png") }));
    let responses = run_lines(&engine, &format!("{line}\n{{\"action\":\"reload\"}}\n{line}\n"));

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[1], Response::ok_empty());
    assert_eq!(stats.loaded(), 2, "post-reload request must reload");
    assert_eq!(stats.reclaims.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_model_reports_model_not_found() {
    let dir = scratch("cache-missing");
    let engine = MockEngine::new();
    let line = generate_line(&dir.join("absent.safetensors"), json!({}));
    let responses = run_lines(&engine, &format!("{line}\n"));

    assert_eq!(responses[0].status, Status::Error);
    assert_eq!(responses[0].error.as_deref(), Some("model_not_found"));
    assert_eq!(engine.stats().loaded(), 0);
}

// ── Scheduler selection ───────────────────────────────────────────────────────

#[test]
fn unknown_sampler_leaves_scheduler_untouched() {
    let mut pipeline = FakePipeline::default();
    pipeline.scheduler = SchedulerSpec::for_algorithm(
        SamplerKind::Heun,
        Default::default(),
    );
    let before = pipeline.scheduler.clone();

    bind_scheduler(&mut pipeline, "plms", "karras");
    assert_eq!(pipeline.scheduler, before);

    bind_scheduler(&mut pipeline, "", "");
    assert_eq!(pipeline.scheduler, before);
}

#[test]
fn dpmpp_samplers_force_plus_plus_solver() {
    let mut pipeline = FakePipeline::default();
    bind_scheduler(&mut pipeline, "dpmpp_2m", "");
    assert_eq!(
        pipeline.scheduler.algorithm,
        Some(SamplerKind::DpmSolverMultistep)
    );
    assert_eq!(pipeline.scheduler.solver, SolverVariant::PlusPlus);

    bind_scheduler(&mut pipeline, "euler", "");
    assert_eq!(pipeline.scheduler.solver, SolverVariant::Standard);
}

#[test]
fn sigma_schedule_applies_only_where_supported() {
    let mut pipeline = FakePipeline::default();

    bind_scheduler(&mut pipeline, "euler", "karras");
    assert_eq!(pipeline.scheduler.sigma_schedule, SigmaSchedule::Karras);

    bind_scheduler(&mut pipeline, "unipc", "Exponential ");
    assert_eq!(pipeline.scheduler.sigma_schedule, SigmaSchedule::Exponential);

    // DDIM has no sigma-schedule knob; the mode is ignored.
    bind_scheduler(&mut pipeline, "ddim", "karras");
    assert_eq!(pipeline.scheduler.algorithm, Some(SamplerKind::Ddim));
    assert_eq!(pipeline.scheduler.sigma_schedule, SigmaSchedule::Default);
}

#[test]
fn rebind_preserves_trained_schedule() {
    let mut pipeline = FakePipeline::default();
    pipeline.scheduler.trained.num_train_timesteps = 1111;

    bind_scheduler(&mut pipeline, "lms", "");
    assert_eq!(pipeline.scheduler.trained.num_train_timesteps, 1111);
}

// ── Adapter composition ───────────────────────────────────────────────────────

#[test]
fn empty_lora_list_clears_previous_adapters() {
    let mut pipeline = FakePipeline::default();
    pipeline.loaded = vec!["lora_0".to_owned()];
    pipeline.active = vec![AdapterWeight {
        name: "lora_0".to_owned(),
        weight: 0.7,
    }];

    bind_adapters(&mut pipeline, &[]).expect("empty bind");
    assert!(pipeline.active.is_empty());
    assert!(pipeline.loaded.is_empty());
}

#[test]
fn adapters_bind_in_order_with_exact_weights() {
    let dir = scratch("adapters-order");
    let lora_a = dir.join("a.safetensors");
    let lora_b = dir.join("b.safetensors");
    touch(&lora_a);
    touch(&lora_b);

    let mut pipeline = FakePipeline::default();
    let specs = vec![
        LoraSpec { path: lora_a, weight: 0.5 },
        LoraSpec { path: lora_b, weight: 1.0 },
    ];
    bind_adapters(&mut pipeline, &specs).expect("bind");

    assert_eq!(pipeline.loaded, vec!["lora_0", "lora_1"]);
    assert_eq!(
        pipeline.active,
        vec![
            AdapterWeight { name: "lora_0".to_owned(), weight: 0.5 },
            AdapterWeight { name: "lora_1".to_owned(), weight: 1.0 },
        ]
    );
}

#[test]
fn missing_lora_aborts_before_any_generation() {
    let dir = scratch("adapters-missing");
    let model = dir.join("model.safetensors");
    touch(&model);
    let absent = dir.join("style.safetensors");

    let engine = MockEngine::new();
    let stats = engine.stats();
    let line = generate_line(&model, json!({ "loras": [{ "path": absent }] }));
    let responses = run_lines(&engine, &format!("{line}\n"));

    assert_eq!(responses[0].status, Status::Error);
    assert_eq!(
        responses[0].error.as_deref(),
        Some(format!("lora_not_found:{}", absent.display()).as_str())
    );
    assert_eq!(stats.generated(), 0, "no inference work may start");
}

// ── Cancellation ──────────────────────────────────────────────────────────────

#[test]
fn preexisting_marker_cancels_before_any_step() {
    let dir = scratch("cancel-preflight");
    let model = dir.join("model.safetensors");
    let marker = dir.join("cancel");
    touch(&model);
    touch(&marker);

    let engine = MockEngine::new();
    let stats = engine.stats();
    let line = generate_line(&model, json!({ "cancel_path": marker }));
    let responses = run_lines(&engine, &format!("{line}\n"));

    assert_eq!(responses[0].error.as_deref(), Some("cancelled"));
    assert_eq!(stats.generated(), 0);
    assert_eq!(stats.steps_run(), 0);
}

#[test]
fn marker_created_mid_run_stops_on_the_next_step() {
    let dir = scratch("cancel-midrun");
    let model = dir.join("model.safetensors");
    touch(&model);
    let marker = dir.join("cancel");

    let marker_for_hook = marker.clone();
    let engine = FakeEngine::with_step_hook(move |step| {
        // Marker appears after step 3 has run.
        if step == 4 {
            fs::write(&marker_for_hook, b"stop").expect("write marker");
        }
    });

    let mut cache = PipelineCache::new();
    let request = parse_request(&generate_line(
        &model,
        json!({ "steps": 10, "cancel_path": marker }),
    ));
    let err = run_generate(&engine, &mut cache, &Config::default(), &request).unwrap_err();

    assert_eq!(err.wire_code(), "cancelled");
    assert_eq!(
        engine.stats.steps.load(Ordering::SeqCst),
        5,
        "generation must stop by step 4"
    );
}

// ── Previews ──────────────────────────────────────────────────────────────────

#[test]
fn previews_are_written_on_interval_steps() {
    let dir = scratch("preview-interval");
    let model = dir.join("model.safetensors");
    touch(&model);
    let preview = dir.join("previews").join("latest.jpg");

    let engine = FakeEngine::default();
    let mut cache = PipelineCache::new();
    let request = parse_request(&generate_line(
        &model,
        json!({
            "steps": 6,
            "preview_enabled": true,
            "preview_interval": 2,
            "preview_path": preview,
            "output": dir.join("out.png"),
        }),
    ));
    run_generate(&engine, &mut cache, &Config::default(), &request).expect("generate");

    // Steps 0, 2 and 4 each decode and overwrite the same preview file.
    assert_eq!(engine.stats.decodes.load(Ordering::SeqCst), 3 + 1);
    assert!(preview.exists());
}

#[test]
fn zero_preview_interval_previews_every_step() {
    let dir = scratch("preview-clamp");
    let model = dir.join("model.safetensors");
    touch(&model);

    let engine = FakeEngine::default();
    let mut cache = PipelineCache::new();
    let request = parse_request(&generate_line(
        &model,
        json!({
            "steps": 4,
            "preview_enabled": true,
            "preview_interval": 0,
            "preview_path": dir.join("latest.jpg"),
            "output": dir.join("out.png"),
        }),
    ));
    run_generate(&engine, &mut cache, &Config::default(), &request).expect("generate");
    assert_eq!(engine.stats.decodes.load(Ordering::SeqCst), 4 + 1);
}

#[test]
fn preview_write_failure_is_not_fatal() {
    let dir = scratch("preview-failure");
    let model = dir.join("model.safetensors");
    let blocker = dir.join("blocker");
    touch(&model);
    touch(&blocker);

    let engine = MockEngine::new();
    // Parent of the preview path is a regular file, so every write fails.
    let line = generate_line(
        &model,
        json!({
            "preview_enabled": true,
            "preview_interval": 1,
            "preview_path": blocker.join("latest.jpg"),
            "output": dir.join("out.png"),
        }),
    );
    let responses = run_lines(&engine, &format!("{line}\n"));
    assert_eq!(responses[0].status, Status::Ok);
}

// ── Request loop framing ──────────────────────────────────────────────────────

#[test]
fn blank_and_malformed_lines_do_not_break_the_loop() {
    let dir = scratch("loop-framing");
    let model = dir.join("model.safetensors");
    touch(&model);

    let engine = MockEngine::new();
    let input = format!(
        "\n   \n{{not json\n{}\n",
        generate_line(&model, json!({ "output": dir.join("out.png") }))
    );
    let responses = run_lines(&engine, &input);

    // Blank lines consume no response slot.
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].error.as_deref(), Some("invalid_json"));
    assert_eq!(responses[1].status, Status::Ok);
}

#[test]
fn non_utf8_line_is_reported_and_loop_continues() {
    let engine = MockEngine::new();
    let mut input = Vec::new();
    input.extend_from_slice(b"{\"action\":\"reload\"}\n");
    input.extend_from_slice(b"\xff\xfe{broken\n");
    input.extend_from_slice(b"{\"action\":\"reload\"}\n");

    let config = Config::default();
    let mut out = Vec::new();
    crate::serve::serve(&engine, &config, Cursor::new(input), &mut out)
        .expect("serve should survive a non-utf8 line");
    let responses: Vec<Response> = String::from_utf8(out)
        .expect("responses are utf-8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("response line parses"))
        .collect();

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0], Response::ok_empty());
    assert_eq!(responses[1].error.as_deref(), Some("invalid_json"));
    assert_eq!(responses[2], Response::ok_empty());
}

#[test]
fn unrecognized_action_is_reported_and_loop_continues() {
    let engine = MockEngine::new();
    let responses = run_lines(
        &engine,
        "{\"action\":\"upscale\"}\n{\"action\":\"reload\"}\n",
    );
    assert_eq!(responses[0].error.as_deref(), Some("unknown_action"));
    assert_eq!(responses[1], Response::ok_empty());
}

#[test]
fn type_mismatch_in_generate_yields_generic_error() {
    let engine = MockEngine::new();
    let responses = run_lines(
        &engine,
        "{\"action\":\"generate\",\"width\":\"wide\"}\n",
    );
    assert_eq!(responses[0].status, Status::Error);
    let message = responses[0].error.as_deref().unwrap();
    assert_ne!(message, "invalid_json");
    assert_ne!(message, "unknown_action");
}

// ── Output and engine resolution ──────────────────────────────────────────────

#[test]
fn output_parent_directories_are_created() {
    let dir = scratch("output-dirs");
    let model = dir.join("model.safetensors");
    touch(&model);
    let output = dir.join("outputs").join("2026").join("cat.png");

    let engine = MockEngine::new();
    let line = generate_line(&model, json!({ "output": output }));
    let responses = run_lines(&engine, &format!("{line}\n"));

    assert_eq!(responses[0].status, Status::Ok);
    assert_eq!(
        responses[0].output.as_deref(),
        Some(output.display().to_string().as_str())
    );
    assert!(output.exists());
}

#[test]
fn unknown_runtime_is_engine_unavailable() {
    let config = Config {
        runtime: "tensor-rt".to_owned(),
        ..Config::default()
    };
    let err = crate::resolve_engine(&config).unwrap_err();
    assert_eq!(err.wire_code(), "engine_unavailable");
    assert!(crate::resolve_engine(&Config::default()).is_ok());
}
