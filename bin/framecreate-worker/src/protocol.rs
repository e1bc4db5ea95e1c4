//! Line protocol: one JSON request per input line, one JSON response per
//! request, in arrival order.  Unknown fields are ignored for forward
//! compatibility.

use std::path::PathBuf;

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::WorkerError;

/// Parameters of a `generate` request.
///
/// Every field has a wire default so partially-specified jobs still parse;
/// only type mismatches fail deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub model_path: PathBuf,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg")]
    pub cfg: f32,
    #[serde(default)]
    pub seed: i64,
    /// Sampler name; empty means "use the pipeline's current scheduler".
    #[serde(default)]
    pub sampler: String,
    /// Sigma-schedule mode (`karras` / `exponential`); empty means default.
    #[serde(default, alias = "scheduler_mode")]
    pub scheduler: String,
    #[serde(default)]
    pub loras: Vec<LoraSpec>,
    #[serde(default)]
    pub preview_enabled: bool,
    #[serde(default)]
    pub preview_interval: u32,
    #[serde(default)]
    pub preview_path: String,
    /// Existence-checked cancellation marker; empty disables cancellation.
    #[serde(default)]
    pub cancel_path: String,
    #[serde(default = "default_output", alias = "output_path")]
    pub output: PathBuf,
}

fn default_dimension() -> u32 {
    1024
}

fn default_steps() -> u32 {
    30
}

fn default_cfg() -> f32 {
    7.5
}

fn default_output() -> PathBuf {
    PathBuf::from("output.png")
}

/// One weighted style adapter, applied in list order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoraSpec {
    pub path: PathBuf,
    #[serde(default = "default_weight", deserialize_with = "permissive_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

/// Accept the weight as a number or a numeric string; anything unparsable
/// falls back to 1.0 rather than failing the request.
fn permissive_weight<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
        Other(IgnoredAny),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(value) => value as f32,
        Raw::Text(text) => text.trim().parse().unwrap_or(1.0),
        Raw::Other(_) => 1.0,
    })
}

impl LoraSpec {
    /// Parse the one-shot CLI form `path|weight`.
    ///
    /// The weight is split off at the *last* `|` so paths containing pipes
    /// keep working; a missing or unparsable weight defaults to 1.0.
    /// Returns `None` for blank input.
    pub fn parse_cli(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let (path, weight) = match raw.rsplit_once('|') {
            Some((path, weight)) => {
                let parsed = weight.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!(lora = raw, "unparsable lora weight, using 1.0");
                    1.0
                });
                (path, parsed)
            }
            None => (raw, 1.0),
        };
        Some(Self {
            path: PathBuf::from(path),
            weight,
        })
    }
}

// ── Responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// One response line, mirroring one request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Success carrying the written output path.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            output: Some(output.into()),
            error: None,
        }
    }

    /// Bare `{status:ok}`, used by `reload`.
    pub fn ok_empty() -> Self {
        Self {
            status: Status::Ok,
            output: None,
            error: None,
        }
    }

    pub fn from_error(err: &WorkerError) -> Self {
        Self {
            status: Status::Error,
            output: None,
            error: Some(err.wire_code()),
        }
    }

    /// An error response with a free-form message (the generic row of the
    /// error taxonomy).
    pub fn error_message(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            output: None,
            error: Some(message.into()),
        }
    }
}
