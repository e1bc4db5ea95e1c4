//! Worker configuration, loaded from environment variables at startup.

use framecreate_diffusion::{Device, VramMode};

/// Runtime configuration for framecreate-worker.
///
/// Every field has a sensible default so the worker runs out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// Inference runtime to drive (default: `"mock"`).
    pub runtime: String,

    /// Compute device pipelines are placed on.
    pub device: Device,

    /// VRAM usage profile applied during placement.
    pub vram_mode: VramMode,

    /// `tracing` filter string, e.g. `"info"` or `"debug"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            runtime: env_or("FRAMECREATE_RUNTIME", "mock"),
            device: parse_env("FRAMECREATE_DEVICE", Device::Auto),
            vram_mode: parse_env("FRAMECREATE_VRAM_MODE", VramMode::Balanced),
            log_level: env_or("FRAMECREATE_LOG", "info"),
            log_json: std::env::var("FRAMECREATE_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: "mock".to_owned(),
            device: Device::Auto,
            vram_mode: VramMode::Balanced,
            log_level: "info".to_owned(),
            log_json: false,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().to_ascii_lowercase().parse().ok())
        .unwrap_or(default)
}
