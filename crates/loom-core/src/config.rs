use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{LoomError, Result};

fn default_database_path() -> String {
    "loom.db".to_string()
}

fn default_cache_capacity() -> usize {
    100
}

fn default_audit_log_capacity() -> usize {
    10_000
}

fn default_metrics_history_capacity() -> usize {
    10_000
}

fn default_run_timeout_ms() -> u64 {
    30_000
}

fn default_tool_rate_limit_window_secs() -> i64 {
    3600
}

fn default_anomaly_k() -> f64 {
    3.0
}

fn default_max_message_chars() -> usize {
    10_000
}

fn default_max_sequence_retries() -> u32 {
    5
}

fn default_blocklist() -> Vec<String> {
    [
        "password",
        "api_key",
        "secret_key",
        "private_key",
        "token",
        "credential",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_history_window() -> usize {
    50
}

/// Layered configuration: `loom.toml` defaults, overridden by
/// `LOOM_*`-prefixed environment variables, loaded through `figment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoomConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_audit_log_capacity")]
    pub audit_log_capacity: usize,

    #[serde(default = "default_metrics_history_capacity")]
    pub metrics_history_capacity: usize,

    #[serde(default = "default_run_timeout_ms")]
    pub default_run_timeout_ms: u64,

    #[serde(default = "default_tool_rate_limit_window_secs")]
    pub tool_rate_limit_window_secs: i64,

    #[serde(default = "default_anomaly_k")]
    pub anomaly_k: f64,

    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    #[serde(default = "default_max_sequence_retries")]
    pub max_sequence_retries: u32,

    #[serde(default = "default_blocklist")]
    pub content_blocklist: Vec<String>,

    #[serde(default = "default_history_window")]
    pub default_history_window: usize,
}

impl Default for LoomConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cache_capacity: default_cache_capacity(),
            audit_log_capacity: default_audit_log_capacity(),
            metrics_history_capacity: default_metrics_history_capacity(),
            default_run_timeout_ms: default_run_timeout_ms(),
            tool_rate_limit_window_secs: default_tool_rate_limit_window_secs(),
            anomaly_k: default_anomaly_k(),
            max_message_chars: default_max_message_chars(),
            max_sequence_retries: default_max_sequence_retries(),
            content_blocklist: default_blocklist(),
            default_history_window: default_history_window(),
        }
    }
}

impl LoomConfig {
    /// Load from an optional TOML file, layered under `LOOM_`-prefixed
    /// environment variables (env wins). Falls back to pure defaults when
    /// no file is given.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            LoomConfig::default(),
        ));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // `LoomConfig` is flat, unlike a nested config tree, so plain
        // `Env::prefixed` (lowercasing `CACHE_CAPACITY` to `cache_capacity`)
        // matches field names directly; `.split("_")` would nest every
        // multi-word key instead and never match.
        figment = figment.merge(Env::prefixed("LOOM_"));

        figment
            .extract()
            .map_err(|e| LoomError::Configuration(format!("failed to load config: {e}")))
    }
}
