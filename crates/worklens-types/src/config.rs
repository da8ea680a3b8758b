//! Global configuration types for Worklens.
//!
//! `WorklensConfig` represents the top-level `config.toml` that controls
//! the server, LLM endpoint and per-stage models, the analytics database,
//! and plot rendering.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the Worklens service.
///
/// Loaded from `~/.worklens/config.toml`. All fields have sensible defaults,
/// so an empty file (or none at all) yields a working local setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorklensConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub plot: PlotConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// LLM endpoint and per-stage model selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible endpoint. The default targets a
    /// local Ollama instance.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key for hosted endpoints; local Ollama needs none.
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub models: ModelConfig,
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            models: ModelConfig::default(),
        }
    }
}

/// Which model handles which pipeline stage.
///
/// Classification and titling are short constrained calls, so they default
/// to a smaller model than the SQL and answer stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_small_model")]
    pub classify: String,
    #[serde(default = "default_small_model")]
    pub title: String,
    /// Table/activity/scope selection calls.
    #[serde(default = "default_large_model")]
    pub selection: String,
    #[serde(default = "default_large_model")]
    pub sql: String,
    #[serde(default = "default_large_model")]
    pub plot: String,
    #[serde(default = "default_large_model")]
    pub answer: String,
}

fn default_small_model() -> String {
    "qwen3:1.7b".to_string()
}

fn default_large_model() -> String {
    "qwen3:8b".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            classify: default_small_model(),
            title: default_small_model(),
            selection: default_large_model(),
            sql: default_large_model(),
            plot: default_large_model(),
            answer: default_large_model(),
        }
    }
}

/// Activity database the generated SQL runs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Path to the collector's SQLite file; defaults to the data directory.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Tables the pipeline may select from and query.
    #[serde(default = "default_allowed_tables")]
    pub allowed_tables: Vec<String>,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

fn default_allowed_tables() -> Vec<String> {
    vec![
        "window_activity".to_string(),
        "user_input".to_string(),
        "session".to_string(),
    ]
}

fn default_query_timeout_secs() -> u64 {
    180
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            allowed_tables: default_allowed_tables(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

/// Plot rendering via a Python subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    #[serde(default = "default_python_bin")]
    pub python_bin: String,
    /// Directory rendered charts are written to; defaults to the data
    /// directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_plot_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_python_bin() -> String {
    "python3".to_string()
}

fn default_plot_timeout_secs() -> u64 {
    60
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            python_bin: default_python_bin(),
            output_dir: None,
            timeout_secs: default_plot_timeout_secs(),
        }
    }
}

/// Engine-level policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Blanket server-side approval of generated SQL. Pauses are skipped
    /// only when the caller also opted in per turn.
    #[serde(default)]
    pub auto_approve: bool,
}
