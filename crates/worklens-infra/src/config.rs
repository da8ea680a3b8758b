//! Global configuration loader for Worklens.
//!
//! Reads `config.toml` from the data directory (`~/.worklens/` in
//! production) and deserializes it into [`WorklensConfig`]. Falls back to
//! defaults when the file is missing or malformed. Path helpers resolve
//! the databases and plot directory that live alongside the config file.

use std::path::{Path, PathBuf};

use worklens_types::config::{AnalyticsConfig, PlotConfig, WorklensConfig};

/// Resolve the data directory.
///
/// `WORKLENS_DATA_DIR` wins when set; otherwise `~/.worklens`, falling back
/// to the current directory when no home directory can be determined.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WORKLENS_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|home| home.join(".worklens"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`WorklensConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_config(data_dir: &Path) -> WorklensConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return WorklensConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return WorklensConfig::default();
        }
    };

    match toml::from_str::<WorklensConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            WorklensConfig::default()
        }
    }
}

/// URL of the chat database holding checkpoints, thread metadata, and
/// feedback.
pub fn chat_database_url(data_dir: &Path) -> String {
    format!("sqlite://{}", data_dir.join("chat.db").display())
}

/// Path of the activity database the generated SQL runs against. The
/// collector writes it; a configured path overrides the default location.
pub fn activity_db_path(config: &AnalyticsConfig, data_dir: &Path) -> PathBuf {
    config
        .db_path
        .clone()
        .unwrap_or_else(|| data_dir.join("activity.db"))
}

/// Directory rendered charts are written to.
pub fn plot_output_dir(config: &PlotConfig, data_dir: &Path) -> PathBuf {
    config
        .output_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("plots"))
}
