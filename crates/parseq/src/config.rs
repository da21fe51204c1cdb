//! Settings for the parsing engine.
//!
//! Loaded from a JSON file supplied by the embedding application. Every
//! worker knob has a default; only the external endpoints are required.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::worker::WorkerConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Parse endpoint base URL, e.g. `https://parse.example.com/v1`.
    pub parse_endpoint: String,
    pub api_key: String,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    #[serde(default = "default_polling_interval_seconds")]
    pub polling_interval_seconds: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "default_webhook_timeout_seconds")]
    pub webhook_timeout_seconds: f64,
    #[serde(default = "default_parse_timeout_seconds")]
    pub parse_timeout_seconds: f64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/parseq.db")
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/staging")
}

fn default_polling_interval_seconds() -> u64 {
    120
}

fn default_batch_size() -> u32 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_webhook_timeout_seconds() -> f64 {
    10.0
}

fn default_parse_timeout_seconds() -> f64 {
    300.0
}

impl Settings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.parse_endpoint.is_empty() {
            return Err(ConfigError::Validation {
                message: "parse_endpoint must not be empty".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation {
                message: "batch_size must be at least 1".to_string(),
            });
        }
        if self.polling_interval_seconds == 0 {
            return Err(ConfigError::Validation {
                message: "polling_interval_seconds must be positive".to_string(),
            });
        }
        if self.webhook_timeout_seconds <= 0.0 {
            return Err(ConfigError::Validation {
                message: "webhook_timeout_seconds must be positive".to_string(),
            });
        }
        if self.parse_timeout_seconds <= 0.0 {
            return Err(ConfigError::Validation {
                message: "parse_timeout_seconds must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            polling_interval: Duration::from_secs(self.polling_interval_seconds),
            batch_size: self.batch_size,
            default_max_retries: self.default_max_retries,
            webhook_timeout: Duration::from_secs_f64(self.webhook_timeout_seconds),
        }
    }

    pub fn parse_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.parse_timeout_seconds)
    }
}

/// Loads settings from a JSON file.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    load_settings_from_str(&raw)
}

pub fn load_settings_from_str(raw: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(raw)?;
    settings.validate()?;
    Ok(settings)
}
