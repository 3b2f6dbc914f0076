//! Typed configuration.
//!
//! Process configuration comes from environment variables and is loaded once
//! at startup. Queue defaults (retry budget, backoff base) live in a settings
//! file managed by [`settings`].

pub mod settings;

use std::path::PathBuf;

use crate::error::{Error, Result};

pub use settings::{SettingKey, Settings};

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file shared by every worker and admin command.
    pub db_path: PathBuf,
    /// Directory holding `config.toml`.
    pub home_dir: PathBuf,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let home_dir = match std::env::var("QUEUECTL_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".queuectl"))
                .map_err(|_| {
                    Error::Config("neither QUEUECTL_HOME nor HOME is set".to_string())
                })?,
        };

        Ok(Self {
            db_path: std::env::var("QUEUECTL_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("queue.db")),
            home_dir,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Path of the persisted settings file.
    pub fn settings_path(&self) -> PathBuf {
        self.home_dir.join("config.toml")
    }
}
