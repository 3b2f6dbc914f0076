//! Persisted queue defaults.
//!
//! `max_retries` is copied onto each job at enqueue time; `backoff_base` is
//! read by workers when they start. A missing file is created with defaults.
//! A corrupt file, or one holding a zero, is reported and ignored, never fatal.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub max_retries: u32,
    pub backoff_base: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 3,
        }
    }
}

/// A settable key, as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    MaxRetries,
    BackoffBase,
}

impl SettingKey {
    pub const ALL: [SettingKey; 2] = [SettingKey::MaxRetries, SettingKey::BackoffBase];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::MaxRetries => "max-retries",
            SettingKey::BackoffBase => "backoff-base",
        }
    }
}

impl std::fmt::Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for SettingKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "max-retries" | "max_retries" => Ok(SettingKey::MaxRetries),
            "backoff-base" | "backoff_base" => Ok(SettingKey::BackoffBase),
            _ => Err(Error::InvalidInput(format!(
                "unknown config key: {s} (expected max-retries or backoff-base)"
            ))),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults.
    ///
    /// If the file does not exist it is created with the defaults. If it
    /// cannot be read or parsed, a warning is logged and defaults are used.
    pub fn load(path: &Path) -> Settings {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let defaults = Settings::default();
                if let Err(e) = defaults.save(path) {
                    warn!(path = %path.display(), error = %e, "could not write default config");
                }
                return defaults;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file unreadable, using defaults");
                return Settings::default();
            }
        };

        let settings: Settings = match toml::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file corrupt, using defaults");
                return Settings::default();
            }
        };

        match settings.validate() {
            Ok(()) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file invalid, using defaults");
                Settings::default()
            }
        }
    }

    /// Both settings must be at least 1, whether set from the command line
    /// or edited into the file by hand.
    pub fn validate(&self) -> Result<()> {
        for key in SettingKey::ALL {
            if self.get(key) == 0 {
                return Err(Error::InvalidInput(format!("{key} must be at least 1")));
            }
        }
        Ok(())
    }

    /// Write settings, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serialize settings: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get(&self, key: SettingKey) -> u32 {
        match key {
            SettingKey::MaxRetries => self.max_retries,
            SettingKey::BackoffBase => self.backoff_base,
        }
    }

    /// Parse and apply a value. Both settings must be integers >= 1.
    pub fn set(&mut self, key: SettingKey, value: &str) -> Result<()> {
        let parsed: u32 = value.trim().parse().map_err(|_| {
            Error::InvalidInput(format!("{key} must be a positive integer, got {value:?}"))
        })?;
        if parsed == 0 {
            return Err(Error::InvalidInput(format!("{key} must be at least 1")));
        }
        match key {
            SettingKey::MaxRetries => self.max_retries = parsed,
            SettingKey::BackoffBase => self.backoff_base = parsed,
        }
        Ok(())
    }
}
