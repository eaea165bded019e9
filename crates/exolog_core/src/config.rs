//! Runtime configuration resolved from the environment.
//!
//! # Responsibility
//! - Name every environment variable and default in one place.
//! - Resolve and validate store/logging settings before anything opens.
//!
//! # Invariants
//! - Resolution never touches the filesystem.
//! - Unset or blank variables fall back to defaults.

use crate::logging::{default_log_level, normalize_level};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Environment variable names.
pub mod env_vars {
    pub const DB_PATH: &str = "EXOLOG_DB_PATH";
    pub const LOG_LEVEL: &str = "EXOLOG_LOG_LEVEL";
    /// Absolute directory for rolling log files. Logging stays off when unset.
    pub const LOG_DIR: &str = "EXOLOG_LOG_DIR";
}

/// Default values.
pub mod defaults {
    pub const DB_PATH: &str = "exocortex.db";
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid { key, message } => write!(f, "invalid {key}: {message}"),
        }
    }
}

impl Error for ConfigError {}

/// Settings shared by every entry point that opens the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    /// Normalized level (`trace|debug|info|warn|error`).
    pub log_level: &'static str,
    pub log_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(defaults::DB_PATH),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl CoreConfig {
    /// Resolves configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves configuration through an arbitrary key lookup.
    ///
    /// # Errors
    /// - `Invalid` for an unsupported log level.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(path) = read(env_vars::DB_PATH) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(level) = read(env_vars::LOG_LEVEL) {
            config = config.with_log_level(&level)?;
        }
        config.log_dir = read(env_vars::LOG_DIR).map(PathBuf::from);
        Ok(config)
    }

    /// Replaces the log level after normalizing it.
    ///
    /// # Errors
    /// - `Invalid` for an unsupported level.
    pub fn with_log_level(mut self, level: &str) -> Result<Self, ConfigError> {
        self.log_level = normalize_level(level).map_err(|err| ConfigError::Invalid {
            key: env_vars::LOG_LEVEL,
            message: err.to_string(),
        })?;
        Ok(self)
    }
}
