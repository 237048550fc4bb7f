#![deny(unsafe_code)]

//! Configuration loading and validation for skillrun.
//!
//! Loads the `skillrun.toml` runner configuration and provides the
//! execution settings types ([`ExecutionOptions`], [`ExecutionConfig`],
//! [`EgressMode`]) shared by the core library and the CLI.

/// Per-execution container settings.
pub mod execution;
/// Zeroizing secret values for container environment injection.
pub mod secret;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use execution::{EgressMode, ExecutionConfig, ExecutionOptions};
pub use secret::SecretValue;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level runner configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Container engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Execution defaults applied to every run unless overridden per call.
    #[serde(default)]
    pub defaults: ExecutionOptions,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Container engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path or name of the docker CLI binary.
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            docker_bin: default_docker_bin(),
        }
    }
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RunnerConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!(path = %path.display(), "Loading runner config");
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: RunnerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.docker_bin.trim().is_empty() {
            return Err(ConfigError::Validation(
                "engine.docker_bin must not be empty".to_string(),
            ));
        }

        self.defaults.resolve().validate().map_err(|e| match e {
            ConfigError::Validation(msg) => ConfigError::Validation(format!("defaults.{msg}")),
            other => other,
        })?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
