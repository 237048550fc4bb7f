//! Per-execution settings for a skill container.
//!
//! [`ExecutionOptions`] is the partial, caller-facing form: every knob is
//! optional so that runner defaults and per-call overrides can be layered
//! with [`ExecutionOptions::merge`]. [`ExecutionOptions::resolve`] fills the
//! gaps and yields a complete [`ExecutionConfig`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;
use crate::secret::SecretValue;

/// Default container memory limit in MiB.
pub const DEFAULT_MEMORY_MB: u64 = 256;
/// Default CPU quota (fraction of one core).
pub const DEFAULT_CPUS: f64 = 0.5;
/// Default wall-clock timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
/// Default image name prefix.
pub const DEFAULT_IMAGE_PREFIX: &str = "travel-aw-skill-";

/// Smallest memory limit the docker engine accepts.
const MIN_MEMORY_MB: u64 = 6;
const MAX_CPUS: f64 = 64.0;

/// Container network posture requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EgressMode {
    /// Manifest-declared domains are reachable, everything else is not.
    #[default]
    Allowlist,
    /// No network at all, regardless of the manifest.
    None,
}

impl fmt::Display for EgressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EgressMode::Allowlist => write!(f, "allowlist"),
            EgressMode::None => write!(f, "none"),
        }
    }
}

impl FromStr for EgressMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allowlist" => Ok(EgressMode::Allowlist),
            "none" => Ok(EgressMode::None),
            other => Err(ConfigError::Validation(format!(
                "egress_mode must be \"allowlist\" or \"none\", got {other:?}"
            ))),
        }
    }
}

/// Partial execution settings. Unset fields fall back to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionOptions {
    /// Memory limit in MiB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    /// CPU quota as a fraction of one core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    /// Wall-clock timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Prefix prepended to the skill name to form the image reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_prefix: Option<String>,
    /// Environment variables injected into the container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<BTreeMap<String, SecretValue>>,
    /// Network posture.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egress_mode: Option<EgressMode>,
}

impl ExecutionOptions {
    /// Layer `overrides` on top of `self`, field by field.
    ///
    /// `env_vars` is replaced as a whole when the override sets it.
    pub fn merge(&self, overrides: &ExecutionOptions) -> ExecutionOptions {
        ExecutionOptions {
            memory_mb: overrides.memory_mb.or(self.memory_mb),
            cpus: overrides.cpus.or(self.cpus),
            timeout_seconds: overrides.timeout_seconds.or(self.timeout_seconds),
            image_prefix: overrides
                .image_prefix
                .clone()
                .or_else(|| self.image_prefix.clone()),
            env_vars: overrides
                .env_vars
                .clone()
                .or_else(|| self.env_vars.clone()),
            egress_mode: overrides.egress_mode.or(self.egress_mode),
        }
    }

    /// Fill unset fields with defaults.
    pub fn resolve(&self) -> ExecutionConfig {
        ExecutionConfig {
            memory_mb: self.memory_mb.unwrap_or(DEFAULT_MEMORY_MB),
            cpus: self.cpus.unwrap_or(DEFAULT_CPUS),
            timeout_seconds: self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            image_prefix: self
                .image_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE_PREFIX.to_string()),
            env_vars: self.env_vars.clone().unwrap_or_default(),
            egress_mode: self.egress_mode.unwrap_or_default(),
        }
    }

    /// Builder: set the memory limit.
    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_mb = Some(mb);
        self
    }

    /// Builder: set the CPU quota.
    pub fn with_cpus(mut self, cpus: f64) -> Self {
        self.cpus = Some(cpus);
        self
    }

    /// Builder: set the timeout.
    pub fn with_timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }

    /// Builder: set the image prefix.
    pub fn with_image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.image_prefix = Some(prefix.into());
        self
    }

    /// Builder: add one environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<SecretValue>) -> Self {
        self.env_vars
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Builder: set the egress mode.
    pub fn with_egress_mode(mut self, mode: EgressMode) -> Self {
        self.egress_mode = Some(mode);
        self
    }
}

/// Fully resolved execution settings for one container run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionConfig {
    /// Memory limit in MiB.
    pub memory_mb: u64,
    /// CPU quota as a fraction of one core.
    pub cpus: f64,
    /// Wall-clock timeout in seconds.
    pub timeout_seconds: u64,
    /// Image name prefix.
    pub image_prefix: String,
    /// Environment variables injected into the container.
    pub env_vars: BTreeMap<String, SecretValue>,
    /// Network posture.
    pub egress_mode: EgressMode,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionOptions::default().resolve()
    }
}

impl ExecutionConfig {
    /// The timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Validate the limits for obvious errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_mb < MIN_MEMORY_MB {
            return Err(ConfigError::Validation(format!(
                "memory_mb must be at least {MIN_MEMORY_MB}, got {}",
                self.memory_mb
            )));
        }
        if !(self.cpus > 0.0 && self.cpus <= MAX_CPUS) {
            return Err(ConfigError::Validation(format!(
                "cpus must be in (0.0, {MAX_CPUS}], got {}",
                self.cpus
            )));
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "timeout_seconds must be at least 1".to_string(),
            ));
        }
        let valid_prefix = self
            .image_prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-/".contains(c));
        if !valid_prefix {
            return Err(ConfigError::Validation(format!(
                "image_prefix may only contain [a-z0-9._/-], got {:?}",
                self.image_prefix
            )));
        }
        for (key, value) in &self.env_vars {
            if key.is_empty() || key.contains(['=', '\n', '\r', '\0']) || key.starts_with('#') {
                return Err(ConfigError::Validation(format!(
                    "env_vars key {key:?} is not a valid variable name"
                )));
            }
            // Values are written one per line to the container env file.
            if value.expose().contains(['\n', '\r', '\0']) {
                return Err(ConfigError::Validation(format!(
                    "env_vars value for {key:?} must be a single line"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_defaults() {
        let config = ExecutionOptions::default().resolve();
        assert_eq!(config.memory_mb, 256);
        assert_eq!(config.cpus, 0.5);
        assert_eq!(config.timeout_seconds, 30);
        assert_eq!(config.image_prefix, "travel-aw-skill-");
        assert!(config.env_vars.is_empty());
        assert_eq!(config.egress_mode, EgressMode::Allowlist);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_overrides_field_by_field() {
        let defaults = ExecutionOptions::default()
            .with_image_prefix("acme-")
            .with_timeout_seconds(60)
            .with_env("A", "1");
        let overrides = ExecutionOptions::default().with_timeout_seconds(5);

        let config = defaults.merge(&overrides).resolve();
        assert_eq!(config.image_prefix, "acme-");
        assert_eq!(config.timeout_seconds, 5);
        assert_eq!(config.env_vars.get("A").map(|v| v.expose()), Some("1"));
    }

    #[test]
    fn test_merge_replaces_env_vars_wholesale() {
        let defaults = ExecutionOptions::default().with_env("A", "1");
        let overrides = ExecutionOptions::default().with_env("B", "2");

        let config = defaults.merge(&overrides).resolve();
        assert!(!config.env_vars.contains_key("A"));
        assert!(config.env_vars.contains_key("B"));
    }

    #[test]
    fn test_egress_mode_parse_and_display() {
        assert_eq!("none".parse::<EgressMode>().unwrap(), EgressMode::None);
        assert_eq!(
            "allowlist".parse::<EgressMode>().unwrap(),
            EgressMode::Allowlist
        );
        assert!("open".parse::<EgressMode>().is_err());
        assert_eq!(EgressMode::None.to_string(), "none");
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = ExecutionConfig::default();
        config.cpus = 0.0;
        assert!(config.validate().is_err());

        let mut config = ExecutionConfig::default();
        config.memory_mb = 1;
        assert!(config.validate().is_err());

        let mut config = ExecutionConfig::default();
        config.timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = ExecutionConfig::default();
        config.image_prefix = "Bad Prefix".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_env_vars_fit_env_file() {
        let config = ExecutionOptions::default()
            .with_env("API_KEY", "sk=with=equals")
            .resolve();
        assert!(config.validate().is_ok());

        let config = ExecutionOptions::default()
            .with_env("API_KEY", "line1\nINJECTED=1")
            .resolve();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("single line"));

        let config = ExecutionOptions::default().with_env("#KEY", "x").resolve();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_options_from_json() {
        let options: ExecutionOptions = serde_json::from_str(
            r#"{"timeout_seconds": 3, "egress_mode": "none", "env_vars": {"KEY": "v"}}"#,
        )
        .unwrap();
        assert_eq!(options.timeout_seconds, Some(3));
        assert_eq!(options.egress_mode, Some(EgressMode::None));
        assert_eq!(options.memory_mb, None);
    }

    #[test]
    fn test_options_reject_unknown_keys() {
        let result = serde_json::from_str::<ExecutionOptions>(r#"{"memoryMB": 3}"#);
        assert!(result.is_err());
    }
}
