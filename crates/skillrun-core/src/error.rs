//! Error taxonomy for skill execution.
//!
//! Every failure a caller can observe is one [`RunnerError`] variant, so
//! calling code can branch on the kind (retry on timeout, surface a config
//! fix for missing env vars, drop a catalog entry on manifest errors).
//! Nothing in this crate retries internally.

use std::time::Duration;

/// Errors surfaced by [`SkillRunner::execute`](crate::SkillRunner::execute).
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The manifest is missing, unparsable, or violates a field rule.
    #[error("invalid manifest field `{field}`: {message}")]
    ManifestValidation { field: String, message: String },

    /// Execution settings are unusable (e.g. a required env var is missing).
    #[error("configuration error: {0}")]
    Config(String),

    /// `docker build` failed for the skill image.
    #[error("image build failed for skill '{skill}': {message}")]
    ImageBuild { skill: String, message: String },

    /// A network create/remove engine command failed.
    #[error("network error: {0}")]
    Network(String),

    /// A declared egress domain did not resolve to any address.
    #[error("failed to resolve domain \"{domain}\"; cannot create egress allowlist")]
    DnsResolution { domain: String },

    /// The container could not be started or exited non-zero.
    #[error("container error: {message}")]
    Container {
        message: String,
        exit_code: Option<i32>,
    },

    /// The watchdog fired before the container exited.
    #[error("container \"{container}\" exceeded timeout of {timeout_secs}s")]
    Timeout { timeout_secs: u64, container: String },

    /// The container output did not follow the output protocol.
    #[error("output parse error: {0}")]
    OutputParse(String),
}

impl RunnerError {
    /// Build a manifest validation error for `field`.
    pub fn manifest(field: impl Into<String>, message: impl Into<String>) -> Self {
        RunnerError::ManifestValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            RunnerError::ManifestValidation { .. } => "MANIFEST_VALIDATION",
            RunnerError::Config(_) => "CONFIG_ERROR",
            RunnerError::ImageBuild { .. } => "IMAGE_BUILD",
            RunnerError::Network(_) => "NETWORK_ERROR",
            RunnerError::DnsResolution { .. } => "DNS_RESOLUTION",
            RunnerError::Container { .. } => "CONTAINER_ERROR",
            RunnerError::Timeout { .. } => "CONTAINER_TIMEOUT",
            RunnerError::OutputParse(_) => "OUTPUT_PARSE",
        }
    }

    /// The manifest field that failed validation, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            RunnerError::ManifestValidation { field, .. } => Some(field),
            _ => None,
        }
    }

    /// The container exit code, for container errors that have one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunnerError::Container { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Whether the watchdog terminated the execution.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunnerError::Timeout { .. })
    }

    /// The configured timeout, for timeout errors.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            RunnerError::Timeout { timeout_secs, .. } => Some(Duration::from_secs(*timeout_secs)),
            _ => None,
        }
    }
}

/// Truncate engine diagnostics to at most `max` characters.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
