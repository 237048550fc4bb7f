//! Skill manifest loading and validation.
//!
//! A skill directory carries a `skill.yaml` manifest declaring identity,
//! capabilities and permissions. The manifest is validated field by field,
//! in a fixed order, and the first violation is returned as a
//! [`RunnerError::ManifestValidation`] naming the field and the rule.
//! Invalid manifests never reach the container engine.

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::error::RunnerError;

/// File name of the manifest inside a skill directory.
pub const MANIFEST_FILE: &str = "skill.yaml";

static KEBAB_CASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]+)*$").expect("kebab-case regex is valid")
});
static SEMVER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("semver regex is valid"));
static CAPABILITY_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^C-[A-Z][A-Z0-9-]*$").expect("capability regex is valid"));
static JOURNEY_STAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^J[0-8]$").expect("journey stage regex is valid"));

/// How much damage a skill could do if it misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    const ALL: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];

    fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single declared egress destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EgressRule {
    /// Exact domain name (no wildcards).
    pub domain: String,
    /// Why the skill needs it.
    pub reason: String,
}

/// Network permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkPermissions {
    pub egress: Vec<EgressRule>,
}

/// Filesystem permissions (advisory; the container root is read-only).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilesystemPermissions {
    pub read: Vec<String>,
    pub write: Vec<String>,
}

/// Environment variables the skill needs or accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvVarPermissions {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

/// Everything a skill is allowed to touch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkillPermissions {
    pub network: NetworkPermissions,
    pub filesystem: FilesystemPermissions,
    pub env_vars: EnvVarPermissions,
}

/// A validated skill manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub capabilities: Vec<String>,
    #[serde(rename = "journeyStages")]
    pub journey_stages: Vec<String>,
    pub permissions: SkillPermissions,
    pub risk_level: RiskLevel,
}

impl SkillManifest {
    /// Declared egress rules, in manifest order.
    pub fn egress(&self) -> &[EgressRule] {
        &self.permissions.network.egress
    }

    /// Environment variables the execution must supply.
    pub fn required_env_vars(&self) -> &[String] {
        &self.permissions.env_vars.required
    }
}

/// Load and validate `skill.yaml` from a skill directory.
pub async fn load_manifest(skill_dir: &Path) -> Result<SkillManifest, RunnerError> {
    let path = skill_dir.join(MANIFEST_FILE);
    let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
        RunnerError::manifest(
            MANIFEST_FILE,
            format!("cannot read manifest at {}: {e}", path.display()),
        )
    })?;

    let manifest = parse_manifest(&raw)?;
    tracing::debug!(
        skill = %manifest.name,
        version = %manifest.version,
        egress = manifest.egress().len(),
        "Loaded skill manifest"
    );
    Ok(manifest)
}

/// Parse and validate manifest text.
pub fn parse_manifest(raw: &str) -> Result<SkillManifest, RunnerError> {
    let doc: Value = serde_yaml::from_str(raw)
        .map_err(|e| RunnerError::manifest(MANIFEST_FILE, format!("invalid YAML: {e}")))?;

    let Value::Mapping(map) = doc else {
        return Err(RunnerError::manifest(
            MANIFEST_FILE,
            "manifest must be a YAML mapping",
        ));
    };

    validate_manifest(&map)
}

fn validate_manifest(m: &Mapping) -> Result<SkillManifest, RunnerError> {
    let name = require_string(m, "name", "name")?;
    if !KEBAB_CASE.is_match(&name) {
        return Err(RunnerError::manifest(
            "name",
            format!("\"name\" must be lowercase kebab-case, got \"{name}\""),
        ));
    }

    let version = require_string(m, "version", "version")?;
    if !SEMVER.is_match(&version) {
        return Err(RunnerError::manifest(
            "version",
            format!("\"version\" must be semver (X.Y.Z), got \"{version}\""),
        ));
    }

    let description = require_string(m, "description", "description")?;
    let author = require_string(m, "author", "author")?;

    let mut capabilities = Vec::new();
    for cap in require_list(m, "capabilities", "capabilities")? {
        match cap.as_str() {
            Some(code) if CAPABILITY_CODE.is_match(code) => capabilities.push(code.to_string()),
            _ => {
                return Err(RunnerError::manifest(
                    "capabilities",
                    format!(
                        "Invalid capability code \"{}\". Must match C-CODE pattern (e.g., C-FLIGHT-SEARCH).",
                        display_value(cap)
                    ),
                ));
            }
        }
    }

    let mut journey_stages = Vec::new();
    for stage in require_list(m, "journeyStages", "journeyStages")? {
        match stage.as_str() {
            Some(code) if JOURNEY_STAGE.is_match(code) => journey_stages.push(code.to_string()),
            _ => {
                return Err(RunnerError::manifest(
                    "journeyStages",
                    format!(
                        "Invalid journey stage \"{}\". Must be J0-J8.",
                        display_value(stage)
                    ),
                ));
            }
        }
    }

    let permissions = validate_permissions(require_mapping(m, "permissions", "permissions")?)?;

    let risk = require_string(m, "risk_level", "risk_level")?;
    let Some(risk_level) = RiskLevel::ALL.into_iter().find(|r| r.as_str() == risk) else {
        return Err(RunnerError::manifest(
            "risk_level",
            format!("\"risk_level\" must be one of low, medium, high, got \"{risk}\""),
        ));
    };

    Ok(SkillManifest {
        name,
        version,
        description,
        author,
        capabilities,
        journey_stages,
        permissions,
        risk_level,
    })
}

fn validate_permissions(p: &Mapping) -> Result<SkillPermissions, RunnerError> {
    const EGRESS: &str = "permissions.network.egress";

    let network = require_mapping(p, "network", "permissions.network")?;
    let mut egress = Vec::new();
    for rule in require_list(network, "egress", EGRESS)? {
        let Value::Mapping(rule) = rule else {
            return Err(RunnerError::manifest(
                EGRESS,
                "Each egress rule must be an object with {domain, reason}",
            ));
        };

        let domain = match rule.get("domain").and_then(Value::as_str) {
            Some(d) if !d.is_empty() => d,
            _ => {
                return Err(RunnerError::manifest(
                    EGRESS,
                    "Egress rule missing required string field: domain",
                ));
            }
        };
        if domain.contains('*') {
            return Err(RunnerError::manifest(
                EGRESS,
                format!("Wildcard domains not allowed in egress: \"{domain}\""),
            ));
        }
        if !fits_host_entry(domain) {
            return Err(RunnerError::manifest(
                EGRESS,
                format!("Egress domain may not contain ':' or whitespace, got \"{domain}\""),
            ));
        }

        let reason = match rule.get("reason").and_then(Value::as_str) {
            Some(r) if !r.is_empty() => r,
            _ => {
                return Err(RunnerError::manifest(
                    EGRESS,
                    "Egress rule missing required string field: reason",
                ));
            }
        };

        egress.push(EgressRule {
            domain: domain.to_string(),
            reason: reason.to_string(),
        });
    }

    let filesystem = require_mapping(p, "filesystem", "permissions.filesystem")?;
    let read = require_string_list(filesystem, "read", "permissions.filesystem.read")?;
    let write = require_string_list(filesystem, "write", "permissions.filesystem.write")?;

    let env_vars = require_mapping(p, "env_vars", "permissions.env_vars")?;
    let required = require_string_list(env_vars, "required", "permissions.env_vars.required")?;
    let optional = require_string_list(env_vars, "optional", "permissions.env_vars.optional")?;

    Ok(SkillPermissions {
        network: NetworkPermissions { egress },
        filesystem: FilesystemPermissions { read, write },
        env_vars: EnvVarPermissions { required, optional },
    })
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn require_string(m: &Mapping, key: &str, path: &str) -> Result<String, RunnerError> {
    match m.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(RunnerError::manifest(
            path,
            format!("\"{path}\" is required and must be a non-empty string"),
        )),
    }
}

fn require_list<'a>(m: &'a Mapping, key: &str, path: &str) -> Result<&'a [Value], RunnerError> {
    match m.get(key) {
        Some(Value::Sequence(seq)) => Ok(seq.as_slice()),
        _ => Err(RunnerError::manifest(
            path,
            format!("\"{path}\" is required and must be a list"),
        )),
    }
}

fn require_string_list(m: &Mapping, key: &str, path: &str) -> Result<Vec<String>, RunnerError> {
    require_list(m, key, path)?
        .iter()
        .map(|v| {
            v.as_str().map(str::to_string).ok_or_else(|| {
                RunnerError::manifest(
                    path,
                    format!("\"{path}\" must contain only strings, got {}", display_value(v)),
                )
            })
        })
        .collect()
}

fn require_mapping<'a>(m: &'a Mapping, key: &str, path: &str) -> Result<&'a Mapping, RunnerError> {
    match m.get(key) {
        Some(Value::Mapping(inner)) => Ok(inner),
        _ => Err(RunnerError::manifest(
            path,
            format!("\"{path}\" is required and must be an object"),
        )),
    }
}

/// Whether `domain` can be pinned as a `--add-host=<domain>:<ip>` entry.
fn fits_host_entry(domain: &str) -> bool {
    !domain
        .chars()
        .any(|c| c == ':' || c.is_whitespace() || c.is_control())
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Sequence(_) => "<list>".to_string(),
        Value::Mapping(_) => "<object>".to_string(),
        Value::Tagged(t) => format!("!{}", t.tag),
    }
}
