//! Temporary skill directories.
//!
//! [`SkillDirBuilder`] writes a valid `skill.yaml` (plus a placeholder
//! Dockerfile) into a temp directory that is deleted when the returned
//! [`TestSkill`] is dropped.

use std::path::{Path, PathBuf};

use skillrun_core::manifest::MANIFEST_FILE;
use tempfile::TempDir;

/// A skill directory that lives as long as this value.
pub struct TestSkill {
    pub dir: PathBuf,
    _temp_dir: TempDir,
}

impl TestSkill {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create a skill directory whose manifest is exactly `yaml`.
    pub fn with_manifest(yaml: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let dir = temp_dir.path().to_path_buf();
        std::fs::write(dir.join(MANIFEST_FILE), yaml).expect("failed to write skill.yaml");
        std::fs::write(dir.join("Dockerfile"), "FROM scratch\n")
            .expect("failed to write Dockerfile");
        Self {
            dir,
            _temp_dir: temp_dir,
        }
    }
}

/// Fluent builder for valid skill manifests.
///
/// ```ignore
/// let skill = SkillDirBuilder::new("flight-search")
///     .egress("api.flights.example", "Flight availability")
///     .required_env("FLIGHT_API_KEY")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct SkillDirBuilder {
    name: String,
    version: String,
    egress: Vec<(String, String)>,
    required_env: Vec<String>,
    optional_env: Vec<String>,
    risk_level: String,
}

impl SkillDirBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            egress: Vec::new(),
            required_env: Vec::new(),
            optional_env: Vec::new(),
            risk_level: "low".to_string(),
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn egress(mut self, domain: &str, reason: &str) -> Self {
        self.egress.push((domain.to_string(), reason.to_string()));
        self
    }

    pub fn required_env(mut self, name: &str) -> Self {
        self.required_env.push(name.to_string());
        self
    }

    pub fn optional_env(mut self, name: &str) -> Self {
        self.optional_env.push(name.to_string());
        self
    }

    pub fn risk_level(mut self, level: &str) -> Self {
        self.risk_level = level.to_string();
        self
    }

    /// Render the manifest YAML.
    pub fn yaml(&self) -> String {
        let mut out = format!(
            "name: {name}\n\
             version: \"{version}\"\n\
             description: Test skill {name}\n\
             author: skillrun tests\n\
             capabilities:\n  - C-TEST\n\
             journeyStages:\n  - J1\n\
             permissions:\n  network:\n    egress:",
            name = self.name,
            version = self.version,
        );
        if self.egress.is_empty() {
            out.push_str(" []\n");
        } else {
            out.push('\n');
            for (domain, reason) in &self.egress {
                out.push_str(&format!(
                    "      - domain: {domain}\n        reason: \"{reason}\"\n"
                ));
            }
        }
        out.push_str("  filesystem:\n    read: []\n    write: []\n  env_vars:\n");
        out.push_str(&format!("    required: {}\n", yaml_list(&self.required_env)));
        out.push_str(&format!("    optional: {}\n", yaml_list(&self.optional_env)));
        out.push_str(&format!("risk_level: {}\n", self.risk_level));
        out
    }

    pub fn build(&self) -> TestSkill {
        TestSkill::with_manifest(&self.yaml())
    }
}

fn yaml_list(items: &[String]) -> String {
    format!("[{}]", items.join(", "))
}
