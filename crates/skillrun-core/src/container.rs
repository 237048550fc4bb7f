//! Container orchestration for a single skill execution.
//!
//! [`ContainerRunner::run`] takes a validated manifest and a resolved
//! [`ExecutionConfig`] through the whole lifecycle: env checks, image,
//! network posture, spawn, watchdog, output parsing and teardown. Every
//! resource it creates (network, container) is released before it returns,
//! whatever the outcome. If the caller drops the future mid-run, the same
//! teardown is spawned onto the runtime instead.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use skillrun_config::{ExecutionConfig, SecretValue};

use crate::engine::{ContainerSpec, ProcessEngine};
use crate::error::{RunnerError, truncate_chars};
use crate::image::ImageCache;
use crate::manifest::SkillManifest;
use crate::network::{
    self, DnsResolver, NetworkHandle, NetworkPosture, build_network_args, resolve_egress_domains,
};
use crate::output::parse_skill_output;

/// Container stderr kept in [`RunnerError::Container`] messages.
const STDERR_EXCERPT_LIMIT: usize = 500;

/// Facts about a finished execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub skill_name: String,
    pub skill_version: String,
    /// Name of the (now removed) container.
    pub container_id: String,
    pub duration_ms: u64,
    pub exit_code: i32,
}

/// Result of a successful skill execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillOutput {
    pub success: bool,
    pub data: Map<String, Value>,
    pub metadata: ExecutionMetadata,
}

/// Fail unless every env var the manifest requires is provided.
///
/// Missing names are reported in declaration order.
pub fn validate_env_vars(
    manifest: &SkillManifest,
    provided: &BTreeMap<String, SecretValue>,
) -> Result<(), RunnerError> {
    let missing: Vec<&str> = manifest
        .required_env_vars()
        .iter()
        .filter(|name| !provided.contains_key(name.as_str()))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(RunnerError::Config(format!(
            "Missing required environment variables: {}",
            missing.join(", ")
        )))
    }
}

/// `<prefix><name>:<version>`
pub fn image_name(manifest: &SkillManifest, prefix: &str) -> String {
    format!("{prefix}{}:{}", manifest.name, manifest.version)
}

/// `skill-<name>-<8 hex>`
pub fn container_name(skill: &str) -> String {
    format!("skill-{skill}-{}", network::short_id())
}

/// Runs skills in hardened, single-use containers.
#[derive(Clone)]
pub struct ContainerRunner {
    engine: Arc<dyn ProcessEngine>,
    resolver: Arc<dyn DnsResolver>,
    images: Arc<ImageCache>,
}

impl std::fmt::Debug for ContainerRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRunner")
            .field("engine", &self.engine.name())
            .field("images", &self.images)
            .finish_non_exhaustive()
    }
}

impl ContainerRunner {
    pub fn new(
        engine: Arc<dyn ProcessEngine>,
        resolver: Arc<dyn DnsResolver>,
        images: Arc<ImageCache>,
    ) -> Self {
        Self {
            engine,
            resolver,
            images,
        }
    }

    pub fn images(&self) -> &Arc<ImageCache> {
        &self.images
    }

    /// Execute `manifest`'s skill with `input` on stdin.
    pub async fn run(
        &self,
        manifest: &SkillManifest,
        input: &Map<String, Value>,
        skill_dir: &Path,
        config: &ExecutionConfig,
    ) -> Result<SkillOutput, RunnerError> {
        validate_env_vars(manifest, &config.env_vars)?;
        config
            .validate()
            .map_err(|e| RunnerError::Config(e.to_string()))?;
        let stdin = serde_json::to_vec(input)
            .map_err(|e| RunnerError::Config(format!("failed to serialize skill input: {e}")))?;

        let image = image_name(manifest, &config.image_prefix);
        let status = self
            .images
            .ensure(self.engine.as_ref(), &image, skill_dir, &manifest.name)
            .await?;
        tracing::debug!(skill = %manifest.name, image = %image, status = ?status, "Image ready");

        let (network, network_args) = self.prepare_network(manifest, config).await?;
        let mut teardown = Teardown::new(Arc::clone(&self.engine), network);

        let spec = ContainerSpec {
            name: container_name(&manifest.name),
            image,
            skill: manifest.name.clone(),
            network_args,
            memory_mb: config.memory_mb,
            cpus: config.cpus,
            env: config.env_vars.clone(),
        };

        let result = self
            .supervise(manifest, &spec, stdin, config, &mut teardown)
            .await;
        teardown.finish().await;
        result
    }

    async fn prepare_network(
        &self,
        manifest: &SkillManifest,
        config: &ExecutionConfig,
    ) -> Result<(Option<NetworkHandle>, Vec<String>), RunnerError> {
        match NetworkPosture::for_manifest(manifest, config.egress_mode) {
            NetworkPosture::Isolated => Ok((None, build_network_args(None, &[]))),
            NetworkPosture::Allowlisted => {
                // Resolve before creating anything so DNS failures leak nothing.
                let resolved =
                    resolve_egress_domains(self.resolver.as_ref(), manifest.egress()).await?;
                let handle = network::create_network(&self.engine, &manifest.name).await?;
                let args = build_network_args(Some(handle.name()), &resolved);
                Ok((Some(handle), args))
            }
        }
    }

    /// Run the container under the watchdog and turn its output into a result.
    async fn supervise(
        &self,
        manifest: &SkillManifest,
        spec: &ContainerSpec,
        stdin: Vec<u8>,
        config: &ExecutionConfig,
        teardown: &mut Teardown,
    ) -> Result<SkillOutput, RunnerError> {
        tracing::info!(
            skill = %manifest.name,
            container = %spec.name,
            image = %spec.image,
            timeout_secs = config.timeout_seconds,
            "Running skill container"
        );

        teardown.track_container(&spec.name);
        let start = Instant::now();
        let outcome =
            tokio::time::timeout(config.timeout(), self.engine.run_container(spec, stdin)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let output = match outcome {
            Ok(Ok(output)) => {
                // `--rm` removed it on exit.
                teardown.container_exited();
                output
            }
            Ok(Err(e)) => {
                // The client may have died after the daemon started the container.
                teardown.reap_container().await;
                return Err(RunnerError::Container {
                    message: format!("Failed to spawn container: {e}"),
                    exit_code: None,
                });
            }
            Err(_) => {
                tracing::warn!(
                    container = %spec.name,
                    timeout_secs = config.timeout_seconds,
                    "Skill container timed out"
                );
                teardown.reap_container().await;
                return Err(RunnerError::Timeout {
                    timeout_secs: config.timeout_seconds,
                    container: spec.name.clone(),
                });
            }
        };

        if !output.success() {
            tracing::info!(
                container = %spec.name,
                exit_code = ?output.exit_code,
                elapsed_ms = duration_ms,
                "Skill container failed"
            );
            return Err(exit_error(&spec.name, output.exit_code, &output.stderr));
        }

        let data = parse_skill_output(&output.stdout)?;
        tracing::info!(
            skill = %manifest.name,
            container = %spec.name,
            elapsed_ms = duration_ms,
            "Skill container finished"
        );

        Ok(SkillOutput {
            success: true,
            data,
            metadata: ExecutionMetadata {
                skill_name: manifest.name.clone(),
                skill_version: manifest.version.clone(),
                container_id: spec.name.clone(),
                duration_ms,
                exit_code: 0,
            },
        })
    }
}

/// Kill then force-remove a container; failures are logged only.
async fn reap(engine: &dyn ProcessEngine, container: &str) {
    if let Err(e) = engine.kill_container(container).await {
        tracing::debug!(container, error = %e, "Container kill failed");
    }
    if let Err(e) = engine.remove_container(container).await {
        tracing::debug!(container, error = %e, "Container removal failed");
    }
}

/// Resources one execution must release: the container while it may be
/// running, then the network.
///
/// Dropped before [`finish`](Self::finish) completes, it spawns the same
/// teardown onto the current runtime.
struct Teardown {
    engine: Arc<dyn ProcessEngine>,
    container: Option<String>,
    network: Option<NetworkHandle>,
}

impl Teardown {
    fn new(engine: Arc<dyn ProcessEngine>, network: Option<NetworkHandle>) -> Self {
        Self {
            engine,
            container: None,
            network,
        }
    }

    fn track_container(&mut self, name: &str) {
        self.container = Some(name.to_string());
    }

    fn container_exited(&mut self) {
        self.container = None;
    }

    async fn reap_container(&mut self) {
        if let Some(name) = &self.container {
            reap(self.engine.as_ref(), name).await;
            self.container = None;
        }
    }

    async fn finish(mut self) {
        self.reap_container().await;
        if let Some(network) = self.network.as_mut() {
            network.destroy().await;
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        // Without a live container the network handle cleans up after itself.
        let Some(container) = self.container.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(container = %container, "No runtime to reap abandoned container");
            return;
        };
        tracing::warn!(container = %container, "Execution abandoned, reaping container");
        let engine = Arc::clone(&self.engine);
        let network = self.network.take();
        runtime.spawn(async move {
            reap(engine.as_ref(), &container).await;
            if let Some(mut network) = network {
                network.destroy().await;
            }
        });
    }
}

fn exit_error(container: &str, exit_code: Option<i32>, stderr: &str) -> RunnerError {
    let mut message = match exit_code {
        Some(code) => format!("Container \"{container}\" exited with code {code}"),
        None => format!("Container \"{container}\" was terminated by a signal"),
    };
    let excerpt = truncate_chars(stderr.trim(), STDERR_EXCERPT_LIMIT);
    if !excerpt.is_empty() {
        message.push_str(": ");
        message.push_str(excerpt);
    }
    RunnerError::Container { message, exit_code }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_manifest;
    use pretty_assertions::assert_eq;

    fn manifest(required: &[&str]) -> SkillManifest {
        let required = required
            .iter()
            .map(|v| format!("      - {v}\n"))
            .collect::<String>();
        let required = if required.is_empty() {
            " []\n".to_string()
        } else {
            format!("\n{required}")
        };
        parse_manifest(&format!(
            "name: flight-search
version: 1.2.0
description: Searches flights
author: Travel Team
capabilities: [C-SEARCH]
journeyStages: [J1]
permissions:
  network:
    egress: []
  filesystem:
    read: []
    write: []
  env_vars:
    required:{required}    optional: []
risk_level: low
"
        ))
        .unwrap()
    }

    #[test]
    fn test_missing_env_vars_reported_in_order() {
        let manifest = manifest(&["ZED_KEY", "ALPHA_KEY", "MID_KEY"]);
        let mut provided = BTreeMap::new();
        provided.insert("MID_KEY".to_string(), SecretValue::new("x"));

        let err = validate_env_vars(&manifest, &provided).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(
            err.to_string()
                .contains("Missing required environment variables: ZED_KEY, ALPHA_KEY")
        );
    }

    #[test]
    fn test_all_env_vars_present() {
        let manifest = manifest(&["API_KEY"]);
        let mut provided = BTreeMap::new();
        provided.insert("API_KEY".to_string(), SecretValue::new("x"));
        provided.insert("EXTRA".to_string(), SecretValue::new("y"));
        assert!(validate_env_vars(&manifest, &provided).is_ok());
        assert!(validate_env_vars(&self::manifest(&[]), &BTreeMap::new()).is_ok());
    }

    #[test]
    fn test_image_name() {
        assert_eq!(
            image_name(&manifest(&[]), "travel-aw-skill-"),
            "travel-aw-skill-flight-search:1.2.0"
        );
    }

    #[test]
    fn test_container_name_shape() {
        let name = container_name("flight-search");
        let suffix = name.strip_prefix("skill-flight-search-").unwrap();
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn test_exit_error_message() {
        let err = exit_error("skill-x-1", Some(3), "  Traceback: boom\n");
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(
            err.to_string(),
            "container error: Container \"skill-x-1\" exited with code 3: Traceback: boom"
        );

        let err = exit_error("skill-x-1", None, "");
        assert_eq!(err.exit_code(), None);
        assert!(err.to_string().ends_with("was terminated by a signal"));
    }

    #[test]
    fn test_skill_output_serializes_camel_case() {
        let output = SkillOutput {
            success: true,
            data: Map::new(),
            metadata: ExecutionMetadata {
                skill_name: "echo".to_string(),
                skill_version: "1.0.0".to_string(),
                container_id: "skill-echo-0123abcd".to_string(),
                duration_ms: 12,
                exit_code: 0,
            },
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": true,
                "data": {},
                "metadata": {
                    "skillName": "echo",
                    "skillVersion": "1.0.0",
                    "containerId": "skill-echo-0123abcd",
                    "durationMs": 12,
                    "exitCode": 0
                }
            })
        );
    }
}
