//! Docker CLI engine.
//!
//! Every operation is one `docker` invocation through `tokio::process`.
//! Non-zero exits become [`EngineError::Command`] carrying the captured
//! stderr so callers can surface the daemon's own diagnostics.
//!
//! Container env vars are written to a private `--env-file` for the
//! duration of `docker run`. The client's own environment is left alone,
//! so a skill's `DOCKER_HOST` or `PATH` never redirects the engine.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use skillrun_config::SecretValue;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use zeroize::Zeroizing;

use crate::BoxFuture;

use super::{ContainerOutput, ContainerSpec, EngineError, ProcessEngine, SKILL_LABEL};

/// Container engine backed by the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    /// Docker CLI binary path.
    docker_bin: PathBuf,
}

impl DockerEngine {
    /// Create an engine that invokes `docker_bin`.
    pub fn new(docker_bin: impl Into<PathBuf>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    /// The binary this engine shells out to.
    pub fn docker_bin(&self) -> &Path {
        &self.docker_bin
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.docker_bin);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Spawn {
            bin: self.docker_bin.display().to_string(),
            source,
        }
    }

    /// Run `docker <args>` to completion and capture its output.
    async fn output(&self, args: &[String]) -> Result<Output, EngineError> {
        tracing::debug!(bin = %self.docker_bin.display(), args = ?args, "docker");
        self.command()
            .args(args)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))
    }

    /// Run `docker <args>` and fail unless it exits 0.
    async fn check(&self, args: Vec<String>) -> Result<(), EngineError> {
        let output = self.output(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(EngineError::Command {
            command: format!("docker {}", args.join(" ")),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new("docker")
    }
}

fn build_args(context_dir: &Path, image: &str) -> Vec<String> {
    vec![
        "build".to_string(),
        "-t".to_string(),
        image.to_string(),
        context_dir.to_string_lossy().into_owned(),
    ]
}

fn network_create_args(name: &str, skill: &str) -> Vec<String> {
    vec![
        "network".to_string(),
        "create".to_string(),
        "--driver=bridge".to_string(),
        format!("--label={SKILL_LABEL}={skill}"),
        name.to_string(),
    ]
}

/// Write `env` as `KEY=VALUE` lines to a fresh temp file.
///
/// The file is created with mode `0600` and deleted when the handle drops.
fn write_env_file(env: &BTreeMap<String, SecretValue>) -> std::io::Result<NamedTempFile> {
    let mut contents = Zeroizing::new(String::new());
    for (key, value) in env {
        contents.push_str(key);
        contents.push('=');
        contents.push_str(value.expose());
        contents.push('\n');
    }

    let mut file = tempfile::Builder::new()
        .prefix("skillrun-env-")
        .tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

impl ProcessEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    fn image_exists(&self, image: &str) -> BoxFuture<'_, Result<bool, EngineError>> {
        let args = vec!["image".to_string(), "inspect".to_string(), image.to_string()];
        Box::pin(async move {
            let output = self.output(&args).await?;
            Ok(output.status.success())
        })
    }

    fn build_image(&self, context_dir: &Path, image: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        let args = build_args(context_dir, image);
        let image = image.to_string();
        Box::pin(async move {
            tracing::info!(backend = "docker", image = %image, "Building skill image");
            self.check(args).await
        })
    }

    fn create_network(&self, name: &str, skill: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        let args = network_create_args(name, skill);
        Box::pin(self.check(args))
    }

    fn remove_network(&self, name: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        let args = vec!["network".to_string(), "rm".to_string(), name.to_string()];
        Box::pin(self.check(args))
    }

    fn run_container(
        &self,
        spec: &ContainerSpec,
        stdin: Vec<u8>,
    ) -> BoxFuture<'_, Result<ContainerOutput, EngineError>> {
        let spec = spec.clone();

        Box::pin(async move {
            let env_file = if spec.env.is_empty() {
                None
            } else {
                Some(write_env_file(&spec.env)?)
            };
            let args = spec.run_args(env_file.as_ref().map(NamedTempFile::path));

            tracing::info!(
                backend = "docker",
                container = %spec.name,
                args = ?args,
                "Starting skill container"
            );

            let mut cmd = self.command();
            cmd.args(&args).stdin(Stdio::piped());
            let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
            let pipe = child.stdin.take();

            let feed = async move {
                let Some(mut pipe) = pipe else {
                    return Ok(());
                };
                match pipe.write_all(&stdin).await {
                    // The skill may exit without reading its input.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                }
                // `pipe` drops here, closing the container's stdin.
            };

            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            // The client reads the env file at startup; it is no longer needed.
            drop(env_file);
            let output = output?;
            fed?;

            Ok(ContainerOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }

    fn kill_container(&self, name: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        let args = vec!["kill".to_string(), name.to_string()];
        Box::pin(self.check(args))
    }

    fn remove_container(&self, name: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        let args = vec!["rm".to_string(), "-f".to_string(), name.to_string()];
        Box::pin(self.check(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_docker_engine_name() {
        let engine = DockerEngine::default();
        assert_eq!(engine.name(), "docker");
        assert_eq!(engine.docker_bin(), Path::new("docker"));
    }

    #[test]
    fn test_build_args() {
        let args = build_args(Path::new("/skills/echo"), "travel-aw-skill-echo:1.0.0");
        assert_eq!(
            args,
            vec!["build", "-t", "travel-aw-skill-echo:1.0.0", "/skills/echo"]
        );
    }

    #[test]
    fn test_network_create_args() {
        let args = network_create_args("skill-net-echo-0a1b2c3d", "echo");
        assert_eq!(
            args,
            vec![
                "network",
                "create",
                "--driver=bridge",
                "--label=skillrun.skill=echo",
                "skill-net-echo-0a1b2c3d",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let engine = DockerEngine::new("/nonexistent/docker-binary");
        let err = engine.image_exists("alpine:latest").await.unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/docker-binary"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_captures_exit_code() {
        // `false` ignores its arguments and exits 1.
        let engine = DockerEngine::new("false");
        let err = engine.remove_network("skill-net-x").await.unwrap_err();
        match err {
            EngineError::Command { command, code, .. } => {
                assert_eq!(command, "docker network rm skill-net-x");
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_container_reports_nonzero_exit() {
        let engine = DockerEngine::new("sh");
        let spec = ContainerSpec {
            name: "t".to_string(),
            image: "unused".to_string(),
            skill: "t".to_string(),
            network_args: Vec::new(),
            memory_mb: 6,
            cpus: 1.0,
            env: Default::default(),
        };
        // `sh run --rm ...` cannot open a script named "run".
        let out = engine
            .run_container(&spec, b"{\"x\":1}".to_vec())
            .await
            .unwrap();
        assert!(!out.success());
        assert!(!out.stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_env_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let mut env = BTreeMap::new();
        env.insert("API_KEY".to_string(), SecretValue::new("sk=live"));
        env.insert("REGION".to_string(), SecretValue::new("eu-west-1"));

        let file = write_env_file(&env).unwrap();
        let path = file.path().to_path_buf();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "API_KEY=sk=live\nREGION=eu-west-1\n"
        );

        drop(file);
        assert!(!path.exists());
    }

    /// A stand-in `docker` that reports the client's `DOCKER_HOST` on
    /// stderr and echoes the env file it was given on stdout.
    #[cfg(unix)]
    fn env_reporting_docker(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("docker");
        std::fs::write(
            &path,
            r#"#!/bin/sh
echo "client DOCKER_HOST=${DOCKER_HOST:-unset}" >&2
for arg in "$@"; do
  case "$arg" in
    --env-file=*)
      file="${arg#--env-file=}"
      echo "file=$file"
      cat "$file"
      ;;
  esac
done
"#,
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_container_env_never_reaches_client_environment() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine = DockerEngine::new(env_reporting_docker(tmp.path()));

        let mut env = BTreeMap::new();
        env.insert(
            "DOCKER_HOST".to_string(),
            SecretValue::new("tcp://evil.example:2375"),
        );
        env.insert("PATH".to_string(), SecretValue::new("/nonexistent"));
        let spec = ContainerSpec {
            name: "skill-env-0a1b2c3d".to_string(),
            image: "travel-aw-skill-env:1.0.0".to_string(),
            skill: "env".to_string(),
            network_args: Vec::new(),
            memory_mb: 64,
            cpus: 0.5,
            env,
        };

        let out = engine.run_container(&spec, b"{}".to_vec()).await.unwrap();

        assert!(out.success(), "stderr: {}", out.stderr);
        assert!(!out.stderr.contains("evil.example"), "stderr: {}", out.stderr);
        assert!(out.stdout.contains("DOCKER_HOST=tcp://evil.example:2375\n"));
        assert!(out.stdout.contains("PATH=/nonexistent\n"));

        let env_file = out
            .stdout
            .lines()
            .find_map(|l| l.strip_prefix("file="))
            .unwrap();
        assert!(!Path::new(env_file).exists());
    }
}
