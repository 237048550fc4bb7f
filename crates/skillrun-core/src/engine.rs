//! Container engine abstraction.
//!
//! The runner never talks to a container runtime directly. It goes through
//! the narrow [`ProcessEngine`] capability trait: inspect/build images,
//! create/remove networks, run/kill/remove containers. The production
//! implementation ([`DockerEngine`]) shells out to the `docker` CLI; tests
//! substitute a scripted engine so orchestration logic runs without a live
//! daemon.
//!
//! ## Container hardening
//!
//! | Concern | `docker run` flag |
//! |---------|-------------------|
//! | Memory | `--memory=<mb>m` |
//! | CPU | `--cpus=<fraction>` |
//! | Privilege escalation | `--security-opt=no-new-privileges` |
//! | Root filesystem | `--read-only` |
//! | Scratch space | `--tmpfs=/tmp:rw,noexec,nosuid,size=64m` |
//! | Network | computed by [`network`](crate::network) |
//! | Cleanup | `--rm` plus forced removal on timeout |

pub mod docker;

use std::collections::BTreeMap;
use std::path::Path;

use skillrun_config::SecretValue;

use crate::BoxFuture;

pub use docker::DockerEngine;

/// Size of the writable `/tmp` mount inside skill containers.
pub const TMPFS_SIZE: &str = "64m";

/// Label attached to every container and network the runner creates.
pub const SKILL_LABEL: &str = "skillrun.skill";

/// Errors from container engine commands.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine binary could not be started.
    #[error("failed to spawn {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine command ran but reported failure.
    #[error("`{command}` failed (exit {}): {stderr}", display_code(.code))]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Talking to a running process failed.
    #[error("process I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// Everything the engine needs to start one skill container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Unique container name.
    pub name: String,
    /// Image reference (`<prefix><skill>:<version>`).
    pub image: String,
    /// Skill name, used for labelling.
    pub skill: String,
    /// Network posture arguments.
    pub network_args: Vec<String>,
    /// Memory limit in MiB.
    pub memory_mb: u64,
    /// CPU quota.
    pub cpus: f64,
    /// Environment passed to the container. Values reach the container
    /// through an env file, never through argv or the engine's own
    /// environment.
    pub env: BTreeMap<String, SecretValue>,
}

impl ContainerSpec {
    /// The full `docker run` argument list for this container.
    ///
    /// `env_file` is the file holding [`env`](Self::env); it is only
    /// referenced by path.
    pub fn run_args(&self, env_file: Option<&Path>) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            format!("--name={}", self.name),
            format!("--label={SKILL_LABEL}={}", self.skill),
        ];

        args.extend(self.network_args.iter().cloned());

        args.extend([
            format!("--memory={}m", self.memory_mb),
            format!("--cpus={}", self.cpus),
            "--security-opt=no-new-privileges".to_string(),
            "--read-only".to_string(),
            format!("--tmpfs=/tmp:rw,noexec,nosuid,size={TMPFS_SIZE}"),
        ]);

        if let Some(path) = env_file {
            args.push(format!("--env-file={}", path.display()));
        }

        args.push(self.image.clone());
        args
    }
}

/// What a finished container left behind.
#[derive(Debug, Clone, Default)]
pub struct ContainerOutput {
    /// Exit code, `None` if the client was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ContainerOutput {
    /// Whether the container exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Container engine capability interface.
pub trait ProcessEngine: Send + Sync {
    /// Human-readable name of this engine (e.g. "docker").
    fn name(&self) -> &str;

    /// Whether `image` exists locally.
    fn image_exists(&self, image: &str) -> BoxFuture<'_, Result<bool, EngineError>>;

    /// Build `image` from the build context at `context_dir`.
    fn build_image(&self, context_dir: &Path, image: &str) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Create a bridge network called `name`.
    fn create_network(&self, name: &str, skill: &str) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Remove the network called `name`.
    fn remove_network(&self, name: &str) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Start a container, feed it `stdin`, and wait for it to exit.
    ///
    /// Dropping the returned future abandons the engine client process but
    /// not necessarily the container; callers follow up with
    /// [`kill_container`](Self::kill_container) and
    /// [`remove_container`](Self::remove_container).
    fn run_container(
        &self,
        spec: &ContainerSpec,
        stdin: Vec<u8>,
    ) -> BoxFuture<'_, Result<ContainerOutput, EngineError>>;

    /// Force-kill a running container.
    fn kill_container(&self, name: &str) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Force-remove a container.
    fn remove_container(&self, name: &str) -> BoxFuture<'_, Result<(), EngineError>>;
}
