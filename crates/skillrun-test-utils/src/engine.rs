//! Scripted in-memory container engine.
//!
//! [`FakeEngine`] implements [`ProcessEngine`] without a daemon. It records
//! every call, tracks which networks and containers are alive, and plays
//! back scripted image, build and run behaviour so orchestration tests can
//! assert on ordering and cleanup.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use skillrun_core::output::{END_MARKER, START_MARKER};
use skillrun_core::{BoxFuture, ContainerOutput, ContainerSpec, EngineError, ProcessEngine};

/// Env file path recorded in run args when a container has env vars.
pub const FAKE_ENV_FILE: &str = "/fake/skillrun-env";

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    ImageExists(String),
    BuildImage { image: String, context: PathBuf },
    CreateNetwork(String),
    RemoveNetwork(String),
    RunContainer(RunRecord),
    KillContainer(String),
    RemoveContainer(String),
}

/// What a `run_container` call received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    /// Env values the container would receive.
    pub env: BTreeMap<String, String>,
    pub stdin: String,
}

/// How the scripted container behaves.
#[derive(Debug, Clone)]
pub enum RunBehavior {
    /// Emit stdin back as the skill output object.
    Echo,
    /// Exit with the given code and streams.
    Exit {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// Never exit.
    Hang,
    /// The engine client fails to start.
    SpawnFailure,
}

impl RunBehavior {
    /// Successful exit printing `json` between the output markers.
    pub fn output(json: &str) -> Self {
        RunBehavior::Exit {
            exit_code: Some(0),
            stdout: format!("{START_MARKER}\n{json}\n{END_MARKER}\n"),
            stderr: String::new(),
        }
    }

    /// Exit with `code`, writing `stderr`.
    pub fn fail(code: i32, stderr: &str) -> Self {
        RunBehavior::Exit {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    /// Successful exit with raw stdout.
    pub fn stdout(stdout: &str) -> Self {
        RunBehavior::Exit {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }
}

#[derive(Debug)]
struct Script {
    images: HashSet<String>,
    build_failure: Option<(Option<i32>, String)>,
    build_delay: Duration,
    network_failure: bool,
    run: RunBehavior,
    run_delay: Duration,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<EngineCall>,
    networks: HashSet<String>,
    containers: HashSet<String>,
}

/// In-memory [`ProcessEngine`] for tests.
#[derive(Debug)]
pub struct FakeEngine {
    script: Mutex<Script>,
    state: Mutex<State>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    /// No images present, builds succeed, containers echo their input.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                images: HashSet::new(),
                build_failure: None,
                build_delay: Duration::ZERO,
                network_failure: false,
                run: RunBehavior::Echo,
                run_delay: Duration::ZERO,
            }),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_image(self, image: &str) -> Self {
        self.script().images.insert(image.to_string());
        self
    }

    pub fn with_build_failure(self, exit_code: i32, stderr: &str) -> Self {
        self.script().build_failure = Some((Some(exit_code), stderr.to_string()));
        self
    }

    pub fn with_build_delay(self, delay: Duration) -> Self {
        self.script().build_delay = delay;
        self
    }

    pub fn with_network_failure(self) -> Self {
        self.script().network_failure = true;
        self
    }

    pub fn with_run(self, behavior: RunBehavior) -> Self {
        self.script().run = behavior;
        self
    }

    pub fn with_run_delay(self, delay: Duration) -> Self {
        self.script().run_delay = delay;
        self
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    pub fn build_count(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::BuildImage { .. }))
    }

    pub fn run_count(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::RunContainer(_)))
    }

    /// Network names created via `create_network`, in order.
    pub fn created_networks(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                EngineCall::CreateNetwork(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every `run_container` call, in order.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                EngineCall::RunContainer(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_run(&self) -> Option<RunRecord> {
        self.runs().pop()
    }

    /// Networks created and not yet removed.
    pub fn live_networks(&self) -> HashSet<String> {
        self.state().networks.clone()
    }

    /// Containers started and neither exited (`--rm`) nor removed.
    pub fn live_containers(&self) -> HashSet<String> {
        self.state().containers.clone()
    }

    fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: EngineCall) {
        self.state().calls.push(call);
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().expect("fake engine script poisoned")
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake engine state poisoned")
    }
}

impl ProcessEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn image_exists(&self, image: &str) -> BoxFuture<'_, Result<bool, EngineError>> {
        self.record(EngineCall::ImageExists(image.to_string()));
        let present = self.script().images.contains(image);
        Box::pin(async move { Ok(present) })
    }

    fn build_image(&self, context_dir: &Path, image: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        self.record(EngineCall::BuildImage {
            image: image.to_string(),
            context: context_dir.to_path_buf(),
        });
        let image = image.to_string();
        let (delay, failure) = {
            let script = self.script();
            (script.build_delay, script.build_failure.clone())
        };

        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if let Some((code, stderr)) = failure {
                return Err(EngineError::Command {
                    command: format!("docker build -t {image}"),
                    code,
                    stderr,
                });
            }
            self.script().images.insert(image);
            Ok(())
        })
    }

    fn create_network(&self, name: &str, _skill: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        self.record(EngineCall::CreateNetwork(name.to_string()));
        let name = name.to_string();
        Box::pin(async move {
            if self.script().network_failure {
                return Err(EngineError::Command {
                    command: format!("docker network create {name}"),
                    code: Some(1),
                    stderr: "Error response from daemon: scripted failure".to_string(),
                });
            }
            self.state().networks.insert(name);
            Ok(())
        })
    }

    fn remove_network(&self, name: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        self.record(EngineCall::RemoveNetwork(name.to_string()));
        let name = name.to_string();
        Box::pin(async move {
            if self.state().networks.remove(&name) {
                Ok(())
            } else {
                Err(EngineError::Command {
                    command: format!("docker network rm {name}"),
                    code: Some(1),
                    stderr: format!("Error response from daemon: network {name} not found"),
                })
            }
        })
    }

    fn run_container(
        &self,
        spec: &ContainerSpec,
        stdin: Vec<u8>,
    ) -> BoxFuture<'_, Result<ContainerOutput, EngineError>> {
        let stdin = String::from_utf8_lossy(&stdin).into_owned();
        self.record(EngineCall::RunContainer(RunRecord {
            name: spec.name.clone(),
            image: spec.image.clone(),
            args: spec.run_args((!spec.env.is_empty()).then(|| Path::new(FAKE_ENV_FILE))),
            env: spec
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.expose().to_string()))
                .collect(),
            stdin: stdin.clone(),
        }));
        let name = spec.name.clone();
        let (behavior, delay) = {
            let script = self.script();
            (script.run.clone(), script.run_delay)
        };

        Box::pin(async move {
            if matches!(behavior, RunBehavior::SpawnFailure) {
                return Err(EngineError::Spawn {
                    bin: "docker".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted"),
                });
            }

            self.state().containers.insert(name.clone());
            tokio::time::sleep(delay).await;

            let output = match behavior {
                RunBehavior::Echo => ContainerOutput {
                    exit_code: Some(0),
                    stdout: format!("starting\n{START_MARKER}\n{stdin}\n{END_MARKER}\n"),
                    stderr: String::new(),
                },
                RunBehavior::Exit {
                    exit_code,
                    stdout,
                    stderr,
                } => ContainerOutput {
                    exit_code,
                    stdout,
                    stderr,
                },
                RunBehavior::Hang => std::future::pending().await,
                RunBehavior::SpawnFailure => unreachable!("handled above"),
            };

            // `--rm` removes the container once it exits.
            self.state().containers.remove(&name);
            Ok(output)
        })
    }

    fn kill_container(&self, name: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        self.record(EngineCall::KillContainer(name.to_string()));
        Box::pin(async move { Ok(()) })
    }

    fn remove_container(&self, name: &str) -> BoxFuture<'_, Result<(), EngineError>> {
        self.record(EngineCall::RemoveContainer(name.to_string()));
        let name = name.to_string();
        Box::pin(async move {
            self.state().containers.remove(&name);
            Ok(())
        })
    }
}
