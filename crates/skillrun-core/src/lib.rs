#![deny(unsafe_code)]

//! skillrun core library.
//!
//! Runs untrusted, manifest-described skills inside hardened, single-use
//! containers. A skill directory holds a `skill.yaml` manifest and a
//! Dockerfile; [`SkillRunner::execute`] validates the manifest, builds the
//! image on first use, attaches the container to an isolated or
//! egress-allowlisted network, feeds it JSON on stdin, enforces a
//! wall-clock timeout, and parses the sentinel-delimited JSON it prints.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future: the return type for async
/// trait methods that need dynamic dispatch (`dyn Trait`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Per-execution container lifecycle.
pub mod container;
/// Container engine capability trait and the docker CLI implementation.
pub mod engine;
/// Error taxonomy with stable codes.
pub mod error;
/// Skill image cache and on-demand builds.
pub mod image;
/// `skill.yaml` loading and validation.
pub mod manifest;
/// Network posture, DNS allowlisting and ephemeral networks.
pub mod network;
/// Sentinel-delimited skill output protocol.
pub mod output;
/// Public facade.
pub mod runner;

pub use container::{ContainerRunner, ExecutionMetadata, SkillOutput};
pub use engine::{ContainerOutput, ContainerSpec, DockerEngine, EngineError, ProcessEngine};
pub use error::RunnerError;
pub use image::{ImageCache, ImageStatus};
pub use manifest::{SkillManifest, load_manifest, parse_manifest};
pub use network::{DnsResolver, HostResolver, NetworkPosture, ResolvedEgress};
pub use output::parse_skill_output;
pub use runner::{SkillInput, SkillRunner, SkillRunnerBuilder};
