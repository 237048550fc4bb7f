#![deny(unsafe_code)]

//! Shared test utilities for the skillrun workspace.
//!
//! Provides a scripted container engine, a static DNS resolver, temporary
//! skill directories, config builders and tracing helpers so orchestration
//! tests run without a docker daemon or network access.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! skillrun-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod engine;
pub mod resolver;
pub mod skill;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use engine::{EngineCall, FakeEngine, RunBehavior};
pub use resolver::StaticResolver;
pub use skill::{SkillDirBuilder, TestSkill};
