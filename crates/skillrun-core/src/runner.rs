//! Public entry point: load a skill, layer settings, run it.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use skillrun_config::{ExecutionOptions, RunnerConfig};
use tracing::Instrument;

use crate::container::{ContainerRunner, SkillOutput};
use crate::engine::{DockerEngine, ProcessEngine};
use crate::error::RunnerError;
use crate::image::ImageCache;
use crate::manifest::load_manifest;
use crate::network::{DnsResolver, HostResolver};

/// A request to run the skill in `skill_dir` with `data` as input.
#[derive(Debug, Clone, Default)]
pub struct SkillInput {
    pub skill_dir: PathBuf,
    pub data: Map<String, Value>,
}

impl SkillInput {
    pub fn new(skill_dir: impl Into<PathBuf>, data: Map<String, Value>) -> Self {
        Self {
            skill_dir: skill_dir.into(),
            data,
        }
    }
}

/// Runs skills with facade-level default settings.
///
/// Cloning is cheap; clones share the engine and image cache.
#[derive(Debug, Clone)]
pub struct SkillRunner {
    defaults: ExecutionOptions,
    containers: ContainerRunner,
}

impl SkillRunner {
    /// Runner backed by the local `docker` CLI and the host resolver.
    pub fn new(defaults: ExecutionOptions) -> Self {
        Self::builder().defaults(defaults).build()
    }

    /// Runner configured from a loaded `skillrun.toml`.
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::builder()
            .defaults(config.defaults.clone())
            .engine(Arc::new(DockerEngine::new(&config.engine.docker_bin)))
            .build()
    }

    pub fn builder() -> SkillRunnerBuilder {
        SkillRunnerBuilder::default()
    }

    pub fn defaults(&self) -> &ExecutionOptions {
        &self.defaults
    }

    pub fn image_cache(&self) -> &Arc<ImageCache> {
        self.containers.images()
    }

    /// Load the skill's manifest and run it.
    ///
    /// `options` override the runner defaults field by field.
    pub async fn execute(
        &self,
        input: &SkillInput,
        options: Option<&ExecutionOptions>,
    ) -> Result<SkillOutput, RunnerError> {
        let span = tracing::info_span!("skill_execution", dir = %input.skill_dir.display());
        async {
            let manifest = load_manifest(&input.skill_dir).await?;
            let config = match options {
                Some(overrides) => self.defaults.merge(overrides),
                None => self.defaults.clone(),
            }
            .resolve();

            self.containers
                .run(&manifest, &input.data, &input.skill_dir, &config)
                .await
        }
        .instrument(span)
        .await
    }
}

/// Builder for [`SkillRunner`]; unset collaborators fall back to docker,
/// the host resolver and a fresh image cache.
#[derive(Default)]
pub struct SkillRunnerBuilder {
    defaults: ExecutionOptions,
    engine: Option<Arc<dyn ProcessEngine>>,
    resolver: Option<Arc<dyn DnsResolver>>,
    images: Option<Arc<ImageCache>>,
}

impl SkillRunnerBuilder {
    pub fn defaults(mut self, defaults: ExecutionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ProcessEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn image_cache(mut self, images: Arc<ImageCache>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn build(self) -> SkillRunner {
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(DockerEngine::default()));
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(HostResolver));
        let images = self.images.unwrap_or_default();

        SkillRunner {
            defaults: self.defaults,
            containers: ContainerRunner::new(engine, resolver, images),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_builder_keeps_defaults_and_cache() {
        let images = Arc::new(ImageCache::new());
        images.mark_present("travel-aw-skill-echo:1.0.0");

        let runner = SkillRunner::builder()
            .defaults(ExecutionOptions::default().with_timeout_seconds(5))
            .image_cache(Arc::clone(&images))
            .build();

        assert_eq!(runner.defaults().timeout_seconds, Some(5));
        assert!(runner.image_cache().is_known("travel-aw-skill-echo:1.0.0"));
        assert!(Arc::ptr_eq(runner.image_cache(), &images));
    }

    #[test]
    fn test_from_config_uses_config_defaults() {
        let config = RunnerConfig::parse("[defaults]\nmemory_mb = 128\n").unwrap();
        let runner = SkillRunner::from_config(&config);
        assert_eq!(runner.defaults().memory_mb, Some(128));
    }

    #[tokio::test]
    async fn test_execute_without_manifest_is_validation_error() {
        let tmp = TempDir::new().unwrap();
        let runner = SkillRunner::new(ExecutionOptions::default());
        let err = runner
            .execute(&SkillInput::new(tmp.path(), Map::new()), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MANIFEST_VALIDATION");
        assert_eq!(err.field(), Some("skill.yaml"));
    }
}
