//! Configuration builders for tests.

use skillrun_config::{EgressMode, ExecutionOptions, RunnerConfig};

/// Fluent builder for [`RunnerConfig`] with test-friendly defaults
/// (short timeout, small memory limit).
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .timeout_seconds(2)
///     .env("API_KEY", "test-key")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: RunnerConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = RunnerConfig::default();
        config.defaults = ExecutionOptions::default()
            .with_memory_mb(64)
            .with_timeout_seconds(5);
        Self { config }
    }

    pub fn docker_bin(mut self, bin: &str) -> Self {
        self.config.engine.docker_bin = bin.to_string();
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn timeout_seconds(mut self, secs: u64) -> Self {
        self.config.defaults.timeout_seconds = Some(secs);
        self
    }

    pub fn memory_mb(mut self, mb: u64) -> Self {
        self.config.defaults.memory_mb = Some(mb);
        self
    }

    pub fn egress_mode(mut self, mode: EgressMode) -> Self {
        self.config.defaults.egress_mode = Some(mode);
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.config.defaults = self.config.defaults.with_env(key, value);
        self
    }

    pub fn build(self) -> RunnerConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
