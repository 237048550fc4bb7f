//! Skill image cache.
//!
//! Images are tagged `<prefix><skill>:<version>` and built from the skill
//! directory on first use. [`ImageCache`] remembers which tags are known
//! to exist so repeat executions skip the engine round trip.
//!
//! Concurrent first executions of the same unseen skill can both miss the
//! cache and both build the tag. Both builds produce the same tag from the
//! same context; no per-tag lock is taken and the overlap is logged.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::engine::{EngineError, ProcessEngine};
use crate::error::{RunnerError, truncate_chars};

/// Build stderr kept in [`RunnerError::ImageBuild`] messages.
const BUILD_STDERR_LIMIT: usize = 500;

/// How [`ImageCache::ensure`] satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// Already known to this cache.
    Cached,
    /// Found on the engine.
    Present,
    /// Built from the skill directory.
    Built,
}

/// Set of image tags known to be present on the engine.
#[derive(Debug, Default)]
pub struct ImageCache {
    known: Mutex<HashSet<String>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_known(&self, image: &str) -> bool {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(image)
    }

    /// Record `image` as present. Returns `false` if it was already known.
    pub fn mark_present(&self, image: &str) -> bool {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(image.to_string())
    }

    /// Drop `image` from the cache, e.g. after it was pruned externally.
    pub fn forget(&self, image: &str) -> bool {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(image)
    }

    /// Make sure `image` exists, building it from `skill_dir` if needed.
    pub async fn ensure(
        &self,
        engine: &dyn ProcessEngine,
        image: &str,
        skill_dir: &Path,
        skill: &str,
    ) -> Result<ImageStatus, RunnerError> {
        if self.is_known(image) {
            return Ok(ImageStatus::Cached);
        }

        match engine.image_exists(image).await {
            Ok(true) => {
                self.mark_present(image);
                return Ok(ImageStatus::Present);
            }
            Ok(false) => {}
            Err(e) => tracing::debug!(image, error = %e, "Image inspect failed, building"),
        }

        tracing::info!(skill, image, dir = %skill_dir.display(), "Building skill image");
        let start = std::time::Instant::now();

        engine
            .build_image(skill_dir, image)
            .await
            .map_err(|e| build_error(skill, e))?;

        if !self.mark_present(image) {
            tracing::debug!(image, "Image was built concurrently by another execution");
        }
        tracing::info!(
            skill,
            image,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Skill image built"
        );
        Ok(ImageStatus::Built)
    }
}

fn build_error(skill: &str, err: EngineError) -> RunnerError {
    let message = match err {
        EngineError::Command { code, stderr, .. } => format!(
            "Docker build failed for \"{skill}\" (exit {}): {}",
            code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
            truncate_chars(&stderr, BUILD_STDERR_LIMIT)
        ),
        EngineError::Spawn { source, .. } | EngineError::Io(source) => {
            format!("Failed to spawn docker build: {source}")
        }
    };
    RunnerError::ImageBuild {
        skill: skill.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mark_and_forget() {
        let cache = ImageCache::new();
        assert!(!cache.is_known("a:1.0.0"));
        assert!(cache.mark_present("a:1.0.0"));
        assert!(!cache.mark_present("a:1.0.0"));
        assert!(cache.is_known("a:1.0.0"));
        assert!(cache.forget("a:1.0.0"));
        assert!(!cache.is_known("a:1.0.0"));
    }

    #[test]
    fn test_build_error_truncates_stderr() {
        let err = build_error(
            "echo",
            EngineError::Command {
                command: "docker build".to_string(),
                code: Some(1),
                stderr: "x".repeat(2000),
            },
        );
        let RunnerError::ImageBuild { skill, message } = err else {
            panic!("expected image build error");
        };
        assert_eq!(skill, "echo");
        let prefix = "Docker build failed for \"echo\" (exit 1): ";
        assert!(message.starts_with(prefix));
        assert_eq!(message.len(), prefix.len() + BUILD_STDERR_LIMIT);
    }

    #[test]
    fn test_build_error_spawn() {
        let err = build_error(
            "echo",
            EngineError::Spawn {
                bin: "docker".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            },
        );
        assert!(err.to_string().contains("Failed to spawn docker build: not found"));
    }
}
