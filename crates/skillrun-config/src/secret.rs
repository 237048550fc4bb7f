//! Secret values passed through to skill containers.
//!
//! Environment variables handed to a skill usually carry API keys, so the
//! values are wrapped in [`SecretValue`]: zeroized on drop, redacted in
//! `Debug`, and serialized as `[REDACTED]`. Only [`SecretValue::expose`]
//! yields the raw string.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

const REDACTED: &str = "[REDACTED]";

/// A single secret value with automatic zeroization.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue {
    inner: String,
}

impl SecretValue {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Get the secret value as a string slice.
    ///
    /// Only the container engine should need this.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    /// Length of the secret value (without exposing it).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the secret value is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("inner", &REDACTED)
            .field("len", &self.inner.len())
            .finish()
    }
}

impl Drop for SecretValue {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl Serialize for SecretValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}
