//! Build-time metadata embedded by the build script.

/// Short git commit hash at build time, or `unknown` outside a checkout.
pub const GIT_HASH: &str = env!("SKILLRUN_GIT_HASH");

/// Build timestamp as Unix epoch seconds.
pub const BUILD_TIMESTAMP: &str = env!("SKILLRUN_BUILD_TIMESTAMP");

/// Cargo profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("SKILLRUN_BUILD_PROFILE");

/// Crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version, e.g. `0.1.0 (abc1234, debug)`.
pub const VERSION_LINE: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("SKILLRUN_GIT_HASH"),
    ", ",
    env!("SKILLRUN_BUILD_PROFILE"),
    ")"
);

/// Multi-line version block for `skillrun --version`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit:  ",
    env!("SKILLRUN_GIT_HASH"),
    "\nbuilt:   ",
    env!("SKILLRUN_BUILD_TIMESTAMP"),
    "\nprofile: ",
    env!("SKILLRUN_BUILD_PROFILE")
);
