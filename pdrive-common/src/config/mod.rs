//! Configuration system for pdrive.
//!
//! This module provides:
//! - The TOML driver configuration with defaults for every section
//! - Environment variable overrides with type safety
//! - Source tracking for debugging
//! - Validation before a run starts

pub mod env;
pub mod file;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use file::{ConfigError, DriverConfig, InvocationConfig, JavaPreset, RetryConfig, RunConfig};
pub use source::{ConfigSource, Sourced};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
