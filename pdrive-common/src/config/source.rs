//! Source tracking for configuration values.

use serde::Serialize;

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Built-in default.
    Default,
    /// Loaded from the TOML configuration file.
    File,
    /// Taken from an environment variable.
    Environment,
    /// Given as a command-line flag.
    Cli,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File => write!(f, "file"),
            Self::Environment => write!(f, "environment"),
            Self::Cli => write!(f, "cli"),
        }
    }
}

/// A value paired with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Name of the environment variable, when the value came from one.
    pub var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            var: None,
        }
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            var: Some(var.into()),
        }
    }

    /// True when the value was explicitly set in the environment.
    pub fn is_from_env(&self) -> bool {
        self.source == ConfigSource::Environment
    }

    /// The value, only if the environment provided it.
    pub fn env_override(self) -> Option<T> {
        if self.is_from_env() {
            Some(self.value)
        } else {
            None
        }
    }
}
