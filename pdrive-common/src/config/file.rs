//! Driver configuration file.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below, and a missing `[[cases]]` list falls back to
//! [`TestCase::default_sequence`].

use super::env::{EnvError, EnvParser};
use crate::types::TestCase;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid environment overrides: {}", join_errors(.0))]
    Env(Vec<EnvError>),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

fn join_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub invocation: InvocationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java: Option<JavaPreset>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default = "TestCase::default_sequence")]
    pub cases: Vec<TestCase>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            invocation: InvocationConfig::default(),
            java: None,
            retry: RetryConfig::default(),
            run: RunConfig::default(),
            cases: TestCase::default_sequence(),
        }
    }
}

/// How the child command line is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationConfig {
    /// Program to launch. Empty means "derive from the `[java]` preset".
    #[serde(default)]
    pub program: String,
    /// Fixed runtime options placed right after the program.
    #[serde(default)]
    pub prefix_args: Vec<String>,
    /// Prefix turning a `name=value` pair into an option (`-D` for a JVM).
    #[serde(default = "default_option_prefix")]
    pub option_prefix: String,
    /// Option name carrying the policy file path.
    #[serde(default = "default_policy_option")]
    pub policy_option: String,
    /// Directory the per-case policy files live in.
    #[serde(default = "default_dot")]
    pub policy_dir: PathBuf,
    /// Arguments placed after the port options and before the test id.
    #[serde(default)]
    pub suffix_args: Vec<String>,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            prefix_args: Vec::new(),
            option_prefix: default_option_prefix(),
            policy_option: default_policy_option(),
            policy_dir: default_dot(),
            suffix_args: Vec::new(),
        }
    }
}

/// Layout of the JVM security tests: a JDK, a source directory
/// holding the policy files, compiled classes, and a main class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JavaPreset {
    pub jdk: PathBuf,
    pub src: PathBuf,
    pub classes: PathBuf,
    pub class_path: String,
    #[serde(default = "default_main_class")]
    pub main_class: String,
}

impl JavaPreset {
    /// Path of the `java` launcher inside the JDK.
    pub fn java_command(&self) -> PathBuf {
        self.jdk.join("bin").join("java")
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Pause before reporting a genuine failure.
    #[serde(default = "default_failure_grace_ms")]
    pub failure_grace_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            failure_grace_ms: default_failure_grace_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn failure_grace(&self) -> Duration {
        Duration::from_millis(self.failure_grace_ms)
    }
}

/// Run-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory receiving one diagnostic file per attempt.
    #[serde(default = "default_dot")]
    pub output_dir: PathBuf,
    /// Address the port allocator binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    #[serde(default = "default_drain_join_timeout_ms")]
    pub drain_join_timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: default_dot(),
            bind_addr: default_bind_addr(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            run_deadline_secs: default_run_deadline_secs(),
            drain_join_timeout_ms: default_drain_join_timeout_ms(),
        }
    }
}

impl RunConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    pub fn drain_join_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_join_timeout_ms)
    }
}

fn default_option_prefix() -> String {
    "-D".to_string()
}

fn default_policy_option() -> String {
    "java.security.policy".to_string()
}

fn default_main_class() -> String {
    "Security".to_string()
}

fn default_dot() -> PathBuf {
    PathBuf::from(".")
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_failure_grace_ms() -> u64 {
    2_000
}

fn default_attempt_timeout_secs() -> u64 {
    120
}

fn default_run_deadline_secs() -> u64 {
    300
}

fn default_drain_join_timeout_ms() -> u64 {
    5_000
}

impl DriverConfig {
    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), cases = config.cases.len(), "Loaded driver config");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Render the effective configuration.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Apply `PDRIVE_*` environment overrides. All invalid values are
    /// collected and reported together.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let mut parser = EnvParser::new();

        if let Some(dir) = parser.get_optional_path("OUTPUT_DIR").value {
            self.run.output_dir = dir;
        }
        if let Some(addr) = parser.get_optional_string("BIND_ADDR").value {
            self.run.bind_addr = addr;
        }
        if let Some(n) = parser
            .get_u32_range("MAX_ATTEMPTS", self.retry.max_attempts, 1, 1_000)
            .env_override()
        {
            self.retry.max_attempts = n;
        }
        if let Some(secs) = parser
            .get_u64_range(
                "ATTEMPT_TIMEOUT_SECS",
                self.run.attempt_timeout_secs,
                1,
                86_400,
            )
            .env_override()
        {
            self.run.attempt_timeout_secs = secs;
        }
        if let Some(secs) = parser
            .get_u64_range("RUN_DEADLINE_SECS", self.run.run_deadline_secs, 1, 604_800)
            .env_override()
        {
            self.run.run_deadline_secs = secs;
        }

        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }
        Ok(())
    }

    /// The invocation with the `[java]` preset folded in.
    ///
    /// Preset-derived arguments come first so explicit `prefix_args` and
    /// `suffix_args` still apply on top of them.
    pub fn resolved_invocation(&self) -> InvocationConfig {
        let mut resolved = self.invocation.clone();
        let Some(java) = &self.java else {
            return resolved;
        };

        if resolved.program.is_empty() {
            resolved.program = java.java_command().display().to_string();
        }
        let opt = &resolved.option_prefix;
        let mut prefix = vec![
            format!("{opt}test.jdk={}", java.jdk.display()),
            format!("{opt}test.src={}", java.src.display()),
            format!("{opt}test.classes={}", java.classes.display()),
            format!("{opt}java.security.manager"),
        ];
        prefix.append(&mut resolved.prefix_args);
        resolved.prefix_args = prefix;

        if resolved.policy_dir == default_dot() {
            resolved.policy_dir = java.src.clone();
        }
        let mut suffix = vec![
            "-cp".to_string(),
            java.class_path.clone(),
            java.main_class.clone(),
        ];
        suffix.append(&mut resolved.suffix_args);
        resolved.suffix_args = suffix;
        resolved
    }

    /// Check the configuration for values the driver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.resolved_invocation().program.trim().is_empty() {
            problems.push("invocation.program is empty and no [java] preset is set".to_string());
        }
        if self.cases.is_empty() {
            problems.push("no test cases configured".to_string());
        }
        let mut seen = HashSet::new();
        for case in &self.cases {
            if case.test_id.trim().is_empty() || case.policy_file.trim().is_empty() {
                problems.push(format!("test case '{case}' has an empty field"));
            }
            if !seen.insert(case.test_id.as_str()) {
                problems.push(format!("duplicate test id '{}'", case.test_id));
            }
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            problems.push(format!(
                "retry.jitter must be within 0.0..=1.0, got {}",
                self.retry.jitter
            ));
        }
        if self.run.attempt_timeout_secs == 0 {
            problems.push("run.attempt_timeout_secs must be positive".to_string());
        }
        if self.run.run_deadline_secs == 0 {
            problems.push("run.run_deadline_secs must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;

    const JAVA_CONFIG: &str = r#"
[java]
jdk = "/opt/jdk"
src = "/work/src"
classes = "/work/classes"
class_path = "/work/classes:/work/lib"

[retry]
max_attempts = 4

[[cases]]
policy_file = "1.policy"
test_id = "1"
"#;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = DriverConfig::from_toml_str("[invocation]\nprogram = \"/bin/true\"\n").unwrap();
        assert_eq!(config.cases, TestCase::default_sequence());
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.run.bind_addr, "127.0.0.1");
        assert_eq!(config.run.attempt_timeout(), Duration::from_secs(120));
        assert_eq!(config.retry.failure_grace(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_java_preset_resolution() {
        let config = DriverConfig::from_toml_str(JAVA_CONFIG).unwrap();
        let inv = config.resolved_invocation();
        assert_eq!(inv.program, "/opt/jdk/bin/java");
        assert_eq!(
            inv.prefix_args,
            [
                "-Dtest.jdk=/opt/jdk",
                "-Dtest.src=/work/src",
                "-Dtest.classes=/work/classes",
                "-Djava.security.manager",
            ]
        );
        assert_eq!(inv.policy_dir, PathBuf::from("/work/src"));
        assert_eq!(inv.suffix_args, ["-cp", "/work/classes:/work/lib", "Security"]);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.cases.len(), 1);
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let mut config = DriverConfig::default();
        config.cases = vec![TestCase::new("a.policy", "1"), TestCase::new("b.policy", "1")];
        config.retry.max_attempts = 0;
        config.retry.jitter = 1.5;

        let Err(ConfigError::Invalid(problems)) = config.validate() else {
            panic!("expected invalid config");
        };
        assert_eq!(problems.len(), 4, "{problems:?}");
        assert!(problems.iter().any(|p| p.contains("program")));
        assert!(problems.iter().any(|p| p.contains("duplicate test id '1'")));
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.toml");
        std::fs::write(&path, "[retry\nmax_attempts = ").unwrap();

        let err = DriverConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("driver.toml"));

        let missing = DriverConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = DriverConfig::from_toml_str(JAVA_CONFIG).unwrap();
        let rendered = config.to_toml_string().unwrap();
        let reparsed = DriverConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed.java, config.java);
        assert_eq!(reparsed.cases, config.cases);
    }

    #[test]
    fn test_apply_env_overrides() {
        let _guard = env_test_lock();
        // SAFETY: env access is serialized by env_test_lock
        unsafe {
            std::env::set_var("PDRIVE_MAX_ATTEMPTS", "3");
            std::env::set_var("PDRIVE_OUTPUT_DIR", "/tmp/diag");
        }

        let mut config = DriverConfig::default();
        config.apply_env().unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.run.output_dir, PathBuf::from("/tmp/diag"));

        // SAFETY: env access is serialized by env_test_lock
        unsafe {
            std::env::set_var("PDRIVE_MAX_ATTEMPTS", "0");
            std::env::set_var("PDRIVE_RUN_DEADLINE_SECS", "soon");
        }
        let mut config = DriverConfig::default();
        let Err(ConfigError::Env(errors)) = config.apply_env() else {
            panic!("expected env errors");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(config.retry.max_attempts, 10);

        // SAFETY: env access is serialized by env_test_lock
        unsafe {
            std::env::remove_var("PDRIVE_MAX_ATTEMPTS");
            std::env::remove_var("PDRIVE_OUTPUT_DIR");
            std::env::remove_var("PDRIVE_RUN_DEADLINE_SECS");
        }
    }
}
