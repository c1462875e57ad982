//! Logging initialization shared by pdrive binaries.
//!
//! ```ignore
//! let mut log_config = LogConfig::from_env("info").with_stderr();
//! if verbose {
//!     log_config = log_config.with_level("debug");
//! }
//! let _logging_guards = init_logging(&log_config)?;
//! ```
//!
//! The returned guards flush the non-blocking file writer on drop, so they
//! must live until `main` returns.

use crate::config::EnvParser;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// Write to stderr instead of stdout.
    pub stderr: bool,
    /// Optional file receiving a JSON copy of every event.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Build from `PDRIVE_LOG_LEVEL`, `PDRIVE_LOG_FORMAT` and `PDRIVE_LOG_FILE`.
    ///
    /// Invalid values fall back to defaults.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level).value;
        let format = parser
            .get_optional_string("LOG_FORMAT")
            .value
            .and_then(|raw| LogFormat::parse(&raw))
            .unwrap_or(LogFormat::Compact);
        let file = parser.get_optional_path("LOG_FILE").value;

        Self {
            level,
            format,
            stderr: false,
            file,
        }
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            stderr: true,
            file: None,
        }
    }
}

/// Keeps background log writers alive.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Install the global tracing subscriber.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut guards = Vec::new();

    let console = fmt::layer().with_target(false);
    let console = match (config.format, config.stderr) {
        (LogFormat::Json, true) => console.json().with_writer(std::io::stderr).boxed(),
        (LogFormat::Json, false) => console.json().with_writer(std::io::stdout).boxed(),
        (LogFormat::Pretty, true) => console.pretty().with_writer(std::io::stderr).boxed(),
        (LogFormat::Pretty, false) => console.pretty().with_writer(std::io::stdout).boxed(),
        (LogFormat::Compact, true) => console.compact().with_writer(std::io::stderr).boxed(),
        (LogFormat::Compact, false) => console.compact().with_writer(std::io::stdout).boxed(),
    };
    layers.push(console);

    if let Some(path) = &config.file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        guards.push(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_thread_ids(true)
                .with_writer(writer)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(config.filter())
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(LoggingGuards { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" pretty "), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_builder_chain() {
        let config = LogConfig::default()
            .with_level("debug")
            .with_format(LogFormat::Json)
            .with_file("/tmp/pdrive.log");
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.stderr);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/pdrive.log")));
    }

    #[test]
    fn test_dropping_guards_flushes_file_writer() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pdrive.log");
        let file = std::fs::File::create(&path).unwrap();
        let (mut writer, guard) = tracing_appender::non_blocking(file);
        let guards = LoggingGuards {
            _guards: vec![guard],
        };

        writer.write_all(b"Run failed\n").unwrap();
        drop(guards);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Run failed\n");
    }
}
