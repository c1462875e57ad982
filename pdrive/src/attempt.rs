//! A single attempt: one child process with one port pair and one
//! diagnostic file.
//!
//! Sequence: create the diagnostic file ([`AttemptRunner::prepare`]), then
//! spawn the child with piped output, start the drain, wait for exit
//! (bounded by the attempt timeout), join the drain, classify
//! ([`AttemptRunner::execute`]).

use crate::drain::spawn_drain;
use crate::invocation::Invocation;
use chrono::{DateTime, Utc};
use pdrive_common::{AttemptClass, InvocationConfig, RunConfig, TestCase};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Errors that prevent an attempt from running at all.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("Failed to create diagnostic file in {dir}: {source}")]
    DiagnosticFile {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] io::Error),
}

/// Timing and placement settings for attempts.
#[derive(Debug, Clone)]
pub struct AttemptSettings {
    pub output_dir: PathBuf,
    pub attempt_timeout: Duration,
    pub drain_join_timeout: Duration,
}

impl AttemptSettings {
    pub fn from_run_config(run: &RunConfig) -> Self {
        Self {
            output_dir: run.output_dir.clone(),
            attempt_timeout: run.attempt_timeout(),
            drain_join_timeout: run.drain_join_timeout(),
        }
    }
}

/// An attempt whose diagnostic file exists but whose child has not finished.
#[derive(Debug, Clone, Serialize)]
pub struct PendingAttempt {
    pub number: u32,
    pub ports: (u16, u16),
    pub command_line: String,
    pub diagnostic: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// Summary of a finished attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub number: u32,
    pub ports: (u16, u16),
    pub command_line: String,
    pub exit_code: Option<i32>,
    pub class: AttemptClass,
    pub diagnostic: PathBuf,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub drained_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_error: Option<String>,
}

/// An attempt ready to launch. Owns the open diagnostic file.
#[derive(Debug)]
pub struct PreparedAttempt {
    invocation: Invocation,
    test_id: String,
    file: File,
    pending: PendingAttempt,
    start: Instant,
}

impl PreparedAttempt {
    pub fn pending(&self) -> &PendingAttempt {
        &self.pending
    }
}

/// Runs attempts for any test case.
#[derive(Debug, Clone)]
pub struct AttemptRunner {
    invocation: InvocationConfig,
    settings: AttemptSettings,
}

impl AttemptRunner {
    pub fn new(invocation: InvocationConfig, settings: AttemptSettings) -> Self {
        Self {
            invocation,
            settings,
        }
    }

    pub fn settings(&self) -> &AttemptSettings {
        &self.settings
    }

    /// Run `case` once with `ports`. Always leaves one diagnostic file behind.
    pub async fn run(
        &self,
        case: &TestCase,
        ports: (u16, u16),
        number: u32,
    ) -> Result<AttemptRecord, AttemptError> {
        let prepared = self.prepare(case, ports, number)?;
        self.execute(prepared).await
    }

    /// Build the command line and create the attempt's diagnostic file.
    pub fn prepare(
        &self,
        case: &TestCase,
        ports: (u16, u16),
        number: u32,
    ) -> Result<PreparedAttempt, AttemptError> {
        let invocation = Invocation::build(&self.invocation, case, ports);
        let started_at = Utc::now();
        let start = Instant::now();

        let (file, diagnostic) =
            create_diagnostic_file(&self.settings.output_dir, &case.test_id, number)?;
        debug!(
            test_id = %case.test_id,
            attempt = number,
            diagnostic = %diagnostic.display(),
            "Created diagnostic file"
        );

        Ok(PreparedAttempt {
            pending: PendingAttempt {
                number,
                ports,
                command_line: invocation.command_line(),
                diagnostic,
                started_at,
            },
            invocation,
            test_id: case.test_id.clone(),
            file,
            start,
        })
    }

    /// Launch a prepared attempt and wait for its outcome.
    ///
    /// Dropping the returned future kills the child and aborts the drain.
    pub async fn execute(&self, prepared: PreparedAttempt) -> Result<AttemptRecord, AttemptError> {
        let PreparedAttempt {
            invocation,
            test_id,
            mut file,
            pending,
            start,
        } = prepared;
        let PendingAttempt {
            number,
            ports,
            command_line,
            diagnostic,
            started_at,
        } = pending;
        let label = format!("{test_id}#{number}");

        let mut cmd = invocation.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let _ = writeln!(file, "{command_line}\nfailed to start: {source}");
                return Err(AttemptError::Spawn {
                    program: invocation.program().to_string(),
                    source,
                });
            }
        };
        info!(
            %test_id,
            attempt = number,
            port = ports.0,
            port1 = ports.1,
            pid = ?child.id(),
            "Started attempt"
        );

        let drain = spawn_drain(
            label.clone(),
            command_line.clone(),
            child.stdout.take(),
            child.stderr.take(),
            tokio::fs::File::from_std(file),
        );

        let mut timed_out = false;
        let status = match timeout(self.settings.attempt_timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => return Err(AttemptError::Wait(e)),
            Err(_) => {
                warn!(
                    %label,
                    timeout_secs = self.settings.attempt_timeout.as_secs_f64(),
                    "Attempt timed out, killing child"
                );
                timed_out = true;
                if let Err(e) = child.kill().await {
                    warn!(%label, error = %e, "Failed to kill timed-out child");
                }
                None
            }
        };

        let report = drain.join(self.settings.drain_join_timeout).await;

        let exit_code = status.and_then(|s| s.code());
        let class = if timed_out {
            AttemptClass::TimedOut
        } else {
            AttemptClass::from_exit_code(exit_code)
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            %test_id,
            attempt = number,
            exit_code = ?exit_code,
            %class,
            duration_ms,
            diagnostic = %diagnostic.display(),
            "Attempt finished"
        );

        Ok(AttemptRecord {
            number,
            ports,
            command_line,
            exit_code,
            class,
            diagnostic,
            started_at,
            duration_ms,
            drained_bytes: report.bytes,
            drain_error: report.error,
        })
    }
}

/// Create `debug-<test_id>-<attempt>-<random>.txt` in `dir` and keep it.
fn create_diagnostic_file(
    dir: &Path,
    test_id: &str,
    number: u32,
) -> Result<(File, PathBuf), AttemptError> {
    let to_err = |source: io::Error| AttemptError::DiagnosticFile {
        dir: dir.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(to_err)?;
    let prefix = format!("debug-{}-{}-", sanitize_component(test_id), number);
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".txt")
        .tempfile_in(dir)
        .map_err(to_err)?
        .keep()
        .map_err(|e| to_err(e.error))
}

fn sanitize_component(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "case".to_string()
    } else {
        sanitized
    }
}
