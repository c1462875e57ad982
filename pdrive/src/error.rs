//! Run-level errors and the process exit codes they map to.

use crate::attempt::AttemptError;
use crate::ports::PortError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Conditions that stop a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The child reported a genuine failure.
    #[error("Test {test_id} failed: {reason}")]
    TestFailed {
        test_id: String,
        reason: String,
        diagnostic: Option<PathBuf>,
    },

    /// Every allowed attempt ended in a transient outcome.
    #[error("Test {test_id} exhausted the environment after {attempts} attempts")]
    EnvironmentExhausted { test_id: String, attempts: u32 },

    /// No socket could be obtained for port allocation.
    #[error(transparent)]
    ResourceExhausted(#[from] PortError),

    /// The harness could not run an attempt at all.
    #[error(transparent)]
    Attempt(#[from] AttemptError),

    #[error("Run deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl RunError {
    /// Process exit code for `pdrive run`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::TestFailed { .. } => 1,
            Self::EnvironmentExhausted { .. } => 2,
            Self::ResourceExhausted(_) => 3,
            Self::DeadlineExceeded(_) => 4,
            Self::Attempt(_) => 5,
        }
    }
}
