//! Per-case and per-run reports, optionally written as JSON.

use crate::attempt::{AttemptRecord, PendingAttempt};
use chrono::{DateTime, Utc};
use pdrive_common::{TestCase, Verdict};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

/// Supervisor state for one test case.
///
/// Every case starts in `Attempting`; transient outcomes move it through
/// `Retrying` back to `Attempting`. The last entry is always terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Attempting,
    Retrying,
    Succeeded,
    Failed,
    Exhausted,
}

impl SupervisorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Exhausted)
    }
}

/// Everything the supervisor observed for one test case.
///
/// Filled in as the case runs, so a case cut short by the run deadline still
/// shows its finished attempts and the one that was in flight.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub case: TestCase,
    /// `None` until the case reaches a verdict.
    pub verdict: Option<Verdict>,
    pub states: Vec<SupervisorState>,
    pub attempts: Vec<AttemptRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<PendingAttempt>,
}

impl CaseReport {
    pub fn new(case: TestCase) -> Self {
        Self {
            case,
            verdict: None,
            states: vec![SupervisorState::Attempting],
            attempts: Vec::new(),
            in_flight: None,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn last_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cases: Vec<CaseReport>,
}

impl RunReport {
    pub fn begin() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            success: false,
            error: None,
            cases: Vec::new(),
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.cases.iter().map(CaseReport::attempt_count).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
