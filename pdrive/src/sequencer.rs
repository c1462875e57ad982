//! Test case sequencer: runs cases strictly one after another.

use crate::attempt::{AttemptRunner, AttemptSettings};
use crate::error::RunError;
use crate::ports::{EphemeralPortAllocator, PortError};
use crate::report::{CaseReport, RunReport};
use crate::retry::RetryPolicy;
use crate::supervisor::Supervisor;
use chrono::Utc;
use pdrive_common::{DriverConfig, TestCase, Verdict};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

/// Outcome of [`Sequencer::run`]: the report is kept even when the run fails.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub error: Option<RunError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<RunReport, RunError> {
        match self.error {
            None => Ok(self.report),
            Some(e) => Err(e),
        }
    }
}

pub struct Sequencer {
    supervisor: Supervisor,
    deadline: Duration,
}

impl Sequencer {
    pub fn new(supervisor: Supervisor, deadline: Duration) -> Self {
        Self {
            supervisor,
            deadline,
        }
    }

    /// Wire up the real port allocator and attempt runner from `config`.
    pub fn from_config(config: &DriverConfig) -> Result<Self, PortError> {
        let allocator = EphemeralPortAllocator::from_bind_addr(&config.run.bind_addr)?;
        let runner = AttemptRunner::new(
            config.resolved_invocation(),
            AttemptSettings::from_run_config(&config.run),
        );
        let supervisor = Supervisor::new(
            Arc::new(allocator),
            runner,
            RetryPolicy::from_config(&config.retry),
        );
        Ok(Self::new(supervisor, config.run.run_deadline()))
    }

    /// Run `cases` in order, stopping at the first case without a
    /// `Success` verdict. Each call is an independent run.
    pub async fn run(&self, cases: &[TestCase]) -> RunOutcome {
        let mut report = RunReport::begin();
        info!(run_id = %report.run_id, cases = cases.len(), "Starting run");

        let result = match timeout(self.deadline, self.run_cases(cases, &mut report.cases)).await {
            Ok(result) => result,
            // Dropping the in-flight attempt kills its child.
            Err(_) => Err(RunError::DeadlineExceeded(self.deadline)),
        };

        report.finished_at = Some(Utc::now());
        report.success = result.is_ok();
        let error = result.err();
        match &error {
            None => info!(
                run_id = %report.run_id,
                cases = report.cases.len(),
                attempts = report.total_attempts(),
                "Run passed"
            ),
            Some(e) => {
                error!(run_id = %report.run_id, error = %e, "Run failed");
                report.error = Some(e.to_string());
            }
        }

        RunOutcome { report, error }
    }

    async fn run_cases(&self, cases: &[TestCase], done: &mut Vec<CaseReport>) -> Result<(), RunError> {
        for case in cases {
            info!(test_id = %case.test_id, policy = %case.policy_file, "Running test case");
            // Pushed before running so a deadline keeps whatever was recorded.
            done.push(CaseReport::new(case.clone()));
            let Some(case_report) = done.last_mut() else {
                continue;
            };
            self.supervisor.supervise_into(case_report).await?;
            let attempts = case_report.attempt_count();
            let diagnostic = case_report.last_attempt().map(|a| a.diagnostic.clone());

            match case_report.verdict.clone() {
                None | Some(Verdict::Success) => {
                    info!(test_id = %case.test_id, attempts, "Test case passed");
                }
                Some(Verdict::Failure(reason)) => {
                    return Err(RunError::TestFailed {
                        test_id: case.test_id.clone(),
                        reason,
                        diagnostic,
                    });
                }
                Some(Verdict::EnvironmentExhausted) => {
                    return Err(RunError::EnvironmentExhausted {
                        test_id: case.test_id.clone(),
                        attempts,
                    });
                }
            }
        }
        Ok(())
    }
}
