//! Retry supervisor: drives one test case to a verdict.
//!
//! Each attempt gets a freshly allocated port pair. A lost port race or an
//! attempt timeout is retried after a backoff, up to the policy's attempt
//! budget. Any other non-zero exit is a genuine failure and is never retried.

use crate::attempt::AttemptRunner;
use crate::error::RunError;
use crate::ports::PortAllocator;
use crate::report::{CaseReport, SupervisorState};
use crate::retry::RetryPolicy;
use pdrive_common::{AttemptClass, TestCase, Verdict};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Supervisor {
    allocator: Arc<dyn PortAllocator>,
    runner: AttemptRunner,
    policy: RetryPolicy,
}

impl Supervisor {
    pub fn new(allocator: Arc<dyn PortAllocator>, runner: AttemptRunner, policy: RetryPolicy) -> Self {
        Self {
            allocator,
            runner,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `case` until it passes, fails, or spends its attempt budget.
    ///
    /// Port allocation and harness errors abort immediately; they are not
    /// outcomes of the test and are returned as `Err`.
    pub async fn supervise(&self, case: &TestCase) -> Result<CaseReport, RunError> {
        let mut report = CaseReport::new(case.clone());
        self.supervise_into(&mut report).await?;
        Ok(report)
    }

    /// Like [`Supervisor::supervise`], recording progress into `report` as it
    /// happens. If the future is dropped mid-attempt, `report.in_flight`
    /// still names that attempt.
    pub async fn supervise_into(&self, report: &mut CaseReport) -> Result<(), RunError> {
        let case = report.case.clone();
        let max_attempts = self.policy.max_attempts();

        let verdict = loop {
            let number = report.attempts.len() as u32 + 1;
            let ports = self.allocator.allocate_pair()?;
            debug!(test_id = %case.test_id, attempt = number, ?ports, "Allocated port pair");

            let prepared = self.runner.prepare(&case, ports, number)?;
            report.in_flight = Some(prepared.pending().clone());
            let record = self.runner.execute(prepared).await?;
            report.in_flight = None;
            let class = record.class;
            report.attempts.push(record);

            match class {
                AttemptClass::Passed => {
                    report.states.push(SupervisorState::Succeeded);
                    break Verdict::Success;
                }
                AttemptClass::BindConflict | AttemptClass::TimedOut => {
                    if number >= max_attempts {
                        warn!(
                            test_id = %case.test_id,
                            attempts = number,
                            last = %class,
                            "Attempt budget exhausted"
                        );
                        report.states.push(SupervisorState::Exhausted);
                        break Verdict::EnvironmentExhausted;
                    }
                    let delay = self.policy.backoff_delay(number);
                    info!(
                        test_id = %case.test_id,
                        attempt = number,
                        %class,
                        delay_ms = delay.as_millis() as u64,
                        "Transient outcome, retrying with fresh ports"
                    );
                    report.states.push(SupervisorState::Retrying);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    report.states.push(SupervisorState::Attempting);
                }
                AttemptClass::Failed { exit_code } => {
                    let reason = match exit_code {
                        Some(code) => format!("exit code {code}"),
                        None => "terminated by signal".to_string(),
                    };
                    warn!(test_id = %case.test_id, attempt = number, %reason, "Test failed");
                    // Let the child's last output settle before the run stops.
                    if !self.policy.failure_grace.is_zero() {
                        tokio::time::sleep(self.policy.failure_grace).await;
                    }
                    report.states.push(SupervisorState::Failed);
                    break Verdict::Failure(reason);
                }
            }
        };

        report.verdict = Some(verdict);
        Ok(())
    }
}
