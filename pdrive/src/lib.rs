//! pdrive - retrying subprocess test driver.
//!
//! Runs an ordered list of test cases as child processes. Every attempt
//! receives two freshly allocated local ports and writes its output to its
//! own diagnostic file. Attempts that lose a port race (exit code 10) are
//! retried with new ports; any other failure stops the run.

pub mod attempt;
pub mod drain;
pub mod error;
pub mod invocation;
pub mod ports;
pub mod report;
pub mod retry;
pub mod sequencer;
pub mod supervisor;

pub use attempt::{
    AttemptError, AttemptRecord, AttemptRunner, AttemptSettings, PendingAttempt, PreparedAttempt,
};
pub use error::RunError;
pub use invocation::Invocation;
pub use ports::{EphemeralPortAllocator, PortAllocator, PortError};
pub use report::{CaseReport, RunReport, SupervisorState};
pub use retry::RetryPolicy;
pub use sequencer::{RunOutcome, Sequencer};
pub use supervisor::Supervisor;
