//! Common types used across pdrive components.

use serde::{Deserialize, Serialize};

// ============================================================================
// Exit Code Constants
// ============================================================================
//
// The launched test process reports its outcome through its exit code:
//
// - 0:  the test passed
// - 10: one of the injected ports was claimed by another process before the
//       child could bind it (a lost port race, worth retrying)
// - anything else: the test genuinely failed

/// Exit code of a passing test process.
pub const EXIT_PASSED: i32 = 0;

/// Reserved exit code signalling a lost port race.
pub const EXIT_BIND_CONFLICT: i32 = 10;

/// Name of the option carrying the first allocated port.
pub const PORT_OPTION: &str = "port.number";

/// Name of the option carrying the second allocated port.
pub const PORT_OPTION_SECOND: &str = "port.number1";

/// One logical test case: a policy file paired with the test identifier the
/// child process understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestCase {
    pub policy_file: String,
    pub test_id: String,
}

impl TestCase {
    pub fn new(policy_file: impl Into<String>, test_id: impl Into<String>) -> Self {
        Self {
            policy_file: policy_file.into(),
            test_id: test_id.into(),
        }
    }

    /// Parse a `<policy>:<id>` pair as given on the command line.
    pub fn parse_pair(raw: &str) -> Option<Self> {
        let (policy, id) = raw.split_once(':')?;
        let policy = policy.trim();
        let id = id.trim();
        if policy.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(policy, id))
    }

    /// The fixed sequence the security driver runs when nothing is configured.
    pub fn default_sequence() -> Vec<TestCase> {
        ["1", "10", "11", "12"]
            .into_iter()
            .map(|id| TestCase::new(format!("{id}.policy"), id))
            .collect()
    }
}

impl std::fmt::Display for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.test_id, self.policy_file)
    }
}

/// Classification of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "class")]
pub enum AttemptClass {
    /// Exit code 0.
    Passed,
    /// Exit code 10: a port was lost to another process.
    BindConflict,
    /// The attempt exceeded its timeout and was killed.
    TimedOut,
    /// Any other exit. `None` means the child was terminated by a signal.
    Failed { exit_code: Option<i32> },
}

impl AttemptClass {
    /// Classify a child's exit code.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(EXIT_PASSED) => Self::Passed,
            Some(EXIT_BIND_CONFLICT) => Self::BindConflict,
            other => Self::Failed { exit_code: other },
        }
    }

    /// Whether another attempt may fix this outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BindConflict | Self::TimedOut)
    }
}

impl std::fmt::Display for AttemptClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::BindConflict => write!(f, "bind_conflict"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Failed {
                exit_code: Some(code),
            } => write!(f, "failed (exit {code})"),
            Self::Failed { exit_code: None } => write!(f, "failed (signal)"),
        }
    }
}

/// Final outcome of a test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "reason")]
pub enum Verdict {
    Success,
    Failure(String),
    EnvironmentExhausted,
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
            Self::EnvironmentExhausted => write!(f, "environment exhausted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_exit_codes() {
        assert_eq!(AttemptClass::from_exit_code(Some(0)), AttemptClass::Passed);
        assert_eq!(
            AttemptClass::from_exit_code(Some(10)),
            AttemptClass::BindConflict
        );
        assert_eq!(
            AttemptClass::from_exit_code(Some(1)),
            AttemptClass::Failed { exit_code: Some(1) }
        );
        assert_eq!(
            AttemptClass::from_exit_code(None),
            AttemptClass::Failed { exit_code: None }
        );
    }

    #[test]
    fn test_only_conflicts_and_timeouts_are_transient() {
        assert!(AttemptClass::BindConflict.is_transient());
        assert!(AttemptClass::TimedOut.is_transient());
        assert!(!AttemptClass::Passed.is_transient());
        assert!(!AttemptClass::Failed { exit_code: Some(11) }.is_transient());
    }

    #[test]
    fn test_default_sequence_order() {
        let cases = TestCase::default_sequence();
        let ids: Vec<_> = cases.iter().map(|c| c.test_id.as_str()).collect();
        assert_eq!(ids, ["1", "10", "11", "12"]);
        assert_eq!(cases[1].policy_file, "10.policy");
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            TestCase::parse_pair("10.policy:10"),
            Some(TestCase::new("10.policy", "10"))
        );
        assert_eq!(TestCase::parse_pair("missing-colon"), None);
        assert_eq!(TestCase::parse_pair(":1"), None);
        assert_eq!(TestCase::parse_pair("1.policy:"), None);
    }

    #[test]
    fn test_verdict_serializes_tagged() {
        let json = serde_json::to_string(&Verdict::Failure("exit 1".into())).unwrap();
        assert_eq!(json, r#"{"verdict":"failure","reason":"exit 1"}"#);
        let json = serde_json::to_string(&Verdict::Success).unwrap();
        assert_eq!(json, r#"{"verdict":"success"}"#);
    }

    #[test]
    fn test_display() {
        assert_eq!(AttemptClass::BindConflict.to_string(), "bind_conflict");
        assert_eq!(
            AttemptClass::Failed { exit_code: Some(3) }.to_string(),
            "failed (exit 3)"
        );
        assert_eq!(Verdict::EnvironmentExhausted.to_string(), "environment exhausted");
        assert_eq!(TestCase::new("1.policy", "1").to_string(), "1 (1.policy)");
    }
}
