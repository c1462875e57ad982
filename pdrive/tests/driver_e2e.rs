//! End-to-end runs against scripted child processes.

#![cfg(unix)]

mod common;

use common::{diagnostic_files, flaky_script, sequencer};
use pdrive::{RetryPolicy, RunError, SupervisorState};
use pdrive_common::{AttemptClass, TestCase, Verdict};
use std::collections::HashSet;
use std::time::{Duration, Instant};

const DEADLINE: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_conflicting_case_passes_on_third_attempt() {
    let state = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let seq = sequencer(
        out.path(),
        &flaky_script(state.path(), 2),
        RetryPolicy::immediate(10),
        DEADLINE,
    );

    let report = seq
        .run(&[TestCase::new("10.policy", "10")])
        .await
        .into_result()
        .unwrap();

    let case = &report.cases[0];
    assert_eq!(case.verdict, Some(Verdict::Success));
    let classes: Vec<_> = case.attempts.iter().map(|a| a.class).collect();
    assert_eq!(
        classes,
        [
            AttemptClass::BindConflict,
            AttemptClass::BindConflict,
            AttemptClass::Passed
        ]
    );

    let files = diagnostic_files(out.path());
    assert_eq!(files.len(), 3);

    let pairs: HashSet<_> = case.attempts.iter().map(|a| a.ports).collect();
    assert_eq!(pairs.len(), 3, "each attempt should get its own port pair");
}

#[tokio::test]
async fn test_diagnostic_first_line_is_command_line() {
    let state = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let seq = sequencer(
        out.path(),
        &flaky_script(state.path(), 1),
        RetryPolicy::immediate(5),
        DEADLINE,
    );

    let report = seq
        .run(&[TestCase::new("1.policy", "1")])
        .await
        .into_result()
        .unwrap();

    for attempt in &report.cases[0].attempts {
        let contents = std::fs::read_to_string(&attempt.diagnostic).unwrap();
        let first = contents.lines().next().unwrap();
        assert_eq!(first, attempt.command_line);
        assert!(first.contains(&format!("-Dport.number={}", attempt.ports.0)));
        assert!(first.contains(&format!("-Dport.number1={}", attempt.ports.1)));
        assert!(first.ends_with(" 1"));
        assert!(contents.contains(&format!(
            "on -Dport.number={} -Dport.number1={}",
            attempt.ports.0, attempt.ports.1
        )));
    }
}

#[tokio::test]
async fn test_failure_stops_remaining_cases() {
    let out = tempfile::tempdir().unwrap();
    let mut policy = RetryPolicy::immediate(5);
    policy.failure_grace = Duration::from_millis(50);
    let seq = sequencer(
        out.path(),
        r#"[ "$4" = 11 ] && exit 1; exit 0"#,
        policy,
        DEADLINE,
    );

    let start = Instant::now();
    let outcome = seq.run(&TestCase::default_sequence()).await;
    assert!(start.elapsed() >= Duration::from_millis(50));

    assert_eq!(outcome.report.cases.len(), 3);
    assert_eq!(diagnostic_files(out.path()).len(), 3);
    let err = outcome.error.expect("run should fail");
    assert_eq!(err.exit_code(), 1);
    assert!(matches!(err, RunError::TestFailed { ref test_id, .. } if test_id == "11"));
}

#[tokio::test]
async fn test_always_conflicting_case_exhausts_budget() {
    let out = tempfile::tempdir().unwrap();
    let seq = sequencer(out.path(), "exit 10", RetryPolicy::immediate(3), DEADLINE);

    let outcome = seq.run(&TestCase::default_sequence()).await;

    let case = &outcome.report.cases[0];
    assert_eq!(case.verdict, Some(Verdict::EnvironmentExhausted));
    assert_eq!(case.attempt_count(), 3);
    assert_eq!(case.states.last(), Some(&SupervisorState::Exhausted));
    assert_eq!(outcome.report.cases.len(), 1);
    assert_eq!(outcome.error.map(|e| e.exit_code()), Some(2));
}

#[tokio::test]
async fn test_back_to_back_runs_are_independent() {
    let out = tempfile::tempdir().unwrap();
    let seq = sequencer(out.path(), "exit 0", RetryPolicy::immediate(3), DEADLINE);
    let cases = TestCase::default_sequence();

    let first = seq.run(&cases).await.into_result().unwrap();
    let second = seq.run(&cases).await.into_result().unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.cases.len(), 4);
    assert_eq!(second.cases.len(), 4);
    assert!(second.cases.iter().all(|c| c.attempt_count() == 1));
    assert_eq!(diagnostic_files(out.path()).len(), 8);
}

#[tokio::test]
async fn test_run_deadline_kills_hung_child() {
    let out = tempfile::tempdir().unwrap();
    let seq = sequencer(
        out.path(),
        "exec sleep 60",
        RetryPolicy::immediate(3),
        Duration::from_millis(500),
    );

    let start = Instant::now();
    let outcome = seq.run(&[TestCase::new("1.policy", "1")]).await;

    assert!(start.elapsed() < Duration::from_secs(20));
    assert!(matches!(outcome.error, Some(RunError::DeadlineExceeded(_))));
    let files = diagnostic_files(out.path());
    assert_eq!(files.len(), 1);

    let hung = &outcome.report.cases[0];
    assert!(hung.verdict.is_none());
    assert_eq!(
        hung.in_flight.as_ref().map(|p| p.diagnostic.clone()),
        Some(files[0].clone())
    );
    let json = outcome.report.to_json().unwrap();
    assert!(json.contains("\"in_flight\""));
}

#[tokio::test]
async fn test_chatty_child_does_not_stall() {
    let out = tempfile::tempdir().unwrap();
    // Well past a pipe buffer on both streams.
    let script = r#"i=0; while [ $i -lt 4000 ]; do echo "line $i of stdout padding padding"; echo "line $i of stderr" >&2; i=$((i+1)); done; exit 0"#;
    let seq = sequencer(out.path(), script, RetryPolicy::immediate(1), DEADLINE);

    let report = seq
        .run(&[TestCase::new("1.policy", "1")])
        .await
        .into_result()
        .unwrap();

    let attempt = &report.cases[0].attempts[0];
    assert!(attempt.drain_error.is_none());
    let contents = std::fs::read_to_string(&attempt.diagnostic).unwrap();
    assert!(contents.contains("line 3999 of stdout"));
    assert!(contents.contains("line 3999 of stderr"));
}
