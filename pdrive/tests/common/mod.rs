use pdrive::{AttemptRunner, AttemptSettings, EphemeralPortAllocator, RetryPolicy, Sequencer, Supervisor};
use pdrive_common::InvocationConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use pdrive_common::testing::init_test_logging;

#[ctor::ctor]
fn init() {
    init_test_logging();
}

/// Invocation running `script` under `/bin/sh`.
///
/// The script sees `$1` = policy option, `$2`/`$3` = port options and `$4` =
/// test id.
pub fn sh_invocation(script: &str) -> InvocationConfig {
    InvocationConfig {
        program: "/bin/sh".to_string(),
        prefix_args: vec!["-c".to_string(), script.to_string(), "child".to_string()],
        option_prefix: "-D".to_string(),
        policy_option: "java.security.policy".to_string(),
        policy_dir: PathBuf::from("/policies"),
        suffix_args: Vec::new(),
    }
}

/// Script that exits 10 until it has run `conflicts` times, then exits 0.
///
/// State lives in a counter file under `state_dir`, keyed by test id.
#[allow(dead_code)]
pub fn flaky_script(state_dir: &Path, conflicts: u32) -> String {
    format!(
        r#"f="{dir}/count-$4"; n=$(cat "$f" 2>/dev/null || echo 0); n=$((n+1)); echo "$n" > "$f"; echo "attempt $n on $2 $3"; [ "$n" -gt {conflicts} ] && exit 0; exit 10"#,
        dir = state_dir.display(),
    )
}

pub fn sequencer(
    output_dir: &Path,
    script: &str,
    policy: RetryPolicy,
    deadline: Duration,
) -> Sequencer {
    let runner = AttemptRunner::new(
        sh_invocation(script),
        AttemptSettings {
            output_dir: output_dir.to_path_buf(),
            attempt_timeout: Duration::from_secs(30),
            drain_join_timeout: Duration::from_secs(5),
        },
    );
    let supervisor = Supervisor::new(Arc::new(EphemeralPortAllocator::default()), runner, policy);
    Sequencer::new(supervisor, deadline)
}

/// Diagnostic files in `dir`, sorted by name.
#[allow(dead_code)]
pub fn diagnostic_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("debug-") && n.ends_with(".txt"))
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}
