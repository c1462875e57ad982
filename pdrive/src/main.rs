//! pdrive - command-line entry point.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdrive::{EphemeralPortAllocator, PortAllocator, RunError, Sequencer};
use pdrive_common::{DriverConfig, LogConfig, TestCase, init_logging};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Exit code for harness errors that are not a test outcome.
const EXIT_HARNESS_ERROR: i32 = 5;

#[derive(Parser)]
#[command(name = "pdrive")]
#[command(author, version, about = "Retrying test driver with ephemeral port injection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured test cases in order
    Run {
        /// Driver configuration file (TOML)
        #[arg(short, long, env = "PDRIVE_CONFIG")]
        config: Option<PathBuf>,

        /// Directory for per-attempt diagnostic files
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Attempt budget per test case
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Write a JSON run report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Test case as `<policy>:<id>`; repeat to build a sequence
        ///
        /// Replaces the configured case list when given.
        #[arg(long = "case", value_parser = parse_case)]
        cases: Vec<TestCase>,
    },

    /// Print freshly allocated free ports, one per line
    Ports {
        /// Number of ports to allocate
        #[arg(short, long, default_value = "2")]
        count: u32,

        /// Local address to bind while allocating
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the effective configuration as TOML
    ShowConfig {
        /// Driver configuration file (TOML)
        #[arg(short, long, env = "PDRIVE_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn parse_case(raw: &str) -> Result<TestCase, String> {
    TestCase::parse_pair(raw).ok_or_else(|| format!("expected <policy>:<id>, got '{raw}'"))
}

fn load_config(path: Option<&Path>) -> Result<DriverConfig> {
    let mut config = match path {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let logging_guards = init_logging(&log_config)?;

    let code = match cli.command {
        Commands::Run {
            config,
            output_dir,
            max_attempts,
            report,
            cases,
        } => match run(config.as_deref(), output_dir, max_attempts, report, cases).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                eprintln!("pdrive: {err:#}");
                exit_code_for(&err)
            }
        },
        Commands::Ports { count, bind } => {
            let allocator = match bind {
                Some(addr) => EphemeralPortAllocator::from_bind_addr(&addr)?,
                None => EphemeralPortAllocator::default(),
            };
            for _ in 0..count {
                println!("{}", allocator.allocate()?);
            }
            return Ok(());
        }
        Commands::ShowConfig { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            return Ok(());
        }
    };

    // `process::exit` skips destructors; flush the log file writer first.
    drop(logging_guards);
    std::process::exit(code);
}

/// Map a failed `run` to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<RunError>() {
        Some(failure) => failure.exit_code(),
        None => EXIT_HARNESS_ERROR,
    }
}

async fn run(
    config_path: Option<&Path>,
    output_dir: Option<PathBuf>,
    max_attempts: Option<u32>,
    report_path: Option<PathBuf>,
    cases: Vec<TestCase>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(dir) = output_dir {
        config.run.output_dir = dir;
    }
    if let Some(n) = max_attempts {
        config.retry.max_attempts = n;
    }
    if !cases.is_empty() {
        config.cases = cases;
    }
    config.validate()?;

    info!(
        cases = config.cases.len(),
        max_attempts = config.retry.max_attempts,
        output_dir = %config.run.output_dir.display(),
        "Effective configuration"
    );

    let sequencer = Sequencer::from_config(&config)?;
    let outcome = sequencer.run(&config.cases).await;

    if let Some(path) = report_path {
        // A failed report write must not mask the run's own outcome.
        if let Err(e) = outcome
            .report
            .write_json(&path)
            .with_context(|| format!("Failed to write report to {}", path.display()))
        {
            warn!(error = %format!("{e:#}"), "Report not written");
        }
    }

    outcome.into_result()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdrive_common::ConfigError;
    use std::time::Duration;

    #[test]
    fn test_exit_code_for_run_errors() {
        let err = anyhow::Error::new(RunError::DeadlineExceeded(Duration::from_secs(1)));
        assert_eq!(exit_code_for(&err), 4);

        let err = anyhow::Error::new(RunError::EnvironmentExhausted {
            test_id: "10".to_string(),
            attempts: 3,
        });
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn test_exit_code_for_config_errors() {
        let err = anyhow::Error::new(ConfigError::Invalid(vec!["no test cases configured".into()]));
        assert_eq!(exit_code_for(&err), EXIT_HARNESS_ERROR);
    }

    #[test]
    fn test_parse_case_flag() {
        assert_eq!(
            parse_case("10.policy:10").unwrap(),
            TestCase::new("10.policy", "10")
        );
        assert!(parse_case("10").is_err());
    }
}
