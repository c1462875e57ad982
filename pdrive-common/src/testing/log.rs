//! Structured test logging for CI debugging.
//!
//! Call `init_test_logging()` at the top of a test (or once from a
//! `#[ctor::ctor]` hook). Events go to the libtest-captured writer in compact
//! form, and additionally to a JSONL file when `PDRIVE_TEST_LOG_FILE` is set.

use std::path::PathBuf;
use std::sync::{Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

static INIT: Once = Once::new();

/// Initialize global test logging. Safe to call multiple times.
///
/// # Environment Variables
///
/// - `PDRIVE_TEST_LOG_FILE`: also write JSONL to this path
/// - `PDRIVE_TEST_LOG_LEVEL`: log level filter (default: `debug`)
pub fn init_test_logging() {
    INIT.call_once(|| {
        let file_layer = create_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let test_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let level = std::env::var("PDRIVE_TEST_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "pdrive={level},pdrive_common={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(test_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn create_log_file() -> Option<std::fs::File> {
    let path = PathBuf::from(std::env::var("PDRIVE_TEST_LOG_FILE").ok()?);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::File::create(path).ok()
}
