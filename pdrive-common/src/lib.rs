//! Shared types, configuration and logging for the pdrive test driver.

pub mod config;
pub mod logging;
pub mod testing;
pub mod types;

pub use config::{ConfigError, DriverConfig, InvocationConfig, RetryConfig, RunConfig};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use types::{
    AttemptClass, EXIT_BIND_CONFLICT, EXIT_PASSED, PORT_OPTION, PORT_OPTION_SECOND, TestCase,
    Verdict,
};
