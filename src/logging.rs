//! Logging and tracing initialization

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Initialize structured logging from the configured level and log file.
///
/// `RUST_LOG` takes precedence over the configured level; `verbose` forces
/// debug output.
pub fn init_logging(config: &StoreConfig, verbose: bool) -> StoreResult<()> {
    let log_level = if verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    };

    let env_filter = env_filter(log_level)?;

    if let Some(ref log_path) = config.log_file {
        init_file_logging(log_path, env_filter)
    } else {
        init_stdout_logging(env_filter)
    }
}

fn env_filter(level: Level) -> StoreResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("stowage={}", level)))
        .map_err(|e| StoreError::InvalidConfig(format!("Failed to create log filter: {}", e)))
}

fn init_stdout_logging(env_filter: EnvFilter) -> StoreResult<()> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| StoreError::InvalidConfig(format!("Logging already initialized: {}", e)))
}

/// JSON lines to `log_path`, one event per line
fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> StoreResult<()> {
    let file = File::create(log_path).map_err(|e| {
        StoreError::InvalidConfig(format!(
            "Failed to create log file {}: {}",
            log_path.display(),
            e
        ))
    })?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| StoreError::InvalidConfig(format!("Logging already initialized: {}", e)))
}

/// Test-writer logging at debug level; safe to call from every test
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stowage=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
