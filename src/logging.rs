//! Diagnostic logging setup
//!
//! File-only tracing output; the console stays free for the interactive
//! front end. The audit trail is separate and does not go through tracing.

use anyhow::Result;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system
///
/// Writes daily-rotated log files named `dockhand.log` into `dir`, creating
/// the directory if needed. Level defaults to `info` and can be overridden
/// with `RUST_LOG`.
pub fn init_logging(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "dockhand.log");

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    tracing::info!("Logging system initialized");
    tracing::info!("Log files location: {}", dir.display());

    Ok(())
}

/// Check if the log directory exists
pub fn logs_dir_exists(dir: impl AsRef<Path>) -> bool {
    dir.as_ref().exists()
}
