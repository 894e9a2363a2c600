//! File-only `tracing` subscriber for the binary.
//!
//! Log files rotate daily as `meteo.YYYY-MM-DD.log` and only the newest
//! [`MAX_LOG_FILES`] are kept, so a long-running `meteo serve` neither grows a
//! single file forever nor fills the log directory.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// Prefix of every log file name
pub const LOG_FILE_PREFIX: &str = "meteo";

/// Rotated files kept in the log directory (one per day)
pub const MAX_LOG_FILES: usize = 7;

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("failed to create log directory: {0}")]
    Io(#[from] io::Error),

    #[error("failed to open log file: {0}")]
    Appender(#[from] InitError),
}

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes buffered lines and stops the writer thread.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Daily-rotating appender writing into `log_dir`
pub fn file_appender(log_dir: &Path) -> Result<RollingFileAppender, LogInitError> {
    fs::create_dir_all(log_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)?;
    Ok(appender)
}

fn non_blocking_writer(log_dir: &Path) -> Result<(NonBlocking, WorkerGuard), LogInitError> {
    Ok(tracing_appender::non_blocking(file_appender(log_dir)?))
}

/// Installs a global `tracing` subscriber that writes to the rotating log files.
///
/// `verbose` selects `debug` as the default level, otherwise `info`.
/// `RUST_LOG` overrides both. Calling this twice is harmless: the second
/// subscriber is rejected and the first stays in place.
///
/// # Returns
/// A [`LoggingGuard`] the caller keeps until exit.
pub fn init_file_logging(log_dir: &Path, verbose: bool) -> Result<LoggingGuard, LogInitError> {
    let (writer, guard) = non_blocking_writer(log_dir)?;

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();

    tracing::info!(dir = %log_dir.display(), log_level = default_level, "File logging initialized");
    Ok(LoggingGuard { _file_guard: guard })
}
