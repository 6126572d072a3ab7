//! Tracing subscriber setup

use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "external-data-checker.log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to create log directory {path}: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Raise the default level from `info` to `debug`
    pub verbose: bool,
    /// JSON lines on stderr instead of human-readable output
    pub json: bool,
}

fn default_directive(options: &LogOptions) -> &'static str {
    if options.verbose {
        "external_data_checker=debug,info"
    } else {
        "info"
    }
}

fn env_filter(options: &LogOptions) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(default_directive(options))?),
    }
}

/// Installs the global subscriber: stderr plus a daily log file in `log_dir`.
///
/// The returned guard flushes the file writer when dropped, so keep it alive
/// until the program exits.
pub fn init(options: &LogOptions, log_dir: &Path) -> Result<WorkerGuard, LoggingError> {
    std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::Directory {
        path: log_dir.display().to_string(),
        source,
    })?;
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    let stderr_layer = if options.json {
        fmt::layer().with_writer(std::io::stderr).json().boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter(options)?)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
