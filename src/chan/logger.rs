//! Structured logging for the archiver
//!
//! This module provides functionality for:
//! 1. A terminal layer on stderr (warnings only unless verbose, so progress bars stay readable)
//! 2. A daily rotating log file in text or JSON format, filtered by the configured level
//! 3. `RUST_LOG` overriding the configured file level

use std::path::Path;

use thiserror::Error;
use tracing::{info, level_filters::LevelFilter};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::chan::config_loader::Logging;

/// File name prefix of the rotating log
pub const LOG_FILE_NAME: &str = "chan_archiver.log";

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

/// Output format of the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Parse the config value, unknown values fall back to text
    pub fn from_config_string(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Keeps the background log writer alive; drop it last
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

fn file_filter(level: &str) -> LoggerResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LoggerError::Filter(e.to_string()))
}

/// Install the global subscriber
pub fn init_logger(logging: &Logging, log_dir: &Path, verbose: bool) -> LoggerResult<Logger> {
    let terminal_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
    let terminal_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(terminal_level);

    let (file_layer, guard) = if logging.log_to_file {
        std::fs::create_dir_all(log_dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let filter = file_filter(&logging.log_level)?;

        let layer = match LogFormat::from_config_string(&logging.log_format) {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(filter)
                .boxed(),
            LogFormat::Text => fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(filter)
                .boxed(),
        };
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    info!(
        log_format = %logging.log_format,
        log_level = %logging.log_level,
        log_to_file = logging.log_to_file,
        "Logger initialized"
    );

    Ok(Logger { _guard: guard })
}
