//! # Logging Utilities
//!
//! Logging infrastructure for rdb using `tracing`.
//!
//! Log records go to stderr so they never mix with command output on stdout.
//! A copy can be written to a file whose name is prefixed with the UTC date
//! the session started, so each day's runs share one file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rdb_utils::init_logging;
//!
//! // Reads RUST_LOG, RDB_LOG_FORMAT and RDB_LOG_FILE
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=rdb_core=trace`)
//! - `RDB_LOG_FORMAT`: Set output format (`json` or `pretty`, default: `pretty`)
//! - `RDB_LOG_FILE`: Optional path to a log file (if not set, logs only to stderr).
//!   `RDB_LOG_FILE=/tmp/rdb.log` writes to `/tmp/2026-10-18-rdb.log`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::{DateTime, Utc};
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_VAR: &str = "RDB_LOG_FORMAT";

/// Environment variable naming an optional log file.
pub const LOG_FILE_VAR: &str = "RDB_LOG_FILE";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    Pretty,
    /// One JSON object per record
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(format!("{s}. Use 'pretty' or 'json'"))),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(format!(
                "{s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            ))),
        }
    }
}

/// Keeps the background file writer alive.
///
/// Buffered records are flushed when the guard is dropped, so hold it until
/// the program exits.
#[derive(Debug)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize logging from the environment
///
/// Reads configuration from environment variables:
/// - `RUST_LOG`: Log level filter (e.g., `debug`, `rdb_core=debug`)
/// - `RDB_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
/// - `RDB_LOG_FILE`: Optional path to log file
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `RDB_LOG_FORMAT` holds an unknown format
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let default_level = env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<LogLevel>().ok())
        .map_or(Level::INFO, Into::into);
    init_logging_internal(format_from_env()?, default_level)
}

/// Initialize logging with an explicit default level
///
/// `RUST_LOG`, when set, still overrides `level` with its more specific
/// directives.
///
/// ## Example
///
/// ```rust,no_run
/// use rdb_utils::{init_logging_with_level, LogFormat, LogLevel};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)
///     .expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_logging_internal(format, level.into())
}

/// Output format requested through `RDB_LOG_FORMAT`, defaulting to pretty.
///
/// ## Errors
///
/// `InvalidFormat` when the variable is set to an unknown value.
pub fn format_from_env() -> Result<LogFormat, LoggingError>
{
    env::var(LOG_FORMAT_VAR)
        .ok()
        .map_or(Ok(LogFormat::Pretty), |value| value.parse())
}

fn init_logging_internal(format: LogFormat, default_level: Level) -> Result<LoggingGuard, LoggingError>
{
    // RUST_LOG can override the default level with more specific filters
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let console = format_layer(format, io::stderr, true, env_filter.clone());

    let (file, guard) = match env::var(LOG_FILE_VAR).ok().map(PathBuf::from) {
        Some(path) => {
            let (directory, file_name) = split_log_path(&path)?;
            let appender = tracing_appender::rolling::never(directory, dated_file_name(&file_name, Utc::now()));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // No ANSI in files
            let layer = format_layer(format, writer, false, env_filter);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}

/// A filtered formatting layer writing to `writer` in `format`.
fn format_layer<S, W>(format: LogFormat, writer: W, ansi: bool, filter: EnvFilter) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());
    match format {
        LogFormat::Pretty => layer.with_ansi(ansi).with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// Directory and file name of a log path; a bare file name logs to `.`.
fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf), LoggingError>
{
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::FileError(io::Error::other(format!("{} names no file", path.display()))))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((directory, PathBuf::from(file_name)))
}

/// `file_name` prefixed with the date of `now`, e.g. `2026-10-18-rdb.log`.
fn dated_file_name(file_name: &Path, now: DateTime<Utc>) -> PathBuf
{
    PathBuf::from(format!("{}-{}", now.format("%Y-%m-%d"), file_name.display()))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("json").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("dev").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("PROD").unwrap(), LogFormat::Json);
        assert!(matches!(LogFormat::from_str("invalid"), Err(LoggingError::InvalidFormat(_))));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warn").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("debug").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(matches!(LogLevel::from_str("invalid"), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_split_log_path()
    {
        let (directory, file) = split_log_path(Path::new("/var/log/rdb.log")).unwrap();
        assert_eq!(directory, PathBuf::from("/var/log"));
        assert_eq!(file, PathBuf::from("rdb.log"));

        let (directory, file) = split_log_path(Path::new("rdb.log")).unwrap();
        assert_eq!(directory, PathBuf::from("."));
        assert_eq!(file, PathBuf::from("rdb.log"));

        assert!(matches!(split_log_path(Path::new("/")), Err(LoggingError::FileError(_))));
    }

    #[test]
    fn test_dated_file_name()
    {
        let now = DateTime::parse_from_rfc3339("2026-10-18T23:59:59+00:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(dated_file_name(Path::new("rdb.log"), now), PathBuf::from("2026-10-18-rdb.log"));

        // the date is taken in UTC
        let late = DateTime::parse_from_rfc3339("2026-10-18T22:30:00-05:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(dated_file_name(Path::new("rdb.log"), late), PathBuf::from("2026-10-19-rdb.log"));
    }
}
