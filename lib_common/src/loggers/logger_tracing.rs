//! # Tracing Logger
//!
//! Installs the process-wide `tracing` subscriber:
//!
//! * a JSON file layer writing to `<log_dir>/<file_name>` through a
//!   non-blocking appender,
//! * a human-readable console layer, unless disabled (production),
//! * an `EnvFilter` taken from `RUST_LOG`, falling back to the configured level.
//!
//! The returned [`WorkerGuard`] must be held for the life of the process;
//! dropping it flushes and stops the file writer.

use std::io;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LoggerOptions {
    pub log_dir: PathBuf,
    pub file_name: String,
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub console: bool,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            file_name: "ws.log".to_string(),
            level: "info".to_string(),
            console: true,
        }
    }
}

/// Builds the layered subscriber without installing it. The filter comes
/// from `RUST_LOG`, or `options.level` when that is unset.
pub fn build_subscriber(
    options: &LoggerOptions,
) -> io::Result<(impl tracing::Subscriber + Send + Sync + 'static, WorkerGuard)> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.level))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    build_subscriber_with_filter(options, env_filter)
}

/// Same layers as [`build_subscriber`], with an explicit filter.
pub fn build_subscriber_with_filter(
    options: &LoggerOptions,
    env_filter: EnvFilter,
) -> io::Result<(impl tracing::Subscriber + Send + Sync + 'static, WorkerGuard)> {
    std::fs::create_dir_all(&options.log_dir)?;

    let file_appender = rolling::never(&options.log_dir, &options.file_name);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let console_layer = options
        .console
        .then(|| fmt::layer().with_target(true).with_ansi(true));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    Ok((subscriber, guard))
}

/// Installs the subscriber globally.
///
/// # Errors
/// Fails if the log directory cannot be created, the level is not a valid
/// filter, or a global subscriber is already set.
pub fn init_logging(options: &LoggerOptions) -> io::Result<WorkerGuard> {
    let (subscriber, guard) = build_subscriber(options)?;
    subscriber
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    tracing::info!("Logging initialized with level: {}", options.level);
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_layer_writes_json_lines() {
        let dir = tempdir().unwrap();
        let options = LoggerOptions {
            log_dir: dir.path().join("nested"),
            file_name: "test.log".to_string(),
            level: "info".to_string(),
            console: false,
        };

        let (subscriber, guard) =
            build_subscriber_with_filter(&options, EnvFilter::new("info")).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(key = "A1", "New entry");
            tracing::trace!("filtered out");
        });
        drop(guard);

        let contents = std::fs::read_to_string(dir.path().join("nested").join("test.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1, "unexpected log contents: {}", contents);

        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["level"], "INFO");
        assert_eq!(record["fields"]["message"], "New entry");
        assert_eq!(record["fields"]["key"], "A1");
    }

    #[test]
    fn test_unwritable_log_dir_is_an_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let options = LoggerOptions {
            log_dir: blocker.join("logs"),
            console: false,
            ..Default::default()
        };

        assert!(build_subscriber_with_filter(&options, EnvFilter::new("info")).is_err());
    }

    #[test]
    fn test_filter_directive_is_applied() {
        let dir = tempdir().unwrap();
        let options = LoggerOptions {
            log_dir: dir.path().to_path_buf(),
            file_name: "warn.log".to_string(),
            console: false,
            ..Default::default()
        };

        let (subscriber, guard) =
            build_subscriber_with_filter(&options, EnvFilter::new("warn")).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("dropped");
            tracing::warn!("kept");
        });
        drop(guard);

        let contents = std::fs::read_to_string(dir.path().join("warn.log")).unwrap();
        assert_eq!(contents.lines().count(), 1, "unexpected log contents: {}", contents);
        assert!(contents.contains("kept"));
    }
}
