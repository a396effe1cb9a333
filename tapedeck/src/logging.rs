//! Logging for the tape library service.
//!
//! Two outputs with different audiences: a human-readable stream on
//! stdout for whoever is tailing the daemon, and daily-rolled JSON lines
//! under the log directory. The engine stamps every operation line with
//! its `trace_id` field, and the JSON layer keeps those fields
//! structured, so the file log can be grepped or ingested per trace
//! while HTTP callers poll the same lines via
//! `/library/operation/{trace_id}`. The filter honors `RUST_LOG` and
//! falls back to `info`.

use std::fs;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Directory the server logs into unless told otherwise.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Prefix of the rolled log files (`tapedeck.log.YYYY-MM-DD`).
///
/// The service runs for months; rolling by day keeps any one file
/// tractable and lets operators expire history with a cron job instead
/// of a restart.
pub const LOG_FILE_PREFIX: &str = "tapedeck.log";

/// Keeps the background log writer running.
///
/// Hold this for the lifetime of the process; when it drops, the writer
/// thread flushes whatever it still buffers and stops.
pub struct LogGuard {
    _writer: WorkerGuard,
}

/// Wire the global subscriber: JSON lines into `log_dir`, rolled daily,
/// plus readable output on stdout.
///
/// # Errors
///
/// Returns an error if `log_dir` cannot be created.
pub fn init(log_dir: &str) -> Result<LogGuard, io::Error> {
    fs::create_dir_all(log_dir)?;

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, writer_guard) = tracing_appender::non_blocking(appender);

    let json_file_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_ansi(false)
        .with_writer(file_writer);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stdout);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_file_layer)
        .with(console_layer)
        .init();

    Ok(LogGuard {
        _writer: writer_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(DEFAULT_LOG_DIR, "logs");
        assert_eq!(LOG_FILE_PREFIX, "tapedeck.log");
    }

    // init() itself cannot run in a unit test: the subscriber is global
    // and a second registration in the same process panics. The
    // directory handling it relies on is exercised here instead.

    #[test]
    fn test_log_directory_can_be_nested() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("var").join("log").join("tapedeck");

        fs::create_dir_all(&dir).unwrap();
        assert!(dir.is_dir());

        // Re-creating an existing directory must stay an error-free no-op,
        // since every daemon start calls it.
        fs::create_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unwritable_log_directory_is_an_error() {
        #[cfg(unix)]
        {
            let tmp = tempfile::TempDir::new().unwrap();
            let blocker = tmp.path().join("blocker");
            fs::write(&blocker, "").unwrap();

            // A file where the directory should go makes creation fail.
            assert!(fs::create_dir_all(blocker.join("logs")).is_err());
        }
    }
}
