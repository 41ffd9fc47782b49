//! Session logging for chunksync
//!
//! Every run writes a detailed trace to `chunksync-<session>.log` in the system
//! temp directory. The console shows INFO (DEBUG with `--verbose`) above the
//! progress bars. `CHUNKSYNC_LOG` replaces the file filter.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer as _};
use uuid::Uuid;

use chunksync_core::config::LOG_ENV;

use crate::progress;

/// File filter used when `CHUNKSYNC_LOG` is unset or invalid
const DEFAULT_FILE_FILTER: &str =
    "warn,chunksync=trace,chunksync_core=trace,chunksync_transport=trace";

/// A running log session. Dropping it flushes the file writer.
pub struct LogSession {
    pub id: Uuid,
    pub log_path: PathBuf,
    _guard: WorkerGuard,
}

fn log_file_name(id: Uuid) -> String {
    format!("chunksync-{id}.log")
}

/// Where the trace for session `id` lands under `dir`
pub fn log_path(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(log_file_name(id))
}

fn file_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILE_FILTER))
}

fn console_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// Install the file and console layers. Keep the session alive until exit.
pub fn init(verbose: bool) -> LogSession {
    let id = Uuid::new_v4();
    let dir = std::env::temp_dir();

    let appender = tracing_appender::rolling::never(&dir, log_file_name(id));
    let (writer, guard) = tracing_appender::non_blocking(appender);

    // Closing a per-file span logs its `name` field with the time spent on it.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(file_filter());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(progress::ProgressWriter)
        .with_target(false)
        .without_time()
        .with_filter(console_level(verbose));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!(session = %id, "chunksync {} starting", env!("CARGO_PKG_VERSION"));

    LogSession {
        id,
        log_path: log_path(&dir, id),
        _guard: guard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_names_session() {
        let id = Uuid::nil();
        let path = log_path(Path::new("/var/tmp"), id);
        assert_eq!(
            path,
            PathBuf::from("/var/tmp/chunksync-00000000-0000-0000-0000-000000000000.log")
        );
    }

    #[test]
    fn test_default_file_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILE_FILTER).is_ok());
    }

    #[test]
    fn test_console_level_follows_verbose() {
        assert_eq!(console_level(false), LevelFilter::INFO);
        assert_eq!(console_level(true), LevelFilter::DEBUG);
    }
}
