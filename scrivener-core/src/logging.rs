//! Tracing setup
//!
//! Every tool call is a short-lived process, and telemetry failures are
//! swallowed rather than returned. The rolling file under
//! `$XDG_STATE_HOME/scrivener/` is where those failures surface.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// File name prefix of the rolling log
const LOG_PREFIX: &str = "scrivener.log";

/// Flushes buffered log lines when dropped. Hold it for the life of `main`.
pub struct LoggingGuard {
    _worker: WorkerGuard,
    installed: bool,
}

impl LoggingGuard {
    /// False when another global subscriber was already in place and this
    /// one was discarded.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Log to the XDG state directory.
///
/// `RUST_LOG` overrides `config.level`. Files rotate daily and at most
/// `config.max_files` are kept.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    init_in(&Config::state_dir(), config)
}

/// Log to `dir` instead of the state directory.
pub fn init_in(dir: &Path, config: &LoggingConfig) -> Result<LoggingGuard> {
    std::fs::create_dir_all(dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .max_log_files(config.max_files.max(1))
        .build(dir)
        .map_err(|e| Error::Config(format!("cannot open log in {}: {e}", dir.display())))?;
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let level = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let installed = match tracing_subscriber::registry().with(level).with(layer).try_init() {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "Subscriber already set, keeping it");
            false
        }
    };

    tracing::info!(dir = %dir.display(), level = %config.level, "Logging to file");
    Ok(LoggingGuard {
        _worker: worker,
        installed,
    })
}

/// Stdout logging for tests, filtered by `RUST_LOG`. Safe to call repeatedly.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Path of the current log file
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}
