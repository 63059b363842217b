//! Structured logging using tracing
//!
//! The command line logs to stderr. The task monitor owns the terminal, so
//! it logs to a daily-rotated file instead.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable consulted before `RUST_LOG`
pub const LOG_ENV: &str = "MEDIATUI_LOG";

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

/// Default directory for log files (~/.cache/mediatui/logs)
pub fn default_log_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mediatui")
        .join("logs")
}

/// Filter from `MEDIATUI_LOG`, then `RUST_LOG`, then `level`
pub fn env_filter(level: &str) -> EnvFilter {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

/// Install the global subscriber
///
/// The returned guard flushes file output on drop; keep it alive for the
/// life of the process. Installing twice is a no-op.
pub fn init(level: &str, target: LogTarget) -> std::io::Result<Option<WorkerGuard>> {
    let filter = env_filter(level);
    match target {
        LogTarget::Stderr => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .try_init();
            Ok(None)
        }
        LogTarget::File(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, &dir, "mediatui.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .try_init();
            Ok(Some(guard))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_directory() {
        let dir = default_log_directory();
        assert!(dir.ends_with("mediatui/logs"));
    }

    #[test]
    fn test_file_target_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let guard = init("debug", LogTarget::File(logs.clone())).unwrap();
        assert!(guard.is_some());
        assert!(logs.is_dir());
    }
}
