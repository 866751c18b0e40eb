//! Tracing setup: console output with local timestamps, plus an optional
//! daily-rotated log file.

use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive, overridden by `RUST_LOG`.
pub const DEFAULT_LOG_FILTER: &str = "stream_daemon=info,stream_platforms=info";

/// File name prefix of rotated log files.
const LOG_FILE_PREFIX: &str = "stream-daemon.log";

/// Formats timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber.
///
/// When `log_dir` is given, events are also written to a daily-rotated file in
/// that directory. The returned guard flushes the file writer on drop; keep it
/// alive for the lifetime of the process.
pub fn init_logging(log_dir: Option<&Path>) -> crate::Result<Option<WorkerGuard>> {
    let console = fmt::layer().with_timer(LocalTimer).boxed();

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter())
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("stream_daemon=info"));
        assert!(DEFAULT_LOG_FILTER.contains("stream_platforms=info"));
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_local_timer_formats() {
        let mut out = String::new();
        LocalTimer.format_time(&mut Writer::new(&mut out)).unwrap();
        assert!(out.contains('T'));
    }
}
