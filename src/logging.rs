//! # Diagnostic Logging
//!
//! Wires the agent's `trace/debug/info/error` diagnostic sink to a
//! `tracing-subscriber` pipeline, following the teacher's pattern of a
//! verbosity-driven level filter and a guard that must outlive `main` when
//! logging to a file (`tracing_appender::non_blocking`).

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

/// Keeps the non-blocking file writer alive. Dropping this flushes and
/// closes the background logging thread, so `main` must hold it for the
/// lifetime of the process when logging to a file.
pub struct LoggingGuard(#[allow(dead_code)] Option<tracing_appender::non_blocking::WorkerGuard>);

/// Initialize the global `tracing` subscriber.
///
/// `verbosity` follows the teacher's `-v` convention: 0 => INFO, 1 => DEBUG,
/// 2+ => TRACE. `log_file` selects a destination: `None` and `Some("stderr")`
/// both log to stderr; any other path logs to a daily-rolling file at that
/// path.
pub fn init(verbosity: u8, log_file: Option<&str>) -> LoggingGuard {
    let level = match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    match log_file {
        None | Some("stderr") => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(level);
            tracing_subscriber::registry().with(layer).init();
            LoggingGuard(None)
        }
        Some(path_str) => {
            let path = std::path::Path::new(path_str);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let filename = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("remote-syslog-tail.log"));
            let appender = tracing_appender::rolling::daily(dir, filename);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(level);
            tracing_subscriber::registry().with(layer).init();
            LoggingGuard(Some(guard))
        }
    }
}

/// Log at the "critical" level the source distinguishes from `error`.
/// `tracing` has no separate level for it, so this is `error!` with a
/// `critical = true` field the way a structured-logging backend could
/// filter on.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)*) => {
        tracing::error!(critical = true, $($arg)*)
    };
}
