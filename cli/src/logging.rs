//! Initializes `tracing` to write structured logs to a file under
//! `~/.codinglm/logs/`, formatted with [`crate::log_format::TextWithSpanIds`].
//! Library code never writes to stdout/stderr directly; the REPL owns the
//! terminal for user-facing output.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use crate::log_format::TextWithSpanIds;

/// Must be kept alive for the process lifetime — dropping it stops the
/// non-blocking writer thread and silently truncates pending log lines.
pub struct LoggingGuard {
    _appender_guard: tracing_appender::non_blocking::WorkerGuard,
}

pub fn logs_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codinglm")
        .join("logs")
}

pub fn init(session_id: &str) -> Result<LoggingGuard, std::io::Error> {
    let dir = logs_dir();
    std::fs::create_dir_all(&dir)?;

    let file_name = format!("codinglm-{}.log", session_id);
    let file_appender = tracing_appender::rolling::never(&dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .event_format(TextWithSpanIds::new())
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .with_ansi(false)
        .init();

    Ok(LoggingGuard { _appender_guard: guard })
}
