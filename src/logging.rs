//! Tracing configuration and log routing.
//!
//! Logs go to stderr with a compact formatter so command output on stdout stays clean, and to a
//! file. `DOCPIPE_LOG_FILE` selects the file; otherwise `logs/docpipe.log` is used. File writes
//! go through a non-blocking appender.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Environment variable naming the log file.
pub const LOG_FILE_ENV: &str = "DOCPIPE_LOG_FILE";

/// Configure tracing subscribers for console and file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`).
/// - Keeps the non-blocking writer's guard alive for the process lifetime.
/// - Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    let result = if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();
        registry.with(file_layer).try_init()
    } else {
        registry.try_init()
    };

    if let Err(err) = result {
        eprintln!("Tracing already initialized: {err}");
    }
}

/// Build a non-blocking writer for file logging.
///
/// Returns `None` when the log directory cannot be created or the file cannot be opened.
fn configure_file_writer() -> Option<NonBlocking> {
    let file = match std::env::var(LOG_FILE_ENV) {
        Ok(path) if !path.trim().is_empty() => std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| eprintln!("Failed to open log file {path}: {err}"))
            .ok()?,
        _ => {
            if let Err(err) = std::fs::create_dir_all("logs") {
                eprintln!("Failed to create logs directory: {err}");
                return None;
            }
            let appender = tracing_appender::rolling::never("logs", "docpipe.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let _ = LOG_GUARD.set(guard);
            return Some(non_blocking);
        }
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let _ = LOG_GUARD.set(guard);
    Some(non_blocking)
}
