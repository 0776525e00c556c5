/// Dual-output logging: compact human-readable lines on stderr and JSON lines
/// in a daily-rotated file under `<app-data>/logs/`.
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::DEFAULT_LOG_FILTER;

pub const LOG_FILE_PREFIX: &str = "pinote.jsonl";

/// Must be kept alive for the duration of the program. Dropping it flushes
/// the file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Picks the first usable filter directive: `RUST_LOG`, then the host
/// config value, then `info`.
fn filter_directive(env: Option<&str>, configured: &str) -> String {
    [env.unwrap_or_default(), configured]
        .into_iter()
        .map(str::trim)
        .find(|d| !d.is_empty() && EnvFilter::try_new(d).is_ok())
        .unwrap_or(DEFAULT_LOG_FILTER)
        .to_string()
}

pub fn init(log_dir: &Path, configured_filter: &str) -> LoggingGuard {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("[logging] Failed to create log directory {}: {e}", log_dir.display());
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(env.as_deref(), configured_filter);
    let env_filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json_layer = fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    let pretty_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .compact();

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init();

    tracing::info!(log_dir = %log_dir.display(), filter = %directive, "logging_initialized");

    LoggingGuard { _file_guard: file_guard }
}
