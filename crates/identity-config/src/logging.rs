//! Logging initialization.
//!
//! Thin wrapper over the observability crate. With a log path, events are
//! appended as JSONL (secret fields redacted) and mirrored to stderr; without
//! one, compact stderr output is used.

use crate::CoreResult;
use std::path::PathBuf;

const SERVICE_NAME: &str = "identity";

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `level`.
///
/// ```ignore
/// init_logging("info", Some(paths.log_file()))?;
/// tracing::info!("identity runtime started");
/// ```
pub fn init_logging(level: &str, log_path: Option<PathBuf>) -> CoreResult<()> {
    let also_stderr = log_path.is_some();
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: parse_level(level).to_string().to_ascii_lowercase(),
        log_path,
        also_stderr,
    })?;
    Ok(())
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
