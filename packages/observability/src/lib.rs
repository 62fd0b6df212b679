//! # Observability
//!
//! Centralized tracing setup for the Steps Toward identity workspace.
//!
//! Crates are **log producers** only. They use the standard `tracing` macros
//! and never decide where output goes. The binary calls [`init_with_config`]
//! once at startup:
//!
//! - with a `log_path`, every event is appended to that file as one JSON
//!   object per line (see [`LogEntry`]), with secret-looking fields redacted;
//! - without one, events go to stderr in the compact human format.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "identity".into(),
//!     default_level: "debug".into(),
//!     log_path: Some(paths.log_file()),
//!     also_stderr: true,
//! });
//! tracing::info!(uid = %user.uid, "signed in");
//! ```
//!
//! `RUST_LOG` always overrides `default_level`.

mod file_writer;
mod json_layer;

use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file_writer::{FileLogWriter, FileWriterFactory};
pub use json_layer::{is_sensitive_field, JsonLayer, LogEntry, REDACTED};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every JSONL entry.
    pub service_name: String,

    /// Default level filter (e.g. "debug", "info").
    /// Overridden by the `RUST_LOG` environment variable.
    pub default_level: String,

    /// Append structured JSONL here when set.
    pub log_path: Option<PathBuf>,

    /// Also print compact output to stderr when a log file is configured.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Errors raised while installing the global subscriber.
#[derive(Error, Debug)]
pub enum InitError {
    /// The log file could not be created or opened.
    #[error("failed to open log file {}: {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber was already installed.
    #[error("subscriber already set: {0}")]
    AlreadyInitialized(String),
}

/// Initialize with defaults (compact stderr output).
pub fn init(service_name: &str) -> Result<(), InitError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize the global subscriber from `config`.
pub fn init_with_config(config: LogConfig) -> Result<(), InitError> {
    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let Some(log_path) = config.log_path.clone() else {
        return tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(true)
            .compact()
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| InitError::AlreadyInitialized(e.to_string()));
    };

    let writer = FileLogWriter::new(&log_path).map_err(|source| InitError::LogFile {
        path: log_path.clone(),
        source,
    })?;
    let json_layer = JsonLayer::new(config.service_name.clone(), FileWriterFactory::new(writer));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
    });

    tracing_subscriber::registry()
        .with(json_layer.with_filter(env_filter()))
        .with(stderr_layer)
        .try_init()
        .map_err(|e| InitError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        log_path = %log_path.display(),
        service = %config.service_name,
        "observability initialized"
    );
    Ok(())
}

/// Re-export tracing macros so crates can use `observability::info!()`.
pub use tracing::{debug, error, info, instrument, trace, warn, Level};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_log_file_error_display() {
        let err = InitError::LogFile {
            path: PathBuf::from("/nope/identity.jsonl"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/nope/identity.jsonl"));
        assert!(msg.contains("denied"));
    }
}
