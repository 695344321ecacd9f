//! # Observability
//!
//! Centralized logging layer for the InstaClone client.
//!
//! Crates in this workspace are **log producers**. They use the standard
//! `tracing` macros and never decide where logs go. The binary calls
//! [`init`] or [`init_with_config`] once at startup and this crate wires up:
//!
//! - an `EnvFilter` from `RUST_LOG`, falling back to the configured level
//! - a JSONL file layer (`~/.instaclone/logs/client.jsonl` by default)
//! - an optional compact stderr layer for interactive use
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init("cli");
//!     tracing::info!("ready");
//! }
//! ```

mod file_writer;
mod json_layer;

use std::io;
use std::path::PathBuf;

pub use file_writer::{CentralLogWriter, WriterFactory};
pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "cli", "feed-demo").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.instaclone/logs/client.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Write JSONL lines to the log file.
    pub file_output: bool,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            file_output: true,
            also_stderr: false,
        }
    }
}

/// Central log file location for all client processes.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".instaclone").join("logs").join("client.jsonl"))
}

/// Initialize the observability layer with default settings.
///
/// Failures to open the log file are reported on stderr and logging falls
/// back to stderr only; a client should never refuse to start over logs.
pub fn init(service_name: &str) {
    let config = LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    };
    if let Err(e) = init_with_config(config.clone()) {
        eprintln!("observability: file logging unavailable ({e}), using stderr");
        let _ = init_with_config(LogConfig {
            file_output: false,
            also_stderr: true,
            ..config
        });
    }
}

/// Initialize the observability layer with custom configuration.
///
/// Installing a second global subscriber is a no-op, which keeps tests that
/// initialize logging more than once from panicking.
///
/// ```rust,ignore
/// observability::init_with_config(observability::LogConfig {
///     service_name: "cli".into(),
///     default_level: "debug".into(),
///     also_stderr: true,
///     ..Default::default()
/// })?;
/// ```
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Layer};

    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let json_layer = if config.file_output {
        let log_path = config
            .log_path
            .clone()
            .or_else(default_log_path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?;
        let writer = CentralLogWriter::new(&log_path)?;
        Some(
            JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer))
                .with_filter(env_filter()),
        )
    } else {
        None
    };

    let stderr_layer = if config.also_stderr {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(io::stderr)
                .with_filter(env_filter()),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            service = %config.service_name,
            level = %config.default_level,
            "observability initialized"
        );
    }
    Ok(())
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
