//! Logging setup for client binaries.
//!
//! Thin wrapper over the observability package so every binary uses the same
//! service name, log file, and level handling.

use crate::{Paths, DEFAULT_LOG_LEVEL};
use observability::LogConfig;

/// Initialize logging for the CLI.
///
/// `RUST_LOG` wins over `level`; an unrecognised `level` falls back to the
/// default. Logs go to `~/.instaclone/logs/client.jsonl`, and `verbose`
/// mirrors them to stderr.
pub fn init_logging(paths: &Paths, level: &str, verbose: bool) {
    let level = match normalize_level(level) {
        Some(level) => level,
        None => {
            eprintln!("warning: unknown log level '{level}', using {DEFAULT_LOG_LEVEL}");
            DEFAULT_LOG_LEVEL
        }
    };

    let config = LogConfig {
        service_name: "cli".into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        file_output: true,
        also_stderr: verbose,
    };

    if let Err(e) = observability::init_with_config(config.clone()) {
        eprintln!("warning: could not open log file: {e}");
        let _ = observability::init_with_config(LogConfig {
            file_output: false,
            also_stderr: true,
            ..config
        });
    }
}

/// Canonical filter name for a user-supplied level, or `None` if unknown.
pub fn normalize_level(level: &str) -> Option<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        "off" | "none" => Some("off"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_known_levels() {
        assert_eq!(normalize_level("TRACE"), Some("trace"));
        assert_eq!(normalize_level(" Debug "), Some("debug"));
        assert_eq!(normalize_level("warning"), Some("warn"));
        assert_eq!(normalize_level("none"), Some("off"));
    }

    #[test]
    fn normalize_rejects_unknown() {
        assert_eq!(normalize_level(""), None);
        assert_eq!(normalize_level("loud"), None);
    }
}
