//! Errors from loading configuration and resolving client paths.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A config value the client cannot work with.
    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid Supabase URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Malformed config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not determine home directory")]
    NoHomeDir,
}

pub type CoreResult<T> = Result<T, CoreError>;
