//! Gateway error types.
//!
//! Every error here is `Clone + PartialEq` so it can travel inside state
//! values (a failed feed keeps its `QueryError`) and be asserted on in tests.
//! Transport errors are therefore flattened to strings at the boundary.

use thiserror::Error;

/// Errors from sign-in, sign-up, sign-out and session reads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Invalid email or password, or an account that cannot be created.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The auth server could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// Operation requires a session and there is none.
    #[error("Not logged in")]
    NotLoggedIn,

    /// Session expired and could not be refreshed.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The auth server answered with an unexpected status.
    #[error("Auth server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// Local session persistence failed.
    #[error("Session storage error: {0}")]
    Storage(String),

    /// Anything else (malformed responses, protocol surprises).
    #[error("Auth error: {0}")]
    Unknown(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) => true,
            AuthError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            AuthError::Network(err.to_string())
        } else if err.is_decode() {
            AuthError::Unknown(format!("malformed auth response: {err}"))
        } else {
            AuthError::Unknown(err.to_string())
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Unknown(format!("JSON error: {err}"))
    }
}

/// Errors from bulk row queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The data API could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The data API rejected the query.
    #[error("Query rejected: {status} - {message}")]
    Server { status: u16, message: String },

    /// The response body was not a JSON array of rows.
    #[error("Malformed query response: {0}")]
    Decode(String),

    /// The query could not be expressed (bad table or column names).
    #[error("Invalid query: {0}")]
    Invalid(String),
}

impl QueryError {
    pub fn is_transient(&self) -> bool {
        match self {
            QueryError::Network(_) => true,
            QueryError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            QueryError::Decode(err.to_string())
        } else {
            QueryError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for QueryError {
    fn from(err: url::ParseError) -> Self {
        QueryError::Invalid(err.to_string())
    }
}

/// Errors from row inserts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Writing requires a signed-in user.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The row failed local validation.
    #[error("Invalid row: {0}")]
    Invalid(String),

    /// The data API could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The data API rejected the write.
    #[error("Write rejected: {status} - {message}")]
    Server { status: u16, message: String },
}

impl From<reqwest::Error> for WriteError {
    fn from(err: reqwest::Error) -> Self {
        WriteError::Network(err.to_string())
    }
}

impl From<url::ParseError> for WriteError {
    fn from(err: url::ParseError) -> Self {
        WriteError::Invalid(err.to_string())
    }
}

/// Errors from opening or keeping a live subscription.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The realtime endpoint could not be reached.
    #[error("Connection error: {0}")]
    Connect(String),

    /// The server refused the channel join.
    #[error("Subscription rejected: {0}")]
    Rejected(String),

    /// The subscription did not become active in time.
    #[error("Subscription did not become active in time")]
    Timeout,

    /// The subscription closed (server side, network drop, or release).
    #[error("Subscription closed{}", .0.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<String>),
}

impl From<tokio_tungstenite::tungstenite::Error> for SubscriptionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SubscriptionError::Connect(err.to_string())
    }
}

impl From<url::ParseError> for SubscriptionError {
    fn from(err: url::ParseError) -> Self {
        SubscriptionError::Connect(err.to_string())
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
/// Result type alias using QueryError.
pub type QueryResult<T> = Result<T, QueryError>;
/// Result type alias using WriteError.
pub type WriteResult<T> = Result<T, WriteError>;
/// Result type alias using SubscriptionError.
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;
