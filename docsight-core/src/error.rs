//! Error types for docsight-core

use thiserror::Error;

/// Main error type for the docsight-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A feature was used without the token or URL it needs
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// Transport-level HTTP failure (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The analytics backend answered with a non-success status
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// The tool registry could not be reached or spoke nonsense
    #[error("tool registry unreachable: {0}")]
    Unreachable(String),

    /// Caller asked for something outside the allow-list
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether resending the same payload could plausibly succeed.
    ///
    /// Transport failures, timeouts, throttling and 5xx answers are transient;
    /// any other upstream rejection is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Unreachable(_) => true,
            Error::Upstream { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

/// Result type alias for docsight-core
pub type Result<T> = std::result::Result<T, Error>;
