//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a pull, push, or sync cycle.
///
/// A conflict is not an error: it is a regular branch of a push or pull
/// outcome and is handed to the conflict resolver.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport failure: connection refused, reset, timed out.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status outside the auth range.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Compact response body.
        message: String,
    },

    /// Credential missing, expired, or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Malformed request or response payload.
    #[error("validation error: {0}")]
    Validation(String),

    /// Local database or disk failure.
    #[error("storage error: {0}")]
    Storage(#[from] crate::Error),
}

impl SyncError {
    /// Map an HTTP status and body to an error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth(message),
            400 | 404 | 409 | 413 | 422 => Self::Validation(message),
            _ => Self::Server { status, message },
        }
    }

    /// Returns true if the failed operation may succeed when retried.
    ///
    /// Network failures, 5xx and 429 responses are transient. Auth,
    /// validation and local storage failures are fatal for the cycle.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Server { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::Auth(_) | Self::Validation(_) | Self::Storage(_) => false,
        }
    }

    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return Self::Validation(format!("invalid response payload: {error}"));
        }
        if let Some(status) = error.status() {
            return Self::from_status(status.as_u16(), error.to_string());
        }
        Self::Network(error.to_string())
    }
}
