//! Error types for photolens.

use thiserror::Error;

/// Result type alias using photolens's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for photolens operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Conflicting state (e.g. a job of the same kind is already active)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A required collaborator is not configured
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Metadata service rejected or failed a call
    #[error("Metadata service error: {0}")]
    Metadata(String),

    /// Embedding computation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector index operation failed
    #[error("Index error: {0}")]
    Index(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Work was abandoned because its job was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("photo pq8abc".to_string());
        assert_eq!(err.to_string(), "Not found: photo pq8abc");
    }

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict("a process job is already running".to_string());
        assert_eq!(
            err.to_string(),
            "Conflict: a process job is already running"
        );
    }

    #[test]
    fn test_error_display_unavailable() {
        let err = Error::Unavailable("vector index not configured".to_string());
        assert_eq!(
            err.to_string(),
            "Service unavailable: vector index not configured"
        );
    }

    #[test]
    fn test_error_display_cancelled() {
        assert_eq!(Error::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
