//! Error types for grantline.

use thiserror::Error;

/// Result type alias using grantline's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for grantline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Opportunity not found
    #[error("Opportunity not found: {0}")]
    OpportunityNotFound(uuid::Uuid),

    /// HTTP fetch failed after retries
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Target rejected by the SSRF policy; never retried
    #[error("Blocked target: {0}")]
    Blocked(String),

    /// Date/amount/document could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Background job error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not authorized
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conflicting state (duplicate user, running job slot)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Fetch(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_opportunity_not_found() {
        let id = Uuid::nil();
        let err = Error::OpportunityNotFound(id);
        assert_eq!(err.to_string(), format!("Opportunity not found: {}", id));
    }

    #[test]
    fn test_error_display_blocked() {
        let err = Error::Blocked("redirect to private IP".to_string());
        assert_eq!(err.to_string(), "Blocked target: redirect to private IP");
    }

    #[test]
    fn test_error_display_parse() {
        let err = Error::Parse("unable to parse date".to_string());
        assert_eq!(err.to_string(), "Parse error: unable to parse date");
    }

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict("job already running".to_string());
        assert_eq!(err.to_string(), "Conflict: job already running");
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
