//! Error types for minidomain

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Model Errors ===
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Duplicate resource: {0}")]
    Duplicate(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // === Routing Errors ===
    #[error("Operation {operation} targets the domain and can only be executed by the primary controller (current primary: {primary})")]
    DelegationDisallowed { operation: String, primary: String },

    #[error("Unknown controller: {0}")]
    UnknownController(String),

    // === Resolver Errors ===
    #[error("Cannot apply operation while workers are starting: {}", workers.join(", "))]
    WorkersStarting { workers: Vec<String> },

    // === Transformation Errors ===
    #[error("Operation cannot be transformed for {controller}: {reason}")]
    Transformation { controller: String, reason: String },

    // === Rollout Errors ===
    #[error("Invalid rollout plan: {0}")]
    InvalidRolloutPlan(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::WorkersStarting { .. }
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) | Error::UnknownController(_) => StatusCode::NOT_FOUND,
            Error::Duplicate(_) => StatusCode::CONFLICT,
            Error::InvalidOperation(_)
            | Error::InvalidRolloutPlan(_)
            | Error::InvalidConfig(_)
            | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::DelegationDisallowed { .. } => StatusCode::MISDIRECTED_REQUEST,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::WorkersStarting { .. } | Error::ConnectionFailed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Error::ConnectionFailed(e.to_string())
        } else if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workers_starting_message() {
        let err = Error::WorkersStarting {
            workers: vec!["host-a:s1".into(), "host-b:s2".into()],
        };
        assert_eq!(
            err.to_string(),
            "Cannot apply operation while workers are starting: host-a:s1, host-b:s2"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_http_status_mapping() {
        use axum::http::StatusCode;
        assert_eq!(
            Error::InvalidRolloutPlan("x".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NotFound("x".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert!(!Error::InvalidRolloutPlan("x".into()).is_retryable());
    }
}
