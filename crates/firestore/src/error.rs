//! Error types for the Firestore client

use serde::Deserialize;
use thiserror::Error;
use tracking_core::ErrorCode;

/// Result type alias for Firestore operations
pub type FirestoreResult<T> = Result<T, FirestoreError>;

/// Firestore client errors
#[derive(Error, Debug)]
pub enum FirestoreError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing environment variable
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// Firestore returned an error response
    #[error("Firestore error ({status} {code}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// gRPC-style status name, e.g. `NOT_FOUND`
        code: String,
        /// Error message from Firestore
        message: String,
    },

    /// Circuit breaker is open
    #[error("Circuit breaker is open - Firestore temporarily unavailable")]
    CircuitOpen,

    /// A single attempt exceeded its deadline
    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// All retry attempts exhausted
    #[error("All {attempts} retry attempts failed: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Last error message
        last_error: String,
    },

    /// Document path is not addressable
    #[error("Invalid document path: {0}")]
    InvalidPath(String),
}

/// Body Firestore sends with non-2xx responses
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl FirestoreError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a missing env var error
    pub fn missing_env(var: impl Into<String>) -> Self {
        Self::MissingEnvVar(var.into())
    }

    /// Build an API error from a status and the raw response body
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => Self::Api {
                status,
                code: envelope.error.status,
                message: envelope.error.message,
            },
            Err(_) => Self::Api {
                status,
                code: String::new(),
                message: body.trim().to_string(),
            },
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect() || e.is_timeout(),
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Timeout(_) => true,
            Self::CircuitOpen
            | Self::Config(_)
            | Self::MissingEnvVar(_)
            | Self::Json(_)
            | Self::InvalidPath(_)
            | Self::RetriesExhausted { .. } => false,
        }
    }

    /// True when the target document does not exist (failed `exists` precondition)
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
            || matches!(self, Self::Api { code, .. } if code == "NOT_FOUND")
    }

    /// Check if this is a client error (4xx)
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Api { status, .. } if (400..500).contains(status))
    }

    /// Shared error code
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) | Self::MissingEnvVar(_) => ErrorCode::ConfigError,
            Self::Api { .. } if self.is_not_found() => ErrorCode::RemoteNotFound,
            Self::CircuitOpen => ErrorCode::CircuitOpen,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::InvalidPath(_) => ErrorCode::InvalidInput,
            Self::Request(_)
            | Self::Json(_)
            | Self::Api { .. }
            | Self::RetriesExhausted { .. } => ErrorCode::RemoteWriteFailed,
        }
    }
}

impl From<FirestoreError> for tracking_core::Error {
    fn from(err: FirestoreError) -> Self {
        tracking_core::Error::new(err.code(), err.to_string()).with_source(err)
    }
}
