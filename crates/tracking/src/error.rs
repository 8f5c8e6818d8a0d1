//! Error types for the tracking service

use crate::keep_alive::KeepAliveError;
use crate::store::StoreError;
use thiserror::Error;
use tracking_core::ErrorCode;
use tracking_firestore::FirestoreError;

/// Result type alias for tracking operations
pub type TrackingResult<T> = Result<T, TrackingError>;

/// Errors surfaced by the tracker, sync and bridge
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Identity must be a non-empty string")]
    InvalidIdentity,

    #[error("Location updates unavailable: {0}")]
    PermissionDenied(String),

    #[error("Could not keep the service alive: {0}")]
    ResourceAcquisitionFailed(#[source] KeepAliveError),

    #[error("Remote {operation} write failed: {source}")]
    RemoteWriteFailed {
        operation: &'static str,
        #[source]
        source: FirestoreError,
    },

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("Invalid configuration: {}", .0.message)]
    Config(#[source] tracking_core::Error),
}

impl TrackingError {
    pub(crate) fn remote(operation: &'static str, source: FirestoreError) -> Self {
        Self::RemoteWriteFailed { operation, source }
    }

    /// Shared error code
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidIdentity => ErrorCode::InvalidIdentity,
            Self::PermissionDenied(_) => ErrorCode::LocationPermissionDenied,
            Self::ResourceAcquisitionFailed(_) => ErrorCode::ResourceAcquisitionFailed,
            Self::RemoteWriteFailed { source, .. } => match source.code() {
                ErrorCode::CircuitOpen => ErrorCode::CircuitOpen,
                _ => ErrorCode::RemoteWriteFailed,
            },
            Self::Storage(e) => e.code(),
            Self::Config(e) => e.code,
        }
    }
}

impl From<TrackingError> for tracking_core::Error {
    fn from(err: TrackingError) -> Self {
        let error = tracking_core::Error::new(err.code(), err.to_string());
        match err {
            TrackingError::InvalidIdentity => {
                error.with_suggestion("Pass the signed-in driver's username")
            }
            TrackingError::PermissionDenied(_) => {
                error.with_suggestion("Grant location permission and retry")
            }
            TrackingError::Config(inner) => inner,
            _ => error.with_source(err),
        }
    }
}

/// Reject empty or whitespace-only identities
pub(crate) fn validate_identity(identity: &str) -> TrackingResult<()> {
    if identity.trim().is_empty() {
        return Err(TrackingError::InvalidIdentity);
    }
    Ok(())
}
