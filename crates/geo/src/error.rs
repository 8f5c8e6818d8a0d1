//! Error types for the geo crate.

use thiserror::Error;
use tracking_core::ErrorCode;

/// Result type alias for geo operations.
pub type Result<T> = std::result::Result<T, GeoError>;

/// Errors that can occur during geo operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeoError {
    /// Latitude outside -90..=90 or not finite
    #[error("Invalid latitude: {0}")]
    InvalidLatitude(f64),

    /// Longitude outside -180..=180 or not finite
    #[error("Invalid longitude: {0}")]
    InvalidLongitude(f64),
}

impl GeoError {
    /// Returns the shared error code for this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidCoordinate
    }
}

impl From<GeoError> for tracking_core::Error {
    fn from(err: GeoError) -> Self {
        tracking_core::Error::new(err.code(), err.to_string()).with_source(err)
    }
}
