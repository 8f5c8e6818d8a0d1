//! Geospatial helpers for position samples.
//!
//! This crate provides:
//! - Coordinate validation
//! - Per-axis epsilon comparison used for stationary detection
//! - Haversine distance for displacement logging
//!
//! # Example
//!
//! ```
//! use tracking_geo::Coordinate;
//!
//! let parked = Coordinate::new(12.000000, 77.000000);
//! let jitter = Coordinate::new(12.000004, 77.000003);
//!
//! assert!(parked.within_epsilon(&jitter, 1e-5));
//! ```

mod error;
mod haversine;

pub use error::{GeoError, Result};
pub use haversine::{EARTH_RADIUS_M, haversine_distance_meters};

/// A geographic coordinate with latitude and longitude.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees (-90 to 90)
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180)
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a new coordinate.
    #[inline]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Returns true if both axes are finite and in range.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Checks both axes, reporting the first one out of range.
    pub fn validate(&self) -> Result<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(GeoError::InvalidLatitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(GeoError::InvalidLongitude(self.longitude));
        }
        Ok(())
    }

    /// True when neither axis moved by more than `epsilon` degrees.
    #[inline]
    pub fn within_epsilon(&self, other: &Coordinate, epsilon: f64) -> bool {
        (self.latitude - other.latitude).abs() <= epsilon
            && (self.longitude - other.longitude).abs() <= epsilon
    }

    /// Converts degrees to radians for internal calculations.
    #[inline]
    pub(crate) fn to_radians(self) -> (f64, f64) {
        (self.latitude.to_radians(), self.longitude.to_radians())
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self::new(lat, lng)
    }
}
