//! Position samples

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracking_geo::Coordinate;

/// One position fix with its accuracy radius and capture time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy: f32,
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(latitude: f64, longitude: f64, accuracy: f32, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            captured_at,
        }
    }

    /// A fix captured right now
    pub fn now(latitude: f64, longitude: f64, accuracy: f32) -> Self {
        Self::new(latitude, longitude, accuracy, Utc::now())
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Capture time as epoch milliseconds, the history document key
    pub fn captured_at_millis(&self) -> i64 {
        self.captured_at.timestamp_millis()
    }

    /// Rebuild the capture time from epoch milliseconds
    pub(crate) fn time_from_millis(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}
