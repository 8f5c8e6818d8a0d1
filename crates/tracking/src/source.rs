//! Position source abstraction
//!
//! The platform location provider sits behind [`PositionSource`]. It hands
//! back a channel of samples when asked for updates and stops feeding it on
//! `remove_updates`. [`ChannelSource`] is the in-process implementation that
//! platform glue (or a test) pushes fixes into.

use crate::sample::Sample;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use tracking_core::config::TrackingConfig;
use tracking_geo::GeoError;

/// Stream of fixes delivered by a source
pub type PositionStream = mpsc::UnboundedReceiver<Sample>;

/// Power/accuracy trade-off requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    HighAccuracy,
    Balanced,
}

/// Parameters of a location subscription
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRequest {
    pub interval: Duration,
    pub min_update_interval: Duration,
    /// 0 delivers a heartbeat even when stationary
    pub min_distance_meters: f64,
    pub priority: Priority,
    pub wait_for_accurate_location: bool,
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self::from(&TrackingConfig::default())
    }
}

impl From<&TrackingConfig> for LocationRequest {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            interval: config.interval(),
            min_update_interval: config.min_update_interval(),
            min_distance_meters: config.min_distance_meters,
            priority: if config.high_accuracy {
                Priority::HighAccuracy
            } else {
                Priority::Balanced
            },
            wait_for_accurate_location: config.wait_for_accurate_location,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("location permission not granted")]
    PermissionDenied,

    #[error("location provider unavailable: {0}")]
    Unavailable(String),
}

/// A provider of position fixes
pub trait PositionSource: Send + Sync + 'static {
    /// Start delivering fixes matching `request`
    fn request_updates(&self, request: &LocationRequest) -> Result<PositionStream, SourceError>;

    /// Stop delivering fixes; idempotent
    fn remove_updates(&self);
}

/// Source fed by explicit [`ChannelSource::push`] calls
#[derive(Debug)]
pub struct ChannelSource {
    permitted: AtomicBool,
    subscription: Mutex<Option<(LocationRequest, mpsc::UnboundedSender<Sample>)>>,
}

impl Default for ChannelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelSource {
    pub fn new() -> Self {
        Self {
            permitted: AtomicBool::new(true),
            subscription: Mutex::new(None),
        }
    }

    /// Grant or revoke location permission
    pub fn set_permitted(&self, permitted: bool) {
        self.permitted.store(permitted, Ordering::SeqCst);
    }

    /// Deliver a fix to the current subscriber.
    ///
    /// Returns `Ok(false)` when nobody is subscribed and the fix was dropped.
    pub fn push(&self, sample: Sample) -> Result<bool, GeoError> {
        sample.coordinate().validate()?;

        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        Ok(match *subscription {
            Some((_, ref sender)) => sender.send(sample).is_ok(),
            None => false,
        })
    }

    /// Request of the live subscription, if any
    pub fn active_request(&self) -> Option<LocationRequest> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(request, _)| request.clone())
    }

    pub fn is_subscribed(&self) -> bool {
        self.active_request().is_some()
    }
}

impl PositionSource for ChannelSource {
    fn request_updates(&self, request: &LocationRequest) -> Result<PositionStream, SourceError> {
        if !self.permitted.load(Ordering::SeqCst) {
            return Err(SourceError::PermissionDenied);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        *self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((request.clone(), sender));

        debug!(
            interval_ms = request.interval.as_millis() as u64,
            min_distance_m = request.min_distance_meters,
            "Location updates requested"
        );
        Ok(receiver)
    }

    fn remove_updates(&self) {
        if self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!("Location updates removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_config() {
        let request = LocationRequest::default();
        assert_eq!(request.interval, Duration::from_secs(15));
        assert_eq!(request.min_update_interval, Duration::from_secs(5));
        assert_eq!(request.min_distance_meters, 0.0);
        assert_eq!(request.priority, Priority::HighAccuracy);
        assert!(request.wait_for_accurate_location);

        let config = TrackingConfig {
            high_accuracy: false,
            ..TrackingConfig::default()
        };
        assert_eq!(LocationRequest::from(&config).priority, Priority::Balanced);
    }

    #[test]
    fn test_push_without_subscriber_drops() {
        let source = ChannelSource::new();
        assert!(!source.push(Sample::now(1.0, 2.0, 3.0)).unwrap());
    }

    #[test]
    fn test_push_delivers_to_subscriber() {
        let source = ChannelSource::new();
        let mut stream = source.request_updates(&LocationRequest::default()).unwrap();
        assert!(source.is_subscribed());

        let sample = Sample::now(12.0, 77.0, 5.0);
        assert!(source.push(sample).unwrap());
        assert_eq!(stream.try_recv().unwrap(), sample);
    }

    #[test]
    fn test_invalid_fix_rejected() {
        let source = ChannelSource::new();
        let _stream = source.request_updates(&LocationRequest::default()).unwrap();
        assert!(source.push(Sample::now(91.0, 0.0, 1.0)).is_err());
        assert!(source.push(Sample::now(0.0, f64::NAN, 1.0)).is_err());
    }

    #[test]
    fn test_permission_denied() {
        let source = ChannelSource::new();
        source.set_permitted(false);
        assert_eq!(
            source.request_updates(&LocationRequest::default()).unwrap_err(),
            SourceError::PermissionDenied
        );
        assert!(!source.is_subscribed());
    }

    #[test]
    fn test_remove_updates_closes_stream() {
        let source = ChannelSource::new();
        let mut stream = source.request_updates(&LocationRequest::default()).unwrap();

        source.remove_updates();
        source.remove_updates();

        assert!(!source.is_subscribed());
        assert!(matches!(
            stream.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
