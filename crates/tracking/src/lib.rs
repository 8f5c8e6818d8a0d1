//! Driver location tracking service
//!
//! Samples the device position on a fixed cadence while a driver is signed
//! in, keeps the latest fix durable on disk, mirrors it to Firestore (a
//! mutable latest record plus an append-only history) and hands new fixes to
//! the UI through a command/reply bridge and an event stream.
//!
//! The platform pieces (location provider, background keep-alive) plug in
//! through [`PositionSource`] and [`KeepAlive`]; the remote backend through
//! [`DocumentStore`], implemented for [`tracking_firestore::FirestoreClient`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tracking_core::config::Config;
//! use tracking_firestore::FirestoreClient;
//! use tracking_service::{ChannelSource, Command, NoopKeepAlive, Sample};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let source = Arc::new(ChannelSource::new());
//!     let remote = Arc::new(FirestoreClient::new()?);
//!
//!     let mut bridge =
//!         tracking_service::assemble(&config.schema, source.clone(), Arc::new(NoopKeepAlive), remote)?;
//!
//!     bridge.on_command(Command::StartTracking { identity: "alice".into() }).await?;
//!     source.push(Sample::now(12.97, 77.59, 4.0))?;
//!
//!     let mut events = bridge.subscribe();
//!     if let Some(event) = events.next().await {
//!         println!("{} at {},{}", event.identity, event.lat, event.lng);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod error;
pub mod keep_alive;
pub mod sample;
pub mod session;
pub mod source;
pub mod store;
pub mod sync;
pub mod tracker;

pub use bridge::{BridgeError, Command, DeliveryBridge, LastLocation, LocationEvent, Reply, Subscription};
pub use error::{TrackingError, TrackingResult};
pub use keep_alive::{KeepAlive, KeepAliveError, KeepAliveGuard, NoopKeepAlive};
pub use sample::Sample;
pub use session::{Motion, TrackingSession};
pub use source::{ChannelSource, LocationRequest, PositionSource, PositionStream, Priority, SourceError};
pub use store::{LocalStore, PersistedSnapshot, StoreError, StoredLocation};
pub use sync::{DocumentStore, LatestOutcome, RemoteFields, SyncHandle, SyncReport, UpstreamSync};
pub use tracker::Tracker;

use std::sync::Arc;
use tracing::info;
use tracking_core::config::ConfigSchema;

/// Wire the store, sync worker, tracker and bridge from configuration.
///
/// The configuration is validated first. Must be called inside a Tokio
/// runtime; the sync worker runs until the returned bridge is dropped.
pub fn assemble<P, K, S>(
    config: &ConfigSchema,
    source: Arc<P>,
    keep_alive: Arc<K>,
    remote: Arc<S>,
) -> TrackingResult<DeliveryBridge<P, K>>
where
    P: PositionSource,
    K: KeepAlive,
    S: DocumentStore,
{
    config.validate().map_err(TrackingError::Config)?;

    let store = Arc::new(LocalStore::open(&config.storage.path)?);
    let (sync, _worker) = UpstreamSync::new(remote, config.remote.clone()).spawn();
    let tracker = Tracker::new(source, keep_alive, store, sync, &config.tracking);

    info!(
        store = %config.storage.path.display(),
        collection = %config.remote.collection,
        "Tracking service assembled"
    );
    Ok(DeliveryBridge::new(tracker, &config.bridge))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::RecordingStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_assemble_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = ConfigSchema::default();
        config.storage.path = dir.path().join("state").join("location_prefs.json");

        let mut bridge = assemble(
            &config,
            Arc::new(ChannelSource::new()),
            Arc::new(NoopKeepAlive),
            Arc::new(RecordingStore::default()),
        )
        .unwrap();

        assert_eq!(bridge.on_command(Command::IsTracking).await.unwrap(), Reply::Tracking(false));
        assert!(dir.path().join("state").is_dir());
    }

    #[tokio::test]
    async fn test_assemble_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = ConfigSchema::default();
        config.storage.path = dir.path().join("location_prefs.json");
        config.bridge.poll_interval_secs = 0;

        let result = assemble(
            &config,
            Arc::new(ChannelSource::new()),
            Arc::new(NoopKeepAlive),
            Arc::new(RecordingStore::default()),
        );
        let err = result.err().unwrap();
        assert!(matches!(err, TrackingError::Config(_)));
        assert_eq!(err.code(), tracking_core::ErrorCode::ConfigValidationError);

        config.bridge.poll_interval_secs = 5;
        config.tracking.stationary_epsilon_deg = f64::NAN;
        let result = assemble(
            &config,
            Arc::new(ChannelSource::new()),
            Arc::new(NoopKeepAlive),
            Arc::new(RecordingStore::default()),
        );
        assert!(matches!(result, Err(TrackingError::Config(_))));
    }
}
