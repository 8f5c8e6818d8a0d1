//! Delivery bridge between the tracking service and the UI layer
//!
//! Lifecycle commands arrive as [`Command`]s (or as method-channel calls with
//! JSON arguments) and are answered with [`Reply`]s. New samples reach the UI
//! either by polling `getLastLocation` or through a [`Subscription`]; both
//! drain the local store, so each stored sample is handed out once.

use crate::error::{TrackingError, TrackingResult};
use crate::keep_alive::KeepAlive;
use crate::source::PositionSource;
use crate::store::{LocalStore, StoredLocation};
use crate::tracker::Tracker;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracking_core::ErrorCode;
use tracking_core::config::BridgeConfig;
use tracking_core::error::ErrorReport;
use tracking_telemetry::{metrics, names};

pub const MSG_STARTED: &str = "Service started";
pub const MSG_STOPPED: &str = "Service stopped";
pub const MSG_IDENTITY_UPDATED: &str = "Identity updated";

/// Floor for the subscriber's fallback poll
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Method not implemented: {0}")]
    NotImplemented(String),

    #[error("{method} requires a string argument `{argument}`")]
    MissingArgument {
        method: &'static str,
        argument: &'static str,
    },

    #[error(transparent)]
    Tracking(#[from] TrackingError),
}

impl BridgeError {
    /// Method-channel error payload
    pub fn into_report(self) -> ErrorReport {
        tracking_core::Error::from(self).to_report()
    }
}

impl From<BridgeError> for tracking_core::Error {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Tracking(e) => e.into(),
            BridgeError::NotImplemented(_) | BridgeError::MissingArgument { .. } => {
                tracking_core::Error::new(ErrorCode::InvalidInput, err.to_string())
            }
        }
    }
}

/// Lifecycle and query commands from the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartTracking { identity: String },
    StopTracking,
    IsTracking,
    GetLastLocation,
    UpdateIdentity { identity: String },
}

impl Command {
    /// Decode a method-channel call.
    ///
    /// The identity argument is read from `username`, falling back to
    /// `identity`.
    pub fn from_method_call(method: &str, args: &Value) -> Result<Self, BridgeError> {
        match method {
            "startTracking" => Ok(Self::StartTracking {
                identity: identity_arg("startTracking", args)?,
            }),
            "stopTracking" => Ok(Self::StopTracking),
            "isTracking" => Ok(Self::IsTracking),
            "getLastLocation" => Ok(Self::GetLastLocation),
            "updateIdentity" => Ok(Self::UpdateIdentity {
                identity: identity_arg("updateIdentity", args)?,
            }),
            other => Err(BridgeError::NotImplemented(other.to_string())),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::StartTracking { .. } => "startTracking",
            Self::StopTracking => "stopTracking",
            Self::IsTracking => "isTracking",
            Self::GetLastLocation => "getLastLocation",
            Self::UpdateIdentity { .. } => "updateIdentity",
        }
    }
}

fn identity_arg(method: &'static str, args: &Value) -> Result<String, BridgeError> {
    ["username", "identity"]
        .iter()
        .find_map(|key| args.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or(BridgeError::MissingArgument {
            method,
            argument: "username",
        })
}

/// Latest sample as handed to the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastLocation {
    pub lat: f64,
    pub lng: f64,
    pub identity: String,
    pub updated: bool,
}

/// Pushed to subscribers once per drained sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationEvent {
    pub lat: f64,
    pub lng: f64,
    pub identity: String,
}

impl From<StoredLocation> for LocationEvent {
    fn from(location: StoredLocation) -> Self {
        Self {
            lat: location.sample.latitude,
            lng: location.sample.longitude,
            identity: location.identity,
        }
    }
}

impl From<StoredLocation> for LastLocation {
    fn from(location: StoredLocation) -> Self {
        Self {
            lat: location.sample.latitude,
            lng: location.sample.longitude,
            identity: location.identity,
            updated: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack(&'static str),
    Tracking(bool),
    LastLocation(Option<LastLocation>),
}

impl Reply {
    /// Method-channel result value
    pub fn to_json(&self) -> Value {
        match self {
            Self::Ack(message) => json!(message),
            Self::Tracking(tracking) => json!(tracking),
            Self::LastLocation(Some(location)) => json!(location),
            Self::LastLocation(None) => Value::Null,
        }
    }
}

/// Front door of the service for the UI layer
pub struct DeliveryBridge<P: PositionSource, K: KeepAlive> {
    tracker: Tracker<P, K>,
    poll_interval: Duration,
}

impl<P: PositionSource, K: KeepAlive> DeliveryBridge<P, K> {
    pub fn new(tracker: Tracker<P, K>, config: &BridgeConfig) -> Self {
        Self {
            tracker,
            poll_interval: config.poll_interval().max(MIN_POLL_INTERVAL),
        }
    }

    pub fn tracker(&self) -> &Tracker<P, K> {
        &self.tracker
    }

    pub async fn on_command(&mut self, command: Command) -> TrackingResult<Reply> {
        debug!(method = command.method(), "Bridge command");

        match command {
            Command::StartTracking { identity } => {
                self.tracker.start(&identity).await?;
                Ok(Reply::Ack(MSG_STARTED))
            }
            Command::StopTracking => {
                self.tracker.stop().await;
                Ok(Reply::Ack(MSG_STOPPED))
            }
            Command::IsTracking => Ok(Reply::Tracking(self.tracker.is_tracking())),
            Command::GetLastLocation => {
                let location = self
                    .tracker
                    .store()
                    .run_blocking(LocalStore::take_if_dirty)
                    .await?;
                Ok(Reply::LastLocation(location.map(LastLocation::from)))
            }
            Command::UpdateIdentity { identity } => {
                self.tracker.update_identity(&identity).await?;
                Ok(Reply::Ack(MSG_IDENTITY_UPDATED))
            }
        }
    }

    /// Decode, run and encode a method-channel call
    pub async fn handle_method_call(&mut self, method: &str, args: &Value) -> Result<Value, BridgeError> {
        let command = Command::from_method_call(method, args)?;
        let reply = self.on_command(command).await?;
        Ok(reply.to_json())
    }

    /// Stream drained samples as they are stored.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn subscribe(&self) -> Subscription {
        let (events, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(dispatch(
            Arc::clone(self.tracker.store()),
            self.poll_interval,
            events,
        ));
        info!(poll_interval_secs = self.poll_interval.as_secs(), "Location subscriber attached");

        Subscription { receiver, task }
    }
}

async fn dispatch(
    store: Arc<LocalStore>,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<LocationEvent>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = store.wait_for_put() => {}
            _ = ticker.tick() => {}
            () = events.closed() => break,
        }

        match store.run_blocking(LocalStore::take_if_dirty).await {
            Ok(Some(location)) => {
                metrics().increment(names::BRIDGE_EVENTS);
                if events.send(LocationEvent::from(location)).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to drain location store"),
        }
    }
    debug!("Location subscriber detached");
}

/// Live event stream; dropping it stops the dispatcher
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<LocationEvent>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<LocationEvent> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<LocationEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keep_alive::NoopKeepAlive;
    use crate::sample::Sample;
    use crate::source::ChannelSource;
    use crate::sync::UpstreamSync;
    use crate::sync::testing::RecordingStore;
    use tempfile::TempDir;
    use tracking_core::config::{RemoteConfig, TrackingConfig};

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        dir: TempDir,
        source: Arc<ChannelSource>,
        bridge: DeliveryBridge<ChannelSource, NoopKeepAlive>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::open(dir.path().join("location_prefs.json")).unwrap());
        let (sync, _) = UpstreamSync::new(Arc::new(RecordingStore::default()), RemoteConfig::default()).spawn();
        let source = Arc::new(ChannelSource::new());
        let tracker = Tracker::new(
            Arc::clone(&source),
            Arc::new(NoopKeepAlive),
            store,
            sync,
            &TrackingConfig::default(),
        );

        Harness {
            dir,
            source,
            bridge: DeliveryBridge::new(tracker, &BridgeConfig::default()),
        }
    }

    async fn feed(h: &Harness, sample: Sample) {
        let mut session = h.bridge.tracker().watch_session().unwrap();
        assert!(h.source.push(sample).unwrap());
        tokio::time::timeout(WAIT, session.wait_for(|s| s.last_sample == Some(sample)))
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_method_call_decoding() {
        assert_eq!(
            Command::from_method_call("startTracking", &json!({"username": "alice"})).unwrap(),
            Command::StartTracking { identity: "alice".into() }
        );
        assert_eq!(
            Command::from_method_call("updateIdentity", &json!({"identity": "bob"})).unwrap(),
            Command::UpdateIdentity { identity: "bob".into() }
        );
        assert_eq!(
            Command::from_method_call("isTracking", &Value::Null).unwrap(),
            Command::IsTracking
        );
        assert!(matches!(
            Command::from_method_call("startTracking", &json!({})),
            Err(BridgeError::MissingArgument { method: "startTracking", .. })
        ));
        assert!(matches!(
            Command::from_method_call("reboot", &Value::Null),
            Err(BridgeError::NotImplemented(m)) if m == "reboot"
        ));
    }

    #[test]
    fn test_reply_encoding() {
        assert_eq!(Reply::Ack(MSG_STARTED).to_json(), json!("Service started"));
        assert_eq!(Reply::Tracking(false).to_json(), json!(false));
        assert_eq!(Reply::LastLocation(None).to_json(), Value::Null);

        let location = LastLocation {
            lat: 12.0,
            lng: 77.0,
            identity: "alice".into(),
            updated: true,
        };
        assert_eq!(
            Reply::LastLocation(Some(location)).to_json(),
            json!({"lat": 12.0, "lng": 77.0, "identity": "alice", "updated": true})
        );
    }

    #[tokio::test]
    async fn test_get_last_location_drains_once() {
        let mut h = harness();

        let reply = h
            .bridge
            .handle_method_call("startTracking", &json!({"username": "alice"}))
            .await
            .unwrap();
        assert_eq!(reply, json!("Service started"));

        feed(&h, Sample::now(12.0, 77.0, 5.0)).await;

        let first = h.bridge.handle_method_call("getLastLocation", &Value::Null).await.unwrap();
        assert_eq!(
            first,
            json!({"lat": 12.0, "lng": 77.0, "identity": "alice", "updated": true})
        );

        let second = h.bridge.handle_method_call("getLastLocation", &Value::Null).await.unwrap();
        assert_eq!(second, Value::Null);
    }

    #[tokio::test]
    async fn test_lifecycle_commands() {
        let mut h = harness();

        assert_eq!(h.bridge.on_command(Command::IsTracking).await.unwrap(), Reply::Tracking(false));
        assert_eq!(
            h.bridge.on_command(Command::StopTracking).await.unwrap(),
            Reply::Ack(MSG_STOPPED)
        );

        h.bridge
            .on_command(Command::StartTracking { identity: "alice".into() })
            .await
            .unwrap();
        assert_eq!(h.bridge.on_command(Command::IsTracking).await.unwrap(), Reply::Tracking(true));

        assert_eq!(
            h.bridge
                .on_command(Command::UpdateIdentity { identity: "bob".into() })
                .await
                .unwrap(),
            Reply::Ack(MSG_IDENTITY_UPDATED)
        );
        assert_eq!(h.bridge.tracker().session().unwrap().identity, "bob");

        h.bridge.on_command(Command::StopTracking).await.unwrap();
        assert_eq!(h.bridge.on_command(Command::IsTracking).await.unwrap(), Reply::Tracking(false));
        assert_eq!(
            h.bridge.on_command(Command::GetLastLocation).await.unwrap(),
            Reply::LastLocation(None)
        );
    }

    #[tokio::test]
    async fn test_start_error_surfaces() {
        let mut h = harness();
        h.source.set_permitted(false);

        let err = h
            .bridge
            .handle_method_call("startTracking", &json!({"username": "alice"}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Tracking(TrackingError::PermissionDenied(_))));

        let err = h
            .bridge
            .handle_method_call("startTracking", &json!({"username": ""}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Tracking(TrackingError::InvalidIdentity)));
    }

    #[tokio::test]
    async fn test_subscription_receives_each_sample_once() {
        let mut h = harness();
        h.bridge
            .on_command(Command::StartTracking { identity: "alice".into() })
            .await
            .unwrap();
        let mut subscription = h.bridge.subscribe();

        feed(&h, Sample::now(12.0, 77.0, 5.0)).await;
        let event = tokio::time::timeout(WAIT, subscription.next()).await.unwrap().unwrap();
        assert_eq!(
            event,
            LocationEvent { lat: 12.0, lng: 77.0, identity: "alice".into() }
        );

        feed(&h, Sample::now(13.0, 78.0, 5.0)).await;
        let event = tokio::time::timeout(WAIT, subscription.next()).await.unwrap().unwrap();
        assert_eq!(event.lat, 13.0);

        // already drained by the subscriber
        assert_eq!(
            h.bridge.on_command(Command::GetLastLocation).await.unwrap(),
            Reply::LastLocation(None)
        );
        assert!(subscription.try_next().is_none());

        subscription.unsubscribe();
    }

    #[tokio::test]
    async fn test_subscription_delivers_sample_from_earlier_process() {
        let h = harness();
        let path = h.dir.path().join("location_prefs.json");
        {
            let previous = LocalStore::open(&path).unwrap();
            previous.put("alice", Sample::now(12.0, 77.0, 5.0)).unwrap();
        }

        // reopen as a fresh process would
        let dir = h.dir;
        let store = Arc::new(LocalStore::open(&path).unwrap());
        let (sync, _) = UpstreamSync::new(Arc::new(RecordingStore::default()), RemoteConfig::default()).spawn();
        let tracker = Tracker::new(
            Arc::new(ChannelSource::new()),
            Arc::new(NoopKeepAlive),
            store,
            sync,
            &TrackingConfig::default(),
        );
        let bridge = DeliveryBridge::new(tracker, &BridgeConfig::default());

        let mut subscription = bridge.subscribe();
        let event = tokio::time::timeout(WAIT, subscription.next()).await.unwrap().unwrap();
        assert_eq!(event.identity, "alice");
        drop(dir);
    }

    #[test]
    fn test_error_reports() {
        let report = BridgeError::NotImplemented("reboot".into()).into_report();
        assert_eq!(report.code, ErrorCode::InvalidInput);
        assert_eq!(report.message, "Method not implemented: reboot");

        let report = BridgeError::from(TrackingError::InvalidIdentity).into_report();
        assert_eq!(report.code, ErrorCode::InvalidIdentity);
        assert!(report.suggestion.is_some());

        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["message"], "Identity must be a non-empty string");
    }

    #[tokio::test]
    async fn test_zero_poll_interval_is_clamped() {
        let h = harness();
        let tracker = h.bridge.tracker;
        let config = BridgeConfig { poll_interval_secs: 0 };
        let mut bridge = DeliveryBridge::new(tracker, &config);
        assert_eq!(bridge.poll_interval, MIN_POLL_INTERVAL);

        bridge
            .on_command(Command::StartTracking { identity: "alice".into() })
            .await
            .unwrap();
        let mut subscription = bridge.subscribe();

        assert!(h.source.push(Sample::now(12.0, 77.0, 5.0)).unwrap());
        let event = tokio::time::timeout(WAIT, subscription.next()).await.unwrap().unwrap();
        assert_eq!(event.identity, "alice");
        drop(h.dir);
    }

    #[tokio::test]
    async fn test_dropping_subscription_stops_dispatcher() {
        let h = harness();
        let subscription = h.bridge.subscribe();
        let task = subscription.task.abort_handle();

        drop(subscription);
        tokio::time::timeout(WAIT, async {
            while !task.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
