//! Tracking lifecycle and the per-session sampling task
//!
//! [`Tracker`] owns the IDLE/ACTIVE state machine. While active, a single
//! task consumes the position stream and, for each fix in order, classifies
//! it, persists it to the local store and queues it for upstream sync. The
//! task also owns the [`TrackingSession`]; the tracker talks to it through a
//! control channel and reads it back through a watch.

use crate::error::{TrackingError, TrackingResult, validate_identity};
use crate::keep_alive::{KeepAlive, KeepAliveGuard};
use crate::sample::Sample;
use crate::session::{Motion, TrackingSession};
use crate::source::{LocationRequest, PositionSource, PositionStream};
use crate::store::LocalStore;
use crate::sync::SyncHandle;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracking_core::config::TrackingConfig;
use tracking_geo::haversine_distance_meters;
use tracking_telemetry::{metrics, names};

enum Control {
    Rebind {
        identity: String,
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Per-sample pipeline, owned by the sampling task
struct SamplingLoop {
    session: TrackingSession,
    epsilon: f64,
    store: Arc<LocalStore>,
    sync: SyncHandle,
    published: watch::Sender<TrackingSession>,
}

impl SamplingLoop {
    async fn process(&mut self, sample: Sample) {
        let previous = self.session.last_sample;
        let motion = self.session.observe(sample, self.epsilon);
        let identity = self.session.identity.as_str();

        metrics().increment(names::SAMPLES_ACCEPTED);
        if motion == Motion::Stationary {
            metrics().increment(names::SAMPLES_STATIONARY);
        }
        metrics().gauge(
            names::STATIONARY_STREAK,
            u64::from(self.session.stationary_streak),
        );

        debug!(
            identity = %identity,
            lat = sample.latitude,
            lng = sample.longitude,
            accuracy = sample.accuracy,
            ?motion,
            streak = self.session.stationary_streak,
            moved_m = previous.map(|p| haversine_distance_meters(&p.coordinate(), &sample.coordinate())),
            "Sample accepted"
        );

        let owner = identity.to_string();
        if let Err(e) = self
            .store
            .run_blocking(move |store| store.put(&owner, sample))
            .await
        {
            metrics().increment(names::STORE_WRITE_FAILED);
            warn!(identity = %self.session.identity, error = %e, "Failed to persist sample");
        }

        if !self.sync.enqueue(&self.session.identity, sample) {
            warn!(identity = %self.session.identity, "Sync worker is gone, sample not uploaded");
        }

        self.published.send_replace(self.session.clone());
    }

    fn rebind(&mut self, identity: String) {
        self.session.swap_identity(identity);
        self.published.send_replace(self.session.clone());
    }

    async fn run(mut self, mut stream: PositionStream, mut control: mpsc::UnboundedReceiver<Control>) {
        loop {
            tokio::select! {
                biased;

                command = control.recv() => match command {
                    Some(Control::Rebind { identity, done }) => {
                        self.rebind(identity);
                        let _ = done.send(());
                    }
                    Some(Control::Shutdown) | None => break,
                },

                sample = stream.recv() => match sample {
                    Some(sample) => self.process(sample).await,
                    None => {
                        metrics().increment(names::SAMPLING_STALLED);
                        warn!(identity = %self.session.identity, "Position stream closed");
                        break;
                    }
                },
            }
        }
        debug!(identity = %self.session.identity, "Sampling task finished");
    }
}

/// Handles of an ACTIVE session
struct ActiveSession<K: KeepAlive> {
    identity: String,
    control: mpsc::UnboundedSender<Control>,
    session: watch::Receiver<TrackingSession>,
    worker: JoinHandle<()>,
    keep_alive: KeepAliveGuard<K>,
}

impl<K: KeepAlive> ActiveSession<K> {
    async fn rebind(&mut self, identity: String) {
        let (done, acked) = oneshot::channel();
        let sent = self.control.send(Control::Rebind {
            identity: identity.clone(),
            done,
        });

        if sent.is_err() || acked.await.is_err() {
            warn!(identity = %identity, "Sampling task is gone, identity not applied to it");
        }

        info!(from = %self.identity, to = %identity, "Tracking identity swapped");
        self.identity = identity;
    }
}

/// Start/stop state machine around one sampling task
pub struct Tracker<P: PositionSource, K: KeepAlive> {
    source: Arc<P>,
    keep_alive: Arc<K>,
    store: Arc<LocalStore>,
    sync: SyncHandle,
    request: LocationRequest,
    epsilon: f64,
    active: Option<ActiveSession<K>>,
}

impl<P: PositionSource, K: KeepAlive> Tracker<P, K> {
    pub fn new(
        source: Arc<P>,
        keep_alive: Arc<K>,
        store: Arc<LocalStore>,
        sync: SyncHandle,
        config: &TrackingConfig,
    ) -> Self {
        Self {
            source,
            keep_alive,
            store,
            sync,
            request: LocationRequest::from(config),
            epsilon: config.stationary_epsilon_deg,
            active: None,
        }
    }

    /// Begin tracking under `identity`.
    ///
    /// Already tracking under the same identity is a no-op; a different
    /// identity is swapped in without resubscribing.
    pub async fn start(&mut self, identity: &str) -> TrackingResult<()> {
        validate_identity(identity)?;

        if let Some(active) = self.active.as_mut() {
            if active.identity == identity {
                debug!(identity = %identity, "Already tracking");
            } else {
                active.rebind(identity.to_string()).await;
            }
            return Ok(());
        }

        let keep_alive = KeepAliveGuard::acquire(Arc::clone(&self.keep_alive))
            .map_err(TrackingError::ResourceAcquisitionFailed)?;

        let stream = self
            .source
            .request_updates(&self.request)
            .map_err(|e| TrackingError::PermissionDenied(e.to_string()))?;

        let session = TrackingSession::begin(identity);
        let (published, session_rx) = watch::channel(session.clone());
        let (control, control_rx) = mpsc::unbounded_channel();

        let sampling = SamplingLoop {
            session,
            epsilon: self.epsilon,
            store: Arc::clone(&self.store),
            sync: self.sync.clone(),
            published,
        };
        let worker = tokio::spawn(sampling.run(stream, control_rx));

        self.active = Some(ActiveSession {
            identity: identity.to_string(),
            control,
            session: session_rx,
            worker,
            keep_alive,
        });

        info!(
            identity = %identity,
            interval_secs = self.request.interval.as_secs(),
            "Tracking started"
        );
        Ok(())
    }

    /// Stop tracking. Never fails; stopping while idle does nothing.
    ///
    /// Returns once the sampling task has exited, so no fix is processed
    /// after this. Sync jobs already queued still run.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("Stop requested while idle");
            return;
        };

        self.source.remove_updates();
        let _ = active.control.send(Control::Shutdown);

        if let Err(e) = active.worker.await {
            warn!(error = %e, "Sampling task ended abnormally");
        }

        if let Err(e) = self.store.run_blocking(LocalStore::clear).await {
            warn!(error = %e, "Failed to clear location store");
        }

        drop(active.keep_alive);
        info!(identity = %active.identity, "Tracking stopped");
    }

    /// Swap the identity of an active session; no-op while idle
    pub async fn update_identity(&mut self, identity: &str) -> TrackingResult<()> {
        validate_identity(identity)?;

        match self.active.as_mut() {
            Some(active) if active.identity != identity => {
                active.rebind(identity.to_string()).await;
            }
            Some(_) => {}
            None => debug!(identity = %identity, "Identity update while idle ignored"),
        }
        Ok(())
    }

    pub fn is_tracking(&self) -> bool {
        self.active.is_some()
    }

    /// True while the sampling task of an active session is still running.
    ///
    /// A session whose position stream was closed by the source stays
    /// active (until `stop`) but stops sampling.
    pub fn is_sampling(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.worker.is_finished())
    }

    /// Current session, `None` while idle
    pub fn session(&self) -> Option<TrackingSession> {
        self.active
            .as_ref()
            .map(|active| active.session.borrow().clone())
    }

    /// Watch the session as the sampling task updates it
    pub fn watch_session(&self) -> Option<watch::Receiver<TrackingSession>> {
        self.active.as_ref().map(|active| active.session.clone())
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn sync(&self) -> &SyncHandle {
        &self.sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keep_alive::testing::CountingKeepAlive;
    use crate::source::ChannelSource;
    use crate::sync::UpstreamSync;
    use crate::sync::testing::{Op, RecordingStore};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;
    use tracking_core::config::RemoteConfig;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        _dir: TempDir,
        source: Arc<ChannelSource>,
        keep_alive: Arc<CountingKeepAlive>,
        remote: Arc<RecordingStore>,
        tracker: Tracker<ChannelSource, CountingKeepAlive>,
    }

    fn harness_with(remote: RecordingStore) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::open(dir.path().join("location_prefs.json")).unwrap());
        let remote = Arc::new(remote);
        let (sync, _worker) = UpstreamSync::new(Arc::clone(&remote), RemoteConfig::default()).spawn();
        let source = Arc::new(ChannelSource::new());
        let keep_alive = Arc::new(CountingKeepAlive::default());

        let tracker = Tracker::new(
            Arc::clone(&source),
            Arc::clone(&keep_alive),
            store,
            sync,
            &TrackingConfig::default(),
        );

        Harness {
            _dir: dir,
            source,
            keep_alive,
            remote,
            tracker,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingStore::default())
    }

    async fn feed(h: &Harness, sample: Sample) {
        let mut session = h.tracker.watch_session().unwrap();
        assert!(h.source.push(sample).unwrap());
        tokio::time::timeout(WAIT, session.wait_for(|s| s.last_sample == Some(sample)))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut h = harness();

        h.tracker.start("alice").await.unwrap();
        assert!(h.tracker.is_tracking());
        assert!(h.source.is_subscribed());
        assert_eq!(h.keep_alive.held(), 1);

        let session = h.tracker.session().unwrap();
        assert_eq!(session.identity, "alice");
        assert!(session.active);
        assert!(session.last_sample.is_none());

        h.tracker.stop().await;
        assert!(!h.tracker.is_tracking());
        assert!(!h.source.is_subscribed());
        assert!(h.tracker.session().is_none());
        assert_eq!(h.keep_alive.held(), 0);
    }

    #[tokio::test]
    async fn test_invalid_identity() {
        let mut h = harness();

        assert!(matches!(h.tracker.start("").await, Err(TrackingError::InvalidIdentity)));
        assert!(matches!(h.tracker.start("   ").await, Err(TrackingError::InvalidIdentity)));
        assert!(!h.tracker.is_tracking());
        assert_eq!(h.keep_alive.held(), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_releases_keep_alive() {
        let mut h = harness();
        h.source.set_permitted(false);

        let err = h.tracker.start("alice").await.unwrap_err();
        assert!(matches!(err, TrackingError::PermissionDenied(_)));
        assert!(!h.tracker.is_tracking());
        assert_eq!(h.keep_alive.held(), 0);
    }

    #[tokio::test]
    async fn test_keep_alive_refused() {
        let mut h = harness();
        h.keep_alive.refuse.store(true, Ordering::SeqCst);

        let err = h.tracker.start("alice").await.unwrap_err();
        assert!(matches!(err, TrackingError::ResourceAcquisitionFailed(_)));
        assert!(!h.tracker.is_tracking());
        assert!(!h.source.is_subscribed());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut h = harness();

        h.tracker.start("alice").await.unwrap();
        let first = h.source.active_request();
        h.tracker.start("alice").await.unwrap();

        assert_eq!(h.keep_alive.held(), 1);
        assert_eq!(h.source.active_request(), first);
        assert_eq!(h.tracker.session().unwrap().identity, "alice");
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let mut h = harness();
        h.tracker.stop().await;
        h.tracker.stop().await;
        assert!(!h.tracker.is_tracking());
    }

    #[tokio::test]
    async fn test_sample_is_persisted_and_synced() {
        let mut h = harness();
        let mut reports = h.tracker.sync().reports();
        h.tracker.start("alice").await.unwrap();

        let sample = Sample::now(12.0, 77.0, 5.0);
        feed(&h, sample).await;

        let stored = h.tracker.store().peek();
        assert!(stored.dirty);
        assert_eq!(stored.location.unwrap().sample, sample);

        let report = tokio::time::timeout(WAIT, reports.recv()).await.unwrap().unwrap();
        assert_eq!(report.identity, "alice");
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_stationary_samples_are_still_delivered() {
        let mut h = harness();
        let mut reports = h.tracker.sync().reports();
        h.tracker.start("alice").await.unwrap();

        let first = Sample::now(12.0, 77.0, 5.0);
        let second = Sample::now(12.000_001, 77.000_001, 5.0);
        feed(&h, first).await;
        feed(&h, second).await;

        assert_eq!(h.tracker.session().unwrap().stationary_streak, 2);
        assert_eq!(h.tracker.store().peek().location.unwrap().sample, second);

        for _ in 0..2 {
            tokio::time::timeout(WAIT, reports.recv()).await.unwrap().unwrap();
        }
        let updates = h
            .remote
            .calls()
            .iter()
            .filter(|(op, path, _)| *op == Op::Update && path == "drivers/alice")
            .count();
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn test_remote_failure_does_not_stop_loop() {
        let mut h = harness_with(RecordingStore::failing(&[Op::Update, Op::Merge, Op::Set]));
        h.tracker.start("alice").await.unwrap();

        feed(&h, Sample::now(12.0, 77.0, 5.0)).await;
        feed(&h, Sample::now(13.0, 78.0, 5.0)).await;

        assert!(h.tracker.is_tracking());
        assert_eq!(h.tracker.store().peek().location.unwrap().sample.latitude, 13.0);
    }

    #[tokio::test]
    async fn test_identity_swap_keeps_last_sample() {
        let mut h = harness();
        h.tracker.start("alice").await.unwrap();

        let sample = Sample::now(12.0, 77.0, 5.0);
        feed(&h, sample).await;

        h.tracker.start("bob").await.unwrap();
        let session = h.tracker.session().unwrap();
        assert_eq!(session.identity, "bob");
        assert_eq!(session.last_sample, Some(sample));
        assert_eq!(h.keep_alive.held(), 1);

        let next = Sample::now(12.5, 77.5, 5.0);
        feed(&h, next).await;
        assert_eq!(h.tracker.store().peek().location.unwrap().identity, "bob");
    }

    #[tokio::test]
    async fn test_update_identity() {
        let mut h = harness();

        // idle: accepted and ignored
        h.tracker.update_identity("bob").await.unwrap();
        assert!(!h.tracker.is_tracking());

        h.tracker.start("alice").await.unwrap();
        h.tracker.update_identity("bob").await.unwrap();
        assert_eq!(h.tracker.session().unwrap().identity, "bob");

        assert!(matches!(
            h.tracker.update_identity("").await,
            Err(TrackingError::InvalidIdentity)
        ));
        assert_eq!(h.tracker.session().unwrap().identity, "bob");
    }

    #[tokio::test]
    async fn test_stop_clears_store_and_ignores_late_fixes() {
        let mut h = harness();
        h.tracker.start("alice").await.unwrap();
        feed(&h, Sample::now(12.0, 77.0, 5.0)).await;

        h.tracker.stop().await;
        assert_eq!(h.tracker.store().peek().location, None);

        assert!(!h.source.push(Sample::now(13.0, 78.0, 5.0)).unwrap());
        assert_eq!(h.tracker.store().peek().location, None);
    }

    #[tokio::test]
    async fn test_closed_stream_is_visible_as_stalled() {
        let mut h = harness();
        h.tracker.start("alice").await.unwrap();
        assert!(h.tracker.is_sampling());

        let stalled_before = metrics().counter(names::SAMPLING_STALLED);
        // the source drops its sender, ending the stream
        h.source.remove_updates();

        tokio::time::timeout(WAIT, async {
            while h.tracker.is_sampling() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(h.tracker.is_tracking());
        assert!(metrics().counter(names::SAMPLING_STALLED) > stalled_before);

        h.tracker.stop().await;
        assert!(!h.tracker.is_sampling());
        assert_eq!(h.keep_alive.held(), 0);
    }

    #[tokio::test]
    async fn test_restart_begins_fresh_session() {
        let mut h = harness();
        h.tracker.start("alice").await.unwrap();
        feed(&h, Sample::now(12.0, 77.0, 5.0)).await;
        h.tracker.stop().await;

        h.tracker.start("alice").await.unwrap();
        let session = h.tracker.session().unwrap();
        assert!(session.last_sample.is_none());
        assert_eq!(session.stationary_streak, 0);
        assert_eq!(h.keep_alive.held(), 1);
    }
}
