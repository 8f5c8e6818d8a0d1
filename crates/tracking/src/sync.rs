//! Upstream sync of samples to the remote document store
//!
//! Each accepted sample produces two independent writes:
//!
//! - the latest record `drivers/{identity}`, updated in place and created
//!   through a merge when it does not exist yet
//! - an append-only history entry `drivers/{identity}/locations/{millis}`
//!
//! Jobs are handled one at a time by a background worker in the order they
//! were enqueued, so the latest record ends on the most recent sample. The
//! two writes of one job run concurrently and fail independently. Failures
//! are logged, counted and broadcast as [`SyncReport`]s; they never reach the
//! sampling loop.

use crate::error::{TrackingError, TrackingResult};
use crate::sample::Sample;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tracking_core::config::RemoteConfig;
use tracking_firestore::{
    DocumentPath, DocumentWrite, Fields, FirestoreClient, FirestoreResult, WriteMode,
};
use tracking_telemetry::{Timer, metrics, names};

/// Field stamped with the server's commit time on every write
pub const LAST_UPDATE_FIELD: &str = "lastUpdate";

/// Capacity of the report channel; slow observers miss old reports
const REPORT_CAPACITY: usize = 64;

/// Field set shared by the latest record and history entries
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFields {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f32,
    pub status: String,
    pub is_on_duty: bool,
}

impl RemoteFields {
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("latitude".into(), self.latitude.into());
        fields.insert("longitude".into(), self.longitude.into());
        fields.insert("accuracy".into(), self.accuracy.into());
        fields.insert("status".into(), self.status.as_str().into());
        fields.insert("isOnDuty".into(), self.is_on_duty.into());
        fields
    }
}

/// Remote document operations used by the sync
pub trait DocumentStore: Send + Sync + 'static {
    /// Partial update; fails when the document does not exist
    fn update(
        &self,
        path: &DocumentPath,
        fields: &RemoteFields,
    ) -> impl Future<Output = FirestoreResult<()>> + Send;

    /// Partial update that creates the document when absent
    fn merge(
        &self,
        path: &DocumentPath,
        fields: &RemoteFields,
    ) -> impl Future<Output = FirestoreResult<()>> + Send;

    /// Full overwrite
    fn set(
        &self,
        path: &DocumentPath,
        fields: &RemoteFields,
    ) -> impl Future<Output = FirestoreResult<()>> + Send;
}

async fn commit_one(
    client: &FirestoreClient,
    path: &DocumentPath,
    mode: WriteMode,
    fields: &RemoteFields,
) -> FirestoreResult<()> {
    let write = DocumentWrite::new(path.clone(), mode, fields.to_fields())
        .with_server_timestamp(LAST_UPDATE_FIELD);
    client.write(&write).await.map(|_| ())
}

impl DocumentStore for FirestoreClient {
    async fn update(&self, path: &DocumentPath, fields: &RemoteFields) -> FirestoreResult<()> {
        commit_one(self, path, WriteMode::Update, fields).await
    }

    async fn merge(&self, path: &DocumentPath, fields: &RemoteFields) -> FirestoreResult<()> {
        commit_one(self, path, WriteMode::Merge, fields).await
    }

    async fn set(&self, path: &DocumentPath, fields: &RemoteFields) -> FirestoreResult<()> {
        commit_one(self, path, WriteMode::Set, fields).await
    }
}

/// How the latest record was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatestOutcome {
    Updated,
    /// The update failed and the merge fallback succeeded
    Merged,
}

/// Result of one sync job
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub identity: String,
    pub captured_at: DateTime<Utc>,
    pub latest: Result<LatestOutcome, String>,
    pub history: Result<(), String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.latest.is_ok() && self.history.is_ok()
    }
}

/// Writes samples to a [`DocumentStore`]
pub struct UpstreamSync<S> {
    store: Arc<S>,
    remote: RemoteConfig,
}

impl<S: DocumentStore> UpstreamSync<S> {
    pub fn new(store: Arc<S>, remote: RemoteConfig) -> Self {
        Self { store, remote }
    }

    pub fn fields(&self, sample: &Sample) -> RemoteFields {
        RemoteFields {
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: sample.accuracy,
            status: self.remote.status.clone(),
            is_on_duty: self.remote.on_duty,
        }
    }

    fn latest_path(&self, identity: &str) -> TrackingResult<DocumentPath> {
        DocumentPath::new([self.remote.collection.as_str(), identity])
            .map_err(|e| TrackingError::remote("latest", e))
    }

    fn history_path(&self, identity: &str, sample: &Sample) -> TrackingResult<DocumentPath> {
        self.latest_path(identity)?
            .child(
                &self.remote.history_collection,
                &sample.captured_at_millis().to_string(),
            )
            .map_err(|e| TrackingError::remote("history", e))
    }

    /// Write the latest record, falling back to a merge on any update failure
    pub async fn publish_latest(
        &self,
        identity: &str,
        sample: &Sample,
    ) -> TrackingResult<LatestOutcome> {
        let path = self.latest_path(identity)?;
        let fields = self.fields(sample);

        match self.store.update(&path, &fields).await {
            Ok(()) => Ok(LatestOutcome::Updated),
            Err(update_error) => {
                debug!(
                    path = %path,
                    error = %update_error,
                    not_found = update_error.is_not_found(),
                    "Latest update failed, merging"
                );
                metrics().increment(names::SYNC_LATEST_FALLBACK);

                self.store
                    .merge(&path, &fields)
                    .await
                    .map(|()| LatestOutcome::Merged)
                    .map_err(|e| TrackingError::remote("latest", e))
            }
        }
    }

    /// Append a history entry keyed by capture time
    pub async fn append_history(&self, identity: &str, sample: &Sample) -> TrackingResult<()> {
        let path = self.history_path(identity, sample)?;
        self.store
            .set(&path, &self.fields(sample))
            .await
            .map_err(|e| TrackingError::remote("history", e))
    }

    /// Run both writes for one sample
    pub async fn sync(&self, identity: &str, sample: &Sample) -> SyncReport {
        let timer = Timer::start(names::SYNC_DURATION_MS);
        let (latest, history) = tokio::join!(
            self.publish_latest(identity, sample),
            self.append_history(identity, sample)
        );
        let elapsed = timer.stop();

        if let Err(ref e) = latest {
            metrics().increment(names::SYNC_LATEST_FAILED);
            warn!(identity = %identity, error = %e, "Failed to publish latest location");
        }
        if let Err(ref e) = history {
            metrics().increment(names::SYNC_HISTORY_FAILED);
            warn!(identity = %identity, error = %e, "Failed to append location history");
        }

        debug!(
            identity = %identity,
            elapsed_ms = elapsed.as_millis() as u64,
            "Sample synced"
        );

        SyncReport {
            identity: identity.to_string(),
            captured_at: sample.captured_at,
            latest: latest.map_err(|e| e.to_string()),
            history: history.map_err(|e| e.to_string()),
        }
    }

    /// Move onto a background worker
    pub fn spawn(self) -> (SyncHandle, JoinHandle<()>) {
        let (jobs, mut queue) = mpsc::unbounded_channel::<SyncJob>();
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        let handle = SyncHandle {
            jobs,
            reports: reports.clone(),
        };

        let worker = tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                let report = self.sync(&job.identity, &job.sample).await;
                // no observers is fine
                let _ = reports.send(report);
            }
            debug!("Sync worker stopped");
        });

        (handle, worker)
    }
}

#[derive(Debug)]
struct SyncJob {
    identity: String,
    sample: Sample,
}

/// Enqueues sync jobs onto the worker. The worker exits once every handle
/// is dropped and the queue is empty.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    jobs: mpsc::UnboundedSender<SyncJob>,
    reports: broadcast::Sender<SyncReport>,
}

impl SyncHandle {
    /// Queue a sample; false if the worker is gone
    pub fn enqueue(&self, identity: &str, sample: Sample) -> bool {
        self.jobs
            .send(SyncJob {
                identity: identity.to_string(),
                sample,
            })
            .is_ok()
    }

    /// Observe job outcomes from now on
    pub fn reports(&self) -> broadcast::Receiver<SyncReport> {
        self.reports.subscribe()
    }
}
