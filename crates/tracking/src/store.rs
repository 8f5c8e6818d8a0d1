//! Local durable state
//!
//! A single JSON file holding the most recent sample, the identity it was
//! taken under, and a `location_updated` flag marking it as not yet handed
//! to the UI. Every mutation is flushed (temp file, fsync, rename) before it
//! returns, so a sample reported as stored survives a process kill.
//!
//! Readers drain with [`LocalStore::take_if_dirty`], which checks and clears
//! the flag under one lock so a sample is delivered at most once.

use crate::sample::Sample;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};
use tracking_core::ErrorCode;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Local store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Shared error code
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied => {
                ErrorCode::PermissionDenied
            }
            Self::Io { .. } => ErrorCode::IoError,
            Self::Encode(_) => ErrorCode::StorageCorrupt,
            Self::Task(_) => ErrorCode::Internal,
        }
    }
}

/// A persisted sample and the identity it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLocation {
    pub identity: String,
    pub sample: Sample,
}

/// In-memory view of the durable state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedSnapshot {
    pub location: Option<StoredLocation>,
    /// Set by every put, cleared by the drain; never set without a location
    pub dirty: bool,
}

/// On-disk layout. Coordinates travel as decimal text.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PrefsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_location_lat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_location_lng: Option<String>,
    #[serde(default)]
    location_updated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_location_accuracy: Option<f32>,
    /// Capture time, epoch millis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_location_time: Option<i64>,
}

impl From<&PersistedSnapshot> for PrefsFile {
    fn from(snapshot: &PersistedSnapshot) -> Self {
        match snapshot.location {
            Some(ref location) => Self {
                last_username: Some(location.identity.clone()),
                last_location_lat: Some(location.sample.latitude.to_string()),
                last_location_lng: Some(location.sample.longitude.to_string()),
                location_updated: snapshot.dirty,
                last_location_accuracy: Some(location.sample.accuracy),
                last_location_time: Some(location.sample.captured_at_millis()),
            },
            None => Self::default(),
        }
    }
}

impl From<PrefsFile> for PersistedSnapshot {
    fn from(file: PrefsFile) -> Self {
        let coordinates = file
            .last_location_lat
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .zip(file.last_location_lng.as_deref().and_then(|s| s.parse::<f64>().ok()));

        let location = match (file.last_username, coordinates) {
            (Some(identity), Some((latitude, longitude))) => Some(StoredLocation {
                identity,
                sample: Sample::new(
                    latitude,
                    longitude,
                    file.last_location_accuracy.unwrap_or_default(),
                    Sample::time_from_millis(file.last_location_time.unwrap_or_default()),
                ),
            }),
            _ => None,
        };

        Self {
            dirty: file.location_updated && location.is_some(),
            location,
        }
    }
}

/// File-backed store for the latest sample
#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    state: Mutex<PersistedSnapshot>,
    changed: Notify,
}

impl LocalStore {
    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// An unreadable or corrupt file is logged and replaced by an empty state.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let state = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<PrefsFile>(&bytes) {
                Ok(file) => PersistedSnapshot::from(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding corrupt location store");
                    PersistedSnapshot::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedSnapshot::default(),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        debug!(path = %path.display(), dirty = state.dirty, "Opened location store");

        Ok(Self {
            path,
            state: Mutex::new(state),
            changed: Notify::new(),
        })
    }

    /// File backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `sample` as the latest for `identity` and mark it undelivered
    pub fn put(&self, identity: &str, sample: Sample) -> StoreResult<()> {
        {
            let mut state = self.lock();
            let next = PersistedSnapshot {
                location: Some(StoredLocation {
                    identity: identity.to_string(),
                    sample,
                }),
                dirty: true,
            };
            self.persist(&next)?;
            *state = next;
        }
        self.changed.notify_one();
        Ok(())
    }

    /// Return the latest sample and clear the flag, or `None` when nothing
    /// new has been stored since the last drain
    pub fn take_if_dirty(&self) -> StoreResult<Option<StoredLocation>> {
        let mut state = self.lock();
        if !state.dirty {
            return Ok(None);
        }

        let next = PersistedSnapshot {
            location: state.location.clone(),
            dirty: false,
        };
        self.persist(&next)?;
        *state = next;

        Ok(state.location.clone())
    }

    /// Erase everything
    pub fn clear(&self) -> StoreResult<()> {
        let mut state = self.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&self.path, e)),
        }
        *state = PersistedSnapshot::default();
        Ok(())
    }

    /// Current state without touching the flag
    pub fn peek(&self) -> PersistedSnapshot {
        self.lock().clone()
    }

    /// Run a store operation on the blocking pool.
    ///
    /// Every mutation fsyncs, so async callers go through here rather than
    /// calling `put`/`take_if_dirty`/`clear` on a runtime worker.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, op: F) -> StoreResult<T>
    where
        F: FnOnce(&LocalStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&store)).await?
    }

    /// Resolve after the next put (or immediately if one happened unobserved)
    pub async fn wait_for_put(&self) {
        self.changed.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, PersistedSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, snapshot: &PersistedSnapshot) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(&PrefsFile::from(snapshot))?;
        let tmp = self.path.with_extension("json.tmp");

        let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))
    }
}
