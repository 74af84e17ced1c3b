//! Persistent per-pair sync state.
//!
//! A pair's state is its [`SyncState`] (resume token and last notification
//! time) plus the mapping table from source event ids to mirror ids. Both are
//! read with [`SyncStore::load`] and changed only through
//! [`SyncStore::commit`], which applies a whole batch atomically.
//!
//! On disk ([`JsonFileStore`]) each source calendar gets one JSON document:
//!
//! ```json
//! {
//!   "resume_token": "CPDAlvWDx70CEPDAlvWDx70CGAU=",
//!   "last_notification_time": "2024-03-05T09:12:44Z",
//!   "mappings": {
//!     "abc123": { "target_event_id": "xyz789", "last_applied_status": "confirmed" }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use mirrorsync_core::{EventMapping, EventStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Scalar sync state of one pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Token to resume the change listing from; `None` forces a full resync.
    pub resume_token: Option<String>,
    /// When the last notification passed the gate.
    pub last_notification_time: Option<DateTime<Utc>>,
}

/// A change to the mapping table produced by applying one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingDelta {
    /// A mirror was created or rewritten.
    Upsert(EventMapping),
    /// A mirror was removed.
    Remove { source_event_id: String },
}

impl MappingDelta {
    /// Returns the source event id this delta concerns.
    pub fn source_event_id(&self) -> &str {
        match self {
            Self::Upsert(mapping) => &mapping.source_event_id,
            Self::Remove { source_event_id } => source_event_id,
        }
    }
}

/// State and mapping table of one pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairSnapshot {
    /// Scalar state.
    pub state: SyncState,
    /// Mappings keyed by source event id.
    pub mappings: BTreeMap<String, EventMapping>,
}

impl PairSnapshot {
    /// Returns the mapping for a source event, if a mirror exists.
    pub fn mapping(&self, source_event_id: &str) -> Option<&EventMapping> {
        self.mappings.get(source_event_id)
    }

    /// Applies one mapping delta.
    pub fn apply(&mut self, delta: &MappingDelta) {
        match delta {
            MappingDelta::Upsert(mapping) => {
                self.mappings
                    .insert(mapping.source_event_id.clone(), mapping.clone());
            }
            MappingDelta::Remove { source_event_id } => {
                self.mappings.remove(source_event_id);
            }
        }
    }

    /// Applies a whole commit: scalar state replaced, deltas applied in order.
    pub fn apply_commit(&mut self, commit: &BatchCommit) {
        self.state.resume_token = commit.resume_token.clone();
        self.state.last_notification_time = commit.last_notification_time;
        for delta in &commit.deltas {
            self.apply(delta);
        }
    }
}

/// Everything one batch writes, committed atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchCommit {
    /// Resume token to store (the new one, or the previous one on failure).
    pub resume_token: Option<String>,
    /// Notification timestamp to store.
    pub last_notification_time: Option<DateTime<Utc>>,
    /// Mapping changes of the events that were applied.
    pub deltas: Vec<MappingDelta>,
}

impl BatchCommit {
    /// Creates a commit that stores `state` unchanged, without deltas.
    pub fn new(state: &SyncState) -> Self {
        Self {
            resume_token: state.resume_token.clone(),
            last_notification_time: state.last_notification_time,
            deltas: Vec::new(),
        }
    }

    /// Creates a commit that clears the resume token, forcing a full resync.
    pub fn reset(state: &SyncState) -> Self {
        Self {
            resume_token: None,
            ..Self::new(state)
        }
    }

    /// Builder: set the resume token.
    pub fn with_resume_token(mut self, token: Option<String>) -> Self {
        self.resume_token = token;
        self
    }

    /// Builder: set the mapping deltas.
    pub fn with_deltas(mut self, deltas: Vec<MappingDelta>) -> Self {
        self.deltas = deltas;
        self
    }
}

/// Errors from a [`SyncStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The state file could not be read or written.
    #[error("state I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The state could not be serialized.
    #[error("failed to serialize state: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stored state is unreadable.
    #[error("corrupt state file {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persistence for pair snapshots, keyed by source calendar id.
pub trait SyncStore: Send + Sync {
    /// Loads the snapshot of a source calendar; missing state is empty.
    fn load(&self, source_calendar_id: &str) -> Result<PairSnapshot, StoreError>;

    /// Atomically applies a batch commit to the stored snapshot.
    fn commit(&self, source_calendar_id: &str, commit: &BatchCommit) -> Result<(), StoreError>;
}

/// Row of the persisted mapping table.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMapping {
    target_event_id: String,
    #[serde(default)]
    last_applied_status: EventStatus,
}

/// On-disk document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    resume_token: Option<String>,
    #[serde(default)]
    last_notification_time: Option<DateTime<Utc>>,
    #[serde(default)]
    mappings: BTreeMap<String, StoredMapping>,
}

impl From<StateDocument> for PairSnapshot {
    fn from(doc: StateDocument) -> Self {
        let mappings = doc
            .mappings
            .into_iter()
            .map(|(source_event_id, row)| {
                let mapping = EventMapping::new(
                    source_event_id.clone(),
                    row.target_event_id,
                    row.last_applied_status,
                );
                (source_event_id, mapping)
            })
            .collect();

        Self {
            state: SyncState {
                resume_token: doc.resume_token,
                last_notification_time: doc.last_notification_time,
            },
            mappings,
        }
    }
}

impl From<&PairSnapshot> for StateDocument {
    fn from(snapshot: &PairSnapshot) -> Self {
        let mappings = snapshot
            .mappings
            .iter()
            .map(|(source_event_id, mapping)| {
                let row = StoredMapping {
                    target_event_id: mapping.target_event_id.clone(),
                    last_applied_status: mapping.last_applied_status,
                };
                (source_event_id.clone(), row)
            })
            .collect();

        Self {
            resume_token: snapshot.state.resume_token.clone(),
            last_notification_time: snapshot.state.last_notification_time,
            mappings,
        }
    }
}

/// Stores one JSON document per source calendar in a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Creates a store rooted at `dir`. The directory is created on first commit.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the state directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the state file path for a source calendar.
    pub fn path_for(&self, source_calendar_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", urlencoding::encode(source_calendar_id)))
    }

    fn read(&self, path: &Path) -> Result<PairSnapshot, StoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "no state file, starting empty");
            return Ok(PairSnapshot::default());
        }

        let content = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let doc: StateDocument =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(doc.into())
    }

    fn write(&self, path: &Path, snapshot: &PairSnapshot) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let content = serde_json::to_string_pretty(&StateDocument::from(snapshot))?;

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content).map_err(|e| StoreError::io(&temp_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| StoreError::io(&temp_path, e))?;
        }

        fs::rename(&temp_path, path).map_err(|e| StoreError::io(path, e))?;
        Ok(())
    }
}

impl SyncStore for JsonFileStore {
    fn load(&self, source_calendar_id: &str) -> Result<PairSnapshot, StoreError> {
        self.read(&self.path_for(source_calendar_id))
    }

    fn commit(&self, source_calendar_id: &str, commit: &BatchCommit) -> Result<(), StoreError> {
        let path = self.path_for(source_calendar_id);
        let mut snapshot = self.read(&path)?;
        snapshot.apply_commit(commit);
        self.write(&path, &snapshot)?;

        debug!(
            path = %path.display(),
            deltas = commit.deltas.len(),
            mappings = snapshot.mappings.len(),
            "committed sync state"
        );
        Ok(())
    }
}

/// Keeps snapshots in memory; state is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, PairSnapshot>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the snapshot of a source calendar.
    pub fn with_snapshot(self, source_calendar_id: impl Into<String>, snapshot: PairSnapshot) -> Self {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_calendar_id.into(), snapshot);
        self
    }
}

impl SyncStore for MemoryStore {
    fn load(&self, source_calendar_id: &str) -> Result<PairSnapshot, StoreError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshots
            .get(source_calendar_id)
            .cloned()
            .unwrap_or_default())
    }

    fn commit(&self, source_calendar_id: &str, commit: &BatchCommit) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        snapshots
            .entry(source_calendar_id.to_string())
            .or_default()
            .apply_commit(commit);
        Ok(())
    }
}
