//! Append-only JSON Lines log of source changes.
//!
//! Each line is one [`ChangeEvent`]. Incremental syncs read the events a policy has not yet
//! processed, apply them, and mark them processed for that policy only, so several policies
//! can consume the same log.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use objstore_storage::Metadata;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::PolicyResult;
use crate::persist::persistence_error;

/// Size at which the log is rotated when no limit is configured.
pub const DEFAULT_MAX_LOG_BYTES: u64 = 64 * 1024 * 1024;

/// Kind of change recorded for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    /// The object was written.
    Put,
    /// The object was removed.
    Delete,
}

impl ChangeOperation {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Put => "put",
            ChangeOperation::Delete => "delete",
        }
    }
}

/// One recorded change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Object key on the source backend.
    pub key: String,
    /// What happened to it.
    pub operation: ChangeOperation,
    /// When the change was recorded.
    pub timestamp: DateTime<Utc>,
    /// ETag after a put.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Size after a put.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Ids of the policies that have applied this change.
    #[serde(default)]
    pub processed: BTreeSet<String>,
}

impl ChangeEvent {
    /// A put of `key`, stamped now.
    pub fn put(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operation: ChangeOperation::Put,
            timestamp: Utc::now(),
            etag: None,
            size: None,
            processed: BTreeSet::new(),
        }
    }

    /// A delete of `key`, stamped now.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            operation: ChangeOperation::Delete,
            ..Self::put(key)
        }
    }

    /// Copies size and etag from the object's metadata.
    pub fn with_metadata(mut self, metadata: &Metadata) -> Self {
        self.size = Some(metadata.size);
        self.etag = Some(metadata.etag.clone()).filter(|e| !e.is_empty());
        self
    }

    /// Whether `policy_id` has applied this change.
    pub fn is_processed_by(&self, policy_id: &str) -> bool {
        self.processed.contains(policy_id)
    }

    fn same_change(&self, other: &ChangeEvent) -> bool {
        self.key == other.key
            && self.operation == other.operation
            && self.timestamp == other.timestamp
    }
}

/// Splits pending events into the newest event per key, in log order, and the older events
/// it supersedes.
pub fn coalesce(pending: Vec<ChangeEvent>) -> (Vec<ChangeEvent>, Vec<ChangeEvent>) {
    let last: HashMap<String, usize> = pending
        .iter()
        .enumerate()
        .map(|(i, e)| (e.key.clone(), i))
        .collect();
    let mut latest = Vec::new();
    let mut superseded = Vec::new();
    for (i, event) in pending.into_iter().enumerate() {
        if last.get(&event.key) == Some(&i) {
            latest.push(event);
        } else {
            superseded.push(event);
        }
    }
    (latest, superseded)
}

/// JSON Lines change log with size-based rotation.
#[derive(Debug)]
pub struct ChangeLog {
    path: PathBuf,
    max_bytes: u64,
    lock: Mutex<()>,
}

impl ChangeLog {
    /// Log at `path`, rotated once it reaches `max_bytes`.
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes: max_bytes.max(1),
            lock: Mutex::new(()),
        }
    }

    /// Location of the active log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `event` and syncs it to disk. Rotates when the file reaches the size limit.
    pub async fn record(&self, event: ChangeEvent) -> PolicyResult<()> {
        let _guard = self.lock.lock().await;
        let mut line =
            serde_json::to_vec(&event).map_err(|e| persistence_error(&self.path, "encode", e))?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence_error(parent, "create", e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| persistence_error(&self.path, "open", e))?;
        file.write_all(&line)
            .await
            .map_err(|e| persistence_error(&self.path, "append to", e))?;
        file.sync_data()
            .await
            .map_err(|e| persistence_error(&self.path, "sync", e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| persistence_error(&self.path, "stat", e))?
            .len();
        drop(file);

        debug!(key = %event.key, operation = event.operation.as_str(), "change recorded");
        if len >= self.max_bytes {
            self.rotate_locked().await?;
        }
        Ok(())
    }

    async fn read_locked(&self) -> PolicyResult<Vec<ChangeEvent>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence_error(&self.path, "read", e)),
        };
        let mut events = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChangeEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(path = %self.path.display(), line = lineno + 1, error = %e, "skipping unreadable change event")
                }
            }
        }
        Ok(events)
    }

    /// Every event `policy_id` has not processed yet, in log order.
    pub async fn unprocessed(&self, policy_id: &str) -> PolicyResult<Vec<ChangeEvent>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_locked()
            .await?
            .into_iter()
            .filter(|e| !e.is_processed_by(policy_id))
            .collect())
    }

    /// Marks `done` processed for `policy_id` and rewrites the log atomically. Events recorded
    /// after `done` was read stay pending. Unreadable lines are dropped.
    pub async fn mark_processed(&self, policy_id: &str, done: &[ChangeEvent]) -> PolicyResult<()> {
        if done.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut events = self.read_locked().await?;
        let mut marked = 0usize;
        for event in events.iter_mut() {
            if !done.iter().any(|d| d.same_change(event)) {
                continue;
            }
            if event.processed.insert(policy_id.to_string()) {
                marked += 1;
            }
        }

        let mut out = Vec::new();
        for event in &events {
            serde_json::to_writer(&mut out, event)
                .map_err(|e| persistence_error(&self.path, "encode", e))?;
            out.push(b'\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, &out)
            .await
            .map_err(|e| persistence_error(&tmp, "write", e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| persistence_error(&self.path, "replace", e))?;
        debug!(policy_id = %policy_id, marked, "change events marked processed");
        Ok(())
    }

    /// Moves the active log aside as `<name>.<unix millis>` and starts an empty one. Returns the
    /// archived path, or `None` when there was nothing to rotate.
    pub async fn rotate(&self) -> PolicyResult<Option<PathBuf>> {
        let _guard = self.lock.lock().await;
        self.rotate_locked().await
    }

    async fn rotate_locked(&self) -> PolicyResult<Option<PathBuf>> {
        let mut archived = self.path.clone().into_os_string();
        archived.push(format!(".{}", Utc::now().timestamp_millis()));
        let archived = PathBuf::from(archived);

        match tokio::fs::rename(&self.path, &archived).await {
            Ok(()) => {
                info!(path = %self.path.display(), archived = %archived.display(), "change log rotated");
                Ok(Some(archived))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persistence_error(&self.path, "rotate", e)),
        }
    }
}
