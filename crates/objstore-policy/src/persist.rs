//! JSON file holding replication policies across restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{PolicyError, PolicyResult};
use crate::replication::ReplicationPolicy;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedPolicies {
    #[serde(default)]
    policies: BTreeMap<String, ReplicationPolicy>,
}

/// Replication policy file. Saves are serialized and replace the file atomically.
#[derive(Debug)]
pub struct PolicyFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

pub(crate) fn persistence_error(path: &Path, action: &str, err: impl std::fmt::Display) -> PolicyError {
    PolicyError::Persistence {
        reason: format!("failed to {} {}: {}", action, path.display(), err),
    }
}

impl PolicyFile {
    /// Policy file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every stored policy. A missing file holds no policies.
    pub async fn load(&self) -> PolicyResult<Vec<ReplicationPolicy>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no policy file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(persistence_error(&self.path, "read", e)),
        };
        let persisted: PersistedPolicies =
            serde_json::from_slice(&raw).map_err(|e| persistence_error(&self.path, "parse", e))?;
        info!(path = %self.path.display(), count = persisted.policies.len(), "loaded replication policies");
        Ok(persisted.policies.into_values().collect())
    }

    /// Replaces the file contents with `policies`.
    ///
    /// `snapshot` is called after the write lock is taken so concurrent saves always finish
    /// with the newest state on disk.
    pub async fn save_with<F>(&self, snapshot: F) -> PolicyResult<()>
    where
        F: FnOnce() -> Vec<ReplicationPolicy>,
    {
        let _guard = self.write_lock.lock().await;
        let persisted = PersistedPolicies {
            policies: snapshot()
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&persisted)
            .map_err(|e| persistence_error(&self.path, "encode", e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence_error(parent, "create", e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| persistence_error(&tmp, "write", e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| persistence_error(&self.path, "replace", e))?;
        debug!(path = %self.path.display(), count = persisted.policies.len(), "saved replication policies");
        Ok(())
    }

    /// Writes `policies` to the file.
    pub async fn save(&self, policies: Vec<ReplicationPolicy>) -> PolicyResult<()> {
        self.save_with(move || policies).await
    }
}
