//! Archive destinations used by lifecycle Archive actions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::factory::new_backend;

/// Receives objects migrated out of a backend. Whether the source copy is removed is up to the
/// archiver's owner, not the archiver.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Stores `data` under `key` in the archive.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;
}

/// Archiver that writes into another storage backend.
#[derive(Clone)]
pub struct BackendArchiver {
    target: Arc<dyn StorageBackend>,
}

impl BackendArchiver {
    /// Archives into `target`.
    pub fn new(target: Arc<dyn StorageBackend>) -> Self {
        Self { target }
    }

    /// The backend objects are archived into.
    pub fn target(&self) -> &Arc<dyn StorageBackend> {
        &self.target
    }
}

impl fmt::Debug for BackendArchiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendArchiver")
            .field("target", &self.target.kind())
            .finish()
    }
}

#[async_trait]
impl Archiver for BackendArchiver {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        debug!(key = %key, size = data.len(), target = self.target.kind(), "archiving object");
        self.target.put(key, data).await
    }
}

/// Builds an archiver for a destination type and its settings.
pub async fn new_archiver(
    kind: &str,
    settings: &HashMap<String, String>,
) -> StorageResult<Arc<dyn Archiver>> {
    let target = new_backend(kind, settings).await?;
    Ok(Arc::new(BackendArchiver::new(target)))
}
