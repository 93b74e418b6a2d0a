//! Local-disk storage backend.
//!
//! Objects live as plain files under the root directory. Metadata is kept in a JSON sidecar tree
//! under `.objstore-meta/`; files written by other tools fall back to filesystem attributes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::types::{etag_for, paginate, ListOptions, ListResult, Metadata, ObjectInfo};
use crate::validation::validate_key;

/// Directory (relative to the root) holding metadata sidecars and temp files.
pub const META_DIR: &str = ".objstore-meta";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Filesystem-backed object store.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(META_DIR)).await?;
        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_key(key: &str) -> StorageResult<()> {
        validate_key(key)?;
        if key.split('/').next() == Some(META_DIR) {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
                reason: format!("{} is reserved", META_DIR),
            });
        }
        Ok(())
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", key))
    }

    fn tmp_path(&self) -> PathBuf {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(META_DIR)
            .join(format!(".tmp-{}-{}", std::process::id(), seq))
    }

    async fn write_atomic(&self, dest: &Path, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, data).await?;
        let mut renamed = tokio::fs::rename(&tmp, dest).await;
        if let (Err(e), Some(parent)) = (&renamed, dest.parent()) {
            // A concurrent delete may have pruned the parent directory.
            if e.kind() == std::io::ErrorKind::NotFound {
                tokio::fs::create_dir_all(parent).await?;
                renamed = tokio::fs::rename(&tmp, dest).await;
            }
        }
        if let Err(e) = renamed {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Removes directories left empty under `stop`, walking up from `path`'s parent.
    async fn prune_empty_parents(&self, path: &Path, stop: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == stop || !current.starts_with(stop) {
                break;
            }
            if tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    async fn read_metadata(&self, key: &str) -> StorageResult<Metadata> {
        match tokio::fs::read(self.meta_path(key)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let attrs = tokio::fs::metadata(self.data_path(key))
                    .await
                    .map_err(|e| not_found_or_io(key, e))?;
                let last_modified = attrs.modified().ok().map(DateTime::<Utc>::from);
                Ok(Metadata {
                    size: attrs.len(),
                    last_modified,
                    ..Metadata::default()
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn collect_keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if dir == self.root && entry.file_name() == META_DIR {
                        continue;
                    }
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Some(key) = self.key_for(&path) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Only regular files are objects; directories are key prefixes.
    async fn is_object(&self, path: &Path) -> StorageResult<bool> {
        match tokio::fs::metadata(path).await {
            Ok(attrs) => Ok(attrs.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }
}

fn not_found_or_io(key: &str, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::not_found(key)
    } else {
        StorageError::IoError(e)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> &str {
        "local"
    }

    async fn put_with_metadata(
        &self,
        key: &str,
        data: Bytes,
        mut metadata: Metadata,
    ) -> StorageResult<()> {
        Self::check_key(key)?;
        metadata.size = data.len() as u64;
        metadata.etag = etag_for(&data);
        if metadata.last_modified.is_none() {
            metadata.last_modified = Some(Utc::now());
        }

        self.write_atomic(&self.data_path(key), &data).await?;
        let encoded = serde_json::to_vec(&metadata)?;
        self.write_atomic(&self.meta_path(key), &encoded).await?;
        debug!(key = %key, size = metadata.size, "local put");
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        Self::check_key(key)?;
        tokio::fs::read(self.data_path(key))
            .await
            .map(Bytes::from)
            .map_err(|e| not_found_or_io(key, e))
    }

    async fn metadata(&self, key: &str) -> StorageResult<Metadata> {
        Self::check_key(key)?;
        self.read_metadata(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        Self::check_key(key)?;
        let data_path = self.data_path(key);
        if !self.is_object(&data_path).await? {
            return Err(StorageError::not_found(key));
        }
        tokio::fs::remove_file(&data_path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;

        let meta_path = self.meta_path(key);
        if let Err(e) = tokio::fs::remove_file(&meta_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "failed to remove metadata sidecar");
            }
        }
        self.prune_empty_parents(&data_path, &self.root).await;
        self.prune_empty_parents(&meta_path, &self.root.join(META_DIR))
            .await;
        debug!(key = %key, "local delete");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Self::check_key(key)?;
        self.is_object(&self.data_path(key)).await
    }

    async fn list_with_options(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        let keys = self.collect_keys().await?;
        let (page, next_token, truncated) = paginate(keys, opts);

        let mut objects = Vec::with_capacity(page.len());
        for key in page {
            let metadata = match self.read_metadata(&key).await {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!(key = %key, error = %e, "unreadable metadata, listing without it");
                    None
                }
            };
            objects.push(ObjectInfo { key, metadata });
        }

        Ok(ListResult {
            objects,
            next_token,
            truncated,
        })
    }
}
