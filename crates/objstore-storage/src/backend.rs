//! The contract every storage backend implements.
//!
//! Backends own raw object I/O only; lifecycle and replication logic lives in
//! `objstore-policy` and talks to backends exclusively through this trait.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;
use crate::types::{ListOptions, ListResult, Metadata, ObjectInfo};

/// Uniform put/get/list/delete contract for local disk, memory, and cloud stores.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend kind (e.g. "memory", "local").
    fn kind(&self) -> &str;

    /// Store an object with default metadata.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.put_with_metadata(key, data, Metadata::default()).await
    }

    /// Store an object with caller-supplied metadata.
    ///
    /// `size` and `etag` are recomputed from `data`. A supplied `last_modified` is kept,
    /// otherwise the current time is recorded.
    async fn put_with_metadata(&self, key: &str, data: Bytes, metadata: Metadata)
        -> StorageResult<()>;

    /// Read an object's bytes.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Read an object's metadata.
    async fn metadata(&self, key: &str) -> StorageResult<Metadata>;

    /// Remove an object. Missing keys yield `StorageError::NotFound`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Return one page of objects.
    async fn list_with_options(&self, opts: &ListOptions) -> StorageResult<ListResult>;

    /// Return every object under `prefix`, walking all pages.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let mut opts = ListOptions::with_prefix(prefix);
        let mut objects = Vec::new();
        loop {
            let page = self.list_with_options(&opts).await?;
            objects.extend(page.objects);
            if !page.truncated {
                break;
            }
            opts.continue_from = page.next_token;
        }
        Ok(objects)
    }
}
