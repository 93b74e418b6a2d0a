//! In-memory storage backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::types::{etag_for, paginate, ListOptions, ListResult, Metadata, ObjectInfo};
use crate::validation::validate_key;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: Metadata,
}

/// Ordered in-memory object store. Cheap to build, used for tests and ephemeral caches.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// All keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn put_with_metadata(
        &self,
        key: &str,
        data: Bytes,
        mut metadata: Metadata,
    ) -> StorageResult<()> {
        validate_key(key)?;
        metadata.size = data.len() as u64;
        metadata.etag = etag_for(&data);
        if metadata.last_modified.is_none() {
            metadata.last_modified = Some(Utc::now());
        }
        debug!(key = %key, size = metadata.size, "memory put");
        self.objects
            .write()
            .insert(key.to_string(), StoredObject { data, metadata });
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .read()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn metadata(&self, key: &str) -> StorageResult<Metadata> {
        self.objects
            .read()
            .get(key)
            .map(|o| o.metadata.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        match self.objects.write().remove(key) {
            Some(_) => {
                debug!(key = %key, "memory delete");
                Ok(())
            }
            None => Err(StorageError::not_found(key)),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn list_with_options(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        let objects = self.objects.read();
        let (page, next_token, truncated) = paginate(objects.keys().cloned(), opts);
        let objects = page
            .into_iter()
            .map(|key| {
                let metadata = objects.get(&key).map(|o| o.metadata.clone());
                ObjectInfo { key, metadata }
            })
            .collect();
        Ok(ListResult {
            objects,
            next_token,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryBackend::new();
        store.put("a.txt", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(store.get("a.txt").await.unwrap(), Bytes::from_static(b"hello"));
        assert!(store.exists("a.txt").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_computed_fields() {
        let store = MemoryBackend::new();
        let meta = Metadata::with_content_type("text/plain").with_custom("k", "v");
        store
            .put_with_metadata("a.txt", Bytes::from_static(b"hello"), meta)
            .await
            .unwrap();
        let got = store.metadata("a.txt").await.unwrap();
        assert_eq!(got.size, 5);
        assert_eq!(got.etag, etag_for(b"hello"));
        assert_eq!(got.content_type, "text/plain");
        assert!(got.last_modified.is_some());
        assert_eq!(got.custom.get("k").map(String::as_str), Some("v"));
    }

    #[tokio::test]
    async fn test_supplied_last_modified_kept() {
        let store = MemoryBackend::new();
        let old = Utc::now() - Duration::hours(48);
        store
            .put_with_metadata("old", Bytes::from_static(b"x"), Metadata::default().modified_at(old))
            .await
            .unwrap();
        assert_eq!(store.metadata("old").await.unwrap().last_modified, Some(old));
    }

    #[tokio::test]
    async fn test_missing_key_not_found() {
        let store = MemoryBackend::new();
        assert!(store.get("nope").await.unwrap_err().is_not_found());
        assert!(store.metadata("nope").await.unwrap_err().is_not_found());
        assert!(store.delete("nope").await.unwrap_err().is_not_found());
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let store = MemoryBackend::new();
        let err = store.put("../x", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_list_paginates_with_prefix() {
        let store = MemoryBackend::new();
        for i in 0..25 {
            store
                .put(&format!("logs/{:02}", i), Bytes::from_static(b"."))
                .await
                .unwrap();
        }
        store.put("other/x", Bytes::from_static(b".")).await.unwrap();

        let opts = ListOptions {
            prefix: "logs/".to_string(),
            max_results: 10,
            continue_from: String::new(),
        };
        let page = store.list_with_options(&opts).await.unwrap();
        assert_eq!(page.objects.len(), 10);
        assert!(page.truncated);
        assert_eq!(page.next_token, "logs/09");

        let all = store.list("logs/").await.unwrap();
        assert_eq!(all.len(), 25);
        assert!(all.iter().all(|o| o.metadata.is_some()));
    }
}
