//! Fault injection for storage backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use objstore_storage::{
    ListOptions, ListResult, Metadata, StorageBackend, StorageError, StorageResult,
};
use parking_lot::Mutex;

/// A fault applied to calls on a [`FlakyBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// `get` of this key fails.
    FailGet(String),
    /// `put` of this key fails.
    FailPut(String),
    /// `delete` of this key fails.
    FailDelete(String),
    /// Every listing fails.
    FailList,
    /// Listings omit object metadata.
    HideListedMetadata,
    /// Every `get` sleeps first.
    GetLatency(Duration),
}

/// Opaque handle to remove a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultHandle(u64);

/// Wraps a backend and fails selected calls.
pub struct FlakyBackend {
    inner: Arc<dyn StorageBackend>,
    faults: Mutex<HashMap<FaultHandle, Fault>>,
    next_handle: AtomicU64,
    gets_in_flight: AtomicUsize,
    max_gets_in_flight: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(0),
            gets_in_flight: AtomicUsize::new(0),
            max_gets_in_flight: AtomicUsize::new(0),
        }
    }

    /// Inject a fault and get a handle to remove it
    pub fn inject(&self, fault: Fault) -> FaultHandle {
        let handle = FaultHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.faults.lock().insert(handle, fault);
        handle
    }

    pub fn clear(&self, handle: FaultHandle) {
        self.faults.lock().remove(&handle);
    }

    pub fn clear_all(&self) {
        self.faults.lock().clear();
    }

    pub fn active_faults(&self) -> usize {
        self.faults.lock().len()
    }

    /// Highest number of concurrent `get` calls seen so far.
    pub fn max_gets_in_flight(&self) -> usize {
        self.max_gets_in_flight.load(Ordering::SeqCst)
    }

    fn has(&self, pred: impl Fn(&Fault) -> bool) -> bool {
        self.faults.lock().values().any(pred)
    }

    fn get_latency(&self) -> Option<Duration> {
        self.faults.lock().values().find_map(|f| match f {
            Fault::GetLatency(d) => Some(*d),
            _ => None,
        })
    }

    fn injected(op: &str, key: &str) -> StorageError {
        StorageError::Backend {
            reason: format!("injected {} failure for {}", op, key),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn kind(&self) -> &str {
        "flaky"
    }

    async fn put_with_metadata(
        &self,
        key: &str,
        data: Bytes,
        metadata: Metadata,
    ) -> StorageResult<()> {
        if self.has(|f| matches!(f, Fault::FailPut(k) if k == key)) {
            return Err(Self::injected("put", key));
        }
        self.inner.put_with_metadata(key, data, metadata).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let now = self.gets_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.gets_in_flight);
        self.max_gets_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.get_latency() {
            tokio::time::sleep(delay).await;
        }
        if self.has(|f| matches!(f, Fault::FailGet(k) if k == key)) {
            return Err(Self::injected("get", key));
        }
        self.inner.get(key).await
    }

    async fn metadata(&self, key: &str) -> StorageResult<Metadata> {
        self.inner.metadata(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.has(|f| matches!(f, Fault::FailDelete(k) if k == key)) {
            return Err(Self::injected("delete", key));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn list_with_options(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        if self.has(|f| matches!(f, Fault::FailList)) {
            return Err(Self::injected("list", &opts.prefix));
        }
        let mut page = self.inner.list_with_options(opts).await?;
        if self.has(|f| matches!(f, Fault::HideListedMetadata)) {
            for object in &mut page.objects {
                object.metadata = None;
            }
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objstore_storage::MemoryBackend;

    #[tokio::test]
    async fn test_inject_and_clear() {
        let flaky = FlakyBackend::new(Arc::new(MemoryBackend::new()));
        flaky.put("a", Bytes::from_static(b"1")).await.unwrap();

        let handle = flaky.inject(Fault::FailGet("a".into()));
        assert_eq!(flaky.active_faults(), 1);
        let err = flaky.get("a").await.unwrap_err();
        assert!(err.to_string().contains("injected get failure for a"));

        flaky.clear(handle);
        assert_eq!(flaky.get("a").await.unwrap(), Bytes::from_static(b"1"));
    }

    #[tokio::test]
    async fn test_hidden_metadata_and_failed_list() {
        let flaky = FlakyBackend::new(Arc::new(MemoryBackend::new()));
        flaky.put("a", Bytes::from_static(b"1")).await.unwrap();

        flaky.inject(Fault::HideListedMetadata);
        let listed = flaky.list("").await.unwrap();
        assert!(listed[0].metadata.is_none());

        flaky.inject(Fault::FailList);
        assert!(flaky.list("").await.is_err());

        flaky.clear_all();
        assert!(flaky.list("").await.unwrap()[0].metadata.is_some());
    }
}
