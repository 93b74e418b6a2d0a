//! Test environment: a facade over named backends plus helpers for seeding them.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{Duration, Utc};
use objstore_crypt::{EncryptionKey, KeyringFactory};
use objstore_policy::{LifecycleManager, ReplicationManager};
use objstore_storage::{
    Facade, FacadeConfig, MemoryBackend, Metadata, StorageBackend, StorageResult,
};

/// Metadata for an object last modified `age` ago.
pub fn aged(age: Duration) -> Metadata {
    Metadata::default().modified_at(Utc::now() - age)
}

/// Keyring holding one key, which is also its default.
pub fn keyring(key_id: &str, fill: u8) -> Arc<KeyringFactory> {
    Arc::new(KeyringFactory::new(key_id).with_key(key_id, EncryptionKey([fill; 32])))
}

/// Named backends registered on one facade.
pub struct TestEnv {
    pub facade: Arc<Facade>,
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl TestEnv {
    /// Env with one in-memory backend per name; the first name is the default.
    pub async fn memory(names: &[&str]) -> StorageResult<Self> {
        let backends = names
            .iter()
            .map(|n| (n.to_string(), Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>))
            .collect();
        Self::with_backends(backends, names.first().copied()).await
    }

    pub async fn with_backends(
        backends: HashMap<String, Arc<dyn StorageBackend>>,
        default: Option<&str>,
    ) -> StorageResult<Self> {
        let mut config = FacadeConfig::default();
        for (name, backend) in &backends {
            config = config.with_backend(name.clone(), backend.clone());
        }
        if let Some(name) = default {
            config = config.with_default(name);
        }
        let facade = Arc::new(Facade::with_config(config).await?);
        Ok(Self { facade, backends })
    }

    /// The backend registered as `name`. Panics on unknown names.
    pub fn backend(&self, name: &str) -> Arc<dyn StorageBackend> {
        match self.backends.get(name) {
            Some(backend) => backend.clone(),
            None => panic!("no test backend named {}", name),
        }
    }

    /// Puts `key -> data` pairs into a backend, all modified `age` ago.
    pub async fn seed(&self, name: &str, objects: &[(&str, &[u8])], age: Duration) -> StorageResult<()> {
        let backend = self.backend(name);
        for (key, data) in objects {
            backend
                .put_with_metadata(key, Bytes::copy_from_slice(data), aged(age))
                .await?;
        }
        Ok(())
    }

    pub fn replication(&self) -> ReplicationManager {
        ReplicationManager::new(self.facade.clone())
    }

    pub fn lifecycle(&self, backend: &str) -> LifecycleManager {
        LifecycleManager::new(self.backend(backend))
    }
}
