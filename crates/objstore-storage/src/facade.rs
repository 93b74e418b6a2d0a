//! Backend facade: a named registry of backends plus a default, addressed with
//! `"<backend>:<key>"` references.
//!
//! A `Facade` is an owned handle. It starts empty, is configured once with [`Facade::initialize`],
//! and may be [`reset`](Facade::reset) for reuse. Readers clone an `Arc` snapshot of the registry,
//! so lookups never hold the lock across I/O.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::info;

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::factory::BackendConfig;
use crate::types::{ListOptions, ListResult, Metadata};
use crate::validation::{sanitize_for_log, validate_backend_name, validate_key};

/// Configuration installed by [`Facade::initialize`].
#[derive(Default, Clone)]
pub struct FacadeConfig {
    /// Ready-made backends by name.
    pub backends: HashMap<String, Arc<dyn StorageBackend>>,
    /// Backends to build at initialization, by name.
    pub backend_configs: HashMap<String, BackendConfig>,
    /// Name of the default backend; the first name in sorted order when absent.
    pub default_backend: Option<String>,
}

impl FacadeConfig {
    /// Registers a ready-made backend.
    pub fn with_backend(mut self, name: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.insert(name.into(), backend);
        self
    }

    /// Registers a backend to be built from configuration.
    pub fn with_backend_config(mut self, name: impl Into<String>, config: BackendConfig) -> Self {
        self.backend_configs.insert(name.into(), config);
        self
    }

    /// Names the default backend.
    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default_backend = Some(name.into());
        self
    }
}

impl fmt::Debug for FacadeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.backends.keys().collect();
        names.sort();
        f.debug_struct("FacadeConfig")
            .field("backends", &names)
            .field("backend_configs", &self.backend_configs)
            .field("default_backend", &self.default_backend)
            .finish()
    }
}

struct Registry {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
    default_name: String,
}

/// Routes key references to named backends.
#[derive(Default)]
pub struct Facade {
    inner: RwLock<Option<Arc<Registry>>>,
}

impl fmt::Debug for Facade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facade")
            .field("initialized", &self.is_initialized())
            .field("backends", &self.backend_names())
            .finish()
    }
}

impl Facade {
    /// Creates an uninitialized facade.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and initializes a facade in one step.
    pub async fn with_config(config: FacadeConfig) -> StorageResult<Self> {
        let facade = Self::new();
        facade.initialize(config).await?;
        Ok(facade)
    }

    /// Installs the backend registry. Fails with `AlreadyInitialized` if a registry is present.
    pub async fn initialize(&self, config: FacadeConfig) -> StorageResult<()> {
        if self.is_initialized() {
            return Err(StorageError::AlreadyInitialized);
        }

        let mut backends = HashMap::new();
        for (name, cfg) in &config.backend_configs {
            validate_backend_name(name)?;
            let backend = cfg.build().await.map_err(|e| StorageError::InvalidConfig {
                reason: format!("failed to create backend {:?}: {}", name, e),
            })?;
            backends.insert(name.clone(), backend);
        }
        for (name, backend) in config.backends {
            validate_backend_name(&name)?;
            backends.insert(name, backend);
        }

        if backends.is_empty() {
            return Err(StorageError::InvalidConfig {
                reason: "at least one backend must be configured".to_string(),
            });
        }

        let default_name = match config.default_backend.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => {
                let mut names: Vec<&String> = backends.keys().collect();
                names.sort();
                names[0].clone()
            }
        };
        if !backends.contains_key(&default_name) {
            return Err(StorageError::InvalidConfig {
                reason: format!("default backend {:?} is not configured", default_name),
            });
        }

        let mut guard = self.inner.write();
        if guard.is_some() {
            return Err(StorageError::AlreadyInitialized);
        }
        info!(backends = backends.len(), default = %default_name, "storage facade initialized");
        *guard = Some(Arc::new(Registry {
            backends,
            default_name,
        }));
        Ok(())
    }

    /// Drops the registry so the facade can be initialized again.
    pub fn reset(&self) {
        *self.inner.write() = None;
    }

    /// Whether a registry is installed.
    pub fn is_initialized(&self) -> bool {
        self.inner.read().is_some()
    }

    fn snapshot(&self) -> StorageResult<Arc<Registry>> {
        self.inner.read().clone().ok_or(StorageError::NotInitialized)
    }

    /// Looks up a backend by name.
    pub fn backend(&self, name: &str) -> StorageResult<Arc<dyn StorageBackend>> {
        let registry = self.snapshot()?;
        validate_backend_name(name)?;
        registry
            .backends
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::BackendNotFound {
                name: sanitize_for_log(name),
            })
    }

    /// The default backend.
    pub fn default_backend(&self) -> StorageResult<Arc<dyn StorageBackend>> {
        let registry = self.snapshot()?;
        registry
            .backends
            .get(&registry.default_name)
            .cloned()
            .ok_or_else(|| StorageError::BackendNotFound {
                name: registry.default_name.clone(),
            })
    }

    /// Name of the default backend, if initialized.
    pub fn default_backend_name(&self) -> Option<String> {
        self.inner.read().as_ref().map(|r| r.default_name.clone())
    }

    /// Registered backend names, sorted. Empty when uninitialized.
    pub fn backend_names(&self) -> Vec<String> {
        let Some(registry) = self.inner.read().clone() else {
            return Vec::new();
        };
        let mut names: Vec<String> = registry.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Splits a key reference into its backend and the backend-relative key.
    ///
    /// `"name:key"` routes to backend `name` when such a backend is registered; any other
    /// reference, including keys that merely contain a colon, goes to the default backend whole.
    pub fn resolve(&self, key_ref: &str) -> StorageResult<(Arc<dyn StorageBackend>, String)> {
        let registry = self.snapshot()?;

        if let Some((name, key)) = key_ref.split_once(':') {
            if let Some(backend) = registry.backends.get(name) {
                validate_key(key)?;
                return Ok((backend.clone(), key.to_string()));
            }
        }

        validate_key(key_ref)?;
        let backend = registry
            .backends
            .get(&registry.default_name)
            .cloned()
            .ok_or_else(|| StorageError::BackendNotFound {
                name: registry.default_name.clone(),
            })?;
        Ok((backend, key_ref.to_string()))
    }

    /// Stores an object.
    pub async fn put(&self, key_ref: &str, data: Bytes) -> StorageResult<()> {
        let (backend, key) = self.resolve(key_ref)?;
        backend.put(&key, data).await
    }

    /// Stores an object with metadata.
    pub async fn put_with_metadata(
        &self,
        key_ref: &str,
        data: Bytes,
        metadata: Metadata,
    ) -> StorageResult<()> {
        let (backend, key) = self.resolve(key_ref)?;
        backend.put_with_metadata(&key, data, metadata).await
    }

    /// Reads an object.
    pub async fn get(&self, key_ref: &str) -> StorageResult<Bytes> {
        let (backend, key) = self.resolve(key_ref)?;
        backend.get(&key).await
    }

    /// Reads object metadata.
    pub async fn metadata(&self, key_ref: &str) -> StorageResult<Metadata> {
        let (backend, key) = self.resolve(key_ref)?;
        backend.metadata(&key).await
    }

    /// Deletes an object.
    pub async fn delete(&self, key_ref: &str) -> StorageResult<()> {
        let (backend, key) = self.resolve(key_ref)?;
        backend.delete(&key).await
    }

    /// Checks whether an object exists.
    pub async fn exists(&self, key_ref: &str) -> StorageResult<bool> {
        let (backend, key) = self.resolve(key_ref)?;
        backend.exists(&key).await
    }

    /// Lists one page from the default backend.
    pub async fn list_with_options(&self, opts: &ListOptions) -> StorageResult<ListResult> {
        self.default_backend()?.list_with_options(opts).await
    }
}
