//! Builds backends from a type name plus string settings.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::local::LocalBackend;
use crate::memory::MemoryBackend;

/// Serializable description of a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend type: `memory` or `local`.
    pub kind: String,
    /// Backend-specific settings (`path` for `local`).
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl BackendConfig {
    /// Shorthand for a config with no settings.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            settings: HashMap::new(),
        }
    }

    /// Adds one setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Builds the described backend.
    pub async fn build(&self) -> StorageResult<Arc<dyn StorageBackend>> {
        new_backend(&self.kind, &self.settings).await
    }
}

/// Creates a backend of the given type.
pub async fn new_backend(
    kind: &str,
    settings: &HashMap<String, String>,
) -> StorageResult<Arc<dyn StorageBackend>> {
    match kind {
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        "local" => {
            let path = settings
                .get("path")
                .filter(|p| !p.is_empty())
                .ok_or_else(|| StorageError::InvalidConfig {
                    reason: "local backend requires a 'path' setting".to_string(),
                })?;
            let backend = LocalBackend::open(path).await?;
            info!(path = %path, "opened local backend");
            Ok(Arc::new(backend))
        }
        other => Err(StorageError::InvalidConfig {
            reason: format!("unsupported backend type: {}", other),
        }),
    }
}
