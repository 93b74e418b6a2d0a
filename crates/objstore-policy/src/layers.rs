//! Encryption layer resolution for replication copies.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use objstore_crypt::{
    Encrypter, EncrypterFactory, ProviderRegistry, METADATA_ALGORITHM, METADATA_KEY_ID,
};
use objstore_storage::Metadata;

use crate::error::PolicyResult;
use crate::replication::{EncryptionConfig, ReplicationMode, ReplicationPolicy};

/// Encrypter factories installed for one policy, by layer.
#[derive(Clone, Default)]
pub struct LayerFactories {
    /// At-rest layer factory; recorded but not applied by the sync engine.
    pub backend: Option<Arc<dyn EncrypterFactory>>,
    /// Source decrypt factory.
    pub source: Option<Arc<dyn EncrypterFactory>>,
    /// Destination encrypt factory.
    pub destination: Option<Arc<dyn EncrypterFactory>>,
}

impl fmt::Debug for LayerFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerFactories")
            .field("backend", &self.backend.is_some())
            .field("source", &self.source.is_some())
            .field("destination", &self.destination.is_some())
            .finish()
    }
}

/// Source-side decrypt step. The key is picked per object.
#[derive(Clone)]
pub struct DecryptLayer {
    factory: Arc<dyn EncrypterFactory>,
    default_key: String,
}

impl DecryptLayer {
    /// Decrypter for an object, preferring the key id recorded in its metadata.
    pub fn decrypter_for(&self, metadata: &Metadata) -> PolicyResult<Arc<dyn Encrypter>> {
        let key_id = metadata
            .custom
            .get(METADATA_KEY_ID)
            .filter(|k| !k.is_empty())
            .map(String::as_str)
            .unwrap_or(&self.default_key);
        Ok(self.factory.encrypter(key_id)?)
    }
}

/// The transforms applied to each object during one sync run.
#[derive(Clone, Default)]
pub struct CopyPlan {
    decrypt: Option<DecryptLayer>,
    encrypt: Option<Arc<dyn Encrypter>>,
}

impl fmt::Debug for CopyPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyPlan")
            .field("decrypt", &self.decrypt.is_some())
            .field("encrypt", &self.encrypt.as_ref().map(|e| e.key_id().to_string()))
            .finish()
    }
}

impl CopyPlan {
    /// Plan that copies bytes unchanged.
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Builds the plan for a policy.
    ///
    /// Opaque policies never transform. Transparent policies decrypt when the source layer is
    /// enabled and encrypt when the destination layer is enabled, in any combination. A factory
    /// installed on the policy takes precedence over the provider registry.
    pub fn resolve(
        policy: &ReplicationPolicy,
        factories: &LayerFactories,
        providers: &ProviderRegistry,
    ) -> PolicyResult<Self> {
        if policy.replication_mode == ReplicationMode::Opaque {
            return Ok(Self::passthrough());
        }
        let layers = policy.encryption_layers();

        let decrypt = match layers.source_layer() {
            Some(cfg) => Some(DecryptLayer {
                factory: pick_factory(&factories.source, cfg, providers)?,
                default_key: cfg.default_key.clone(),
            }),
            None => None,
        };

        let encrypt = match layers.destination_layer() {
            Some(cfg) => {
                let factory = pick_factory(&factories.destination, cfg, providers)?;
                Some(factory.encrypter(&cfg.default_key)?)
            }
            None => None,
        };

        Ok(Self { decrypt, encrypt })
    }

    /// Whether any transform is active.
    pub fn is_passthrough(&self) -> bool {
        self.decrypt.is_none() && self.encrypt.is_none()
    }

    /// Runs the plan over one object's bytes and metadata, producing what is written to the
    /// destination.
    pub fn apply(&self, mut data: Bytes, mut metadata: Metadata) -> PolicyResult<(Bytes, Metadata)> {
        if let Some(layer) = &self.decrypt {
            let decrypter = layer.decrypter_for(&metadata)?;
            data = decrypter.decrypt(data)?;
            metadata.custom.remove(METADATA_ALGORITHM);
            metadata.custom.remove(METADATA_KEY_ID);
        }
        if let Some(encrypter) = &self.encrypt {
            data = encrypter.encrypt(data)?;
            metadata
                .custom
                .insert(METADATA_ALGORITHM.to_string(), encrypter.algorithm().to_string());
            metadata
                .custom
                .insert(METADATA_KEY_ID.to_string(), encrypter.key_id().to_string());
        }
        Ok((data, metadata))
    }
}

fn pick_factory(
    installed: &Option<Arc<dyn EncrypterFactory>>,
    cfg: &EncryptionConfig,
    providers: &ProviderRegistry,
) -> PolicyResult<Arc<dyn EncrypterFactory>> {
    match installed {
        Some(factory) => Ok(factory.clone()),
        None => Ok(providers.get(&cfg.provider)?),
    }
}
