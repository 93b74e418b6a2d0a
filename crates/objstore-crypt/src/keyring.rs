//! In-process keyring: named keys handed out as AEAD encrypters.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::aead::{AeadEncrypter, EncryptionAlgorithm};
use crate::encrypter::{Encrypter, EncrypterFactory};
use crate::error::{CryptError, CryptResult};
use crate::key::{derive_key, EncryptionKey};

/// Encrypter factory backed by a set of named keys.
#[derive(Debug, Default)]
pub struct KeyringFactory {
    keys: RwLock<HashMap<String, EncryptionKey>>,
    default_key_id: String,
    algo: EncryptionAlgorithm,
}

impl KeyringFactory {
    /// Empty keyring whose default key is `default_key_id`.
    pub fn new(default_key_id: impl Into<String>) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            default_key_id: default_key_id.into(),
            algo: EncryptionAlgorithm::default(),
        }
    }

    /// Selects the cipher used for new encrypters.
    pub fn with_algorithm(mut self, algo: EncryptionAlgorithm) -> Self {
        self.algo = algo;
        self
    }

    /// Adds (or replaces) a key.
    pub fn insert_key(&self, key_id: impl Into<String>, key: EncryptionKey) {
        let key_id = key_id.into();
        debug!(key_id = %key_id, "keyring key installed");
        self.keys.write().insert(key_id, key);
    }

    /// Adds a key derived from secret material.
    pub fn insert_derived_key(&self, key_id: &str, secret: &[u8]) -> CryptResult<()> {
        let key = derive_key(secret, key_id)?;
        self.insert_key(key_id, key);
        Ok(())
    }

    /// Builder form of [`KeyringFactory::insert_key`].
    pub fn with_key(self, key_id: impl Into<String>, key: EncryptionKey) -> Self {
        self.insert_key(key_id, key);
        self
    }

    /// Whether a key id is present.
    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.read().contains_key(key_id)
    }
}

impl EncrypterFactory for KeyringFactory {
    fn encrypter(&self, key_id: &str) -> CryptResult<Arc<dyn Encrypter>> {
        let key_id = if key_id.is_empty() {
            if self.default_key_id.is_empty() {
                return Err(CryptError::NoDefaultKey);
            }
            self.default_key_id.as_str()
        } else {
            key_id
        };

        let key = self
            .keys
            .read()
            .get(key_id)
            .cloned()
            .ok_or_else(|| CryptError::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        Ok(Arc::new(AeadEncrypter::new(key_id, key, self.algo)))
    }

    fn default_key_id(&self) -> &str {
        &self.default_key_id
    }
}
