//! Pass-through encrypter.

use std::sync::Arc;

use bytes::Bytes;

use crate::encrypter::{Encrypter, EncrypterFactory};
use crate::error::CryptResult;

/// Encrypter that returns its input unchanged.
#[derive(Debug, Clone, Default)]
pub struct NoopEncrypter {
    key_id: String,
}

impl Encrypter for NoopEncrypter {
    fn encrypt(&self, plaintext: Bytes) -> CryptResult<Bytes> {
        Ok(plaintext)
    }

    fn decrypt(&self, ciphertext: Bytes) -> CryptResult<Bytes> {
        Ok(ciphertext)
    }

    fn algorithm(&self) -> &str {
        "none"
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// Factory for [`NoopEncrypter`]s; accepts any key id.
#[derive(Debug, Clone, Default)]
pub struct NoopEncrypterFactory;

impl EncrypterFactory for NoopEncrypterFactory {
    fn encrypter(&self, key_id: &str) -> CryptResult<Arc<dyn Encrypter>> {
        Ok(Arc::new(NoopEncrypter {
            key_id: key_id.to_string(),
        }))
    }

    fn default_key_id(&self) -> &str {
        ""
    }
}
