//! Encrypter contracts.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::CryptResult;

/// Custom metadata entry recording the algorithm an object was encrypted with.
pub const METADATA_ALGORITHM: &str = "encryption_algorithm";

/// Custom metadata entry recording the key id an object was encrypted with.
pub const METADATA_KEY_ID: &str = "encryption_key_id";

/// Whole-object encrypt/decrypt transform bound to one key.
pub trait Encrypter: Send + Sync {
    /// Encrypts plaintext.
    fn encrypt(&self, plaintext: Bytes) -> CryptResult<Bytes>;

    /// Decrypts ciphertext produced by [`Encrypter::encrypt`].
    fn decrypt(&self, ciphertext: Bytes) -> CryptResult<Bytes>;

    /// Algorithm identifier recorded in object metadata.
    fn algorithm(&self) -> &str;

    /// Id of the key this encrypter uses.
    fn key_id(&self) -> &str;
}

/// Produces encrypters by key id.
pub trait EncrypterFactory: Send + Sync {
    /// Returns an encrypter for `key_id`; an empty id selects the default key.
    fn encrypter(&self, key_id: &str) -> CryptResult<Arc<dyn Encrypter>>;

    /// The key id used when none is requested.
    fn default_key_id(&self) -> &str;
}
