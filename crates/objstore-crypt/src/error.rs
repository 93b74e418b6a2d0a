//! Error types for the encryption subsystem.

use thiserror::Error;

/// Result type alias for encryption operations.
pub type CryptResult<T> = Result<T, CryptError>;

/// Encryption errors.
#[derive(Debug, Error)]
pub enum CryptError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authentication tag mismatch: the data was tampered with or the key is wrong.
    #[error("decryption authentication failed")]
    DecryptionAuthFailed,

    /// The ciphertext does not carry a recognizable envelope.
    #[error("invalid envelope: {reason}")]
    InvalidEnvelope {
        /// What was wrong with it.
        reason: String,
    },

    /// No key is registered under the requested id.
    #[error("encryption key not found: {key_id}")]
    KeyNotFound {
        /// The requested key id.
        key_id: String,
    },

    /// An empty key id was requested and the factory has no default.
    #[error("no default encryption key configured")]
    NoDefaultKey,

    /// No encrypter factory is registered under the provider name.
    #[error("encryption provider not found: {name}")]
    ProviderNotFound {
        /// The requested provider.
        name: String,
    },

    /// Key material could not be derived.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}
