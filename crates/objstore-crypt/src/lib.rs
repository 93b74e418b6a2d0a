#![warn(missing_docs)]

//! objstore encryption collaborator: the `Encrypter` / `EncrypterFactory` contracts used by
//! replication, an AEAD envelope implementation, a keyring, and a registry of named providers.

pub mod aead;
pub mod encrypter;
pub mod error;
pub mod key;
pub mod keyring;
pub mod noop;
pub mod registry;

pub use aead::{AeadEncrypter, EncryptionAlgorithm};
pub use encrypter::{Encrypter, EncrypterFactory, METADATA_ALGORITHM, METADATA_KEY_ID};
pub use error::{CryptError, CryptResult};
pub use key::{derive_key, EncryptionKey};
pub use keyring::KeyringFactory;
pub use noop::{NoopEncrypter, NoopEncrypterFactory};
pub use registry::{ProviderRegistry, NOOP_PROVIDER};
