//! Keyring key material and its derivation from configured secrets.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptError, CryptResult};

/// Secret for one keyring entry, sized for both envelope ciphers. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey").finish_non_exhaustive()
    }
}

impl EncryptionKey {
    /// Fresh key from the thread RNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// Derives a named key from secret material using HKDF-SHA256. The key id is bound into the
/// derivation so one secret yields distinct keys per id.
pub fn derive_key(secret: &[u8], key_id: &str) -> CryptResult<EncryptionKey> {
    let hk = Hkdf::<Sha256>::new(Some(b"objstore-keyring"), secret);
    let mut okm = [0u8; 32];
    hk.expand(key_id.as_bytes(), &mut okm)
        .map_err(|e| CryptError::KeyDerivation(e.to_string()))?;
    Ok(EncryptionKey(okm))
}
