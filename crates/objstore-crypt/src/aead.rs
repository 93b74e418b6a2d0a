//! Versioned object envelope sealed with an AEAD cipher.
//!
//! Layout: `[version:1][algorithm:1][nonce:12][ciphertext || tag:16]`. The algorithm byte lets
//! a keyring switch its default cipher without breaking objects sealed earlier.

use aes_gcm::aead::{Aead, KeyInit, Nonce};
use aes_gcm::Aes256Gcm;
use bytes::{BufMut, Bytes, BytesMut};
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};

use crate::encrypter::Encrypter;
use crate::error::{CryptError, CryptResult};
use crate::key::EncryptionKey;

const ENVELOPE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 2 + NONCE_LEN;

/// Cipher used for new envelopes, recorded in the envelope's algorithm byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EncryptionAlgorithm {
    /// Algorithm byte 1.
    #[default]
    AesGcm256,
    /// Algorithm byte 2.
    ChaCha20Poly1305,
}

impl EncryptionAlgorithm {
    /// Name recorded in object metadata.
    pub fn name(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::AesGcm256 => "AES-256-GCM",
            EncryptionAlgorithm::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            EncryptionAlgorithm::AesGcm256 => 1,
            EncryptionAlgorithm::ChaCha20Poly1305 => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(EncryptionAlgorithm::AesGcm256),
            2 => Some(EncryptionAlgorithm::ChaCha20Poly1305),
            _ => None,
        }
    }
}

fn random_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn cipher_for<C: KeyInit>(key: &EncryptionKey) -> CryptResult<C> {
    C::new_from_slice(&key.0).map_err(|e| CryptError::EncryptionFailed(e.to_string()))
}

fn seal_with<C: Aead + KeyInit>(
    key: &EncryptionKey,
    nonce: &[u8],
    plaintext: &[u8],
) -> CryptResult<Vec<u8>> {
    cipher_for::<C>(key)?
        .encrypt(Nonce::<C>::from_slice(nonce), plaintext)
        .map_err(|e| CryptError::EncryptionFailed(e.to_string()))
}

fn open_with<C: Aead + KeyInit>(
    key: &EncryptionKey,
    nonce: &[u8],
    ciphertext: &[u8],
) -> CryptResult<Vec<u8>> {
    cipher_for::<C>(key)?
        .decrypt(Nonce::<C>::from_slice(nonce), ciphertext)
        .map_err(|_| CryptError::DecryptionAuthFailed)
}

/// Encrypter sealing whole objects under one keyring key.
#[derive(Debug, Clone)]
pub struct AeadEncrypter {
    key_id: String,
    key: EncryptionKey,
    algo: EncryptionAlgorithm,
}

impl AeadEncrypter {
    /// Encrypter for `key`, recorded on objects as `key_id`. `algo` applies to new envelopes;
    /// existing ones open with the cipher named in their header.
    pub fn new(key_id: impl Into<String>, key: EncryptionKey, algo: EncryptionAlgorithm) -> Self {
        Self {
            key_id: key_id.into(),
            key,
            algo,
        }
    }

    fn seal(&self, nonce: &[u8], plaintext: &[u8]) -> CryptResult<Vec<u8>> {
        match self.algo {
            EncryptionAlgorithm::AesGcm256 => seal_with::<Aes256Gcm>(&self.key, nonce, plaintext),
            EncryptionAlgorithm::ChaCha20Poly1305 => {
                seal_with::<ChaCha20Poly1305>(&self.key, nonce, plaintext)
            }
        }
    }

    fn open(
        &self,
        algo: EncryptionAlgorithm,
        nonce: &[u8],
        ciphertext: &[u8],
    ) -> CryptResult<Vec<u8>> {
        match algo {
            EncryptionAlgorithm::AesGcm256 => open_with::<Aes256Gcm>(&self.key, nonce, ciphertext),
            EncryptionAlgorithm::ChaCha20Poly1305 => {
                open_with::<ChaCha20Poly1305>(&self.key, nonce, ciphertext)
            }
        }
    }
}

impl Encrypter for AeadEncrypter {
    fn encrypt(&self, plaintext: Bytes) -> CryptResult<Bytes> {
        let nonce = random_nonce();
        let sealed = self.seal(&nonce, &plaintext)?;

        let mut out = BytesMut::with_capacity(HEADER_LEN + sealed.len());
        out.put_u8(ENVELOPE_VERSION);
        out.put_u8(self.algo.tag());
        out.put_slice(&nonce);
        out.put_slice(&sealed);
        Ok(out.freeze())
    }

    fn decrypt(&self, ciphertext: Bytes) -> CryptResult<Bytes> {
        if ciphertext.len() < HEADER_LEN {
            return Err(CryptError::InvalidEnvelope {
                reason: format!("{} bytes is shorter than the header", ciphertext.len()),
            });
        }
        if ciphertext[0] != ENVELOPE_VERSION {
            return Err(CryptError::InvalidEnvelope {
                reason: format!("unsupported version {}", ciphertext[0]),
            });
        }
        let algo =
            EncryptionAlgorithm::from_tag(ciphertext[1]).ok_or_else(|| CryptError::InvalidEnvelope {
                reason: format!("unknown algorithm tag {}", ciphertext[1]),
            })?;

        let plain = self.open(algo, &ciphertext[2..HEADER_LEN], &ciphertext[HEADER_LEN..])?;
        Ok(Bytes::from(plain))
    }

    fn algorithm(&self) -> &str {
        self.algo.name()
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}
