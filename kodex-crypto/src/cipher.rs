//! Authenticated symmetric encryption.
//!
//! Two AEADs from the ChaCha20-Poly1305 family are supported. The nonce is
//! generated fresh per call and carried alongside the ciphertext.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Nonce size of ChaCha20-Poly1305 in bytes.
pub const NONCE_SIZE: usize = 12;

/// Nonce size of XChaCha20-Poly1305 in bytes.
pub const XNONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Cipher algorithm tag bound to every crypto service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherAlgorithm {
    #[default]
    ChaCha20Poly1305,
    XChaCha20Poly1305,
}

impl CipherAlgorithm {
    pub fn nonce_size(self) -> usize {
        match self {
            Self::ChaCha20Poly1305 => NONCE_SIZE,
            Self::XChaCha20Poly1305 => XNONCE_SIZE,
        }
    }
}

/// Ciphertext with the nonce it was sealed under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Total size of nonce and ciphertext.
    pub fn len(&self) -> usize {
        self.nonce.len() + self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Checks that the envelope parts required by `algorithm` are present.
    pub fn check(&self, algorithm: CipherAlgorithm) -> CryptoResult<()> {
        if self.nonce.len() != algorithm.nonce_size() {
            return Err(CryptoError::MalformedEnvelope(format!(
                "nonce must be {} bytes, got {}",
                algorithm.nonce_size(),
                self.nonce.len()
            )));
        }
        if self.ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::MalformedEnvelope(
                "ciphertext shorter than authentication tag".to_string(),
            ));
        }
        Ok(())
    }
}

/// Encrypts with the default algorithm (ChaCha20-Poly1305).
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    encrypt_with(CipherAlgorithm::default(), key, plaintext)
}

/// Decrypts data produced by [`encrypt`].
pub fn decrypt(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<Vec<u8>> {
    decrypt_with(CipherAlgorithm::default(), key, data)
}

pub fn encrypt_string(key: &DerivedKey, plaintext: &str) -> CryptoResult<EncryptedData> {
    encrypt(key, plaintext.as_bytes())
}

pub fn decrypt_string(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<String> {
    let bytes = decrypt(key, data)?;
    String::from_utf8(bytes).map_err(|e| CryptoError::Decryption(format!("invalid utf-8: {e}")))
}

pub fn encrypt_with(
    algorithm: CipherAlgorithm,
    key: &DerivedKey,
    plaintext: &[u8],
) -> CryptoResult<EncryptedData> {
    let mut nonce = vec![0u8; algorithm.nonce_size()];
    OsRng.fill_bytes(&mut nonce);

    let key = Key::from_slice(key.as_bytes());
    let ciphertext = match algorithm {
        CipherAlgorithm::ChaCha20Poly1305 => {
            ChaCha20Poly1305::new(key).encrypt(Nonce::from_slice(&nonce), plaintext)
        }
        CipherAlgorithm::XChaCha20Poly1305 => {
            XChaCha20Poly1305::new(key).encrypt(XNonce::from_slice(&nonce), plaintext)
        }
    }
    .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedData { nonce, ciphertext })
}

pub fn decrypt_with(
    algorithm: CipherAlgorithm,
    key: &DerivedKey,
    data: &EncryptedData,
) -> CryptoResult<Vec<u8>> {
    data.check(algorithm)?;

    let key = Key::from_slice(key.as_bytes());
    match algorithm {
        CipherAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new(key)
            .decrypt(Nonce::from_slice(&data.nonce), data.ciphertext.as_ref()),
        CipherAlgorithm::XChaCha20Poly1305 => XChaCha20Poly1305::new(key)
            .decrypt(XNonce::from_slice(&data.nonce), data.ciphertext.as_ref()),
    }
    .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))
}
