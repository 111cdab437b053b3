//! Per-object symmetric crypto service.
//!
//! A `CryptoService` binds a cipher algorithm to one key. Every stored
//! object has exactly one; it is created on first use and travels between
//! users only inside a sealed envelope.

use crate::cipher::{self, CipherAlgorithm, EncryptedData};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, KEY_SIZE, generate_random_key};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Symmetric cipher configuration bound to a specific key.
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoService {
    algorithm: CipherAlgorithm,
    key: DerivedKey,
}

/// Cleartext form of a service. Only ever serialized into a buffer that is
/// sealed immediately afterwards.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct ServiceMaterial {
    #[zeroize(skip)]
    algorithm: CipherAlgorithm,
    key: Vec<u8>,
}

impl CryptoService {
    pub fn new(algorithm: CipherAlgorithm, key: DerivedKey) -> Self {
        Self { algorithm, key }
    }

    /// A fresh service with the default algorithm and a random key.
    pub fn generate() -> Self {
        Self::new(CipherAlgorithm::default(), generate_random_key())
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
        cipher::encrypt_with(self.algorithm, &self.key, plaintext)
    }

    pub fn decrypt(&self, data: &EncryptedData) -> CryptoResult<Vec<u8>> {
        cipher::decrypt_with(self.algorithm, &self.key, data)
    }

    /// Serializes the service for sealing. The returned buffer is zeroized
    /// on drop.
    pub(crate) fn to_material(&self) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let material = ServiceMaterial {
            algorithm: self.algorithm,
            key: self.key.as_bytes().to_vec(),
        };
        Ok(Zeroizing::new(serde_json::to_vec(&material)?))
    }

    pub(crate) fn from_material(bytes: &[u8]) -> CryptoResult<Self> {
        let material: ServiceMaterial = serde_json::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("malformed crypto service: {e}")))?;
        if material.key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: material.key.len(),
            });
        }
        Ok(Self::new(material.algorithm, DerivedKey::from_slice(&material.key)?))
    }
}

impl fmt::Debug for CryptoService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoService")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_roundtrip_preserves_algorithm_and_key() {
        let svc = CryptoService::new(CipherAlgorithm::XChaCha20Poly1305, generate_random_key());
        let material = svc.to_material().unwrap();
        let restored = CryptoService::from_material(&material).unwrap();
        assert_eq!(svc, restored);
    }

    #[test]
    fn from_material_rejects_short_key() {
        let bytes = br#"{"algorithm":"cha-cha20-poly1305","key":[1,2,3]}"#;
        assert!(CryptoService::from_material(bytes).is_err());
    }

    #[test]
    fn debug_hides_key() {
        let svc = CryptoService::generate();
        let rendered = format!("{svc:?}");
        assert!(rendered.contains("ChaCha20Poly1305"));
        assert!(!rendered.contains("key"));
    }
}
