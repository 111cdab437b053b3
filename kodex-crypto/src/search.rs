//! Searchable-encryption key material and index derivation.
//!
//! The search scheme is consumed through the [`SearchScheme`] trait so the
//! engine never depends on how addresses are computed. [`KeyedHashScheme`]
//! is the bundled implementation: chained keyed BLAKE3 under the user's
//! left/right hasher keys, bound to a per-document index secret.
//!
//! ```text
//! term_hash   = H(right, H(left, term))
//! address     = H(index_secret, term_hash)
//! index_secret = KDF("kodex index secret", sharing_key)
//! bridge_key  = H(encrypted_search_key, sharing_key)
//! ```

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every search key, index secret and index address in bytes.
pub const SEARCH_KEY_SIZE: usize = 32;

const PUBLIC_KEY_CONTEXT: &str = "kodex 2024-06 search public key";
const INDEX_SECRET_CONTEXT: &str = "kodex 2024-06 object index secret";

fn random_bytes() -> [u8; SEARCH_KEY_SIZE] {
    let mut bytes = [0u8; SEARCH_KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn array_from_slice(bytes: &[u8]) -> CryptoResult<[u8; SEARCH_KEY_SIZE]> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: SEARCH_KEY_SIZE,
            actual: bytes.len(),
        })
}

/// 256-bit secret search key, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SearchSecret([u8; SEARCH_KEY_SIZE]);

impl SearchSecret {
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        array_from_slice(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; SEARCH_KEY_SIZE] {
        &self.0
    }

    /// Public counterpart of a search private key.
    pub fn public_key(&self) -> SearchPublicKey {
        SearchPublicKey(blake3::derive_key(PUBLIC_KEY_CONTEXT, &self.0))
    }
}

impl fmt::Debug for SearchSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SearchSecret(..)")
    }
}

/// Public search key. Safe to publish.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchPublicKey([u8; SEARCH_KEY_SIZE]);

impl SearchPublicKey {
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        array_from_slice(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; SEARCH_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SearchPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SearchPublicKey({})", hex::encode(self.0))
    }
}

/// A keyed hash function (one half of the hasher pair).
#[derive(Clone, PartialEq, Eq)]
pub struct Hasher(SearchSecret);

impl Hasher {
    pub fn generate() -> Self {
        Self(SearchSecret::generate())
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        SearchSecret::from_slice(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; SEARCH_KEY_SIZE] {
        self.0.as_bytes()
    }

    pub fn hash(&self, data: &[u8]) -> [u8; SEARCH_KEY_SIZE] {
        *blake3::keyed_hash(self.0.as_bytes(), data).as_bytes()
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hasher(..)")
    }
}

/// Per-document symmetric capability gating search-index access.
///
/// Generated once per document; a new version of a document gets a new key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharingKey([u8; SEARCH_KEY_SIZE]);

impl SharingKey {
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        array_from_slice(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; SEARCH_KEY_SIZE] {
        &self.0
    }

    /// Object-specific index derivation secret.
    pub fn index_secret(&self) -> IndexSecret {
        IndexSecret(blake3::derive_key(INDEX_SECRET_CONTEXT, &self.0))
    }
}

impl fmt::Debug for SharingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharingKey(..)")
    }
}

/// Secret that binds index addresses to one object.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct IndexSecret([u8; SEARCH_KEY_SIZE]);

impl IndexSecret {
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        array_from_slice(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; SEARCH_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for IndexSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IndexSecret(..)")
    }
}

/// Per-(document, grantee) key that lets a grantee search a shared document
/// without holding its sharing key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct BridgeKey([u8; SEARCH_KEY_SIZE]);

impl BridgeKey {
    pub fn as_bytes(&self) -> &[u8; SEARCH_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for BridgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BridgeKey(..)")
    }
}

/// Opaque lookup key of an index bucket.
///
/// Unrelated terms may collide on one address; callers store every bucket
/// under its address instead of treating a collision as an error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexAddress([u8; SEARCH_KEY_SIZE]);

impl IndexAddress {
    pub fn from_bytes(bytes: [u8; SEARCH_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SEARCH_KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for IndexAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for IndexAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexAddress({})", self.to_hex())
    }
}

/// Capability interface of the searchable-encryption primitive.
pub trait SearchScheme: Send + Sync {
    /// Hashes a normalized term under the user's hasher pair.
    fn hash_term(&self, term: &str) -> [u8; SEARCH_KEY_SIZE];

    /// Derives the index address of `term` within one object.
    fn derive_index(&self, term: &str, secret: &IndexSecret) -> IndexAddress;

    /// Derives the bridge key that grants this user search access to the
    /// document gated by `sharing_key`.
    fn derive_bridge_key(&self, sharing_key: &SharingKey) -> BridgeKey;
}

/// Keyed-BLAKE3 search scheme.
#[derive(Clone, Debug)]
pub struct KeyedHashScheme {
    left: Hasher,
    right: Hasher,
    encrypted_search_key: SearchSecret,
}

impl KeyedHashScheme {
    pub fn new(left: Hasher, right: Hasher, encrypted_search_key: SearchSecret) -> Self {
        Self {
            left,
            right,
            encrypted_search_key,
        }
    }
}

impl SearchScheme for KeyedHashScheme {
    fn hash_term(&self, term: &str) -> [u8; SEARCH_KEY_SIZE] {
        let inner = self.left.hash(term.as_bytes());
        self.right.hash(&inner)
    }

    fn derive_index(&self, term: &str, secret: &IndexSecret) -> IndexAddress {
        let term_hash = self.hash_term(term);
        IndexAddress(*blake3::keyed_hash(secret.as_bytes(), &term_hash).as_bytes())
    }

    fn derive_bridge_key(&self, sharing_key: &SharingKey) -> BridgeKey {
        let derived = blake3::keyed_hash(
            self.encrypted_search_key.as_bytes(),
            sharing_key.as_bytes(),
        );
        BridgeKey(*derived.as_bytes())
    }
}
