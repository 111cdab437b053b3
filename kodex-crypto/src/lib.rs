//! Encryption layer for Kodex.
//!
//! Provides the primitives the engine builds on:
//! - ChaCha20-Poly1305 / XChaCha20-Poly1305 for object bodies
//! - Argon2id for deriving keys from passwords
//! - Ed25519 identity keys, converted to X25519 for envelope encryption
//! - Keyed BLAKE3 for search-index derivation
//!
//! # Architecture
//!
//! Keys are layered:
//!
//! 1. **Identity key**: one per user. Signs the user's key container and
//!    receives sealed envelopes. Stored at rest behind the user's password.
//!
//! 2. **Crypto service**: one symmetric key per object. Persisted remotely
//!    only as an envelope sealed to the owner's (or a grantee's) identity.
//!
//! 3. **Sharing key**: one per document. Gates the document's search index
//!    and is distributed to grantees inside envelopes.

pub mod cipher;
pub mod envelope;
mod error;
mod key;
pub mod search;
mod service;

pub use cipher::{
    CipherAlgorithm, EncryptedData, NONCE_SIZE, TAG_SIZE, XNONCE_SIZE, decrypt, decrypt_string,
    encrypt, encrypt_string,
};
pub use envelope::{
    IdentityKeyPair, IdentityPublicKey, PassphraseProtectedKey, SealedEnvelope,
    decrypt_private_key, encrypt_private_key, open, seal, unwrap_service, unwrap_sharing_key,
    wrap_service, wrap_sharing_key,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{DerivedKey, KEY_SIZE, KdfParams, SALT_SIZE, Salt, derive_key, generate_random_key};
pub use search::{
    BridgeKey, Hasher, IndexAddress, IndexSecret, KeyedHashScheme, SearchPublicKey, SearchScheme,
    SearchSecret, SharingKey,
};
pub use service::CryptoService;
