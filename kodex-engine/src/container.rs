//! The user's key container.
//!
//! A container bundles six named keys. At rest every key is a sealed
//! envelope addressed to the owner's identity, and the whole bundle is
//! signed by that identity. A container read from storage starts sealed and
//! is unsealed exactly once with the owner's identity key pair; keyed
//! accessors fail with [`EngineError::SealedContainer`] until then.
//!
//! A container is *valid* when every key in [`KeyName::REQUIRED`] is present
//! and parses. Validation is separate from unsealing so a loader can hand
//! back a structurally sound but incomplete container and let the caller
//! decide what to do with it.

use crate::error::{EngineError, EngineResult};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use kodex_crypto::{
    CryptoResult, Hasher, IdentityKeyPair, KeyedHashScheme, SealedEnvelope, SearchPublicKey,
    SearchSecret, open, seal,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroizing;

/// Current serialized container format.
pub const CONTAINER_VERSION: u32 = 1;

/// Names of the keys held in a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyName {
    /// Marker binding the container to the owner's identity public key.
    IdentityKey,
    SearchPrivate,
    SearchPublic,
    EncryptedSearchPrivate,
    LeftHasher,
    RightHasher,
}

impl KeyName {
    /// Every key a valid container must hold.
    pub const REQUIRED: [KeyName; 6] = [
        KeyName::IdentityKey,
        KeyName::SearchPrivate,
        KeyName::SearchPublic,
        KeyName::EncryptedSearchPrivate,
        KeyName::LeftHasher,
        KeyName::RightHasher,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            KeyName::IdentityKey => "identity_key",
            KeyName::SearchPrivate => "search_private",
            KeyName::SearchPublic => "search_public",
            KeyName::EncryptedSearchPrivate => "encrypted_search_private",
            KeyName::LeftHasher => "left_hasher",
            KeyName::RightHasher => "right_hasher",
        }
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire form of a sealed container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedContainer {
    pub version: u32,
    pub owner: UserId,
    pub owner_public_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// Sealed envelope bytes per key.
    pub entries: BTreeMap<KeyName, Vec<u8>>,
    /// Identity signature over everything above.
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct SignedPayload<'a> {
    version: u32,
    owner: &'a UserId,
    owner_public_key: &'a [u8],
    created_at: &'a DateTime<Utc>,
    entries: &'a BTreeMap<KeyName, Vec<u8>>,
}

impl SerializedContainer {
    fn signing_payload(&self) -> EngineResult<Vec<u8>> {
        Ok(serde_json::to_vec(&SignedPayload {
            version: self.version,
            owner: &self.owner,
            owner_public_key: &self.owner_public_key,
            created_at: &self.created_at,
            entries: &self.entries,
        })?)
    }
}

struct Unsealed {
    identity: IdentityKeyPair,
    keys: BTreeMap<KeyName, Zeroizing<Vec<u8>>>,
}

/// Sealed/unsealed bundle of a user's keys.
pub struct KeyContainer {
    sealed: SerializedContainer,
    unsealed: Option<Unsealed>,
    dirty: bool,
}

impl KeyContainer {
    /// Generates a complete container for a new identity. The result is
    /// unsealed (its author holds the identity) and dirty.
    pub fn generate(owner: UserId, identity: IdentityKeyPair) -> EngineResult<Self> {
        let search_private = SearchSecret::generate();
        let mut keys = BTreeMap::new();
        keys.insert(
            KeyName::IdentityKey,
            Zeroizing::new(identity.public().to_bytes().to_vec()),
        );
        keys.insert(
            KeyName::SearchPublic,
            Zeroizing::new(search_private.public_key().as_bytes().to_vec()),
        );
        keys.insert(
            KeyName::SearchPrivate,
            Zeroizing::new(search_private.as_bytes().to_vec()),
        );
        keys.insert(
            KeyName::EncryptedSearchPrivate,
            Zeroizing::new(SearchSecret::generate().as_bytes().to_vec()),
        );
        keys.insert(
            KeyName::LeftHasher,
            Zeroizing::new(Hasher::generate().as_bytes().to_vec()),
        );
        keys.insert(
            KeyName::RightHasher,
            Zeroizing::new(Hasher::generate().as_bytes().to_vec()),
        );

        let mut container = Self {
            sealed: SerializedContainer {
                version: CONTAINER_VERSION,
                owner,
                owner_public_key: identity.public().to_bytes().to_vec(),
                created_at: Utc::now(),
                entries: BTreeMap::new(),
                signature: Vec::new(),
            },
            unsealed: Some(Unsealed { identity, keys }),
            dirty: true,
        };
        container.reseal()?;
        Ok(container)
    }

    /// Wraps a serialized container. The result is sealed and clean.
    pub fn from_serialized(sealed: SerializedContainer) -> EngineResult<Self> {
        if sealed.version != CONTAINER_VERSION {
            return Err(EngineError::Validation(format!(
                "unsupported container version {}",
                sealed.version
            )));
        }
        Ok(Self {
            sealed,
            unsealed: None,
            dirty: false,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        Self::from_serialized(serde_json::from_slice(bytes)?)
    }

    /// Serialized sealed form, safe to store anywhere.
    pub fn to_bytes(&self) -> EngineResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.sealed)?)
    }

    pub fn serialized(&self) -> &SerializedContainer {
        &self.sealed
    }

    pub fn owner(&self) -> &UserId {
        &self.sealed.owner
    }

    pub fn is_sealed(&self) -> bool {
        self.unsealed.is_none()
    }

    /// True when created or changed since last persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_persisted(&mut self) {
        self.dirty = false;
    }

    /// Verifies the signature and opens every entry.
    ///
    /// Fails with [`EngineError::Security`] if the identity does not own the
    /// container or the signature does not verify, and with a crypto error
    /// if any entry fails to open. Can only succeed once.
    pub fn unseal(&mut self, identity: IdentityKeyPair) -> EngineResult<()> {
        if self.unsealed.is_some() {
            return Err(EngineError::Validation(
                "container is already unsealed".into(),
            ));
        }

        let public = identity.public();
        if self.sealed.owner_public_key.as_slice() != public.to_bytes().as_slice() {
            return Err(EngineError::Security(format!(
                "container of {} is sealed to a different identity",
                self.sealed.owner
            )));
        }
        public
            .verify(&self.sealed.signing_payload()?, &self.sealed.signature)
            .map_err(|_| {
                EngineError::Security(format!(
                    "container signature of {} does not verify",
                    self.sealed.owner
                ))
            })?;

        let mut keys = BTreeMap::new();
        for (name, bytes) in &self.sealed.entries {
            let envelope = SealedEnvelope::from_bytes(bytes)?;
            keys.insert(*name, Zeroizing::new(open(&envelope, &identity)?));
        }

        if let Some(marker) = keys.get(&KeyName::IdentityKey)
            && marker.as_slice() != public.to_bytes().as_slice()
        {
            return Err(EngineError::Security(
                "identity marker does not match the unsealing identity".into(),
            ));
        }

        self.unsealed = Some(Unsealed { identity, keys });
        Ok(())
    }

    /// Checks that every required key is present and well formed.
    pub fn validate(&self) -> EngineResult<()> {
        for name in KeyName::REQUIRED {
            match name {
                KeyName::IdentityKey => self.identity().map(|_| ())?,
                KeyName::SearchPrivate => self.search_private_key().map(|_| ())?,
                KeyName::SearchPublic => self.search_public_key().map(|_| ())?,
                KeyName::EncryptedSearchPrivate => {
                    self.encrypted_search_private_key().map(|_| ())?
                }
                KeyName::LeftHasher => self.left_hasher().map(|_| ())?,
                KeyName::RightHasher => self.right_hasher().map(|_| ())?,
            }
        }
        if self.search_private_key()?.public_key() != self.search_public_key()? {
            return Err(EngineError::Validation(
                "search public key does not match search private key".into(),
            ));
        }
        Ok(())
    }

    /// Drops a key and re-signs the container.
    pub fn remove_key(&mut self, name: KeyName) -> EngineResult<()> {
        let unsealed = self.unsealed.as_mut().ok_or(EngineError::SealedContainer)?;
        if unsealed.keys.remove(&name).is_some() {
            self.reseal()?;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn identity(&self) -> EngineResult<&IdentityKeyPair> {
        self.key_bytes(KeyName::IdentityKey)?;
        let unsealed = self.unsealed.as_ref().ok_or(EngineError::SealedContainer)?;
        Ok(&unsealed.identity)
    }

    pub fn search_private_key(&self) -> EngineResult<SearchSecret> {
        self.parse(KeyName::SearchPrivate, SearchSecret::from_slice)
    }

    pub fn search_public_key(&self) -> EngineResult<SearchPublicKey> {
        self.parse(KeyName::SearchPublic, SearchPublicKey::from_slice)
    }

    pub fn encrypted_search_private_key(&self) -> EngineResult<SearchSecret> {
        self.parse(KeyName::EncryptedSearchPrivate, SearchSecret::from_slice)
    }

    pub fn left_hasher(&self) -> EngineResult<Hasher> {
        self.parse(KeyName::LeftHasher, Hasher::from_slice)
    }

    pub fn right_hasher(&self) -> EngineResult<Hasher> {
        self.parse(KeyName::RightHasher, Hasher::from_slice)
    }

    /// The search primitive keyed by this container.
    pub fn search_scheme(&self) -> EngineResult<KeyedHashScheme> {
        Ok(KeyedHashScheme::new(
            self.left_hasher()?,
            self.right_hasher()?,
            self.encrypted_search_private_key()?,
        ))
    }

    fn key_bytes(&self, name: KeyName) -> EngineResult<&[u8]> {
        let unsealed = self.unsealed.as_ref().ok_or(EngineError::SealedContainer)?;
        unsealed
            .keys
            .get(&name)
            .map(|key| key.as_slice())
            .ok_or_else(|| EngineError::IncompleteContainer(name.to_string()))
    }

    fn parse<T>(&self, name: KeyName, parse: impl Fn(&[u8]) -> CryptoResult<T>) -> EngineResult<T> {
        parse(self.key_bytes(name)?)
            .map_err(|e| EngineError::Validation(format!("malformed {name}: {e}")))
    }

    fn reseal(&mut self) -> EngineResult<()> {
        let unsealed = self.unsealed.as_ref().ok_or(EngineError::SealedContainer)?;
        let recipient = unsealed.identity.public();

        let mut entries = BTreeMap::new();
        for (name, plaintext) in &unsealed.keys {
            entries.insert(*name, seal(plaintext, &recipient)?.to_bytes());
        }
        self.sealed.entries = entries;
        self.sealed.owner_public_key = recipient.to_bytes().to_vec();
        self.sealed.signature = unsealed
            .identity
            .sign(&self.sealed.signing_payload()?)
            .to_vec();
        Ok(())
    }
}

impl fmt::Debug for KeyContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyContainer")
            .field("owner", &self.sealed.owner)
            .field("sealed", &self.is_sealed())
            .field("dirty", &self.dirty)
            .field("entries", &self.sealed.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
