//! Collaborator contracts the engine calls but does not implement.
//!
//! Transport is entirely external: implementations may speak HTTP, talk to
//! a local daemon, or keep everything in memory (see [`crate::memory`]).
//! All payloads that carry key material are opaque sealed-envelope bytes.

use crate::error::{EngineError, EngineResult};
use crate::types::{
    IncomingShare, ObjectKeyId, PublishedKeys, RegisterKeysRequest, ShareRequest, UserId,
};
use async_trait::async_trait;
use kodex_crypto::IndexAddress;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Remote key service, scoped to the authenticated user.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Wrapped crypto service for one object, `None` if never stored.
    async fn get_crypto_service(&self, id: &ObjectKeyId) -> EngineResult<Option<Vec<u8>>>;

    /// Wrapped crypto services for many objects. Missing ids are absent
    /// from the returned map.
    async fn get_crypto_services(
        &self,
        ids: &[ObjectKeyId],
    ) -> EngineResult<HashMap<ObjectKeyId, Vec<u8>>>;

    async fn set_crypto_service(&self, id: &ObjectKeyId, wrapped: Vec<u8>) -> EngineResult<()>;

    /// Published identity public key of any user.
    async fn get_public_key(&self, user: &UserId) -> EngineResult<Option<Vec<u8>>>;

    async fn get_container(&self) -> EngineResult<Option<Vec<u8>>>;

    async fn set_container(&self, bytes: Vec<u8>) -> EngineResult<()>;

    /// Password-protected identity key.
    async fn get_identity_key(&self) -> EngineResult<Option<Vec<u8>>>;

    async fn set_identity_key(&self, bytes: Vec<u8>) -> EngineResult<()>;

    async fn publish_public_keys(&self, keys: &PublishedKeys) -> EngineResult<()>;
}

/// Remote sharing service, scoped to the authenticated user.
#[async_trait]
pub trait SharingService: Send + Sync {
    async fn share_document(&self, request: &ShareRequest) -> EngineResult<()>;

    /// Pending shares. `None` when the service has nothing on record.
    async fn get_incoming_shares(&self) -> EngineResult<Option<Vec<IncomingShare>>>;

    async fn register_keys(&self, request: &RegisterKeysRequest) -> EngineResult<()>;

    async fn remove_incoming_share(&self, share_id: Uuid) -> EngineResult<()>;
}

/// Remote store for encrypted index buckets.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Appends encrypted entries under an index address. Existing entries
    /// at the same address are kept.
    async fn put_entries(&self, address: &IndexAddress, entries: Vec<Vec<u8>>)
    -> EngineResult<()>;
}

/// Persistent local key/value storage.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> EngineResult<Option<Vec<u8>>>;

    async fn put(&self, namespace: &str, key: &str, bytes: Vec<u8>) -> EngineResult<()>;
}

/// The collaborators one connection talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub key_store: Arc<dyn KeyStore>,
    pub sharing: Arc<dyn SharingService>,
    pub index_store: Arc<dyn IndexStore>,
    pub local: Arc<dyn LocalStore>,
}

/// Runs a remote call under a deadline. An elapsed deadline surfaces as
/// the retryable [`EngineError::Timeout`].
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    operation: &str,
    call: impl Future<Output = EngineResult<T>>,
) -> EngineResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}
