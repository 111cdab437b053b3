//! In-process collaborators backed by shared maps.
//!
//! One [`MemoryBackend`] plays the whole remote side: every user gets a
//! [`KeyStore`] and [`SharingService`] view scoped to them, and all users
//! share one [`IndexStore`]. Used by tests and by embedders that run the
//! engine without a server.

use crate::error::{EngineError, EngineResult};
use crate::remote::{Collaborators, IndexStore, KeyStore, LocalStore, SharingService};
use crate::types::{
    IncomingShare, ObjectKeyId, PublishedKeys, RegisterKeysRequest, ShareRequest, UserId,
};
use async_trait::async_trait;
use chrono::Utc;
use kodex_crypto::IndexAddress;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct BackendState {
    crypto_services: HashMap<UserId, HashMap<ObjectKeyId, Vec<u8>>>,
    containers: HashMap<UserId, Vec<u8>>,
    identity_keys: HashMap<UserId, Vec<u8>>,
    published: HashMap<UserId, PublishedKeys>,
    incoming: HashMap<UserId, Vec<IncomingShare>>,
    share_requests: Vec<ShareRequest>,
    registered: Vec<RegisterKeysRequest>,
    index: HashMap<IndexAddress, Vec<Vec<u8>>>,
}

/// Shared in-memory remote state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<BackendState>>,
    offline: Arc<AtomicBool>,
    key_fetches: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_store(&self, user: impl Into<UserId>) -> MemoryKeyStore {
        MemoryKeyStore {
            backend: self.clone(),
            user: user.into(),
        }
    }

    pub fn sharing(&self, user: impl Into<UserId>) -> MemorySharingService {
        MemorySharingService {
            backend: self.clone(),
            user: user.into(),
        }
    }

    pub fn index_store(&self) -> MemoryIndexStore {
        MemoryIndexStore {
            backend: self.clone(),
        }
    }

    /// Collaborators for one user, with the given local store.
    pub fn collaborators(
        &self,
        user: impl Into<UserId>,
        local: Arc<dyn LocalStore>,
    ) -> Collaborators {
        let user = user.into();
        Collaborators {
            key_store: Arc::new(self.key_store(user.clone())),
            sharing: Arc::new(self.sharing(user)),
            index_store: Arc::new(self.index_store()),
            local,
        }
    }

    /// While offline, every remote call fails with a fetch error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of crypto-service reads served so far (single and bulk).
    pub fn crypto_service_fetches(&self) -> usize {
        self.key_fetches.load(Ordering::SeqCst)
    }

    pub async fn stored_crypto_service(&self, user: &UserId, id: &ObjectKeyId) -> Option<Vec<u8>> {
        self.state
            .read()
            .await
            .crypto_services
            .get(user)
            .and_then(|services| services.get(id))
            .cloned()
    }

    pub async fn remove_crypto_service(&self, user: &UserId, id: &ObjectKeyId) {
        if let Some(services) = self.state.write().await.crypto_services.get_mut(user) {
            services.remove(id);
        }
    }

    pub async fn stored_container(&self, user: &UserId) -> Option<Vec<u8>> {
        self.state.read().await.containers.get(user).cloned()
    }

    pub async fn published_keys(&self, user: &UserId) -> Option<PublishedKeys> {
        self.state.read().await.published.get(user).cloned()
    }

    pub async fn share_requests(&self) -> Vec<ShareRequest> {
        self.state.read().await.share_requests.clone()
    }

    pub async fn registered_keys(&self) -> Vec<RegisterKeysRequest> {
        self.state.read().await.registered.clone()
    }

    pub async fn index_entries(&self, address: &IndexAddress) -> Vec<Vec<u8>> {
        self.state
            .read()
            .await
            .index
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn index_address_count(&self) -> usize {
        self.state.read().await.index.len()
    }

    fn check_online(&self, operation: &str) -> EngineResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(EngineError::Fetch(format!("{operation}: backend offline")));
        }
        Ok(())
    }
}

/// Key store view for one user.
#[derive(Clone)]
pub struct MemoryKeyStore {
    backend: MemoryBackend,
    user: UserId,
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_crypto_service(&self, id: &ObjectKeyId) -> EngineResult<Option<Vec<u8>>> {
        self.backend.check_online("get_crypto_service")?;
        self.backend.key_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.backend.stored_crypto_service(&self.user, id).await)
    }

    async fn get_crypto_services(
        &self,
        ids: &[ObjectKeyId],
    ) -> EngineResult<HashMap<ObjectKeyId, Vec<u8>>> {
        self.backend.check_online("get_crypto_services")?;
        self.backend.key_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.backend.state.read().await;
        let Some(services) = state.crypto_services.get(&self.user) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| services.get(id).map(|bytes| (id.clone(), bytes.clone())))
            .collect())
    }

    async fn set_crypto_service(&self, id: &ObjectKeyId, wrapped: Vec<u8>) -> EngineResult<()> {
        self.backend.check_online("set_crypto_service")?;
        self.backend
            .state
            .write()
            .await
            .crypto_services
            .entry(self.user.clone())
            .or_default()
            .insert(id.clone(), wrapped);
        Ok(())
    }

    async fn get_public_key(&self, user: &UserId) -> EngineResult<Option<Vec<u8>>> {
        self.backend.check_online("get_public_key")?;
        Ok(self
            .backend
            .published_keys(user)
            .await
            .map(|keys| keys.identity_public_key))
    }

    async fn get_container(&self) -> EngineResult<Option<Vec<u8>>> {
        self.backend.check_online("get_container")?;
        Ok(self.backend.stored_container(&self.user).await)
    }

    async fn set_container(&self, bytes: Vec<u8>) -> EngineResult<()> {
        self.backend.check_online("set_container")?;
        self.backend
            .state
            .write()
            .await
            .containers
            .insert(self.user.clone(), bytes);
        Ok(())
    }

    async fn get_identity_key(&self) -> EngineResult<Option<Vec<u8>>> {
        self.backend.check_online("get_identity_key")?;
        Ok(self
            .backend
            .state
            .read()
            .await
            .identity_keys
            .get(&self.user)
            .cloned())
    }

    async fn set_identity_key(&self, bytes: Vec<u8>) -> EngineResult<()> {
        self.backend.check_online("set_identity_key")?;
        self.backend
            .state
            .write()
            .await
            .identity_keys
            .insert(self.user.clone(), bytes);
        Ok(())
    }

    async fn publish_public_keys(&self, keys: &PublishedKeys) -> EngineResult<()> {
        self.backend.check_online("publish_public_keys")?;
        if keys.user != self.user {
            return Err(EngineError::Security(format!(
                "{} cannot publish keys for {}",
                self.user, keys.user
            )));
        }
        self.backend
            .state
            .write()
            .await
            .published
            .insert(self.user.clone(), keys.clone());
        Ok(())
    }
}

/// Sharing service view for one user.
#[derive(Clone)]
pub struct MemorySharingService {
    backend: MemoryBackend,
    user: UserId,
}

#[async_trait]
impl SharingService for MemorySharingService {
    async fn share_document(&self, request: &ShareRequest) -> EngineResult<()> {
        self.backend.check_online("share_document")?;
        let mut state = self.backend.state.write().await;
        for grant in &request.grants {
            debug!(document = %request.document, grantee = %grant.grantee, "queueing share");
            state
                .incoming
                .entry(grant.grantee.clone())
                .or_default()
                .push(IncomingShare {
                    share_id: Uuid::new_v4(),
                    document: request.document.clone(),
                    owner: request.owner.clone(),
                    wrapped_service: grant.wrapped_service.clone(),
                    wrapped_sharing_key: grant.wrapped_sharing_key.clone(),
                    shared_at: Utc::now(),
                });
        }
        state.share_requests.push(request.clone());
        Ok(())
    }

    async fn get_incoming_shares(&self) -> EngineResult<Option<Vec<IncomingShare>>> {
        self.backend.check_online("get_incoming_shares")?;
        Ok(self.backend.state.read().await.incoming.get(&self.user).cloned())
    }

    async fn register_keys(&self, request: &RegisterKeysRequest) -> EngineResult<()> {
        self.backend.check_online("register_keys")?;
        self.backend
            .state
            .write()
            .await
            .registered
            .push(request.clone());
        Ok(())
    }

    async fn remove_incoming_share(&self, share_id: Uuid) -> EngineResult<()> {
        self.backend.check_online("remove_incoming_share")?;
        let mut state = self.backend.state.write().await;
        let queue = state.incoming.entry(self.user.clone()).or_default();
        let before = queue.len();
        queue.retain(|share| share.share_id != share_id);
        if queue.len() == before {
            return Err(EngineError::NotFound(format!("incoming share {share_id}")));
        }
        Ok(())
    }
}

/// Index store shared by all users of a backend.
#[derive(Clone)]
pub struct MemoryIndexStore {
    backend: MemoryBackend,
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn put_entries(
        &self,
        address: &IndexAddress,
        entries: Vec<Vec<u8>>,
    ) -> EngineResult<()> {
        self.backend.check_online("put_entries")?;
        self.backend
            .state
            .write()
            .await
            .index
            .entry(*address)
            .or_default()
            .extend(entries);
        Ok(())
    }
}
