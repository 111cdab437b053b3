//! Shared test helpers: fast config, credentials, and connections over an
//! in-memory backend.

#![allow(dead_code)]

use async_trait::async_trait;
use kodex_crypto::{IdentityKeyPair, KdfParams};
use kodex_engine::local_store::MemoryLocalStore;
use kodex_engine::memory::{MemoryBackend, MemoryKeyStore};
use kodex_engine::{
    Collaborators, Connection, CryptoServiceCache, Credentials, EngineConfig, EngineError,
    EngineResult, KeyContainer, KeyStore, ObjectKeyId, PublishedKeys, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default config with cheap Argon2 parameters.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        kdf_params: KdfParams::insecure_fast(),
        ..EngineConfig::default()
    }
}

pub fn credentials(user: &str) -> Credentials {
    Credentials::new(user, format!("{user}-password"))
}

/// A complete, unsealed container for `user`.
pub fn fresh_container(user: &str) -> KeyContainer {
    KeyContainer::generate(UserId::from(user), IdentityKeyPair::generate())
        .expect("container generation must succeed")
}

pub struct TestUser {
    pub connection: Connection,
    pub local: MemoryLocalStore,
    pub collaborators: Collaborators,
}

/// Opens a connection for `user` with its own local store.
pub async fn connect(backend: &MemoryBackend, user: &str) -> TestUser {
    connect_with_local(backend, user, MemoryLocalStore::new()).await
}

pub async fn connect_with_local(
    backend: &MemoryBackend,
    user: &str,
    local: MemoryLocalStore,
) -> TestUser {
    let collaborators = backend.collaborators(user, Arc::new(local.clone()));
    let connection = Connection::open(test_config(), credentials(user), collaborators.clone())
        .await
        .expect("connection must open");
    TestUser {
        connection,
        local,
        collaborators,
    }
}

/// A standalone cache over `backend` for `user`'s key store.
pub fn cache_for(backend: &MemoryBackend, user: &str, container: KeyContainer) -> CryptoServiceCache {
    CryptoServiceCache::new(
        &test_config(),
        Arc::new(backend.key_store(user)),
        Arc::new(container),
    )
}

/// Key store over the in-memory backend with injectable faults.
pub struct FaultyKeyStore {
    inner: MemoryKeyStore,
    first_service_write_delay: Option<Duration>,
    service_written: AtomicBool,
    fail_set_container: bool,
}

impl FaultyKeyStore {
    pub fn new(inner: MemoryKeyStore) -> Self {
        Self {
            inner,
            first_service_write_delay: None,
            service_written: AtomicBool::new(false),
            fail_set_container: false,
        }
    }

    /// Delays only the first `set_crypto_service` call.
    pub fn slow_first_service_write(mut self, delay: Duration) -> Self {
        self.first_service_write_delay = Some(delay);
        self
    }

    pub fn failing_set_container(mut self) -> Self {
        self.fail_set_container = true;
        self
    }
}

#[async_trait]
impl KeyStore for FaultyKeyStore {
    async fn get_crypto_service(&self, id: &ObjectKeyId) -> EngineResult<Option<Vec<u8>>> {
        self.inner.get_crypto_service(id).await
    }

    async fn get_crypto_services(
        &self,
        ids: &[ObjectKeyId],
    ) -> EngineResult<HashMap<ObjectKeyId, Vec<u8>>> {
        self.inner.get_crypto_services(ids).await
    }

    async fn set_crypto_service(&self, id: &ObjectKeyId, wrapped: Vec<u8>) -> EngineResult<()> {
        if !self.service_written.swap(true, Ordering::SeqCst) {
            if let Some(delay) = self.first_service_write_delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.inner.set_crypto_service(id, wrapped).await
    }

    async fn get_public_key(&self, user: &UserId) -> EngineResult<Option<Vec<u8>>> {
        self.inner.get_public_key(user).await
    }

    async fn get_container(&self) -> EngineResult<Option<Vec<u8>>> {
        self.inner.get_container().await
    }

    async fn set_container(&self, bytes: Vec<u8>) -> EngineResult<()> {
        if self.fail_set_container {
            return Err(EngineError::Fetch("set_container: injected failure".into()));
        }
        self.inner.set_container(bytes).await
    }

    async fn get_identity_key(&self) -> EngineResult<Option<Vec<u8>>> {
        self.inner.get_identity_key().await
    }

    async fn set_identity_key(&self, bytes: Vec<u8>) -> EngineResult<()> {
        self.inner.set_identity_key(bytes).await
    }

    async fn publish_public_keys(&self, keys: &PublishedKeys) -> EngineResult<()> {
        self.inner.publish_public_keys(keys).await
    }
}
