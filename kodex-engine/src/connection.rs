//! Per-user engine connection.
//!
//! Opening a connection loads the key container, persists it if needed, and
//! wires the cache, index mapper, uploader and sharing manager around one
//! shared read-only container. All state is per connection.

use crate::config::{Credentials, EngineConfig};
use crate::container::KeyContainer;
use crate::crypto_cache::CryptoServiceCache;
use crate::error::EngineResult;
use crate::index::{IndexMapper, IndexUploader, TokenMetadata};
use crate::loader::{
    CONTAINER_NAMESPACE, ContainerSource, LoadedContainer, LoaderChain, container_key,
    identity_key,
};
use crate::remote::{Collaborators, with_timeout};
use crate::sharing::SharingManager;
use crate::types::{ObjectKeyId, PublishedKeys, UserId};
use kodex_crypto::{EncryptedData, SearchScheme, encrypt_private_key};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Connection {
    config: EngineConfig,
    container: Arc<KeyContainer>,
    source: ContainerSource,
    cache: Arc<CryptoServiceCache>,
    mapper: IndexMapper,
    uploader: IndexUploader,
    sharing: SharingManager,
}

impl Connection {
    /// Opens a connection with the standard loader chain.
    pub async fn open(
        config: EngineConfig,
        credentials: Credentials,
        collaborators: Collaborators,
    ) -> EngineResult<Self> {
        config.validate()?;
        let chain = LoaderChain::standard(&config, &credentials, &collaborators);
        Self::open_with(config, credentials, collaborators, chain).await
    }

    /// Opens a connection with a caller-supplied loader chain.
    pub async fn open_with(
        config: EngineConfig,
        credentials: Credentials,
        collaborators: Collaborators,
        chain: LoaderChain,
    ) -> EngineResult<Self> {
        config.validate()?;
        let LoadedContainer {
            mut container,
            source,
        } = chain.run().await?;
        persist(&config, &credentials, &collaborators, &mut container, source).await?;
        if source == ContainerSource::Fresh && config.publish_public_material {
            publish(&config, &collaborators, &container).await;
        }

        let container = Arc::new(container);
        let scheme: Arc<dyn SearchScheme> = Arc::new(container.search_scheme()?);
        let cache = Arc::new(CryptoServiceCache::new(
            &config,
            collaborators.key_store.clone(),
            Arc::clone(&container),
        ));
        let mapper = IndexMapper::new(Arc::clone(&scheme), &config);
        let uploader = IndexUploader::new(collaborators.index_store.clone(), &config);
        let sharing = SharingManager::new(
            Arc::clone(&container),
            scheme,
            Arc::clone(&cache),
            collaborators.key_store.clone(),
            collaborators.sharing.clone(),
            collaborators.local.clone(),
            config.upload_workers,
            config.remote_timeout(),
        );

        info!(user = %container.owner(), %source, "connection open");
        Ok(Self {
            config,
            container,
            source,
            cache,
            mapper,
            uploader,
            sharing,
        })
    }

    pub fn user(&self) -> &UserId {
        self.container.owner()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn container(&self) -> &KeyContainer {
        &self.container
    }

    /// Which loader produced the container.
    pub fn source(&self) -> ContainerSource {
        self.source
    }

    pub fn cache(&self) -> &CryptoServiceCache {
        &self.cache
    }

    pub fn mapper(&self) -> &IndexMapper {
        &self.mapper
    }

    pub fn sharing(&self) -> &SharingManager {
        &self.sharing
    }

    /// Encrypts an object body with the object's crypto service.
    ///
    /// Fails rather than returning plaintext when no service is available.
    pub async fn encrypt_object(&self, id: &ObjectKeyId, plaintext: &[u8]) -> EngineResult<Vec<u8>> {
        let service = self.cache.try_get(id).await?;
        let encrypted = service.encrypt(plaintext)?;
        encrypted.check(service.algorithm())?;
        Ok(serde_json::to_vec(&encrypted)?)
    }

    pub async fn decrypt_object(&self, id: &ObjectKeyId, bytes: &[u8]) -> EngineResult<Vec<u8>> {
        let service = self.cache.try_get(id).await?;
        let encrypted: EncryptedData = serde_json::from_slice(bytes)?;
        Ok(service.decrypt(&encrypted)?)
    }

    /// Builds and uploads the search index of one object, provisioning its
    /// sharing key if needed. Returns the number of addresses written.
    pub async fn index_object(
        &self,
        id: &ObjectKeyId,
        metadata: &[TokenMetadata],
    ) -> EngineResult<usize> {
        let sharing_key = self.sharing.provision_sharing_key(id).await?;
        let index = self
            .mapper
            .map_tokens_to_keys(metadata, &sharing_key.index_secret())?;
        let service = self.cache.try_get(id).await?;
        self.uploader.upload(index, &service).await
    }
}

/// Writes the container where it is missing.
///
/// A dirty container goes to the key service and local storage; a clean
/// container that came from the network is cached locally.
async fn persist(
    config: &EngineConfig,
    credentials: &Credentials,
    collaborators: &Collaborators,
    container: &mut KeyContainer,
    source: ContainerSource,
) -> EngineResult<()> {
    let remote = container.is_dirty();
    let local = remote || source == ContainerSource::Network;
    if !local {
        return Ok(());
    }

    let container_bytes = container.to_bytes()?;
    let protected = encrypt_private_key(
        container.identity()?,
        &credentials.password,
        &config.kdf_params,
    )?;
    let identity_bytes = serde_json::to_vec(&protected)?;

    if remote {
        let key_store = &collaborators.key_store;
        let timeout = config.remote_timeout();
        with_timeout(
            timeout,
            "set_identity_key",
            key_store.set_identity_key(identity_bytes.clone()),
        )
        .await?;
        with_timeout(
            timeout,
            "set_container",
            key_store.set_container(container_bytes.clone()),
        )
        .await?;
        debug!(user = %credentials.user_id, "persisted container remotely");
    }

    collaborators
        .local
        .put(CONTAINER_NAMESPACE, &identity_key(credentials), identity_bytes)
        .await?;
    collaborators
        .local
        .put(CONTAINER_NAMESPACE, &container_key(credentials), container_bytes)
        .await?;
    container.mark_persisted();
    debug!(user = %credentials.user_id, %source, "persisted container locally");
    Ok(())
}

/// Publishes a freshly generated container's public keys so other users
/// can share with its owner. Runs only once the container is persisted; a
/// failed publish is logged and the connection stays usable.
async fn publish(config: &EngineConfig, collaborators: &Collaborators, container: &KeyContainer) {
    let keys = match public_keys(container) {
        Ok(keys) => keys,
        Err(err) => {
            warn!(user = %container.owner(), error = %err, "cannot derive public keys");
            return;
        }
    };
    match with_timeout(
        config.remote_timeout(),
        "publish_public_keys",
        collaborators.key_store.publish_public_keys(&keys),
    )
    .await
    {
        Ok(()) => info!(user = %container.owner(), "published public keys"),
        Err(err) => warn!(user = %container.owner(), error = %err, "failed to publish public keys"),
    }
}

fn public_keys(container: &KeyContainer) -> EngineResult<PublishedKeys> {
    Ok(PublishedKeys {
        user: container.owner().clone(),
        identity_public_key: container.identity()?.public().to_bytes().to_vec(),
        search_public_key: container.search_public_key()?.as_bytes().to_vec(),
    })
}
