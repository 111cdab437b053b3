//! Key container loading.
//!
//! A [`LoaderChain`] tries its loaders in order. A loader that fails is
//! logged and skipped. The first container that loads is validated; an
//! invalid container aborts the chain with [`EngineError::NoContainer`]
//! unless the chain was built to fall through on invalid containers.
//!
//! The standard chain is local storage, then the network, then fresh
//! generation.

mod fresh;
mod local;
mod network;

pub use fresh::FreshLoader;
pub use local::LocalLoader;
pub use network::NetworkLoader;

use crate::config::{Credentials, EngineConfig};
use crate::container::KeyContainer;
use crate::error::{EngineError, EngineResult};
use crate::remote::Collaborators;
use async_trait::async_trait;
use kodex_crypto::{PassphraseProtectedKey, decrypt_private_key};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Local storage namespace holding the container and identity key.
pub const CONTAINER_NAMESPACE: &str = "container";

/// Where a container came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerSource {
    Local,
    Network,
    Fresh,
}

impl fmt::Display for ContainerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContainerSource::Local => "local",
            ContainerSource::Network => "network",
            ContainerSource::Fresh => "fresh",
        })
    }
}

/// One strategy for obtaining an unsealed container.
#[async_trait]
pub trait ContainerLoader: Send + Sync {
    fn source(&self) -> ContainerSource;

    /// Produces an unsealed container, or fails.
    async fn try_load(&self) -> EngineResult<KeyContainer>;

    fn validate(&self, container: &KeyContainer) -> EngineResult<()> {
        container.validate()
    }

    /// `try_load` followed by `validate`.
    async fn load(&self) -> EngineResult<KeyContainer> {
        let container = self.try_load().await?;
        self.validate(&container)?;
        Ok(container)
    }
}

/// A container together with the loader that produced it.
#[derive(Debug)]
pub struct LoadedContainer {
    pub container: KeyContainer,
    pub source: ContainerSource,
}

/// Ordered list of loaders.
pub struct LoaderChain {
    loaders: Vec<Box<dyn ContainerLoader>>,
    fall_through_on_invalid: bool,
}

impl LoaderChain {
    pub fn new(fall_through_on_invalid: bool) -> Self {
        Self {
            loaders: Vec::new(),
            fall_through_on_invalid,
        }
    }

    /// Local, then network, then fresh.
    pub fn standard(
        config: &EngineConfig,
        credentials: &Credentials,
        collaborators: &Collaborators,
    ) -> Self {
        Self::new(config.fall_through_on_invalid)
            .with(LocalLoader::new(
                collaborators.local.clone(),
                credentials.clone(),
            ))
            .with(NetworkLoader::new(
                collaborators.key_store.clone(),
                credentials.clone(),
                config.remote_timeout(),
            ))
            .with(FreshLoader::new(
                collaborators.key_store.clone(),
                credentials.user_id.clone(),
                config.remote_timeout(),
            ))
    }

    pub fn with(mut self, loader: impl ContainerLoader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    pub async fn run(&self) -> EngineResult<LoadedContainer> {
        for loader in &self.loaders {
            let source = loader.source();
            debug!(%source, "trying container loader");

            let container = match loader.try_load().await {
                Ok(container) => container,
                Err(err) => {
                    warn!(%source, error = %err, "container loader failed, trying next");
                    continue;
                }
            };

            match loader.validate(&container) {
                Ok(()) => {
                    info!(%source, owner = %container.owner(), "key container loaded");
                    return Ok(LoadedContainer { container, source });
                }
                Err(err) if self.fall_through_on_invalid => {
                    warn!(%source, error = %err, "loaded container is invalid, trying next");
                }
                Err(err) => {
                    error!(%source, error = %err, "loaded container is invalid");
                    return Err(EngineError::NoContainer);
                }
            }
        }
        Err(EngineError::NoContainer)
    }
}

/// Local storage key of a user's container.
pub fn container_key(credentials: &Credentials) -> String {
    format!("{}.container", credentials.user_id)
}

/// Local storage key of a user's password-protected identity key.
pub fn identity_key(credentials: &Credentials) -> String {
    format!("{}.identity", credentials.user_id)
}

/// Decrypts the identity key and unseals the container with it.
fn open_container(
    container_bytes: &[u8],
    identity_bytes: &[u8],
    credentials: &Credentials,
) -> EngineResult<KeyContainer> {
    let protected: PassphraseProtectedKey = serde_json::from_slice(identity_bytes)?;
    let identity = decrypt_private_key(&protected, &credentials.password)?;

    let mut container = KeyContainer::from_bytes(container_bytes)?;
    if container.owner() != &credentials.user_id {
        return Err(EngineError::Security(format!(
            "container belongs to {}, not {}",
            container.owner(),
            credentials.user_id
        )));
    }
    container.unseal(identity)?;
    Ok(container)
}
