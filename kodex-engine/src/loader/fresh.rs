use super::{ContainerLoader, ContainerSource};
use crate::container::KeyContainer;
use crate::error::{EngineError, EngineResult};
use crate::remote::{KeyStore, with_timeout};
use crate::types::UserId;
use async_trait::async_trait;
use kodex_crypto::IdentityKeyPair;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Generates a brand-new identity and container.
///
/// Nothing is written remotely here. The connection persists the container
/// and only then publishes its public keys.
///
/// Refuses to run while the key service holds a container for the user,
/// or when that cannot be checked, so an outage never replaces an
/// existing identity.
pub struct FreshLoader {
    key_store: Arc<dyn KeyStore>,
    owner: UserId,
    timeout: Duration,
}

impl FreshLoader {
    pub fn new(key_store: Arc<dyn KeyStore>, owner: UserId, timeout: Duration) -> Self {
        Self {
            key_store,
            owner,
            timeout,
        }
    }
}

#[async_trait]
impl ContainerLoader for FreshLoader {
    fn source(&self) -> ContainerSource {
        ContainerSource::Fresh
    }

    async fn try_load(&self) -> EngineResult<KeyContainer> {
        let existing =
            with_timeout(self.timeout, "get_container", self.key_store.get_container()).await?;
        if existing.is_some() {
            return Err(EngineError::Validation(format!(
                "{} already has a remote container",
                self.owner
            )));
        }

        let container = KeyContainer::generate(self.owner.clone(), IdentityKeyPair::generate())?;
        info!(owner = %self.owner, "generated fresh key container");

        Ok(container)
    }
}
