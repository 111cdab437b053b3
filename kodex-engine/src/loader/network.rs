use super::{ContainerLoader, ContainerSource, open_container};
use crate::config::Credentials;
use crate::container::KeyContainer;
use crate::error::{EngineError, EngineResult};
use crate::remote::{KeyStore, with_timeout};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Loads the container and identity key from the remote key service.
pub struct NetworkLoader {
    key_store: Arc<dyn KeyStore>,
    credentials: Credentials,
    timeout: Duration,
}

impl NetworkLoader {
    pub fn new(key_store: Arc<dyn KeyStore>, credentials: Credentials, timeout: Duration) -> Self {
        Self {
            key_store,
            credentials,
            timeout,
        }
    }
}

#[async_trait]
impl ContainerLoader for NetworkLoader {
    fn source(&self) -> ContainerSource {
        ContainerSource::Network
    }

    async fn try_load(&self) -> EngineResult<KeyContainer> {
        let container = with_timeout(self.timeout, "get_container", self.key_store.get_container())
            .await?
            .ok_or_else(|| EngineError::NotFound("remote container".into()))?;
        let identity = with_timeout(
            self.timeout,
            "get_identity_key",
            self.key_store.get_identity_key(),
        )
        .await?
        .ok_or_else(|| EngineError::NotFound("remote identity key".into()))?;
        debug!(len = container.len(), "fetched remote container");

        open_container(&container, &identity, &self.credentials)
    }
}
