use super::{
    CONTAINER_NAMESPACE, ContainerLoader, ContainerSource, container_key, identity_key,
    open_container,
};
use crate::config::Credentials;
use crate::container::KeyContainer;
use crate::error::{EngineError, EngineResult};
use crate::remote::LocalStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Loads the container cached in local storage.
pub struct LocalLoader {
    local: Arc<dyn LocalStore>,
    credentials: Credentials,
}

impl LocalLoader {
    pub fn new(local: Arc<dyn LocalStore>, credentials: Credentials) -> Self {
        Self { local, credentials }
    }
}

#[async_trait]
impl ContainerLoader for LocalLoader {
    fn source(&self) -> ContainerSource {
        ContainerSource::Local
    }

    async fn try_load(&self) -> EngineResult<KeyContainer> {
        let container = self
            .local
            .get(CONTAINER_NAMESPACE, &container_key(&self.credentials))
            .await?
            .ok_or_else(|| EngineError::NotFound("local container".into()))?;
        let identity = self
            .local
            .get(CONTAINER_NAMESPACE, &identity_key(&self.credentials))
            .await?
            .ok_or_else(|| EngineError::NotFound("local identity key".into()))?;

        open_container(&container, &identity, &self.credentials)
    }
}
