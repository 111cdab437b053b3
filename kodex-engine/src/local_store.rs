//! Local persistent stores.

use crate::error::{EngineError, EngineResult};
use crate::remote::LocalStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Filesystem store: one directory per namespace, one file per key.
///
/// Namespaces and keys are hex-encoded into path components, so any string
/// is a valid key. Each write goes to its own temporary file and is renamed
/// into place, so concurrent writers to one key never share a temp file.
#[derive(Clone, Debug)]
pub struct FsLocalStore {
    root: PathBuf,
}

impl FsLocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, namespace: &str, key: &str) -> EngineResult<PathBuf> {
        if namespace.is_empty() {
            return Err(EngineError::Storage("empty namespace".into()));
        }
        Ok(self
            .root
            .join(hex::encode(namespace))
            .join(hex::encode(key)))
    }
}

#[async_trait]
impl LocalStore for FsLocalStore {
    async fn get(&self, namespace: &str, key: &str) -> EngineResult<Option<Vec<u8>>> {
        let path = self.path_for(namespace, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Storage(format!(
                "read {namespace}/{key} failed: {e}"
            ))),
        }
    }

    async fn put(&self, namespace: &str, key: &str, bytes: Vec<u8>) -> EngineResult<()> {
        let path = self.path_for(namespace, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        debug!(namespace, key, len = bytes.len(), "wrote local entry");
        Ok(())
    }
}

/// In-memory store, for tests and ephemeral sessions.
#[derive(Clone, Default)]
pub struct MemoryLocalStore {
    entries: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn remove(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.entries
            .write()
            .await
            .remove(&(namespace.to_string(), key.to_string()))
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, namespace: &str, key: &str) -> EngineResult<Option<Vec<u8>>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, bytes: Vec<u8>) -> EngineResult<()> {
        self.entries
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), bytes);
        Ok(())
    }
}
