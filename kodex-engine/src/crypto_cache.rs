//! Bounded cache of per-object crypto services.
//!
//! Misses are loaded from the remote key store and unwrapped with the
//! owner's identity. Concurrent misses for one id share a single in-flight
//! load. An id the key store has never seen gets a freshly generated
//! service, which is persisted remotely in the background. That is a
//! create-on-first-access policy, not a conditional put: two processes that
//! miss on the same new id at once both create a key and the last remote
//! write wins.
//!
//! Within one cache, remote loads and writes of an id are serialized: a
//! `put` lands after the background persist of an auto-created service, and
//! a load after `clear` waits for writes still in flight.

use crate::config::EngineConfig;
use crate::container::KeyContainer;
use crate::error::{EngineError, EngineResult};
use crate::remote::{KeyStore, with_timeout};
use crate::types::ObjectKeyId;
use kodex_crypto::{CryptoService, SealedEnvelope, unwrap_service, wrap_service};
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// One cached id. Concurrent misses queue on the mutex behind a single load.
#[derive(Default)]
struct Slot {
    service: Mutex<Option<Arc<CryptoService>>>,
}

/// Per-id locks ordering remote reads and writes of one crypto service.
///
/// A lock lives as long as someone holds or awaits it, independent of cache
/// eviction, so a background persist still orders later loads after
/// `clear`.
#[derive(Default)]
struct WriteLocks {
    locks: std::sync::Mutex<HashMap<ObjectKeyId, Weak<Mutex<()>>>>,
}

impl WriteLocks {
    async fn lock(&self, id: &ObjectKeyId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            match locks.get(id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    locks.retain(|_, lock| lock.strong_count() > 0);
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(id.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }
}

/// Per-connection cache mapping object ids to crypto services.
pub struct CryptoServiceCache {
    slots: Cache<ObjectKeyId, Arc<Slot>>,
    writes: WriteLocks,
    key_store: Arc<dyn KeyStore>,
    container: Arc<KeyContainer>,
    timeout: Duration,
}

impl CryptoServiceCache {
    pub fn new(
        config: &EngineConfig,
        key_store: Arc<dyn KeyStore>,
        container: Arc<KeyContainer>,
    ) -> Self {
        let slots = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl())
            .build();
        Self {
            slots,
            writes: WriteLocks::default(),
            key_store,
            container,
            timeout: config.remote_timeout(),
        }
    }

    /// Returns the service for `id`, loading or creating it on a miss.
    ///
    /// Fetch failures and unwrap failures are returned; a missing remote
    /// entry is not an error.
    pub async fn try_get(&self, id: &ObjectKeyId) -> EngineResult<Arc<CryptoService>> {
        let slot = self.slot(id).await;
        let mut current = slot.service.lock().await;
        if let Some(service) = current.as_ref() {
            return Ok(Arc::clone(service));
        }
        let service = self.load_or_create(id).await?;
        *current = Some(Arc::clone(&service));
        Ok(service)
    }

    /// Best-effort lookup: any failure is logged and reported as absence.
    pub async fn get(&self, id: &ObjectKeyId) -> Option<Arc<CryptoService>> {
        match self.try_get(id).await {
            Ok(service) => Some(service),
            Err(err) => {
                warn!(object = %id, error = %err, "crypto service unavailable");
                None
            }
        }
    }

    /// Best-effort bulk lookup. Ids that cannot be loaded are omitted.
    ///
    /// Unlike [`get`](Self::get), missing ids are never created.
    pub async fn get_all(&self, ids: &[ObjectKeyId]) -> HashMap<ObjectKeyId, Arc<CryptoService>> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            if found.contains_key(id) || missing.contains(id) {
                continue;
            }
            match self.cached(id).await {
                Some(service) => {
                    found.insert(id.clone(), service);
                }
                None => missing.push(id.clone()),
            }
        }
        if missing.is_empty() {
            return found;
        }

        match self.load_bulk(&missing).await {
            Ok(loaded) => {
                for (id, service) in loaded {
                    let service = self.fill(&id, service).await;
                    found.insert(id, service);
                }
            }
            Err(err) => {
                debug!(
                    requested = missing.len(),
                    error = %err,
                    "bulk crypto service load failed, fetching individually"
                );
                for id in missing {
                    match self.load_existing(&id).await {
                        Ok(Some(service)) => {
                            found.insert(id, service);
                        }
                        Ok(None) => debug!(object = %id, "no remote crypto service"),
                        Err(err) => {
                            warn!(object = %id, error = %err, "crypto service fetch failed")
                        }
                    }
                }
            }
        }
        found
    }

    /// Caches `service` for `id` and persists it remotely.
    ///
    /// The remote write is ordered after any pending write for the same id,
    /// including the background persist of an auto-created service. The
    /// cache write stands even if the remote write fails; the error is
    /// returned so the caller can retry.
    pub async fn put(&self, id: &ObjectKeyId, service: CryptoService) -> EngineResult<()> {
        let service = Arc::new(service);
        let envelope = wrap_service(&service, &self.container.identity()?.public())?;

        let slot = self.slot(id).await;
        let _write = {
            let mut current = slot.service.lock().await;
            *current = Some(Arc::clone(&service));
            self.writes.lock(id).await
        };
        self.slots.insert(id.clone(), slot).await;

        with_timeout(
            self.timeout,
            "set_crypto_service",
            self.key_store.set_crypto_service(id, envelope.to_bytes()),
        )
        .await
    }

    /// Evicts every cached service. Remote state is untouched.
    pub fn clear(&self) {
        self.slots.invalidate_all();
    }

    /// Number of cached services.
    pub async fn len(&self) -> usize {
        self.slots.run_pending_tasks().await;
        let slots: Vec<Arc<Slot>> = self.slots.iter().map(|(_, slot)| slot).collect();
        let mut count = 0;
        for slot in slots {
            if slot.service.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn slot(&self, id: &ObjectKeyId) -> Arc<Slot> {
        self.slots
            .get_with(id.clone(), async { Arc::new(Slot::default()) })
            .await
    }

    async fn cached(&self, id: &ObjectKeyId) -> Option<Arc<CryptoService>> {
        let slot = self.slots.get(id).await?;
        let current = slot.service.lock().await;
        current.clone()
    }

    /// Caches a loaded service unless the slot was filled meanwhile, and
    /// returns whichever service the slot holds.
    async fn fill(&self, id: &ObjectKeyId, service: Arc<CryptoService>) -> Arc<CryptoService> {
        let slot = self.slot(id).await;
        let mut current = slot.service.lock().await;
        Arc::clone(current.get_or_insert(service))
    }

    /// Like [`try_get`](Self::try_get) without creating missing services.
    async fn load_existing(&self, id: &ObjectKeyId) -> EngineResult<Option<Arc<CryptoService>>> {
        let slot = self.slot(id).await;
        let mut current = slot.service.lock().await;
        if let Some(service) = current.as_ref() {
            return Ok(Some(Arc::clone(service)));
        }
        let _write = self.writes.lock(id).await;
        let Some(service) = self.fetch(id).await? else {
            return Ok(None);
        };
        let service = Arc::new(service);
        *current = Some(Arc::clone(&service));
        Ok(Some(service))
    }

    async fn load_or_create(&self, id: &ObjectKeyId) -> EngineResult<Arc<CryptoService>> {
        debug!(object = %id, "crypto service cache miss");
        let write = self.writes.lock(id).await;
        if let Some(service) = self.fetch(id).await? {
            return Ok(Arc::new(service));
        }

        info!(object = %id, "no remote crypto service, creating one");
        let service = Arc::new(CryptoService::generate());
        let wrapped = wrap_service(&service, &self.container.identity()?.public())?.to_bytes();

        let key_store = Arc::clone(&self.key_store);
        let timeout = self.timeout;
        let id = id.clone();
        tokio::spawn(async move {
            let _write = write;
            let result = with_timeout(
                timeout,
                "set_crypto_service",
                key_store.set_crypto_service(&id, wrapped),
            )
            .await;
            match result {
                Ok(()) => debug!(object = %id, "persisted new crypto service"),
                Err(err) => warn!(object = %id, error = %err, "failed to persist new crypto service"),
            }
        });

        Ok(service)
    }

    async fn fetch(&self, id: &ObjectKeyId) -> EngineResult<Option<CryptoService>> {
        let wrapped = with_timeout(
            self.timeout,
            "get_crypto_service",
            self.key_store.get_crypto_service(id),
        )
        .await?;
        wrapped.map(|bytes| self.unwrap(&bytes)).transpose()
    }

    /// Strict bulk load: all ids or an error.
    async fn load_bulk(
        &self,
        ids: &[ObjectKeyId],
    ) -> EngineResult<HashMap<ObjectKeyId, Arc<CryptoService>>> {
        let wrapped = with_timeout(
            self.timeout,
            "get_crypto_services",
            self.key_store.get_crypto_services(ids),
        )
        .await?;
        if ids.iter().any(|id| !wrapped.contains_key(id)) {
            return Err(EngineError::PartialBatch {
                requested: ids.len(),
                found: ids.iter().filter(|id| wrapped.contains_key(*id)).count(),
            });
        }
        wrapped
            .into_iter()
            .map(|(id, bytes)| Ok((id, Arc::new(self.unwrap(&bytes)?))))
            .collect()
    }

    fn unwrap(&self, bytes: &[u8]) -> EngineResult<CryptoService> {
        let envelope = SealedEnvelope::from_bytes(bytes)?;
        Ok(unwrap_service(&envelope, self.container.identity()?)?)
    }
}
