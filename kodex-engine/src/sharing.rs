//! Document sharing: sharing-key provisioning, granting access, and
//! accepting incoming shares.
//!
//! Granting wraps the document's crypto service and sharing key for each
//! grantee under the grantee's published identity key. Accepting unwraps
//! both, adopts the crypto service, keeps the sharing key locally, and
//! registers a bridge key so the document becomes searchable for the
//! recipient.

use crate::container::KeyContainer;
use crate::crypto_cache::CryptoServiceCache;
use crate::error::{EngineError, EngineResult};
use crate::remote::{KeyStore, LocalStore, SharingService, with_timeout};
use crate::types::{
    GranteeGrant, GranteeOutcome, GranteeResult, IncomingShare, ObjectKeyId,
    RegisterKeysRequest, ShareReport, ShareRequest, UserId,
};
use futures::StreamExt;
use kodex_crypto::{
    CryptoService, IdentityPublicKey, SealedEnvelope, SearchScheme, SharingKey, seal,
    unwrap_service, unwrap_sharing_key, wrap_service, wrap_sharing_key,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Local storage namespace for sharing keys sealed to the owner.
pub const SHARING_KEY_NAMESPACE: &str = "sharing-keys";

/// Orchestrates document sharing for one user.
pub struct SharingManager {
    container: Arc<KeyContainer>,
    scheme: Arc<dyn SearchScheme>,
    cache: Arc<CryptoServiceCache>,
    key_store: Arc<dyn KeyStore>,
    sharing: Arc<dyn SharingService>,
    local: Arc<dyn LocalStore>,
    workers: usize,
    timeout: Duration,
    provision_lock: Mutex<()>,
}

impl SharingManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        container: Arc<KeyContainer>,
        scheme: Arc<dyn SearchScheme>,
        cache: Arc<CryptoServiceCache>,
        key_store: Arc<dyn KeyStore>,
        sharing: Arc<dyn SharingService>,
        local: Arc<dyn LocalStore>,
        workers: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            container,
            scheme,
            cache,
            key_store,
            sharing,
            local,
            workers: workers.max(1),
            timeout,
            provision_lock: Mutex::new(()),
        }
    }

    fn owner(&self) -> &UserId {
        self.container.owner()
    }

    /// Returns the document's sharing key, creating it on first use.
    ///
    /// The key is kept in local storage sealed to the owner's identity and
    /// is never regenerated once stored.
    pub async fn provision_sharing_key(&self, document: &ObjectKeyId) -> EngineResult<SharingKey> {
        let _guard = self.provision_lock.lock().await;
        if let Some(key) = self.stored_sharing_key(document).await? {
            return Ok(key);
        }

        let key = SharingKey::generate();
        self.store_sharing_key(document, &key).await?;
        info!(%document, "provisioned sharing key");
        Ok(key)
    }

    /// The document's sharing key from local storage.
    pub async fn load_sharing_key(&self, document: &ObjectKeyId) -> EngineResult<SharingKey> {
        self.stored_sharing_key(document)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("sharing key for {document}")))
    }

    /// Grants every grantee access to `document`.
    ///
    /// A grantee whose public key cannot be resolved is reported as failed
    /// and skipped. Wrapping failures and a failed submission are returned
    /// as errors. Nothing is submitted when no grantee could be resolved.
    pub async fn share_document_with_users(
        &self,
        document: &ObjectKeyId,
        grantees: &[UserId],
    ) -> EngineResult<ShareReport> {
        if grantees.is_empty() {
            return Err(EngineError::Share(format!("no grantees given for {document}")));
        }
        let service = self.cache.try_get(document).await?;
        let sharing_key = self.load_sharing_key(document).await?;

        let mut unique: Vec<&UserId> = Vec::with_capacity(grantees.len());
        for grantee in grantees {
            if !unique.contains(&grantee) {
                unique.push(grantee);
            }
        }

        let attempts: Vec<(UserId, EngineResult<Result<GranteeGrant, String>>)> =
            futures::stream::iter(unique)
                .map(|grantee| {
                    let service = Arc::clone(&service);
                    let sharing_key = &sharing_key;
                    async move {
                        let attempt = self.grant(grantee, &service, sharing_key).await;
                        (grantee.clone(), attempt)
                    }
                })
                .buffered(self.workers)
                .collect()
                .await;

        let mut grants = Vec::new();
        let mut results = Vec::with_capacity(attempts.len());
        for (grantee, attempt) in attempts {
            match attempt? {
                Ok(grant) => {
                    grants.push(grant);
                    results.push(GranteeResult {
                        grantee,
                        outcome: GranteeOutcome::Granted,
                    });
                }
                Err(reason) => {
                    warn!(%document, %grantee, %reason, "cannot share with grantee");
                    results.push(GranteeResult {
                        grantee,
                        outcome: GranteeOutcome::Failed { reason },
                    });
                }
            }
        }

        let report = ShareReport {
            document: document.clone(),
            results,
        };
        if grants.is_empty() {
            warn!(%document, "no grantee could be resolved, nothing shared");
            return Ok(report);
        }

        let owner_public = self.container.identity()?.public();
        let request = ShareRequest {
            document: document.clone(),
            owner: self.owner().clone(),
            grants,
            owner_sharing_key: wrap_sharing_key(&sharing_key, &owner_public)?.to_bytes(),
        };
        with_timeout(
            self.timeout,
            "share_document",
            self.sharing.share_document(&request),
        )
        .await?;

        info!(
            %document,
            granted = report.granted_count(),
            requested = report.results.len(),
            "shared document"
        );
        Ok(report)
    }

    /// Accepts every pending share, returning how many were accepted.
    ///
    /// A share that cannot be accepted is logged and left in the queue.
    pub async fn process_incoming_shares(&self) -> EngineResult<usize> {
        let shares = with_timeout(
            self.timeout,
            "get_incoming_shares",
            self.sharing.get_incoming_shares(),
        )
        .await?
        .unwrap_or_default();

        let mut accepted = 0;
        for share in &shares {
            match self.accept(share).await {
                Ok(()) => accepted += 1,
                Err(err) => warn!(
                    share = %share.share_id,
                    document = %share.document,
                    owner = %share.owner,
                    error = %err,
                    "skipping incoming share"
                ),
            }
        }
        debug!(pending = shares.len(), accepted, "processed incoming shares");
        Ok(accepted)
    }

    /// Number of pending shares; 0 when the service reports none.
    pub async fn incoming_shares_count(&self) -> EngineResult<usize> {
        let shares = with_timeout(
            self.timeout,
            "get_incoming_shares",
            self.sharing.get_incoming_shares(),
        )
        .await?;
        Ok(shares.map_or(0, |shares| shares.len()))
    }

    /// Outer error: a wrap failure. Inner error: the grantee could not be
    /// resolved.
    async fn grant(
        &self,
        grantee: &UserId,
        service: &CryptoService,
        sharing_key: &SharingKey,
    ) -> EngineResult<Result<GranteeGrant, String>> {
        let public = match with_timeout(
            self.timeout,
            "get_public_key",
            self.key_store.get_public_key(grantee),
        )
        .await
        {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(Err("no published public key".into())),
            Err(err) => return Ok(Err(err.to_string())),
        };
        let public = match IdentityPublicKey::from_bytes(&public) {
            Ok(public) => public,
            Err(err) => return Ok(Err(format!("invalid public key: {err}"))),
        };

        Ok(Ok(GranteeGrant {
            grantee: grantee.clone(),
            wrapped_service: wrap_service(service, &public)?.to_bytes(),
            wrapped_sharing_key: wrap_sharing_key(sharing_key, &public)?.to_bytes(),
        }))
    }

    async fn accept(&self, share: &IncomingShare) -> EngineResult<()> {
        let identity = self.container.identity()?;

        let service = unwrap_service(&SealedEnvelope::from_bytes(&share.wrapped_service)?, identity)?;
        self.cache.put(&share.document, service).await?;

        let sharing_key = unwrap_sharing_key(
            &SealedEnvelope::from_bytes(&share.wrapped_sharing_key)?,
            identity,
        )?;
        self.store_sharing_key(&share.document, &sharing_key).await?;

        let bridge = self.scheme.derive_bridge_key(&sharing_key);
        let request = RegisterKeysRequest {
            document: share.document.clone(),
            user: self.owner().clone(),
            wrapped_bridge_key: seal(bridge.as_bytes(), &identity.public())?.to_bytes(),
        };
        with_timeout(
            self.timeout,
            "register_keys",
            self.sharing.register_keys(&request),
        )
        .await?;
        with_timeout(
            self.timeout,
            "remove_incoming_share",
            self.sharing.remove_incoming_share(share.share_id),
        )
        .await?;

        info!(document = %share.document, owner = %share.owner, "accepted incoming share");
        Ok(())
    }

    async fn stored_sharing_key(&self, document: &ObjectKeyId) -> EngineResult<Option<SharingKey>> {
        let Some(bytes) = self
            .local
            .get(SHARING_KEY_NAMESPACE, &document.to_string())
            .await?
        else {
            return Ok(None);
        };
        let envelope = SealedEnvelope::from_bytes(&bytes)?;
        Ok(Some(unwrap_sharing_key(
            &envelope,
            self.container.identity()?,
        )?))
    }

    async fn store_sharing_key(&self, document: &ObjectKeyId, key: &SharingKey) -> EngineResult<()> {
        let envelope = wrap_sharing_key(key, &self.container.identity()?.public())?;
        self.local
            .put(SHARING_KEY_NAMESPACE, &document.to_string(), envelope.to_bytes())
            .await
    }
}
