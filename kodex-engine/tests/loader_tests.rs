mod support;

use async_trait::async_trait;
use kodex_crypto::{IdentityKeyPair, KdfParams, encrypt_private_key};
use kodex_engine::local_store::MemoryLocalStore;
use kodex_engine::loader::{
    CONTAINER_NAMESPACE, FreshLoader, LocalLoader, NetworkLoader, container_key, identity_key,
};
use kodex_engine::memory::MemoryBackend;
use kodex_engine::{
    ContainerLoader, ContainerSource, EngineError, EngineResult, KeyContainer, KeyName, KeyStore,
    LoaderChain, LocalStore, UserId,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Loader that counts calls and returns a prepared result.
struct ScriptedLoader {
    source: ContainerSource,
    calls: Arc<AtomicUsize>,
    result: fn() -> EngineResult<KeyContainer>,
}

#[async_trait]
impl ContainerLoader for ScriptedLoader {
    fn source(&self) -> ContainerSource {
        self.source
    }

    async fn try_load(&self) -> EngineResult<KeyContainer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.result)()
    }
}

fn scripted(
    source: ContainerSource,
    result: fn() -> EngineResult<KeyContainer>,
) -> (ScriptedLoader, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (
        ScriptedLoader {
            source,
            calls: Arc::clone(&calls),
            result,
        },
        calls,
    )
}

fn failing() -> EngineResult<KeyContainer> {
    Err(EngineError::Storage("disk unavailable".into()))
}

fn complete() -> EngineResult<KeyContainer> {
    Ok(support::fresh_container("alice"))
}

fn incomplete() -> EngineResult<KeyContainer> {
    let mut container = support::fresh_container("alice");
    container.remove_key(KeyName::EncryptedSearchPrivate)?;
    Ok(container)
}

/// Stores alice's container and protected identity in the backend.
async fn seed_remote(backend: &MemoryBackend) -> KeyContainer {
    let identity = IdentityKeyPair::generate();
    let protected = encrypt_private_key(
        &identity,
        &support::credentials("alice").password,
        &KdfParams::insecure_fast(),
    )
    .unwrap();
    let container = KeyContainer::generate(
        UserId::from("alice"),
        IdentityKeyPair::from_secret_bytes(*identity.secret_bytes()),
    )
    .unwrap();

    let store = backend.key_store("alice");
    store.set_container(container.to_bytes().unwrap()).await.unwrap();
    store
        .set_identity_key(serde_json::to_vec(&protected).unwrap())
        .await
        .unwrap();
    container
}

#[tokio::test]
async fn network_used_when_local_fails_and_fresh_never_runs() {
    let backend = MemoryBackend::new();
    let seeded = seed_remote(&backend).await;
    let credentials = support::credentials("alice");

    let (fresh, fresh_calls) = scripted(ContainerSource::Fresh, complete);
    let chain = LoaderChain::new(false)
        .with(LocalLoader::new(
            Arc::new(MemoryLocalStore::new()),
            credentials.clone(),
        ))
        .with(NetworkLoader::new(
            Arc::new(backend.key_store("alice")),
            credentials,
            TIMEOUT,
        ))
        .with(fresh);

    let loaded = chain.run().await.unwrap();

    assert_eq!(loaded.source, ContainerSource::Network);
    assert_eq!(fresh_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        loaded.container.search_public_key().unwrap(),
        seeded.search_public_key().unwrap()
    );
    assert!(!loaded.container.is_dirty());
}

#[tokio::test]
async fn chain_result_equals_network_alone() {
    let backend = MemoryBackend::new();
    seed_remote(&backend).await;
    let network = NetworkLoader::new(
        Arc::new(backend.key_store("alice")),
        support::credentials("alice"),
        TIMEOUT,
    );
    let alone = network.load().await.unwrap();

    let chain = LoaderChain::new(false)
        .with(scripted(ContainerSource::Local, failing).0)
        .with(NetworkLoader::new(
            Arc::new(backend.key_store("alice")),
            support::credentials("alice"),
            TIMEOUT,
        ));
    let chained = chain.run().await.unwrap().container;

    assert_eq!(chained.serialized(), alone.serialized());
    assert_eq!(
        chained.identity().unwrap().public(),
        alone.identity().unwrap().public()
    );
}

#[tokio::test]
async fn first_success_stops_the_chain() {
    let (local, local_calls) = scripted(ContainerSource::Local, complete);
    let (network, network_calls) = scripted(ContainerSource::Network, complete);
    let chain = LoaderChain::new(false).with(local).with(network);

    let loaded = chain.run().await.unwrap();
    assert_eq!(loaded.source, ContainerSource::Local);
    assert_eq!(local_calls.load(Ordering::SeqCst), 1);
    assert_eq!(network_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn every_loader_failing_is_no_container() {
    let chain = LoaderChain::new(false)
        .with(scripted(ContainerSource::Local, failing).0)
        .with(scripted(ContainerSource::Network, failing).0);
    assert!(matches!(chain.run().await, Err(EngineError::NoContainer)));
}

#[tokio::test]
async fn empty_chain_is_no_container() {
    let chain = LoaderChain::new(false);
    assert!(chain.is_empty());
    assert!(matches!(chain.run().await, Err(EngineError::NoContainer)));
}

#[tokio::test]
async fn invalid_container_aborts_the_chain() {
    let (network, network_calls) = scripted(ContainerSource::Network, complete);
    let chain = LoaderChain::new(false)
        .with(scripted(ContainerSource::Local, incomplete).0)
        .with(network);

    assert!(matches!(chain.run().await, Err(EngineError::NoContainer)));
    assert_eq!(network_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_container_falls_through_when_configured() {
    let chain = LoaderChain::new(true)
        .with(scripted(ContainerSource::Local, incomplete).0)
        .with(scripted(ContainerSource::Network, complete).0);

    let loaded = chain.run().await.unwrap();
    assert_eq!(loaded.source, ContainerSource::Network);
}

#[tokio::test]
async fn load_rejects_incomplete_container_that_try_load_accepted() {
    let (loader, _) = scripted(ContainerSource::Local, incomplete);
    assert!(loader.try_load().await.is_ok());
    match loader.load().await {
        Err(EngineError::IncompleteContainer(name)) => {
            assert_eq!(name, KeyName::EncryptedSearchPrivate.to_string())
        }
        other => panic!("expected EngineError::IncompleteContainer, got: {other:?}"),
    }
}

#[tokio::test]
async fn local_loader_reads_persisted_container() {
    let local = MemoryLocalStore::new();
    let credentials = support::credentials("alice");
    let identity = IdentityKeyPair::generate();
    let container = KeyContainer::generate(
        UserId::from("alice"),
        IdentityKeyPair::from_secret_bytes(*identity.secret_bytes()),
    )
    .unwrap();
    let protected =
        encrypt_private_key(&identity, &credentials.password, &KdfParams::insecure_fast()).unwrap();
    local
        .put(
            CONTAINER_NAMESPACE,
            &container_key(&credentials),
            container.to_bytes().unwrap(),
        )
        .await
        .unwrap();
    local
        .put(
            CONTAINER_NAMESPACE,
            &identity_key(&credentials),
            serde_json::to_vec(&protected).unwrap(),
        )
        .await
        .unwrap();

    let loaded = LocalLoader::new(Arc::new(local), credentials)
        .load()
        .await
        .unwrap();
    assert_eq!(loaded.identity().unwrap().public(), identity.public());
}

#[tokio::test]
async fn local_loader_fails_when_empty() {
    let loader = LocalLoader::new(
        Arc::new(MemoryLocalStore::new()),
        support::credentials("alice"),
    );
    assert!(matches!(
        loader.try_load().await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn network_loader_rejects_wrong_password() {
    let backend = MemoryBackend::new();
    seed_remote(&backend).await;
    let mut credentials = support::credentials("alice");
    credentials.password = "not-the-password".into();

    let loader = NetworkLoader::new(Arc::new(backend.key_store("alice")), credentials, TIMEOUT);
    assert!(matches!(loader.try_load().await, Err(EngineError::Crypto(_))));
}

#[tokio::test]
async fn network_loader_offline_is_fetch_error() {
    let backend = MemoryBackend::new();
    seed_remote(&backend).await;
    backend.set_offline(true);

    let loader = NetworkLoader::new(
        Arc::new(backend.key_store("alice")),
        support::credentials("alice"),
        TIMEOUT,
    );
    let err = loader.try_load().await.unwrap_err();
    assert!(err.is_retryable(), "expected retryable error, got: {err:?}");
}

#[tokio::test]
async fn fresh_loader_writes_nothing_remotely() {
    let backend = MemoryBackend::new();
    let loader = FreshLoader::new(
        Arc::new(backend.key_store("alice")),
        UserId::from("alice"),
        TIMEOUT,
    );
    let container = loader.load().await.unwrap();

    assert!(container.is_dirty());
    assert!(backend.published_keys(&UserId::from("alice")).await.is_none());
    assert!(backend.stored_container(&UserId::from("alice")).await.is_none());
}

#[tokio::test]
async fn fresh_loader_refuses_to_replace_remote_container() {
    let backend = MemoryBackend::new();
    seed_remote(&backend).await;
    let loader = FreshLoader::new(
        Arc::new(backend.key_store("alice")),
        UserId::from("alice"),
        TIMEOUT,
    );
    assert!(matches!(
        loader.try_load().await,
        Err(EngineError::Validation(_))
    ));
}
