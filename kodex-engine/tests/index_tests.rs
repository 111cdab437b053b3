mod support;

use kodex_crypto::{
    CryptoService, EncryptedData, Hasher, IndexSecret, KeyedHashScheme, SearchScheme,
    SearchSecret, SharingKey,
};
use kodex_engine::index::IndexMap;
use kodex_engine::memory::MemoryBackend;
use kodex_engine::{
    EngineConfig, EngineError, IndexMapper, IndexUploader, MetadataEntry, ObjectKeyId,
    TokenMetadata,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn scheme() -> Arc<dyn SearchScheme> {
    Arc::new(KeyedHashScheme::new(
        Hasher::generate(),
        Hasher::generate(),
        SearchSecret::generate(),
    ))
}

fn mapper_with(scheme: Arc<dyn SearchScheme>, bucket_size: Option<usize>) -> IndexMapper {
    let config = EngineConfig {
        bucket_size,
        ..EngineConfig::default()
    };
    IndexMapper::new(scheme, &config)
}

fn secret() -> IndexSecret {
    SharingKey::generate().index_secret()
}

fn entries_for<'a>(
    index: &'a IndexMap,
    scheme: &dyn SearchScheme,
    term: &str,
    secret: &IndexSecret,
) -> &'a [MetadataEntry] {
    index
        .get(&scheme.derive_index(term, secret))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[test]
fn scenario_one_five_twelve_with_bucket_size_ten() {
    let scheme = scheme();
    let mapper = mapper_with(Arc::clone(&scheme), Some(10));
    let secret = secret();
    let object = ObjectKeyId::generate();

    let metadata = vec![
        TokenMetadata::new("alpha", object.clone(), vec![7]),
        TokenMetadata::new("bravo", object.clone(), (100..105).collect()),
        TokenMetadata::new("charlie", object.clone(), (200..212).collect()),
    ];
    let index = mapper.map_tokens_to_keys(&metadata, &secret).unwrap();
    assert_eq!(index.len(), 3);

    let alpha = entries_for(&index, scheme.as_ref(), "alpha", &secret);
    assert_eq!(alpha.len(), 1);
    assert_eq!(alpha[0].locations.len(), 10);
    assert_eq!(alpha[0].locations[0], 7);

    let bravo = entries_for(&index, scheme.as_ref(), "bravo", &secret);
    assert_eq!(bravo.len(), 1);
    assert_eq!(bravo[0].locations.len(), 10);
    assert_eq!(&bravo[0].locations[..5], &[100, 101, 102, 103, 104]);

    let charlie = entries_for(&index, scheme.as_ref(), "charlie", &secret);
    assert_eq!(charlie.len(), 2);
    assert!(charlie.iter().all(|e| e.locations.len() == 10));
    assert_eq!(charlie[0].locations, (200..210).collect::<Vec<_>>());
    assert_eq!(&charlie[1].locations[..2], &[210, 211]);
    assert!(charlie.iter().all(|e| e.term == "charlie" && e.object == object));
}

#[test]
fn adaptive_bucket_size_is_longest_location_list() {
    let scheme = scheme();
    let mapper = mapper_with(Arc::clone(&scheme), None);
    let secret = secret();
    let object = ObjectKeyId::generate();

    let metadata = vec![
        TokenMetadata::new("short", object.clone(), vec![1, 2]),
        TokenMetadata::new("longer", object.clone(), vec![3, 4, 5, 6, 7, 8]),
    ];
    let index = mapper.map_tokens_to_keys(&metadata, &secret).unwrap();

    for entries in index.values() {
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].locations.len(), 6);
    }
}

#[test]
fn short_terms_are_never_indexed() {
    let scheme = scheme();
    let config = EngineConfig {
        min_token_length: 3,
        ..EngineConfig::default()
    };
    let mapper = IndexMapper::new(Arc::clone(&scheme), &config);
    let secret = secret();
    let object = ObjectKeyId::generate();

    let metadata = vec![
        TokenMetadata::new("a", object.clone(), vec![1]),
        TokenMetadata::new("of", object.clone(), vec![2]),
        TokenMetadata::new("the", object.clone(), vec![3]),
        TokenMetadata::new("term", object.clone(), vec![4]),
    ];
    let index = mapper.map_tokens_to_keys(&metadata, &secret).unwrap();

    assert_eq!(index.len(), 1);
    for short in ["a", "of", "the"] {
        assert!(!index.contains_key(&scheme.derive_index(short, &secret)));
    }
    assert!(index.contains_key(&scheme.derive_index("term", &secret)));
}

#[test]
fn default_filter_drops_single_characters() {
    let scheme = scheme();
    let mapper = mapper_with(Arc::clone(&scheme), None);
    let secret = secret();
    let object = ObjectKeyId::generate();
    let metadata = vec![
        TokenMetadata::new("x", object.clone(), vec![1]),
        TokenMetadata::new("  ", object.clone(), vec![2]),
        TokenMetadata::new("ok", object, vec![3]),
    ];
    let index = mapper.map_tokens_to_keys(&metadata, &secret).unwrap();
    assert_eq!(index.len(), 1);
}

#[test]
fn terms_are_normalized_and_merged() {
    let scheme = scheme();
    let mapper = mapper_with(Arc::clone(&scheme), Some(8));
    let secret = secret();
    let object = ObjectKeyId::generate();

    let metadata = vec![
        TokenMetadata::new("Invoice", object.clone(), vec![4, 1]),
        TokenMetadata::new("  invoice ", object.clone(), vec![9, 4]),
    ];
    let index = mapper.map_tokens_to_keys(&metadata, &secret).unwrap();

    let entries = entries_for(&index, scheme.as_ref(), "invoice", &secret);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].term, "invoice");
    assert_eq!(&entries[0].locations[..3], &[1, 4, 9]);
}

#[test]
fn terms_without_locations_are_skipped() {
    let mapper = mapper_with(scheme(), Some(4));
    let metadata = vec![TokenMetadata::new("empty", ObjectKeyId::generate(), vec![])];
    assert!(mapper.map_tokens_to_keys(&metadata, &secret()).unwrap().is_empty());
}

#[test]
fn empty_input_is_empty_index() {
    let mapper = mapper_with(scheme(), None);
    assert!(mapper.map_tokens_to_keys(&[], &secret()).unwrap().is_empty());
}

#[test]
fn addresses_differ_between_objects() {
    let scheme = scheme();
    let mapper = mapper_with(Arc::clone(&scheme), None);
    let object = ObjectKeyId::generate();
    let metadata = vec![TokenMetadata::new("shared", object, vec![1])];

    let a = mapper.map_tokens_to_keys(&metadata, &secret()).unwrap();
    let b = mapper.map_tokens_to_keys(&metadata, &secret()).unwrap();
    let a_key = a.keys().next().unwrap();
    assert!(!b.contains_key(a_key));
}

#[test]
fn zero_fixed_bucket_size_is_an_index_error() {
    let mapper = mapper_with(scheme(), Some(0));
    let metadata = vec![TokenMetadata::new("term", ObjectKeyId::generate(), vec![1])];
    assert!(matches!(
        mapper.map_tokens_to_keys(&metadata, &secret()),
        Err(EngineError::Index(_))
    ));
}

#[tokio::test]
async fn uploader_stores_encrypted_entries_per_address() {
    let backend = MemoryBackend::new();
    let scheme = scheme();
    let mapper = mapper_with(Arc::clone(&scheme), Some(4));
    let secret = secret();
    let object = ObjectKeyId::generate();
    let metadata = vec![
        TokenMetadata::new("alpha", object.clone(), vec![1]),
        TokenMetadata::new("bravo", object.clone(), (0..6).collect()),
    ];
    let index = mapper.map_tokens_to_keys(&metadata, &secret).unwrap();

    let service = CryptoService::generate();
    let uploader = IndexUploader::new(Arc::new(backend.index_store()), &EngineConfig::default());
    let written = uploader.upload(index, &service).await.unwrap();
    assert_eq!(written, 2);

    let stored = backend
        .index_entries(&scheme.derive_index("bravo", &secret))
        .await;
    assert_eq!(stored.len(), 2);
    for bytes in stored {
        let encrypted: EncryptedData = serde_json::from_slice(&bytes).unwrap();
        let entry: MetadataEntry =
            serde_json::from_slice(&service.decrypt(&encrypted).unwrap()).unwrap();
        assert_eq!(entry.term, "bravo");
        assert_eq!(entry.locations.len(), 4);
    }
}

#[tokio::test]
async fn uploader_surfaces_store_failure() {
    let backend = MemoryBackend::new();
    let mapper = mapper_with(scheme(), None);
    let metadata = vec![TokenMetadata::new("alpha", ObjectKeyId::generate(), vec![1])];
    let index = mapper.map_tokens_to_keys(&metadata, &secret()).unwrap();

    backend.set_offline(true);
    let uploader = IndexUploader::new(Arc::new(backend.index_store()), &EngineConfig::default());
    let err = uploader
        .upload(index, &CryptoService::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Fetch(_)));
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn every_bucket_has_the_configured_size(
            counts in proptest::collection::vec(1usize..40, 1..12),
            bucket_size in 1usize..16,
        ) {
            let scheme = scheme();
            let mapper = mapper_with(Arc::clone(&scheme), Some(bucket_size));
            let secret = secret();
            let object = ObjectKeyId::generate();
            let metadata: Vec<_> = counts
                .iter()
                .enumerate()
                .map(|(i, &count)| {
                    TokenMetadata::new(format!("term{i}"), object.clone(), (0..count as u64).collect())
                })
                .collect();

            let index = mapper.map_tokens_to_keys(&metadata, &secret).unwrap();

            for (i, &count) in counts.iter().enumerate() {
                let entries = entries_for(&index, scheme.as_ref(), &format!("term{i}"), &secret);
                let expected_buckets = count.div_ceil(bucket_size);
                prop_assert_eq!(entries.len(), expected_buckets);
                for entry in entries {
                    prop_assert_eq!(entry.locations.len(), bucket_size);
                }
                let real: Vec<u64> = entries
                    .iter()
                    .flat_map(|e| e.locations.iter().copied())
                    .take(count)
                    .collect();
                prop_assert_eq!(real, (0..count as u64).collect::<Vec<_>>());
            }
        }

        #[test]
        fn adaptive_buckets_all_match_longest_list(
            counts in proptest::collection::vec(1usize..30, 1..10),
        ) {
            let mapper = mapper_with(scheme(), None);
            let object = ObjectKeyId::generate();
            let metadata: Vec<_> = counts
                .iter()
                .enumerate()
                .map(|(i, &count)| {
                    TokenMetadata::new(format!("word{i}"), object.clone(), (0..count as u64).collect())
                })
                .collect();
            let longest = *counts.iter().max().unwrap();

            let index = mapper.map_tokens_to_keys(&metadata, &secret()).unwrap();
            for entry in index.values().flatten() {
                prop_assert_eq!(entry.locations.len(), longest);
            }
        }
    }
}
