//! Encrypted search-index construction.
//!
//! [`IndexMapper`] turns term occurrence data into fixed-size buckets keyed
//! by opaque index addresses. Every bucket in a batch has the same length:
//! real locations first, then random padding. A term with more locations
//! than the bucket size spills into further buckets under the same address,
//! so neither bucket length nor bucket count reveals more than
//! `ceil(count / bucket_size)`.
//!
//! [`IndexUploader`] encrypts every bucket with the object's crypto service
//! and uploads the batch on a bounded worker pool.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::remote::{IndexStore, with_timeout};
use crate::types::ObjectKeyId;
use futures::StreamExt;
use kodex_crypto::{CryptoService, IndexAddress, IndexSecret, SearchScheme};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Raw occurrences of one term in one object, as produced by an analyzer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenMetadata {
    pub term: String,
    pub object: ObjectKeyId,
    pub locations: Vec<u64>,
}

impl TokenMetadata {
    pub fn new(term: impl Into<String>, object: ObjectKeyId, locations: Vec<u64>) -> Self {
        Self {
            term: term.into(),
            object,
            locations,
        }
    }
}

/// One padded occurrence bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub term: String,
    pub object: ObjectKeyId,
    pub locations: Vec<u64>,
}

/// Buckets grouped by address. Several entries may share one address.
pub type IndexMap = HashMap<IndexAddress, Vec<MetadataEntry>>;

/// Maps token metadata to padded, addressed buckets.
pub struct IndexMapper {
    scheme: Arc<dyn SearchScheme>,
    min_token_length: usize,
    bucket_size: Option<usize>,
}

impl IndexMapper {
    pub fn new(scheme: Arc<dyn SearchScheme>, config: &EngineConfig) -> Self {
        Self {
            scheme,
            min_token_length: config.min_token_length,
            bucket_size: config.bucket_size,
        }
    }

    /// Builds the index for one object.
    ///
    /// Terms are trimmed and lowercased; a term of `min_token_length`
    /// characters or fewer is dropped, as is a term with no locations.
    /// Duplicate terms are merged.
    pub fn map_tokens_to_keys(
        &self,
        metadata: &[TokenMetadata],
        secret: &IndexSecret,
    ) -> EngineResult<IndexMap> {
        let mut terms: BTreeMap<(String, ObjectKeyId), Vec<u64>> = BTreeMap::new();
        for token in metadata {
            let term = token.term.trim().to_lowercase();
            if term.is_empty() || term.chars().count() <= self.min_token_length {
                continue;
            }
            terms
                .entry((term, token.object.clone()))
                .or_default()
                .extend_from_slice(&token.locations);
        }
        for locations in terms.values_mut() {
            locations.sort_unstable();
            locations.dedup();
        }
        terms.retain(|_, locations| !locations.is_empty());

        let bucket_size = match self.bucket_size {
            Some(0) => return Err(EngineError::Index("bucket size must be > 0".into())),
            Some(size) => size,
            None => terms.values().map(Vec::len).max().unwrap_or(0),
        };

        let mut index = IndexMap::new();
        for ((term, object), locations) in terms {
            let address = self.scheme.derive_index(&term, secret);
            let buckets = index.entry(address).or_default();
            for chunk in locations.chunks(bucket_size) {
                buckets.push(MetadataEntry {
                    term: term.clone(),
                    object: object.clone(),
                    locations: pad(chunk, bucket_size),
                });
            }
        }
        debug!(
            addresses = index.len(),
            bucket_size, "mapped tokens to index addresses"
        );
        Ok(index)
    }
}

/// Real locations followed by random padding up to `size`.
fn pad(real: &[u64], size: usize) -> Vec<u64> {
    let mut locations = Vec::with_capacity(size);
    locations.extend_from_slice(real);
    while locations.len() < size {
        locations.push(OsRng.next_u64());
    }
    locations
}

/// Encrypts and uploads index buckets.
pub struct IndexUploader {
    store: Arc<dyn IndexStore>,
    workers: usize,
    timeout: Duration,
}

impl IndexUploader {
    pub fn new(store: Arc<dyn IndexStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            workers: config.upload_workers.max(1),
            timeout: config.remote_timeout(),
        }
    }

    /// Uploads every address of `index`, returning the number of addresses
    /// written. Completion order is unspecified; the first failure is
    /// returned and the remaining uploads are dropped.
    pub async fn upload(&self, index: IndexMap, service: &CryptoService) -> EngineResult<usize> {
        let mut batches = Vec::with_capacity(index.len());
        for (address, entries) in index {
            let encrypted = entries
                .iter()
                .map(|entry| encrypt_entry(entry, service))
                .collect::<EngineResult<Vec<_>>>()?;
            batches.push((address, encrypted));
        }
        let total = batches.len();

        let mut uploads = futures::stream::iter(batches.into_iter().map(|(address, entries)| {
            let store = Arc::clone(&self.store);
            let timeout = self.timeout;
            async move {
                with_timeout(timeout, "put_entries", store.put_entries(&address, entries)).await
            }
        }))
        .buffer_unordered(self.workers);

        while let Some(result) = uploads.next().await {
            result?;
        }
        debug!(addresses = total, "uploaded index");
        Ok(total)
    }
}

fn encrypt_entry(entry: &MetadataEntry, service: &CryptoService) -> EngineResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(entry)?;
    let encrypted = service.encrypt(&plaintext)?;
    encrypted.check(service.algorithm())?;
    Ok(serde_json::to_vec(&encrypted)?)
}
