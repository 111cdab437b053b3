//! Engine configuration.

use crate::error::{EngineError, EngineResult};
use kodex_crypto::KdfParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Configuration for one engine connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of crypto services held in memory.
    pub cache_capacity: u64,

    /// Seconds a cached crypto service lives after it was written.
    pub cache_ttl_secs: u64,

    /// Upper bound on any single remote call, in seconds.
    pub remote_timeout_secs: u64,

    /// Parallel workers used for index uploads.
    pub upload_workers: usize,

    /// Terms with this many characters or fewer are not indexed.
    pub min_token_length: usize,

    /// Fixed bucket size. `None` sizes buckets to the longest location list
    /// in each batch.
    pub bucket_size: Option<usize>,

    /// Publish the public identity and search keys when a fresh container
    /// is generated.
    pub publish_public_material: bool,

    /// Keep trying later loaders when an earlier one returns an incomplete
    /// container instead of aborting.
    pub fall_through_on_invalid: bool,

    /// Argon2id parameters for the password-protected identity key.
    pub kdf_params: KdfParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            cache_ttl_secs: 600, // 10 minutes since last write
            remote_timeout_secs: 30,
            upload_workers: 4,
            min_token_length: 1,
            bucket_size: None,
            publish_public_material: true,
            fall_through_on_invalid: false,
            kdf_params: KdfParams::default(),
        }
    }
}

impl EngineConfig {
    /// Rejects settings that would disable caching, uploads or bucketing.
    pub fn validate(&self) -> EngineResult<()> {
        if self.cache_capacity == 0 {
            return Err(EngineError::Config("cache_capacity must be > 0".into()));
        }
        if self.cache_ttl_secs == 0 {
            return Err(EngineError::Config("cache_ttl_secs must be > 0".into()));
        }
        if self.remote_timeout_secs == 0 {
            return Err(EngineError::Config("remote_timeout_secs must be > 0".into()));
        }
        if self.upload_workers == 0 {
            return Err(EngineError::Config("upload_workers must be > 0".into()));
        }
        if self.bucket_size == Some(0) {
            return Err(EngineError::Config("bucket_size must be > 0 when set".into()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

/// Locally-held secret used to open the identity key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    #[zeroize(skip)]
    pub user_id: crate::types::UserId,
    pub password: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<crate::types::UserId>, password: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .finish()
    }
}
