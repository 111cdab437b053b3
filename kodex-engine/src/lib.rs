//! Client-side engine for Kodex searchable encryption.
//!
//! Provides:
//! - Key container loading (local, network, fresh) with signed, sealed storage
//! - A bounded, single-flight cache of per-object crypto services
//! - Padded, bucketed search-index construction and upload
//! - Document sharing with per-grantee key wrapping and bridge-key registration
//!
//! Transport is external: the engine talks to collaborators through the
//! traits in [`remote`]. [`memory`] and [`local_store`] provide in-process
//! implementations.

pub mod config;
pub mod connection;
pub mod container;
pub mod crypto_cache;
pub mod error;
pub mod index;
pub mod loader;
pub mod local_store;
pub mod logging;
pub mod memory;
pub mod remote;
pub mod sharing;
pub mod types;

pub use config::{Credentials, EngineConfig};
pub use connection::Connection;
pub use container::{KeyContainer, KeyName};
pub use crypto_cache::CryptoServiceCache;
pub use error::{EngineError, EngineResult};
pub use index::{IndexMapper, IndexUploader, MetadataEntry, TokenMetadata};
pub use loader::{ContainerLoader, ContainerSource, LoaderChain};
pub use remote::{Collaborators, IndexStore, KeyStore, LocalStore, SharingService};
pub use sharing::SharingManager;
pub use types::*;
