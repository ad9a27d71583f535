//! # contentsync client
//!
//! Offline-first content cache and sync orchestrator.
//!
//! This crate provides:
//! - Version pointer tracking and cheap "anything new?" checks
//! - Checksum-driven delta sync (only changed items travel)
//! - Batched URL signing and verified, deduplicated asset downloads
//! - Corruption detection and self-healing of cached assets
//! - Retry with exponential backoff
//! - HTTP transport abstraction with an in-process loopback
//!
//! ## Run model
//!
//! A run is **check → delta → assets → commit**:
//! 1. Compare the local version pointer with the server's
//! 2. Send local checksums, receive changed items and deletions
//! 3. Sign and download only assets whose checksum is not already cached
//! 4. Commit each item once all of its assets are present
//!
//! ## Key Invariants
//!
//! - Nothing is cached unless its checksum verifies
//! - An item is never committed with missing assets
//! - The version pointer advances only after a fully successful run
//! - Overlapping `sync()` calls share one run
//! - An unreachable server degrades to serving the cache

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod http;
mod orchestrator;
mod retry;
mod store;
mod transport;
mod version;

pub use cache::{AssetState, CacheManager, CachedAssetRecord, ValidationReport};
pub use config::{RetryConfig, SyncConfig};
pub use error::{StoreError, StoreResult, SyncError, SyncResult};
pub use http::{
    Anonymous, CredentialProvider, HttpClient, HttpResponse, HttpTransport, LoopbackClient,
    LoopbackServer, StaticToken,
};
pub use orchestrator::{
    ItemFailure, SyncOrchestrator, SyncProgress, SyncReport, SyncState, SyncStats,
};
pub use retry::retry_with_backoff;
pub use store::{
    keys, BlobHandle, BlobStore, FileKvStore, FsBlobStore, KeyValueStore, MemoryBlobStore,
    MemoryKvStore,
};
pub use transport::{ContentTransport, MockTransport};
pub use version::{VersionCheck, VersionManager};
