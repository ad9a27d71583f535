//! # contentsync protocol
//!
//! Content model and wire protocol shared by the contentsync server and client.
//!
//! This crate provides:
//! - [`ContentItem`] with a self-computed [`Checksum`]
//! - [`VersionPointer`] and [`ChecksumSnapshot`] for version comparison and delta requests
//! - [`AssetDescriptor`] and asset-path validation
//! - Request/response messages for version check, delta fetch and batch URL signing
//! - CBOR encoding/decoding
//! - A [`Clock`] abstraction so URL expiry can be tested deterministically
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Key Invariants
//!
//! - An item's checksum is a pure function of its semantic fields
//! - Checksum snapshots and signing batches are size-bounded
//! - The server is authoritative; the client never writes content back

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod asset;
mod checksum;
mod clock;
mod codec;
mod error;
mod item;
mod messages;
mod version;

pub use asset::{validate_asset_path, AssetDescriptor, AssetManifestEntry, DEFAULT_ALLOWED_PREFIXES};
pub use checksum::Checksum;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{from_cbor, to_cbor, WireMessage};
pub use error::{ProtocolError, ProtocolResult};
pub use item::ContentItem;
pub use messages::{
    DeltaRequest, DeltaResponse, ErrorBody, SignBatchRequest, SignBatchResponse, SignedUrl,
};
pub use version::{ChecksumSnapshot, VersionPointer};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u16 = 1;

/// Maximum number of entries a client may send in a delta request checksum map.
pub const MAX_CHECKSUM_ENTRIES: usize = 500;

/// Maximum number of asset paths per signing request.
pub const MAX_SIGN_BATCH: usize = 100;

/// Endpoint paths.
pub mod endpoints {
    /// Version check.
    pub const VERSION: &str = "/api/content/version";
    /// Delta fetch.
    pub const DELTA: &str = "/api/content/delta";
    /// Batch asset URL signing.
    pub const BATCH_URLS: &str = "/api/assets/batch-urls";
}
