//! # contentsync server
//!
//! Authoritative side of contentsync.
//!
//! This crate provides:
//! - [`ChecksumIndex`]: published items, asset manifest and version counters
//! - [`DeltaComputer`]: changed and deleted items relative to a client snapshot
//! - [`AssetSigner`]: HMAC-signed, time-limited asset URLs
//! - [`SyncServer`]: endpoint routing over CBOR bodies
//!
//! The server is stateless with respect to clients. Every delta is derived
//! from the checksums the client sends.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod delta;
mod error;
mod handler;
mod index;
mod server;
mod signer;
mod store;

pub use config::ServerConfig;
pub use delta::DeltaComputer;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler, ServerStats};
pub use index::ChecksumIndex;
pub use server::{HttpReply, SyncServer};
pub use signer::{AssetSigner, UrlRejection};
pub use store::{MemoryObjectStore, ObjectStore};
