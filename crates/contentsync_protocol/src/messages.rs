//! Protocol messages.
//!
//! The version check has an empty request body and answers with a
//! [`VersionPointer`].

use crate::asset::AssetManifestEntry;
use crate::codec::WireMessage;
use crate::item::ContentItem;
use crate::version::{ChecksumSnapshot, VersionPointer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

impl WireMessage for VersionPointer {}

/// Delta request from client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeltaRequest {
    /// Content version the client last materialized (0 when it has none).
    pub client_version: u64,
    /// What the client already has. Empty means "send everything".
    pub item_checksums: ChecksumSnapshot,
}

impl DeltaRequest {
    /// Creates a delta request.
    pub fn new(client_version: u64, item_checksums: ChecksumSnapshot) -> Self {
        Self {
            client_version,
            item_checksums,
        }
    }

    /// Creates a request for the complete content set.
    pub fn full() -> Self {
        Self::default()
    }

    /// Returns true if this asks for the complete content set.
    pub fn is_full(&self) -> bool {
        self.item_checksums.is_empty()
    }
}

impl WireMessage for DeltaRequest {}

/// Delta response from server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeltaResponse {
    /// Server content version.
    pub server_version: u64,
    /// Server asset version.
    pub asset_version: u64,
    /// New and changed items.
    pub changed: Vec<ContentItem>,
    /// Ids the client has that the server no longer does.
    pub deleted_ids: Vec<String>,
    /// The server's complete id to checksum map.
    pub full_checksums: ChecksumSnapshot,
    /// Every asset referenced by the authoritative item set.
    pub assets: BTreeMap<String, AssetManifestEntry>,
    /// Number of items on the server.
    pub total_items: u64,
    /// Number of entries in `changed`.
    pub updated_count: u64,
    /// Time of the last content change (Unix millis).
    pub last_updated_ms: u64,
}

impl DeltaResponse {
    /// The version pointer this response brings the client to.
    pub fn version_pointer(&self) -> VersionPointer {
        VersionPointer::new(self.server_version, self.asset_version, self.last_updated_ms)
    }
}

impl WireMessage for DeltaResponse {}

/// Batch URL signing request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignBatchRequest {
    /// Asset paths to sign.
    pub paths: Vec<String>,
}

impl SignBatchRequest {
    /// Creates a signing request.
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }
}

impl WireMessage for SignBatchRequest {}

/// One signed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrl {
    /// Asset path.
    pub path: String,
    /// Time-bounded URL granting read access to the asset.
    pub signed_url: String,
    /// Expiry (Unix millis).
    pub expires_at_ms: u64,
}

/// Batch URL signing response.
///
/// Partial success: paths that could not be signed are listed in `failed`
/// without failing the batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignBatchResponse {
    /// Signed URLs.
    pub urls: Vec<SignedUrl>,
    /// Paths that could not be signed.
    pub failed: Vec<String>,
}

impl SignBatchResponse {
    /// Looks up the signed URL for a path.
    pub fn url_for(&self, path: &str) -> Option<&SignedUrl> {
        self.urls.iter().find(|u| u.path == path)
    }
}

impl WireMessage for SignBatchResponse {}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl WireMessage for ErrorBody {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;

    #[test]
    fn delta_response_roundtrip() {
        let item = ContentItem::new("b", "B", "nature", 2, vec!["images/b.png".into()]);
        let mut assets = BTreeMap::new();
        assets.insert(
            "images/b.png".to_string(),
            AssetManifestEntry {
                checksum: Checksum::of_bytes(b"png"),
                size_bytes: 3,
            },
        );
        let resp = DeltaResponse {
            server_version: 7,
            asset_version: 3,
            changed: vec![item.clone()],
            deleted_ids: vec!["d".into()],
            full_checksums: ChecksumSnapshot::from_items([&item]),
            assets,
            total_items: 1,
            updated_count: 1,
            last_updated_ms: 1_700_000_000_000,
        };

        let decoded = DeltaResponse::decode(&resp.encode().unwrap()).unwrap();
        assert_eq!(decoded, resp);
        assert!(decoded.changed[0].verify().is_ok());
        assert_eq!(decoded.version_pointer(), VersionPointer::new(7, 3, 1_700_000_000_000));
    }

    #[test]
    fn empty_delta_request_is_full() {
        assert!(DeltaRequest::full().is_full());

        let mut checksums = ChecksumSnapshot::new();
        checksums.insert("a", Checksum::of_bytes(b"a"));
        assert!(!DeltaRequest::new(5, checksums).is_full());
    }

    #[test]
    fn sign_response_lookup() {
        let resp = SignBatchResponse {
            urls: vec![SignedUrl {
                path: "audio/a.mp3".into(),
                signed_url: "https://cdn/audio/a.mp3?sig=1".into(),
                expires_at_ms: 10,
            }],
            failed: vec!["audio/missing.mp3".into()],
        };
        let decoded = SignBatchResponse::decode(&resp.encode().unwrap()).unwrap();
        assert!(decoded.url_for("audio/a.mp3").is_some());
        assert!(decoded.url_for("audio/missing.mp3").is_none());
        assert_eq!(decoded.failed, vec!["audio/missing.mp3"]);
    }
}
