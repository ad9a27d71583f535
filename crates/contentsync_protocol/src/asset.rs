//! Asset descriptors and asset-path validation.

use crate::checksum::Checksum;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// Path prefixes accepted by default.
pub const DEFAULT_ALLOWED_PREFIXES: &[&str] = &["stories/", "audio/", "images/", "thumbnails/"];

/// A binary asset the client may need to download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Content-addressed storage key.
    pub path: String,
    /// Expected checksum of the asset bytes.
    pub checksum: Checksum,
    /// Ephemeral signed URL.
    pub signed_url: String,
    /// Expiry of `signed_url` (Unix millis).
    pub expires_at_ms: u64,
}

impl AssetDescriptor {
    /// Creates a descriptor.
    pub fn new(
        path: impl Into<String>,
        checksum: Checksum,
        signed_url: impl Into<String>,
        expires_at_ms: u64,
    ) -> Self {
        Self {
            path: path.into(),
            checksum,
            signed_url: signed_url.into(),
            expires_at_ms,
        }
    }

    /// Returns true if the signed URL is no longer valid at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Server-side facts about one asset, shipped in the delta response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifestEntry {
    /// Authoritative checksum.
    pub checksum: Checksum,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// Validates an asset path.
///
/// Rejects empty paths, traversal sequences, absolute paths, NUL bytes
/// (literal or URL-encoded), URL metacharacters, and paths outside
/// `allowed_prefixes`.
pub fn validate_asset_path<S: AsRef<str>>(path: &str, allowed_prefixes: &[S]) -> ProtocolResult<()> {
    let reject = |reason| {
        Err(ProtocolError::InvalidAssetPath {
            path: path.to_string(),
            reason,
        })
    };

    if path.trim().is_empty() {
        return reject("path cannot be empty");
    }
    if path.contains("..") {
        return reject("path traversal sequences are not allowed");
    }
    if path.starts_with('/') {
        return reject("absolute paths are not allowed");
    }
    if path.contains('\0') || path.contains("%00") || path.contains("%2500") {
        return reject("null bytes are not allowed");
    }
    if path.contains(['?', '#', '&']) {
        return reject("URL metacharacters are not allowed");
    }
    if !allowed_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix.as_ref()))
    {
        return reject("path is outside the allowed prefixes");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(path: &str) -> ProtocolResult<()> {
        validate_asset_path(path, DEFAULT_ALLOWED_PREFIXES)
    }

    #[test]
    fn accepts_known_prefixes() {
        assert!(check("stories/story_1/page_1.json").is_ok());
        assert!(check("audio/story_1/page_1.mp3").is_ok());
        assert!(check("images/cover.jpg").is_ok());
        assert!(check("thumbnails/cover.jpg").is_ok());
    }

    #[test]
    fn rejects_malicious_paths() {
        for path in [
            "",
            "   ",
            "images/../secrets.txt",
            "/images/cover.jpg",
            "images/cover\0.jpg",
            "images/cover%00.jpg",
            "images/cover%2500.jpg",
            "images/cover.jpg?sig=forged",
            "private/keys.pem",
        ] {
            assert!(check(path).is_err(), "accepted {path:?}");
        }
    }

    #[test]
    fn descriptor_expiry() {
        let desc = AssetDescriptor::new("images/a.png", Checksum::of_bytes(b"a"), "https://x", 1_000);
        assert!(!desc.is_expired(999));
        assert!(desc.is_expired(1_000));
    }
}
