//! Server configuration.

use contentsync_protocol::{DEFAULT_ALLOWED_PREFIXES, MAX_CHECKSUM_ENTRIES, MAX_SIGN_BATCH};
use std::time::Duration;

/// Configuration for the content server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum entries accepted in a delta request checksum map.
    pub max_checksum_entries: usize,
    /// Maximum paths accepted per signing request.
    pub max_sign_batch: usize,
    /// Validity window of a signed URL.
    pub url_ttl: Duration,
    /// Secret key for URL signatures.
    pub signing_secret: Vec<u8>,
    /// Base URL assets are served from (e.g. a CDN host).
    pub asset_base_url: String,
    /// Asset path prefixes that may be signed.
    pub allowed_prefixes: Vec<String>,
}

impl ServerConfig {
    /// Creates a configuration with the given signing secret and defaults
    /// for everything else.
    pub fn new(signing_secret: Vec<u8>) -> Self {
        Self {
            max_checksum_entries: MAX_CHECKSUM_ENTRIES,
            max_sign_batch: MAX_SIGN_BATCH,
            url_ttl: Duration::from_secs(60 * 60),
            signing_secret,
            asset_base_url: "https://assets.local".into(),
            allowed_prefixes: DEFAULT_ALLOWED_PREFIXES
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
        }
    }

    /// Sets the maximum checksum map size.
    pub fn with_max_checksum_entries(mut self, max: usize) -> Self {
        self.max_checksum_entries = max;
        self
    }

    /// Sets the maximum signing batch size.
    pub fn with_max_sign_batch(mut self, max: usize) -> Self {
        self.max_sign_batch = max;
        self
    }

    /// Sets the signed URL validity window.
    pub fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }

    /// Sets the asset base URL.
    pub fn with_asset_base_url(mut self, url: impl Into<String>) -> Self {
        self.asset_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replaces the allowed path prefixes.
    pub fn with_allowed_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.allowed_prefixes = prefixes;
        self
    }

    /// Checks the configuration for values that would make the server unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_checksum_entries == 0 {
            return Err("max_checksum_entries must be positive".into());
        }
        if self.max_sign_batch == 0 {
            return Err("max_sign_batch must be positive".into());
        }
        if self.url_ttl.is_zero() {
            return Err("url_ttl must be positive".into());
        }
        if self.signing_secret.is_empty() {
            return Err("signing_secret must not be empty".into());
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(b"contentsync-development-secret".to_vec())
    }
}
