//! Short-lived signed asset URLs.
//!
//! ## URL Format
//!
//! ```text
//! <asset_base_url>/<path>?expires=<unix millis>&sig=<hex HMAC-SHA256>
//! ```
//!
//! The MAC covers the path and the expiry, so neither can be altered
//! without invalidating the signature.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::ObjectStore;
use contentsync_protocol::{validate_asset_path, Clock, SignBatchRequest, SignBatchResponse, SignedUrl};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Reason a signed URL was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlRejection {
    /// The URL could not be parsed.
    #[error("malformed signed url")]
    Malformed,
    /// The signature does not match.
    #[error("bad signature")]
    BadSignature,
    /// The URL is past its expiry.
    #[error("signed url expired")]
    Expired,
}

/// Issues and verifies signed asset URLs.
pub struct AssetSigner {
    secret: Vec<u8>,
    base_url: String,
    ttl: Duration,
    max_batch: usize,
    allowed_prefixes: Vec<String>,
    objects: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
}

impl AssetSigner {
    /// Creates a signer over an object store.
    pub fn new(config: &ServerConfig, objects: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: config.signing_secret.clone(),
            base_url: config.asset_base_url.clone(),
            ttl: config.url_ttl,
            max_batch: config.max_sign_batch,
            allowed_prefixes: config.allowed_prefixes.clone(),
            objects,
            clock,
        }
    }

    /// Signs a single path.
    ///
    /// The path must be valid and the object must exist.
    pub fn sign(&self, path: &str) -> ServerResult<SignedUrl> {
        validate_asset_path(path, self.allowed_prefixes.as_slice())?;
        if !self.objects.contains(path) {
            return Err(ServerError::NotFound(path.to_string()));
        }

        let expires_at_ms = self.clock.now_millis() + self.ttl.as_millis() as u64;
        let sig = self
            .mac(path, expires_at_ms)
            .map_err(|_| ServerError::Internal("signing key rejected".into()))?
            .finalize()
            .into_bytes();

        Ok(SignedUrl {
            path: path.to_string(),
            signed_url: format!(
                "{}/{}?expires={}&sig={}",
                self.base_url,
                path,
                expires_at_ms,
                hex::encode(sig)
            ),
            expires_at_ms,
        })
    }

    /// Signs a batch of paths.
    ///
    /// Paths that are invalid or missing are reported in `failed`; the rest
    /// of the batch is still signed. Duplicate paths are signed once.
    pub fn sign_batch(&self, request: &SignBatchRequest) -> ServerResult<SignBatchResponse> {
        if request.paths.len() > self.max_batch {
            return Err(ServerError::RequestTooLarge {
                what: "asset paths",
                count: request.paths.len(),
                max: self.max_batch,
            });
        }

        let mut response = SignBatchResponse::default();
        let mut seen = BTreeSet::new();
        for path in &request.paths {
            if !seen.insert(path.as_str()) {
                continue;
            }
            match self.sign(path) {
                Ok(url) => response.urls.push(url),
                Err(err) => {
                    debug!(path = %path, error = %err, "cannot sign asset");
                    response.failed.push(path.clone());
                }
            }
        }

        debug!(
            signed = response.urls.len(),
            failed = response.failed.len(),
            "signed asset batch"
        );
        Ok(response)
    }

    /// Verifies a signed URL and returns the asset path it grants.
    pub fn verify_url(&self, url: &str) -> Result<String, UrlRejection> {
        let rest = url
            .strip_prefix(self.base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or(UrlRejection::Malformed)?;
        let (path, query) = rest.split_once('?').ok_or(UrlRejection::Malformed)?;

        let mut expires = None;
        let mut sig = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", value)) => expires = value.parse::<u64>().ok(),
                Some(("sig", value)) => sig = hex::decode(value).ok(),
                _ => return Err(UrlRejection::Malformed),
            }
        }
        let (expires, sig) = expires.zip(sig).ok_or(UrlRejection::Malformed)?;

        self.mac(path, expires)
            .map_err(|_| UrlRejection::BadSignature)?
            .verify_slice(&sig)
            .map_err(|_| {
                warn!(path = %path, "rejected asset url with bad signature");
                UrlRejection::BadSignature
            })?;

        if self.clock.now_millis() >= expires {
            return Err(UrlRejection::Expired);
        }
        Ok(path.to_string())
    }

    fn mac(&self, path: &str, expires_at_ms: u64) -> Result<HmacSha256, hmac::digest::InvalidLength> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)?;
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(&expires_at_ms.to_be_bytes());
        Ok(mac)
    }
}
