//! Transport layer abstraction for content sync.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use bytes::Bytes;
use contentsync_protocol::{
    DeltaRequest, DeltaResponse, SignBatchRequest, SignBatchResponse, SignedUrl, VersionPointer,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// A content transport handles network communication with the content server.
///
/// This trait abstracts the network layer, allowing for different implementations
/// (HTTP, in-process loopback, mock for testing, etc.).
#[async_trait]
pub trait ContentTransport: Send + Sync {
    /// Fetches the server's current version pointer.
    async fn check_version(&self) -> SyncResult<VersionPointer>;

    /// Fetches the delta for a checksum snapshot.
    async fn fetch_delta(&self, request: &DeltaRequest) -> SyncResult<DeltaResponse>;

    /// Requests signed URLs for a batch of asset paths.
    async fn sign_batch(&self, request: &SignBatchRequest) -> SyncResult<SignBatchResponse>;

    /// Downloads the bytes behind a signed URL.
    async fn download(&self, url: &str) -> SyncResult<Bytes>;
}

/// A mock transport for testing.
///
/// Signing always succeeds for paths registered with [`MockTransport::put_asset`],
/// producing `mock://<path>` URLs that [`ContentTransport::download`] resolves.
#[derive(Debug, Default)]
pub struct MockTransport {
    offline: AtomicBool,
    version: Mutex<Option<VersionPointer>>,
    delta_response: Mutex<Option<DeltaResponse>>,
    assets: Mutex<HashMap<String, Bytes>>,
    download_failures: Mutex<HashMap<String, SyncError>>,
    delta_requests: Mutex<Vec<DeltaRequest>>,
    sign_requests: Mutex<Vec<Vec<String>>>,
    version_calls: AtomicU64,
    download_calls: AtomicU64,
    latency: Mutex<Option<Duration>>,
}

const MOCK_SCHEME: &str = "mock://";

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every version check, so overlapping callers can be observed.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Sets the version check response.
    pub fn set_version(&self, pointer: VersionPointer) {
        *self.version.lock() = Some(pointer);
    }

    /// Sets the delta response.
    pub fn set_delta_response(&self, response: DeltaResponse) {
        *self.delta_response.lock() = Some(response);
    }

    /// Registers downloadable asset bytes.
    pub fn put_asset(&self, path: impl Into<String>, data: impl Into<Bytes>) {
        self.assets.lock().insert(path.into(), data.into());
    }

    /// Makes every download of `path` fail with `error`.
    pub fn fail_download(&self, path: impl Into<String>, error: SyncError) {
        self.download_failures.lock().insert(path.into(), error);
    }

    /// Simulates an unreachable server.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delta requests received so far.
    pub fn delta_requests(&self) -> Vec<DeltaRequest> {
        self.delta_requests.lock().clone()
    }

    /// Path batches received by the signing endpoint.
    pub fn sign_requests(&self) -> Vec<Vec<String>> {
        self.sign_requests.lock().clone()
    }

    /// Number of version checks received.
    pub fn version_calls(&self) -> u64 {
        self.version_calls.load(Ordering::SeqCst)
    }

    /// Number of downloads attempted.
    pub fn download_calls(&self) -> u64 {
        self.download_calls.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("server unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentTransport for MockTransport {
    async fn check_version(&self) -> SyncResult<VersionPointer> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.ensure_online()?;
        (*self.version.lock()).ok_or_else(|| SyncError::Protocol("No mock version set".into()))
    }

    async fn fetch_delta(&self, request: &DeltaRequest) -> SyncResult<DeltaResponse> {
        self.ensure_online()?;
        self.delta_requests.lock().push(request.clone());
        self.delta_response
            .lock()
            .clone()
            .ok_or_else(|| SyncError::Protocol("No mock delta response set".into()))
    }

    async fn sign_batch(&self, request: &SignBatchRequest) -> SyncResult<SignBatchResponse> {
        self.ensure_online()?;
        self.sign_requests.lock().push(request.paths.clone());

        let assets = self.assets.lock();
        let mut response = SignBatchResponse::default();
        for path in &request.paths {
            if assets.contains_key(path) {
                response.urls.push(SignedUrl {
                    path: path.clone(),
                    signed_url: format!("{MOCK_SCHEME}{path}"),
                    expires_at_ms: u64::MAX,
                });
            } else {
                response.failed.push(path.clone());
            }
        }
        Ok(response)
    }

    async fn download(&self, url: &str) -> SyncResult<Bytes> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        let path = url
            .strip_prefix(MOCK_SCHEME)
            .ok_or_else(|| SyncError::Protocol(format!("not a mock url: {url}")))?;

        if let Some(err) = self.download_failures.lock().get(path) {
            return Err(err.clone());
        }
        self.assets
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::Protocol(format!("asset not found: {path}")))
    }
}
