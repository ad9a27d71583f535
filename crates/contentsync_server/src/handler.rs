//! Request handlers for content endpoints.

use crate::config::ServerConfig;
use crate::delta::DeltaComputer;
use crate::error::ServerResult;
use crate::index::ChecksumIndex;
use crate::signer::AssetSigner;
use crate::store::ObjectStore;
use contentsync_protocol::{
    Clock, DeltaRequest, DeltaResponse, SignBatchRequest, SignBatchResponse, VersionPointer,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Per-endpoint request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Version check requests handled.
    pub version_checks: u64,
    /// Delta requests handled.
    pub delta_requests: u64,
    /// Signing requests handled.
    pub sign_requests: u64,
    /// Individual URLs issued.
    pub urls_signed: u64,
    /// Asset downloads served.
    pub assets_served: u64,
    /// Requests answered with an error status.
    pub rejected: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    version_checks: AtomicU64,
    delta_requests: AtomicU64,
    sign_requests: AtomicU64,
    urls_signed: AtomicU64,
    assets_served: AtomicU64,
    rejected: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_served(&self) {
        self.assets_served.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ServerStats {
        ServerStats {
            version_checks: self.version_checks.load(Ordering::Relaxed),
            delta_requests: self.delta_requests.load(Ordering::Relaxed),
            sign_requests: self.sign_requests.load(Ordering::Relaxed),
            urls_signed: self.urls_signed.load(Ordering::Relaxed),
            assets_served: self.assets_served.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Published content (shared across all handlers).
    pub index: Arc<ChecksumIndex>,
    /// Asset bucket.
    pub objects: Arc<dyn ObjectStore>,
    pub(crate) delta: DeltaComputer,
    pub(crate) signer: AssetSigner,
    pub(crate) stats: StatsCounters,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, objects: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>) -> Self {
        let index = Arc::new(ChecksumIndex::new(Arc::clone(&clock)));
        let delta = DeltaComputer::new(Arc::clone(&index), config.max_checksum_entries);
        let signer = AssetSigner::new(&config, Arc::clone(&objects), clock);
        Self {
            config,
            index,
            objects,
            delta,
            signer,
            stats: StatsCounters::default(),
        }
    }
}

/// Handler for content requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Returns the server's current version pointer.
    pub fn handle_version_check(&self) -> VersionPointer {
        self.context.stats.version_checks.fetch_add(1, Ordering::Relaxed);
        let pointer = self.context.index.version_pointer();
        debug!(
            content_version = pointer.content_version,
            asset_version = pointer.asset_version,
            "version check"
        );
        pointer
    }

    /// Handles a delta request.
    pub fn handle_delta(&self, request: &DeltaRequest) -> ServerResult<DeltaResponse> {
        self.context.stats.delta_requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let response = self.context.delta.compute_delta(request)?;
        info!(
            changed = response.updated_count,
            deleted = response.deleted_ids.len(),
            total = response.total_items,
            duration_ms = started.elapsed().as_millis() as u64,
            "served delta"
        );
        Ok(response)
    }

    /// Handles a batch signing request.
    pub fn handle_sign_batch(&self, request: &SignBatchRequest) -> ServerResult<SignBatchResponse> {
        self.context.stats.sign_requests.fetch_add(1, Ordering::Relaxed);
        let response = self.context.signer.sign_batch(request)?;
        self.context
            .stats
            .urls_signed
            .fetch_add(response.urls.len() as u64, Ordering::Relaxed);
        info!(
            signed = response.urls.len(),
            failed = response.failed.len(),
            "signed asset urls"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use crate::store::MemoryObjectStore;
    use bytes::Bytes;
    use contentsync_protocol::{ContentItem, ManualClock};

    fn create_handler() -> (RequestHandler, Arc<HandlerContext>) {
        let objects = Arc::new(MemoryObjectStore::new());
        let context = Arc::new(HandlerContext::new(
            ServerConfig::default(),
            objects,
            Arc::new(ManualClock::new(0)),
        ));
        (RequestHandler::new(Arc::clone(&context)), context)
    }

    #[test]
    fn version_check_counts() {
        let (handler, context) = create_handler();
        assert_eq!(handler.handle_version_check(), VersionPointer::default());
        handler.handle_version_check();
        assert_eq!(context.stats.snapshot().version_checks, 2);
    }

    #[test]
    fn delta_after_publish() {
        let (handler, context) = create_handler();
        context
            .index
            .upsert_item(ContentItem::new("s1", "Story", "tales", 1, vec![]));

        let response = handler.handle_delta(&DeltaRequest::full()).unwrap();
        assert_eq!(response.changed.len(), 1);
        assert_eq!(response.server_version, 1);
    }

    #[test]
    fn sign_counts_urls() {
        let (handler, context) = create_handler();
        context.objects.put("audio/a.mp3", Bytes::from_static(b"a"));

        let request = SignBatchRequest::new(vec!["audio/a.mp3".into(), "audio/b.mp3".into()]);
        let response = handler.handle_sign_batch(&request).unwrap();
        assert_eq!(response.urls.len(), 1);
        assert_eq!(response.failed.len(), 1);

        let stats = context.stats.snapshot();
        assert_eq!(stats.sign_requests, 1);
        assert_eq!(stats.urls_signed, 1);
    }

    #[test]
    fn oversized_sign_request() {
        let (handler, _) = create_handler();
        let request = SignBatchRequest::new((0..101).map(|i| format!("audio/{i}.mp3")).collect());
        let err = handler.handle_sign_batch(&request).unwrap_err();
        assert!(matches!(err, ServerError::RequestTooLarge { .. }));
        assert_eq!(err.status_code(), 413);
    }
}
