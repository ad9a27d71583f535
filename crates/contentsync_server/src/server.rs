//! Main content server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler, ServerStats};
use crate::index::ChecksumIndex;
use crate::signer::UrlRejection;
use crate::store::{MemoryObjectStore, ObjectStore};
use bytes::Bytes;
use contentsync_protocol::{
    endpoints, Checksum, Clock, ContentItem, DeltaRequest, DeltaResponse, ErrorBody,
    SignBatchRequest, SignBatchResponse, SystemClock, VersionPointer, WireMessage,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A status code and body, as an HTTP layer would send them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code.
    pub status: u16,
    /// Response body. CBOR for API endpoints, raw bytes for assets.
    pub body: Bytes,
}

impl HttpReply {
    /// A 200 reply.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// An error reply with a CBOR [`ErrorBody`].
    pub fn error(err: &ServerError) -> Self {
        let body = ErrorBody::new(err.code(), err.to_string())
            .encode()
            .unwrap_or_default();
        Self {
            status: err.status_code(),
            body: body.into(),
        }
    }

    /// Returns true for 2xx replies.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The content server.
///
/// Owns the checksum index and asset bucket, answers version checks,
/// computes deltas and issues signed asset URLs. Transport framing is left
/// to the embedding application, which routes POST bodies to
/// [`SyncServer::handle_post`] and asset GETs to [`SyncServer::serve_asset`].
///
/// # Example
///
/// ```
/// use contentsync_server::{ServerConfig, SyncServer};
/// use contentsync_protocol::ContentItem;
///
/// let server = SyncServer::new(ServerConfig::default());
/// server.publish_item(ContentItem::new("s1", "Story", "tales", 1, vec![]));
/// assert_eq!(server.version_pointer().content_version, 1);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server with an in-memory bucket and the system clock.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_parts(config, Arc::new(MemoryObjectStore::new()), Arc::new(SystemClock))
    }

    /// Creates a server with an in-memory bucket and the given clock.
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_parts(config, Arc::new(MemoryObjectStore::new()), clock)
    }

    /// Creates a server over an existing bucket.
    pub fn with_parts(config: ServerConfig, objects: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>) -> Self {
        let context = Arc::new(HandlerContext::new(config, objects, clock));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Handles a version check.
    pub fn handle_version_check(&self) -> VersionPointer {
        self.handler.handle_version_check()
    }

    /// Handles a delta request.
    pub fn handle_delta(&self, request: &DeltaRequest) -> ServerResult<DeltaResponse> {
        self.handler.handle_delta(request)
    }

    /// Handles a batch signing request.
    pub fn handle_sign_batch(&self, request: &SignBatchRequest) -> ServerResult<SignBatchResponse> {
        self.handler.handle_sign_batch(request)
    }

    /// Routes a CBOR-encoded POST body to its endpoint.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> HttpReply {
        let result = match path {
            endpoints::VERSION => self.handle_version_check().encode().map_err(ServerError::from),
            endpoints::DELTA => DeltaRequest::decode(body)
                .map_err(ServerError::from)
                .and_then(|req| self.handle_delta(&req))
                .and_then(|resp| resp.encode().map_err(ServerError::from)),
            endpoints::BATCH_URLS => SignBatchRequest::decode(body)
                .map_err(ServerError::from)
                .and_then(|req| self.handle_sign_batch(&req))
                .and_then(|resp| resp.encode().map_err(ServerError::from)),
            other => Err(ServerError::NoRoute(other.to_string())),
        };

        match result {
            Ok(bytes) => HttpReply::ok(bytes),
            Err(err) => {
                debug!(path, error = %err, "request rejected");
                self.context.stats.record_rejected();
                HttpReply::error(&err)
            }
        }
    }

    /// Serves asset bytes for a signed URL.
    ///
    /// Replies 403 when the URL is expired or forged and 404 when the
    /// object no longer exists.
    pub fn serve_asset(&self, url: &str) -> HttpReply {
        let result = self
            .context
            .signer
            .verify_url(url)
            .map_err(|rejection| match rejection {
                UrlRejection::Malformed => ServerError::InvalidRequest(rejection.to_string()),
                UrlRejection::Expired | UrlRejection::BadSignature => {
                    ServerError::Forbidden(rejection.to_string())
                }
            })
            .and_then(|path| {
                self.context
                    .objects
                    .get(&path)
                    .ok_or(ServerError::NotFound(path))
            });

        match result {
            Ok(bytes) => {
                self.context.stats.record_served();
                HttpReply::ok(bytes)
            }
            Err(err) => {
                if matches!(err, ServerError::Forbidden(_)) {
                    warn!(error = %err, "asset request forbidden");
                }
                self.context.stats.record_rejected();
                HttpReply::error(&err)
            }
        }
    }

    /// Publishes or replaces an item. Returns the new content version if it changed.
    pub fn publish_item(&self, item: ContentItem) -> Option<u64> {
        let id = item.id().to_string();
        let version = self.context.index.upsert_item(item);
        if let Some(version) = version {
            info!(id = %id, content_version = version, "published item");
        }
        version
    }

    /// Deletes an item. Returns the new content version if it existed.
    pub fn delete_item(&self, id: &str) -> Option<u64> {
        let version = self.context.index.remove_item(id);
        if let Some(version) = version {
            info!(id, content_version = version, "deleted item");
        }
        version
    }

    /// Uploads asset bytes and records their checksum in the manifest.
    ///
    /// Returns the new asset version if the content changed.
    pub fn publish_asset(&self, path: &str, data: impl Into<Bytes>) -> Option<u64> {
        let data = data.into();
        let checksum = Checksum::of_bytes(&data);
        let size = data.len() as u64;
        self.context.objects.put(path, data);
        let version = self.context.index.upsert_asset(path, checksum, size);
        if let Some(version) = version {
            info!(path, asset_version = version, size, "published asset");
        }
        version
    }

    /// Removes an asset from the bucket and the manifest.
    pub fn delete_asset(&self, path: &str) -> Option<u64> {
        self.context.objects.delete(path);
        self.context.index.remove_asset(path)
    }

    /// Returns the current version pointer without counting a request.
    pub fn version_pointer(&self) -> VersionPointer {
        self.context.index.version_pointer()
    }

    /// Returns the checksum index.
    pub fn index(&self) -> &Arc<ChecksumIndex> {
        &self.context.index
    }

    /// Returns the asset bucket.
    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.context.objects
    }

    /// Returns request counters.
    pub fn stats(&self) -> ServerStats {
        self.context.stats.snapshot()
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }
}
