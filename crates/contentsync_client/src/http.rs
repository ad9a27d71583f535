//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so applications can plug
//! in whatever library they already use. Request and response bodies for API
//! endpoints are CBOR; asset downloads are raw bytes.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::ContentTransport;
use async_trait::async_trait;
use bytes::Bytes;
use contentsync_protocol::{
    endpoints, DeltaRequest, DeltaResponse, ErrorBody, SignBatchRequest, SignBatchResponse,
    VersionPointer, WireMessage,
};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// HTTP client abstraction.
///
/// An `Err` means the request never produced a response (connection refused,
/// DNS failure, reset). Any response, whatever its status, is `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request.
    async fn post(&self, url: &str, bearer_token: Option<&str>, body: Vec<u8>) -> Result<HttpResponse, String>;

    /// Sends a GET request.
    async fn get(&self, url: &str) -> Result<HttpResponse, String>;
}

/// Supplies bearer credentials for API calls. Session issuance happens elsewhere.
pub trait CredentialProvider: Send + Sync {
    /// Returns the current bearer token, if any.
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed bearer token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// No credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// HTTP-based content transport.
///
/// Every call is bounded by the configured timeout.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the content server (e.g., "https://content.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    credentials: Arc<dyn CredentialProvider>,
    timeout: Duration,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport without credentials.
    pub fn new(config: &SyncConfig, client: C) -> Self {
        Self {
            base_url: config.server_url.trim_end_matches('/').to_string(),
            client,
            credentials: Arc::new(Anonymous),
            timeout: config.timeout,
            last_error: RwLock::new(None),
        }
    }

    /// Sets the credential provider.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn send<F>(&self, request: F) -> SyncResult<HttpResponse>
    where
        F: Future<Output = Result<HttpResponse, String>> + Send,
    {
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| SyncError::Timeout)?
            .map_err(|e| {
                *self.last_error.write() = Some(e.clone());
                SyncError::transport_retryable(e)
            })?;
        *self.last_error.write() = None;
        Ok(response)
    }

    async fn post_body<Res>(&self, endpoint: &str, body: Vec<u8>) -> SyncResult<Res>
    where
        Res: WireMessage + Send,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let token = self.credentials.bearer_token();
        let response = self
            .send(self.client.post(&url, token.as_deref(), body))
            .await?;
        check_status(&response, None)?;

        Res::decode(&response.body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }

    async fn post_cbor<Req, Res>(&self, endpoint: &str, request: &Req) -> SyncResult<Res>
    where
        Req: WireMessage + Sync,
        Res: WireMessage + Send,
    {
        let body = request
            .encode()
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        self.post_body(endpoint, body).await
    }
}

#[async_trait]
impl<C: HttpClient> ContentTransport for HttpTransport<C> {
    async fn check_version(&self) -> SyncResult<VersionPointer> {
        self.post_body(endpoints::VERSION, Vec::new()).await
    }

    async fn fetch_delta(&self, request: &DeltaRequest) -> SyncResult<DeltaResponse> {
        self.post_cbor(endpoints::DELTA, request).await
    }

    async fn sign_batch(&self, request: &SignBatchRequest) -> SyncResult<SignBatchResponse> {
        self.post_cbor(endpoints::BATCH_URLS, request).await
    }

    async fn download(&self, url: &str) -> SyncResult<Bytes> {
        let response = self.send(self.client.get(url)).await?;
        check_status(&response, Some(asset_path_of(url)))?;
        debug!(url, bytes = response.body.len(), "downloaded asset");
        Ok(response.body)
    }
}

/// Maps a non-success status to an error.
///
/// `asset_path` is set for signed-URL downloads, where 403 means the
/// signature expired rather than that the caller lacks credentials.
fn check_status(response: &HttpResponse, asset_path: Option<&str>) -> SyncResult<()> {
    let status = response.status;
    if (200..300).contains(&status) {
        return Ok(());
    }

    let message = ErrorBody::decode(&response.body)
        .map(|body| body.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).into_owned());

    Err(match (status, asset_path) {
        (401, _) => SyncError::Unauthorized,
        (403, Some(path)) => SyncError::UrlExpired {
            path: path.to_string(),
        },
        (403, None) => SyncError::Unauthorized,
        (413, _) => SyncError::RequestTooLarge(message),
        (400..=499, _) => SyncError::Protocol(format!("status {status}: {message}")),
        _ => SyncError::Server { status, message },
    })
}

/// Extracts the asset path from a signed URL.
fn asset_path_of(url: &str) -> &str {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let without_host = without_scheme
        .split_once('/')
        .map_or(without_scheme, |(_, rest)| rest);
    without_host
        .split_once('?')
        .map_or(without_host, |(path, _)| path)
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST to an API path.
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse;

    /// Handles a GET of a signed asset URL.
    fn handle_get(&self, url: &str) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse {
        (**self).handle_post(path, body)
    }

    fn handle_get(&self, url: &str) -> HttpResponse {
        (**self).handle_get(url)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing and embedding without network overhead. An optional
/// latency makes each request yield to the runtime like a real round trip.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    latency: Duration,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            latency: Duration::ZERO,
        }
    }

    /// Adds a simulated delay to every request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, _bearer_token: Option<&str>, body: Vec<u8>) -> Result<HttpResponse, String> {
        self.delay().await;
        let path = url.find("/api/").map(|i| &url[i..]).unwrap_or(url);
        Ok(self.server.handle_post(path, &body))
    }

    async fn get(&self, url: &str) -> Result<HttpResponse, String> {
        self.delay().await;
        Ok(self.server.handle_get(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct TestClient {
        response: Mutex<Option<Result<HttpResponse, String>>>,
        delay: Duration,
        last_token: Mutex<Option<String>>,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: Mutex::new(None),
                delay: Duration::ZERO,
                last_token: Mutex::new(None),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new()
            }
        }

        fn set_response(&self, response: Result<HttpResponse, String>) {
            *self.response.lock() = Some(response);
        }

        fn reply(&self) -> Result<HttpResponse, String> {
            self.response
                .lock()
                .clone()
                .unwrap_or_else(|| Err("No response set".into()))
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn post(&self, _url: &str, bearer_token: Option<&str>, _body: Vec<u8>) -> Result<HttpResponse, String> {
            *self.last_token.lock() = bearer_token.map(str::to_string);
            tokio::time::sleep(self.delay).await;
            self.reply()
        }

        async fn get(&self, _url: &str) -> Result<HttpResponse, String> {
            tokio::time::sleep(self.delay).await;
            self.reply()
        }
    }

    fn transport(client: TestClient) -> HttpTransport<TestClient> {
        let config = SyncConfig::new("https://content.example.com/").with_timeout(Duration::from_millis(50));
        HttpTransport::new(&config, client)
    }

    #[test]
    fn transport_creation() {
        let transport = transport(TestClient::new());
        assert_eq!(transport.base_url(), "https://content.example.com");
        assert!(transport.last_error().is_none());
    }

    #[tokio::test]
    async fn version_check_decodes_response() {
        let client = TestClient::new();
        client.set_response(Ok(HttpResponse::new(
            200,
            VersionPointer::new(7, 2, 99).encode().unwrap(),
        )));
        let transport = transport(client).with_credentials(Arc::new(StaticToken("t0k".into())));

        let pointer = transport.check_version().await.unwrap();
        assert_eq!(pointer, VersionPointer::new(7, 2, 99));
        assert_eq!(transport.client.last_token.lock().as_deref(), Some("t0k"));
    }

    #[tokio::test]
    async fn connection_failure_is_retryable() {
        let client = TestClient::new();
        client.set_response(Err("connection refused".into()));
        let transport = transport(client);

        let err = transport.check_version().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.is_offline());
        assert_eq!(transport.last_error().as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let client = TestClient::slow(Duration::from_millis(500));
        client.set_response(Ok(HttpResponse::new(200, Bytes::new())));
        let transport = transport(client);

        assert_eq!(transport.check_version().await, Err(SyncError::Timeout));
    }

    #[tokio::test]
    async fn status_mapping() {
        for status in [401u16, 403, 404, 413, 503] {
            let client = TestClient::new();
            let body = ErrorBody::new("X", "nope").encode().unwrap();
            client.set_response(Ok(HttpResponse::new(status, body)));
            let err = transport(client)
                .fetch_delta(&DeltaRequest::full())
                .await
                .unwrap_err();

            let expected = match status {
                401 | 403 => matches!(err, SyncError::Unauthorized),
                413 => err == SyncError::RequestTooLarge("nope".into()),
                404 => matches!(err, SyncError::Protocol(_)),
                _ => matches!(err, SyncError::Server { status: 503, .. }) && err.is_retryable(),
            };
            assert!(expected, "status {status} mapped to {err:?}");
        }
    }

    #[tokio::test]
    async fn forbidden_download_is_url_expired() {
        let client = TestClient::new();
        client.set_response(Ok(HttpResponse::new(403, Bytes::new())));
        let err = transport(client)
            .download("https://cdn.test/audio/a.mp3?expires=1&sig=ab")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::UrlExpired {
                path: "audio/a.mp3".into()
            }
        );
    }

    #[test]
    fn asset_path_extraction() {
        assert_eq!(asset_path_of("https://cdn.test/images/x/y.png?sig=1"), "images/x/y.png");
        assert_eq!(asset_path_of("https://cdn.test/audio/a.mp3"), "audio/a.mp3");
    }

    struct EchoServer;

    impl LoopbackServer for EchoServer {
        fn handle_post(&self, path: &str, _body: &[u8]) -> HttpResponse {
            HttpResponse::new(200, path.as_bytes().to_vec())
        }

        fn handle_get(&self, url: &str) -> HttpResponse {
            HttpResponse::new(200, url.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn loopback_routes_api_paths() {
        let client = LoopbackClient::new(EchoServer).with_latency(Duration::from_millis(1));
        let response = client
            .post("https://content.example.com/api/content/delta", None, vec![])
            .await
            .unwrap();
        assert_eq!(&response.body[..], b"/api/content/delta");

        let response = client.get("https://cdn.test/audio/a.mp3").await.unwrap();
        assert_eq!(&response.body[..], b"https://cdn.test/audio/a.mp3");
    }
}
