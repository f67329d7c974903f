//! Tenant-injecting OTLP metrics proxy.
//!
//! Accepts OTLP metric exports on `POST /otlp/metrics`, attaches the tenant
//! header and forwards the body unchanged to the backend's OTLP endpoint.
//! Upstream answers are relayed verbatim; the proxy never retries.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::client::{ResilientClient, UpstreamError};
use crate::config::ProxyConfig;
use crate::error::{IngestError, IngestResult};
use crate::retry::RetryPolicy;
use crate::writer::TENANT_HEADER;

/// Media types accepted on the export route.
const ACCEPTED_CONTENT_TYPES: [&str; 3] = [
    "application/x-protobuf",
    "application/octet-stream",
    "application/json",
];

/// Shared state of the proxy handlers.
#[derive(Debug)]
pub struct ProxyState {
    client: ResilientClient,
    upstream_url: String,
    default_tenant: String,
}

impl ProxyState {
    /// Creates proxy state with a single-attempt upstream client.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Upstream` if the HTTP client cannot be created.
    pub fn new(config: &ProxyConfig, default_tenant: impl Into<String>) -> IngestResult<Self> {
        let client = ResilientClient::new("otlp-proxy", RetryPolicy::pass_through(config.timeout))?;
        Ok(Self {
            client,
            upstream_url: config.upstream_url.clone(),
            default_tenant: default_tenant.into(),
        })
    }

    fn tenant_for(&self, headers: &HeaderMap) -> Option<HeaderValue> {
        let incoming = headers
            .get(&TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let tenant = incoming.unwrap_or_else(|| self.default_tenant.trim());
        if tenant.is_empty() {
            return None;
        }
        HeaderValue::from_str(tenant).ok()
    }
}

/// Creates the proxy router.
pub fn create_router(state: Arc<ProxyState>, body_limit: usize) -> Router {
    Router::new()
        .route("/otlp/metrics", post(forward_metrics))
        .route("/healthz", get(health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "ok"
}

fn is_accepted_content_type(headers: &HeaderMap) -> bool {
    let Some(raw) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let essence = raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    ACCEPTED_CONTENT_TYPES.contains(&essence.as_str())
}

async fn forward_metrics(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_accepted_content_type(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported content type").into_response();
    }

    let Some(tenant) = state.tenant_for(&headers) else {
        return (StatusCode::UNAUTHORIZED, "missing tenant").into_response();
    };

    let mut upstream_headers = HeaderMap::new();
    for name in [CONTENT_TYPE, CONTENT_ENCODING] {
        if let Some(value) = headers.get(&name) {
            upstream_headers.insert(name, value.clone());
        }
    }
    upstream_headers.insert(TENANT_HEADER, tenant);

    match state.client.post(&state.upstream_url, upstream_headers, body).await {
        Ok(upstream) => relay(upstream.status, upstream.headers.get(CONTENT_TYPE), upstream.body),
        Err(UpstreamError::Status {
            status, headers, body, ..
        }) => relay(status, headers.get(CONTENT_TYPE), body),
        Err(e) => {
            warn!(upstream = %state.upstream_url, error = %e, "otlp forward failed");
            (StatusCode::BAD_GATEWAY, format!("upstream error: {e}")).into_response()
        }
    }
}

fn relay(status: u16, content_type: Option<&HeaderValue>, body: Bytes) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, body).into_response();
    if let Some(value) = content_type {
        response.headers_mut().insert(CONTENT_TYPE, value.clone());
    }
    response
}

/// A bound proxy listener, ready to serve.
#[derive(Debug)]
pub struct OtlpProxy {
    listener: TcpListener,
    router: Router,
}

impl OtlpProxy {
    /// Binds the listen address. Bind failures surface here, before any
    /// scraping starts.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Bind` if the address is unavailable.
    pub async fn bind(config: &ProxyConfig, default_tenant: &str) -> IngestResult<Self> {
        let state = Arc::new(ProxyState::new(config, default_tenant)?);
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| IngestError::Bind {
                addr: config.listen_addr,
                source,
            })?;
        Ok(Self {
            listener,
            router: create_router(state, config.body_limit),
        })
    }

    /// Address the proxy is listening on.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Serve` if the socket has no local address.
    pub fn local_addr(&self) -> IngestResult<SocketAddr> {
        self.listener.local_addr().map_err(IngestError::Serve)
    }

    /// Serves requests until `shutdown` is cancelled, then drains in-flight
    /// requests.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Serve` if the server fails.
    pub async fn serve(self, shutdown: CancellationToken) -> IngestResult<()> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "otlp proxy listening");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(IngestError::Serve)?;

        info!("otlp proxy stopped");
        Ok(())
    }

    /// Serves on a background task. If the server fails, the failure is
    /// logged and `shutdown` is cancelled so the rest of the agent stops
    /// too; the error is returned from the task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<IngestResult<()>> {
        let server = self.serve(shutdown.clone());
        tokio::spawn(supervise(server, shutdown))
    }
}

async fn supervise<F>(server: F, shutdown: CancellationToken) -> IngestResult<()>
where
    F: Future<Output = IngestResult<()>>,
{
    let result = server.await;
    if let Err(e) = &result {
        error!(error = %e, "otlp proxy failed, shutting down");
        shutdown.cancel();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    /// Upstream that echoes the forwarded headers as `tenant|content-type|content-encoding`.
    async fn echo_upstream(status: StatusCode) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/otlp/v1/metrics",
            post(move |headers: HeaderMap, body: Bytes| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let get = |name: &str| {
                        headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-")
                            .to_string()
                    };
                    let text = format!(
                        "{}|{}|{}|{}",
                        get("x-scope-orgid"),
                        get("content-type"),
                        get("content-encoding"),
                        body.len()
                    );
                    (status, [(CONTENT_TYPE, "text/plain")], text)
                }
            }),
        );
        let addr = serve(router).await;
        (format!("http://{addr}/otlp/v1/metrics"), hits)
    }

    fn proxy_config(upstream_url: String, body_limit: usize) -> ProxyConfig {
        ProxyConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            upstream_url,
            timeout: Duration::from_secs(2),
            body_limit,
        }
    }

    fn router(upstream_url: String, tenant: &str) -> Router {
        let config = proxy_config(upstream_url, 1024);
        create_router(Arc::new(ProxyState::new(&config, tenant).unwrap()), config.body_limit)
    }

    fn export(content_type: Option<&str>, tenant: Option<&str>, body: &'static [u8]) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/otlp/metrics");
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        if let Some(t) = tenant {
            builder = builder.header("x-scope-orgid", t);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let app = router("http://127.0.0.1:1/otlp".to_string(), "demo-tenant");
        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn test_forwards_with_default_tenant() {
        let (url, hits) = echo_upstream(StatusCode::OK).await;
        let app = router(url, "demo-tenant");

        let response = app
            .oneshot(export(Some("application/x-protobuf"), None, b"payload"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(body_text(response).await, "demo-tenant|application/x-protobuf|-|7");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_incoming_tenant_wins() {
        let (url, _hits) = echo_upstream(StatusCode::OK).await;
        let app = router(url, "demo-tenant");

        let response = app
            .oneshot(export(Some("application/json; charset=utf-8"), Some("acme"), b"{}"))
            .await
            .unwrap();

        assert_eq!(
            body_text(response).await,
            "acme|application/json; charset=utf-8|-|2"
        );
    }

    #[tokio::test]
    async fn test_forwards_content_encoding() {
        let (url, _hits) = echo_upstream(StatusCode::OK).await;
        let app = router(url, "demo-tenant");
        let request = Request::builder()
            .method("POST")
            .uri("/otlp/metrics")
            .header("content-type", "application/octet-stream")
            .header("content-encoding", "gzip")
            .body(Body::from("zz"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(
            body_text(response).await,
            "demo-tenant|application/octet-stream|gzip|2"
        );
    }

    #[tokio::test]
    async fn test_rejects_unsupported_content_type() {
        let (url, hits) = echo_upstream(StatusCode::OK).await;

        let response = router(url.clone(), "demo-tenant")
            .oneshot(export(Some("text/plain"), None, b"x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let response = router(url, "demo-tenant")
            .oneshot(export(None, None, b"x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_tenant_is_unauthorized() {
        let (url, hits) = echo_upstream(StatusCode::OK).await;
        let app = router(url, "  ");

        let response = app
            .oneshot(export(Some("application/x-protobuf"), Some(""), b"x"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_body_over_limit_is_rejected() {
        let (url, hits) = echo_upstream(StatusCode::OK).await;
        let config = proxy_config(url, 8);
        let app = create_router(Arc::new(ProxyState::new(&config, "demo-tenant").unwrap()), config.body_limit);

        let response = app
            .oneshot(export(Some("application/x-protobuf"), None, b"0123456789abcdef"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_relays_upstream_error_verbatim_without_retry() {
        let (url, hits) = echo_upstream(StatusCode::SERVICE_UNAVAILABLE).await;
        let app = router(url, "demo-tenant");

        let response = app
            .oneshot(export(Some("application/x-protobuf"), None, b"abc"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(body_text(response).await, "demo-tenant|application/x-protobuf|-|3");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let app = router(format!("http://{addr}/otlp/v1/metrics"), "demo-tenant");

        let response = app
            .oneshot(export(Some("application/x-protobuf"), None, b"abc"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_text(response).await.starts_with("upstream error:"));
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let (url, _hits) = echo_upstream(StatusCode::OK).await;
        let proxy = OtlpProxy::bind(&proxy_config(url, 1024), "demo-tenant").await.unwrap();
        let addr = proxy.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(proxy.serve(shutdown.clone()));

        let health = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_state_uses_single_attempt_client() {
        let config = proxy_config("http://127.0.0.1:1/otlp".to_string(), 1024);
        let state = ProxyState::new(&config, "demo-tenant").unwrap();
        assert_eq!(state.client.name(), "otlp-proxy");
        assert_eq!(state.client.policy().max_retries, 0);
        assert_eq!(state.client.policy().timeout, config.timeout);
    }

    #[tokio::test]
    async fn test_spawned_proxy_stops_on_cancel() {
        let (url, _hits) = echo_upstream(StatusCode::OK).await;
        let proxy = OtlpProxy::bind(&proxy_config(url, 1024), "demo-tenant").await.unwrap();
        let shutdown = CancellationToken::new();
        let handle = proxy.spawn(shutdown.clone());

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_server_failure_cancels_shutdown() {
        let shutdown = CancellationToken::new();
        let failing = async { Err(IngestError::Serve(std::io::Error::other("accept loop died"))) };

        let err = supervise(failing, shutdown.clone()).await.unwrap_err();

        assert!(matches!(err, IngestError::Serve(_)));
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_clean_exit_leaves_shutdown_alone() {
        let shutdown = CancellationToken::new();
        supervise(async { Ok(()) }, shutdown.clone()).await.unwrap();
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = proxy_config("http://127.0.0.1:1/otlp".to_string(), 1024);
        config.listen_addr = taken.local_addr().unwrap();

        let err = OtlpProxy::bind(&config, "demo-tenant").await.unwrap_err();
        assert!(matches!(err, IngestError::Bind { .. }));
    }
}
