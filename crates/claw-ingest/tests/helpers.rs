//! Test helpers for scheduler integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use claw_ingest::{IngestConfig, RetryPolicy, ScrapeTarget};
use claw_remote_write::{LabelSet, WriteRequest, codec};
use parking_lot::Mutex;
use tokio::net::TcpListener;

/// Default test timeout.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve a router on an ephemeral local port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// An exposition endpoint answering `/metrics` with a fixed status and body.
pub struct MockTarget {
    pub url: String,
    hits: Arc<AtomicU32>,
    arrivals: Arc<Mutex<Vec<Instant>>>,
}

impl MockTarget {
    pub async fn start(status: StatusCode, body: &'static str) -> Self {
        Self::delayed(status, body, Duration::ZERO).await
    }

    pub async fn healthy(body: &'static str) -> Self {
        Self::start(StatusCode::OK, body).await
    }

    /// A healthy target that takes `delay` to answer.
    pub async fn slow(body: &'static str, delay: Duration) -> Self {
        Self::delayed(StatusCode::OK, body, delay).await
    }

    async fn delayed(status: StatusCode, body: &'static str, delay: Duration) -> Self {
        let hits = Arc::new(AtomicU32::new(0));
        let arrivals: Arc<Mutex<Vec<Instant>>> = Arc::default();
        let (counter, log) = (hits.clone(), arrivals.clone());
        let router = Router::new().route(
            "/metrics",
            get(move || {
                let (counter, log) = (counter.clone(), log.clone());
                async move {
                    log.lock().push(Instant::now());
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    (status, body)
                }
            }),
        );
        let addr = serve(router).await;
        Self {
            url: format!("http://{addr}/metrics"),
            hits,
            arrivals,
        }
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    /// When each scrape request arrived, in order.
    pub fn arrivals(&self) -> Vec<Instant> {
        self.arrivals.lock().clone()
    }
}

/// A push received by [`MockBackend`].
#[derive(Debug, Clone)]
pub struct ReceivedPush {
    pub headers: HeaderMap,
    pub request: WriteRequest,
}

/// A remote-write endpoint that decodes and records every push.
pub struct MockBackend {
    pub url: String,
    pushes: Arc<Mutex<Vec<ReceivedPush>>>,
    hits: Arc<AtomicU32>,
}

impl MockBackend {
    /// Answers every push with `status`.
    pub async fn start(status: StatusCode) -> Self {
        Self::scripted(vec![status]).await
    }

    /// Answers the n-th push with `statuses[n]`, repeating the last entry.
    pub async fn scripted(statuses: Vec<StatusCode>) -> Self {
        let pushes: Arc<Mutex<Vec<ReceivedPush>>> = Arc::default();
        let hits = Arc::new(AtomicU32::new(0));
        let (store, counter) = (pushes.clone(), hits.clone());
        let router = Router::new().route(
            "/api/v1/push",
            post(move |headers: HeaderMap, body: Bytes| {
                let (store, counter, statuses) = (store.clone(), counter.clone(), statuses.clone());
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
                    let status = statuses[n.min(statuses.len() - 1)];
                    if status.is_success() {
                        let request = codec::decode(&body).unwrap();
                        store.lock().push(ReceivedPush { headers, request });
                    }
                    status
                }
            }),
        );
        let addr = serve(router).await;
        Self {
            url: format!("http://{addr}/api/v1/push"),
            pushes,
            hits,
        }
    }

    /// Accepted pushes, in arrival order.
    pub fn pushes(&self) -> Vec<ReceivedPush> {
        self.pushes.lock().clone()
    }

    /// Every push attempt, accepted or not.
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}

/// A target named `name` with `job=<name>` and `instance=local`.
pub fn target(name: &str, url: &str) -> ScrapeTarget {
    ScrapeTarget {
        name: name.to_string(),
        url: url.to_string(),
        static_labels: LabelSet::new().with("job", name).with("instance", "local"),
    }
}

/// A configuration with fast timeouts and no jitter.
pub fn config(targets: Vec<ScrapeTarget>, backend_url: &str) -> IngestConfig {
    IngestConfig {
        remote_write_url: backend_url.to_string(),
        tenant_id: "demo-tenant".to_string(),
        targets,
        scrape_interval: Duration::from_millis(50),
        scrape_timeout: Duration::from_secs(2),
        add_tenant_label: true,
        push_policy: RetryPolicy::default()
            .with_max_retries(2)
            .with_retry_on_429(true)
            .with_base_delay(Duration::from_millis(10))
            .with_jitter(0.0)
            .with_timeout(Duration::from_secs(2)),
        proxy: None,
    }
}
