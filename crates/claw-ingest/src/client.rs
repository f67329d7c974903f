//! HTTP client with retry, exponential backoff and `Retry-After` support.
//!
//! Every outbound call of the agent goes through a [`ResilientClient`]:
//! remote-write pushes with the configured push policy, and the OTLP proxy
//! with a pass-through policy so the caller owns retries.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::HeaderMap;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::retry::{Failure, RetryPolicy, parse_retry_after};

/// A successful (2xx) upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

/// Final failure of a request after retries were exhausted or ruled out.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The upstream answered with a non-2xx status.
    #[error("{method} {url} returned HTTP {status} after {attempts} attempt(s): {}", String::from_utf8_lossy(.body))]
    Status {
        /// Request method.
        method: Method,
        /// Request URL.
        url: String,
        /// Last status received.
        status: u16,
        /// Headers of the last response.
        headers: HeaderMap,
        /// Last response body, as received.
        body: Bytes,
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// No response was received.
    #[error("{method} {url} failed after {attempts} attempt(s): {reason}")]
    Transport {
        /// Request method.
        method: Method,
        /// Request URL.
        url: String,
        /// Description of the last failure.
        reason: String,
        /// Whether the last attempt hit the per-attempt timeout.
        timed_out: bool,
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// The request could not be built (bad URL or header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    /// Returns the last HTTP status, if the upstream answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { .. } | Self::InvalidRequest(_) => None,
        }
    }

    /// Returns the number of attempts made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Status { attempts, .. } | Self::Transport { attempts, .. } => *attempts,
            Self::InvalidRequest(_) => 0,
        }
    }
}

/// Describes one scheduled retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    /// Client name, e.g. `remote-write`.
    pub client: String,
    /// Retry number, starting at 1.
    pub attempt: u32,
    /// Request method.
    pub method: Method,
    /// Request URL.
    pub url: String,
    /// Status of the failed attempt, if any.
    pub status: Option<u16>,
    /// Delay before the retry is sent.
    pub delay: Duration,
}

/// Receives a notification before every retry.
pub trait RetryObserver: Send + Sync {
    /// Called once per retry, before sleeping.
    fn on_retry(&self, event: &RetryEvent);
}

impl<F> RetryObserver for F
where
    F: Fn(&RetryEvent) + Send + Sync,
{
    fn on_retry(&self, event: &RetryEvent) {
        self(event);
    }
}

/// Logs each retry at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_retry(&self, event: &RetryEvent) {
        let status = event
            .status
            .map_or_else(|| "n/a".to_string(), |s| s.to_string());
        warn!(
            client = %event.client,
            attempt = event.attempt,
            method = %event.method,
            url = %event.url,
            status = %status,
            delay_ms = event.delay.as_millis() as u64,
            "retrying request"
        );
    }
}

/// Outcome of one attempt that did not succeed.
struct AttemptError {
    failure: Failure,
    reason: String,
    retry_after: Option<Duration>,
    headers: HeaderMap,
    body: Bytes,
}

/// An HTTP client that retries transient failures.
#[derive(Clone)]
pub struct ResilientClient {
    name: String,
    policy: RetryPolicy,
    http: reqwest::Client,
    observer: Arc<dyn RetryObserver>,
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    /// Creates a client with the given name and policy.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError::InvalidRequest` if the HTTP stack cannot be
    /// initialised.
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| UpstreamError::InvalidRequest(error_chain(&e)))?;
        Ok(Self {
            name: name.into(),
            policy,
            http,
            observer: Arc::new(TracingRetryObserver),
        })
    }

    /// Replaces the retry observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Client name used in logs and retry events.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The retry policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends a request, retrying per the policy.
    ///
    /// The delay before retry `n` is the `Retry-After` value of the failed
    /// response when present, otherwise `base_delay × 2^(n−1)` plus jitter.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError::Status` with the last status and body, or
    /// `UpstreamError::Transport` when no response was received.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let err = match self.send_once(&method, url, &headers, &body).await {
                Ok(response) => return Ok(response),
                Err(Attempt::Invalid(reason)) => return Err(UpstreamError::InvalidRequest(reason)),
                Err(Attempt::Failed(err)) => err,
            };

            let retries_done = attempt - 1;
            let mut give_up = retries_done >= self.policy.max_retries
                || !self.policy.is_retryable(&method, err.failure);

            let delay = err.retry_after.unwrap_or_else(|| {
                self.policy
                    .jittered_delay(attempt, &mut rand::thread_rng())
            });

            if let Some(budget) = self.policy.total_budget {
                if started.elapsed().saturating_add(delay) > budget {
                    give_up = true;
                }
            }

            if give_up {
                debug!(
                    client = %self.name,
                    method = %method,
                    url,
                    attempts = attempt,
                    reason = %err.reason,
                    "request failed"
                );
                return Err(into_upstream_error(err, method, url, attempt));
            }

            self.observer.on_retry(&RetryEvent {
                client: self.name.clone(),
                attempt,
                method: method.clone(),
                url: url.to_string(),
                status: err.failure.status(),
                delay,
            });
            sleep(delay).await;
        }
    }

    /// Sends a POST request.
    ///
    /// # Errors
    ///
    /// See [`ResilientClient::request`].
    pub async fn post(
        &self,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.request(Method::POST, url, headers, body).await
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<UpstreamResponse, Attempt> {
        let sent = self
            .http
            .request(method.clone(), url)
            .headers(headers.clone())
            .body(body.clone())
            .timeout(self.policy.timeout)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_builder() => return Err(Attempt::Invalid(error_chain(&e))),
            Err(e) => return Err(Attempt::transport(&e)),
        };

        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let body = response.bytes().await.map_err(|e| Attempt::transport(&e))?;
            return Ok(UpstreamResponse {
                status: status.as_u16(),
                headers,
                body,
            });
        }

        // An unreadable error body is reported as empty.
        let body = response.bytes().await.unwrap_or_default();
        Err(Attempt::Failed(AttemptError {
            failure: Failure::Status(status.as_u16()),
            reason: format!("HTTP {}", status.as_u16()),
            retry_after: parse_retry_after(&headers),
            headers,
            body,
        }))
    }
}

enum Attempt {
    Failed(AttemptError),
    Invalid(String),
}

impl Attempt {
    fn transport(err: &reqwest::Error) -> Self {
        let failure = if err.is_timeout() {
            Failure::Timeout
        } else {
            Failure::Network
        };
        Self::Failed(AttemptError {
            failure,
            reason: error_chain(err),
            retry_after: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        })
    }
}

fn into_upstream_error(err: AttemptError, method: Method, url: &str, attempts: u32) -> UpstreamError {
    match err.failure {
        Failure::Status(status) => UpstreamError::Status {
            method,
            url: url.to_string(),
            status,
            headers: err.headers,
            body: err.body,
            attempts,
        },
        Failure::Network | Failure::Timeout => UpstreamError::Transport {
            method,
            url: url.to_string(),
            reason: err.reason,
            timed_out: err.failure == Failure::Timeout,
            attempts,
        },
    }
}

/// Renders an error with its source chain, `outer: inner: root`.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
