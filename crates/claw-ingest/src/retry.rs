//! Retry policy: failure classification and exponential backoff.

use std::time::Duration;

use rand::Rng;
use reqwest::Method;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// How a single attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Connection refused/reset, DNS failure or a broken body stream.
    Network,
    /// The per-attempt timeout fired.
    Timeout,
    /// The upstream answered with a non-2xx status.
    Status(u16),
}

impl Failure {
    /// Returns the HTTP status, if a response was received.
    #[must_use]
    pub const fn status(self) -> Option<u16> {
        match self {
            Self::Status(status) => Some(status),
            Self::Network | Self::Timeout => None,
        }
    }
}

/// Retry behaviour for one call site.
///
/// A policy is a plain value: built once, never mutated, freely copied into
/// clients and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    /// Whether a 429 on a non-idempotent request is retried.
    pub retry_on_429: bool,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Random extra delay as a fraction of the backoff delay, in `[0, 1]`.
    pub jitter: f64,
    /// Upper bound on elapsed time plus the next delay.
    pub total_budget: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_on_429: false,
            base_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
            jitter: 0.2,
            total_budget: None,
        }
    }
}

impl RetryPolicy {
    /// A single-attempt policy; the caller owns retries.
    #[must_use]
    pub fn pass_through(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            timeout,
            ..Self::default()
        }
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Enables or disables retrying 429 responses.
    #[must_use]
    pub const fn with_retry_on_429(mut self, enabled: bool) -> Self {
        self.retry_on_429 = enabled;
        self
    }

    /// Sets the base backoff delay.
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the jitter fraction, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    /// Bounds the total time spent on one request.
    #[must_use]
    pub const fn with_total_budget(mut self, budget: Duration) -> Self {
        self.total_budget = Some(budget);
        self
    }

    /// Backoff delay for the given retry number (1-based), without jitter.
    ///
    /// Retry 1 waits `base_delay`, retry `n` waits `base_delay × 2^(n−1)`.
    /// No cap is applied; the request timeout and budget bound it instead.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Backoff delay with up to `jitter × delay` of random extra time.
    #[must_use]
    pub fn jittered_delay<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.backoff_delay(attempt);
        // The field is public, so NaN or infinity can bypass `with_jitter`.
        if !(self.jitter > 0.0 && self.jitter.is_finite()) {
            return delay;
        }
        let fraction = rng.gen_range(0.0..self.jitter.min(1.0));
        let extra = Duration::try_from_secs_f64(delay.as_secs_f64() * fraction).unwrap_or_default();
        delay.saturating_add(extra)
    }

    /// Returns true if a failed attempt may be retried under this policy.
    ///
    /// Network failures and timeouts are always retryable. 500/502/503/504
    /// are retryable for every method; 429 only with `retry_on_429`.
    /// Idempotent methods additionally retry 429 and any 5xx.
    #[must_use]
    pub fn is_retryable(&self, method: &Method, failure: Failure) -> bool {
        match failure {
            Failure::Network | Failure::Timeout => true,
            Failure::Status(status) => {
                if is_idempotent(method) && (status == 429 || (500..=599).contains(&status)) {
                    return true;
                }
                match status {
                    500 | 502 | 503 | 504 => true,
                    429 => self.retry_on_429,
                    _ => false,
                }
            }
        }
    }
}

/// GET, HEAD, OPTIONS, PUT and DELETE.
#[must_use]
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

/// Reads a numeric `Retry-After` header as a delay in seconds.
///
/// Fractional values are accepted; HTTP-date values and negative or
/// non-finite numbers yield `None`.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let seconds: f64 = raw.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}
