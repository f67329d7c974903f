//! Fetches exposition text from scrape targets.

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderValue};
use tracing::debug;

use crate::client::error_chain;
use crate::config::ScrapeTarget;
use crate::error::{IngestError, IngestResult};

const EXPOSITION_ACCEPT: &str = "text/plain;version=0.0.4;q=1,*/*;q=0.1";

/// Single-attempt HTTP fetcher for exposition endpoints.
///
/// A failed scrape is not retried; the next cycle tries again.
#[derive(Debug, Clone)]
pub struct Scraper {
    http: reqwest::Client,
    timeout: Duration,
}

impl Scraper {
    /// Creates a scraper with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Config` if the HTTP stack cannot be initialised.
    pub fn new(timeout: Duration) -> IngestResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Config(format!("scrape client: {}", error_chain(&e))))?;
        Ok(Self { http, timeout })
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetches the exposition text of a target.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Scrape` on a network failure, a timeout or a
    /// non-2xx status.
    pub async fn fetch(&self, target: &ScrapeTarget) -> IngestResult<String> {
        let response = self
            .http
            .get(&target.url)
            .header(ACCEPT, HeaderValue::from_static(EXPOSITION_ACCEPT))
            .send()
            .await
            .map_err(|e| IngestError::scrape(&target.name, error_chain(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::scrape(&target.name, format!("HTTP {}", status.as_u16())));
        }

        let text = response
            .text()
            .await
            .map_err(|e| IngestError::scrape(&target.name, error_chain(&e)))?;

        debug!(target_name = %target.name, bytes = text.len(), "scraped target");
        Ok(text)
    }
}
