//! Periodic scrape → parse → group → push cycle.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use claw_remote_write::{SeriesOptions, WriteRequest, exposition, series};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::{ResilientClient, RetryObserver};
use crate::config::{IngestConfig, ScrapeTarget};
use crate::error::{IngestError, IngestResult};
use crate::scrape::Scraper;
use crate::writer::RemoteWriter;

/// Result of one target within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    /// Target name.
    pub target: String,
    /// Samples parsed from the exposition text.
    pub samples: usize,
    /// Series built from those samples.
    pub series: usize,
    /// Whether a write request was pushed (false when nothing was parsed).
    pub pushed: bool,
}

/// Result of a completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Timestamp stamped on samples without one, in ms since the epoch.
    pub timestamp_ms: i64,
    /// One entry per target, in configuration order.
    pub targets: Vec<TargetReport>,
}

impl CycleReport {
    /// Total samples across all targets.
    #[must_use]
    pub fn samples(&self) -> usize {
        self.targets.iter().map(|t| t.samples).sum()
    }
}

/// A cycle stopped at a failing target.
#[derive(Debug, Error)]
#[error("cycle aborted at target '{target}': {source}")]
pub struct CycleError {
    /// Target that failed.
    pub target: String,
    /// Targets that completed before the failure.
    pub completed: Vec<TargetReport>,
    /// What went wrong.
    #[source]
    pub source: IngestError,
}

/// Output of one target before it is pushed.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    /// Samples parsed from the exposition text.
    pub samples: usize,
    /// The grouped write request.
    pub request: WriteRequest,
}

/// Drives the scrape loop.
#[derive(Debug)]
pub struct Scheduler {
    config: IngestConfig,
    scraper: Scraper,
    writer: RemoteWriter,
}

impl Scheduler {
    /// Builds the scraper and remote writer from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if either HTTP client cannot be created or the
    /// tenant is not a valid header value.
    pub fn new(config: IngestConfig) -> IngestResult<Self> {
        let client = ResilientClient::new("remote-write", config.push_policy)?;
        Self::with_client(config, client)
    }

    /// Like [`Scheduler::new`] with a custom retry observer on the push client.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::new`].
    pub fn with_observer(config: IngestConfig, observer: Arc<dyn RetryObserver>) -> IngestResult<Self> {
        let client = ResilientClient::new("remote-write", config.push_policy)?.with_observer(observer);
        Self::with_client(config, client)
    }

    fn with_client(config: IngestConfig, client: ResilientClient) -> IngestResult<Self> {
        let scraper = Scraper::new(config.scrape_timeout)?;
        let writer = RemoteWriter::new(client, config.remote_write_url.as_str(), config.tenant_id.as_str())?;
        Ok(Self {
            config,
            scraper,
            writer,
        })
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Scrapes one target and groups its samples without pushing.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Scrape` if the fetch fails and
    /// `IngestError::Encode` if the grouped series are not schema-valid.
    pub async fn collect(&self, target: &ScrapeTarget, timestamp_ms: i64) -> IngestResult<Collected> {
        let text = self.scraper.fetch(target).await?;
        let samples = exposition::parse(&text, timestamp_ms);
        let options = SeriesOptions {
            static_labels: &target.static_labels,
            tenant_id: &self.config.tenant_id,
            add_tenant_label: self.config.add_tenant_label,
        };
        let request = series::build_write_request(&samples, &options)?;
        Ok(Collected {
            samples: samples.len(),
            request,
        })
    }

    /// Runs one cycle over all targets in order.
    ///
    /// One timestamp, taken at cycle start, is applied to every sample that
    /// carries none. A target yielding no samples is not pushed.
    ///
    /// # Errors
    ///
    /// Returns a [`CycleError`] at the first target whose scrape or push
    /// fails; remaining targets are skipped until the next cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let timestamp_ms = Utc::now().timestamp_millis();
        let mut reports = Vec::with_capacity(self.config.targets.len());

        // Targets run sequentially and one failure aborts the rest of the
        // cycle. Isolating failures per target would keep healthy targets
        // flowing while one is down.
        for target in &self.config.targets {
            match self.process_target(target, timestamp_ms).await {
                Ok(report) => reports.push(report),
                Err(source) => {
                    return Err(CycleError {
                        target: target.name.clone(),
                        completed: reports,
                        source,
                    });
                }
            }
        }

        Ok(CycleReport {
            timestamp_ms,
            targets: reports,
        })
    }

    async fn process_target(&self, target: &ScrapeTarget, timestamp_ms: i64) -> IngestResult<TargetReport> {
        let Collected { samples, request } = self.collect(target, timestamp_ms).await?;
        let series = request.timeseries.len();

        if samples == 0 {
            debug!(target_name = %target.name, "no samples, skipping push");
            return Ok(TargetReport {
                target: target.name.clone(),
                samples,
                series,
                pushed: false,
            });
        }

        let receipt = self.writer.push(&request).await?;
        info!(
            target_name = %target.name,
            samples,
            series,
            payload_bytes = receipt.payload_bytes,
            "pushed samples"
        );

        Ok(TargetReport {
            target: target.name.clone(),
            samples,
            series,
            pushed: true,
        })
    }

    /// Runs cycles until `shutdown` is cancelled and returns the number of
    /// cycles started.
    ///
    /// Cycle starts are spaced by the scrape interval; a cycle that overruns
    /// it is followed immediately by the next. Cancellation interrupts the
    /// pause between cycles, never a cycle in flight.
    pub async fn run(&self, shutdown: CancellationToken) -> u64 {
        let interval = self.config.scrape_interval;
        let mut cycles = 0u64;

        info!(
            targets = self.config.targets.len(),
            interval_ms = interval.as_millis() as u64,
            scrape_timeout_ms = self.scraper.timeout().as_millis() as u64,
            remote_write_url = %self.writer.url(),
            tenant = %self.writer.tenant_id(),
            "scheduler started"
        );

        while !shutdown.is_cancelled() {
            let started = Instant::now();
            cycles += 1;

            match self.run_cycle().await {
                Ok(report) => debug!(
                    cycle = cycles,
                    samples = report.samples(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "cycle complete"
                ),
                Err(e) => error!(
                    cycle = cycles,
                    target_name = %e.target,
                    skipped = self.config.targets.len().saturating_sub(e.completed.len() + 1),
                    error = %e.source,
                    "cycle aborted"
                ),
            }

            let pause = interval.saturating_sub(started.elapsed());
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(pause) => {}
            }
        }

        info!(cycles, "scheduler stopped");
        cycles
    }
}
