//! Metrics ingest agent for Clawbernetes.
//!
//! `claw-ingest` periodically scrapes Prometheus exposition endpoints,
//! groups the samples into series, and pushes them as Snappy-compressed
//! remote-write requests to a multi-tenant backend. It can also run a small
//! OTLP proxy that stamps the tenant header on metric exports.
//!
//! # Modules
//!
//! - [`config`]: flags, environment fallbacks and validation
//! - [`retry`] / [`client`]: retrying HTTP client with `Retry-After` support
//! - [`scrape`] / [`writer`]: target fetches and remote-write pushes
//! - [`scheduler`]: the scrape loop
//! - [`proxy`]: the OTLP proxy

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod proxy;
pub mod retry;
pub mod scheduler;
pub mod scrape;
pub mod writer;

pub use client::{ResilientClient, RetryEvent, RetryObserver, TracingRetryObserver, UpstreamError, UpstreamResponse};
pub use config::{IngestArgs, IngestConfig, ProxyConfig, ScrapeTarget};
pub use error::{IngestError, IngestResult};
pub use proxy::OtlpProxy;
pub use retry::RetryPolicy;
pub use scheduler::{CycleError, CycleReport, Scheduler, TargetReport};
pub use writer::RemoteWriter;
