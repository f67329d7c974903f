//! Error types for claw-ingest.

use std::net::SocketAddr;

use claw_remote_write::RemoteWriteError;
use thiserror::Error;

use crate::client::UpstreamError;

/// Errors that can occur while scraping, pushing or proxying.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Fetching a scrape target failed (network error or non-2xx status).
    #[error("scrape of '{target}' failed: {reason}")]
    Scrape {
        /// Name of the target.
        target: String,
        /// What went wrong.
        reason: String,
    },

    /// A write request could not be encoded.
    #[error("remote-write encoding failed: {0}")]
    Encode(#[from] RemoteWriteError),

    /// The remote-write backend rejected or never answered a push.
    #[error("push failed: {0}")]
    Upstream(#[from] UpstreamError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The proxy listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// The proxy server stopped with an I/O error.
    #[error("proxy server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl IngestError {
    /// Creates a `Scrape` error.
    pub fn scrape(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Scrape {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for ingest operations.
pub type IngestResult<T> = std::result::Result<T, IngestError>;
