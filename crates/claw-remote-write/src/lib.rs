//! Prometheus remote-write data path for the Clawbernetes ingest agent.
//!
//! `claw-remote-write` turns scraped exposition text into the compressed
//! binary payload a multi-tenant metrics backend accepts. It does no I/O.
//!
//! # Pipeline
//!
//! 1. [`exposition::parse`]: text → [`Sample`]s (malformed lines dropped)
//! 2. [`series::aggregate`]: samples → label-keyed [`TimeSeries`]
//! 3. [`codec::encode`]: [`WriteRequest`] → validated, serialized, Snappy-compressed bytes
//!
//! # Example
//!
//! ```rust
//! use claw_remote_write::{codec, exposition, series, LabelSet, SeriesOptions};
//!
//! let text = "http_requests_total{method=\"GET\"} 12 1700000000000\n";
//! let samples = exposition::parse(text, 1_700_000_000_000);
//!
//! let statics = LabelSet::new().with("job", "customer-app");
//! let options = SeriesOptions {
//!     static_labels: &statics,
//!     tenant_id: "demo-tenant",
//!     add_tenant_label: true,
//! };
//! let request = series::build_write_request(&samples, &options).unwrap();
//! let payload = codec::encode(&request).unwrap();
//!
//! assert_eq!(codec::decode(&payload).unwrap(), request);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod codec;
pub mod error;
pub mod exposition;
pub mod labels;
pub mod prompb;
pub mod series;

// Re-export main types at crate root
pub use error::{RemoteWriteError, Result};
pub use labels::{LabelSet, METRIC_NAME_LABEL, Sample, SeriesKey, TENANT_LABEL};
pub use prompb::{TimeSeries, WriteRequest};
pub use series::SeriesOptions;
