//! Remote-write wire messages.
//!
//! Field numbers follow the Prometheus `prompb` schema:
//!
//! ```text
//! message WriteRequest { repeated TimeSeries timeseries = 1; }
//! message TimeSeries   { repeated Label labels = 1; repeated Sample samples = 2; }
//! message Label        { string name = 1; string value = 2; }
//! message Sample       { double value = 1; int64 timestamp = 2; }
//! ```

use prost::Message;

use crate::error::{RemoteWriteError, Result};
use crate::labels::{LabelSet, METRIC_NAME_LABEL};

/// The unit pushed to the backend.
#[derive(Clone, PartialEq, Message)]
pub struct WriteRequest {
    /// Series carried by this request.
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

/// One series: its labels sorted by name and its samples in arrival order.
#[derive(Clone, PartialEq, Message)]
pub struct TimeSeries {
    /// Labels, strictly ascending by name.
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    /// Samples in the order they were scraped.
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

/// A label name/value pair.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct Label {
    /// Label name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Label value.
    #[prost(string, tag = "2")]
    pub value: String,
}

/// A value at a point in time.
#[derive(Clone, PartialEq, Message)]
pub struct Sample {
    /// Sample value.
    #[prost(double, tag = "1")]
    pub value: f64,
    /// Milliseconds since the Unix epoch.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

impl Label {
    /// Creates a label.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Sample {
    /// Creates a sample.
    #[must_use]
    pub const fn new(value: f64, timestamp: i64) -> Self {
        Self { value, timestamp }
    }
}

impl TimeSeries {
    /// Creates an empty series for a label set. Labels come out sorted by
    /// name because [`LabelSet`] iterates in that order.
    #[must_use]
    pub fn from_labels(labels: &LabelSet) -> Self {
        Self {
            labels: labels.iter().map(|(n, v)| Label::new(n, v)).collect(),
            samples: Vec::new(),
        }
    }

    /// Returns the value of a label, if present.
    #[must_use]
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    /// Returns the metric name carried in `__name__`.
    #[must_use]
    pub fn metric_name(&self) -> Option<&str> {
        self.label(METRIC_NAME_LABEL)
    }

    fn validate(&self, index: usize) -> Result<()> {
        if self.labels.is_empty() {
            return Err(RemoteWriteError::schema(format!(
                "series {index} has no labels"
            )));
        }

        for (i, label) in self.labels.iter().enumerate() {
            if label.name.is_empty() {
                return Err(RemoteWriteError::schema(format!(
                    "series {index} has a label with an empty name"
                )));
            }
            if i > 0 && self.labels[i - 1].name.as_bytes() >= label.name.as_bytes() {
                return Err(RemoteWriteError::schema(format!(
                    "series {index} labels are not strictly sorted at '{}'",
                    label.name
                )));
            }
        }

        if self.metric_name().is_none_or(str::is_empty) {
            return Err(RemoteWriteError::schema(format!(
                "series {index} is missing {METRIC_NAME_LABEL}"
            )));
        }

        if self.samples.is_empty() {
            return Err(RemoteWriteError::schema(format!(
                "series {index} has no samples"
            )));
        }

        Ok(())
    }
}

impl WriteRequest {
    /// Creates a request from a list of series.
    #[must_use]
    pub const fn new(timeseries: Vec<TimeSeries>) -> Self {
        Self { timeseries }
    }

    /// Checks the request against the remote-write schema.
    ///
    /// # Errors
    ///
    /// Returns `RemoteWriteError::Schema` describing the first offending series.
    pub fn validate(&self) -> Result<()> {
        for (index, series) in self.timeseries.iter().enumerate() {
            series.validate(index)?;
        }
        Ok(())
    }

    /// Total number of samples across all series.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.timeseries.iter().map(|s| s.samples.len()).sum()
    }
}
