//! Groups parsed samples into label-keyed time series.

use std::collections::HashMap;

use crate::labels::{LabelSet, METRIC_NAME_LABEL, Sample, SeriesKey, TENANT_LABEL};
use crate::prompb::{self, TimeSeries, WriteRequest};

/// Options applied to every sample of one target.
#[derive(Debug, Clone, Copy)]
pub struct SeriesOptions<'a> {
    /// Labels attached to every series; sample labels win on collision.
    pub static_labels: &'a LabelSet,
    /// Tenant identifier, attached as `tenant_id` when `add_tenant_label` is set.
    pub tenant_id: &'a str,
    /// Whether to attach the tenant label.
    pub add_tenant_label: bool,
}

/// Builds the full label set of a sample: static labels, overlaid by the
/// sample's own labels, then `__name__` and (optionally) `tenant_id`.
#[must_use]
pub fn full_labels(sample: &Sample, options: &SeriesOptions<'_>) -> LabelSet {
    let mut labels = options.static_labels.clone();
    labels.merge(&sample.labels);
    labels.insert(METRIC_NAME_LABEL, sample.metric.as_str());
    if options.add_tenant_label {
        labels.insert(TENANT_LABEL, options.tenant_id);
    }
    labels
}

/// Groups samples by their full label set.
///
/// Series appear in order of first occurrence; samples inside a series keep
/// the order the parser produced them in. Labels are sorted by name.
#[must_use]
pub fn aggregate(samples: &[Sample], options: &SeriesOptions<'_>) -> Vec<TimeSeries> {
    let mut index: HashMap<SeriesKey, usize> = HashMap::new();
    let mut series: Vec<TimeSeries> = Vec::new();

    for sample in samples {
        let labels = full_labels(sample, options);
        let slot = *index.entry(labels.series_key()).or_insert_with(|| {
            series.push(TimeSeries::from_labels(&labels));
            series.len() - 1
        });
        series[slot]
            .samples
            .push(prompb::Sample::new(sample.value, sample.timestamp_ms));
    }

    series
}

/// Groups samples and wraps the result in a validated [`WriteRequest`].
///
/// # Errors
///
/// Returns `RemoteWriteError::Schema` if the grouped series violate the
/// remote-write schema.
pub fn build_write_request(
    samples: &[Sample],
    options: &SeriesOptions<'_>,
) -> crate::Result<WriteRequest> {
    let request = WriteRequest::new(aggregate(samples, options));
    request.validate()?;
    Ok(request)
}
