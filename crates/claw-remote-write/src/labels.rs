//! Label and series identity types.
//!
//! - [`LabelSet`]: a name → value mapping, canonically ordered by name
//! - [`SeriesKey`]: the byte canonicalization of a label set used for grouping
//! - [`Sample`]: one parsed exposition line

use std::collections::BTreeMap;
use std::fmt;

/// Label carrying the metric name on the wire.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Label carrying the tenant when tenant labelling is enabled.
pub const TENANT_LABEL: &str = "tenant_id";

/// Separator byte used in [`SeriesKey`]. It never occurs in valid UTF-8, so
/// no label name or value can forge a boundary.
const KEY_SEPARATOR: u8 = 0xff;

/// A set of labels with unique names.
///
/// Iteration, display and key derivation always follow lexicographic
/// (byte-wise) name order regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    /// Creates an empty label set.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Sets a label, replacing any previous value for the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Adds a label and returns self for chaining.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns the value of a label, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns true if a label with the given name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Number of labels in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set has no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates `(name, value)` pairs in ascending name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overlays `other` on top of this set; labels in `other` win on collision.
    pub fn merge(&mut self, other: &Self) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Returns the canonical grouping key for this set.
    #[must_use]
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::from(self)
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for LabelSet {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}=\"{}\"", value.escape_default())?;
        }
        write!(f, "}}")
    }
}

/// Canonical identity of a label set, used only for grouping.
///
/// Two label sets with identical name → value pairs always produce the same
/// key, whatever order they were built in. Keys are never transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey(Vec<u8>);

impl SeriesKey {
    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&LabelSet> for SeriesKey {
    fn from(labels: &LabelSet) -> Self {
        let capacity = labels
            .iter()
            .map(|(name, value)| name.len() + value.len() + 2)
            .sum();
        let mut buf = Vec::with_capacity(capacity);
        for (name, value) in labels.iter() {
            buf.extend_from_slice(name.as_bytes());
            buf.push(KEY_SEPARATOR);
            buf.extend_from_slice(value.as_bytes());
            buf.push(KEY_SEPARATOR);
        }
        Self(buf)
    }
}

/// A single sample parsed from one exposition line.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Metric name (the part of the line before any `{`).
    pub metric: String,
    /// Labels parsed from the line itself.
    pub labels: LabelSet,
    /// Sample value; always finite.
    pub value: f64,
    /// Timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl Sample {
    /// Creates a sample.
    #[must_use]
    pub fn new(metric: impl Into<String>, labels: LabelSet, value: f64, timestamp_ms: i64) -> Self {
        Self {
            metric: metric.into(),
            labels,
            value,
            timestamp_ms,
        }
    }
}
