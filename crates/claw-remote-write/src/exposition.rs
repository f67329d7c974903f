//! Best-effort parser for the Prometheus text exposition format.
//!
//! Each non-comment line of the form
//!
//! ```text
//! metric_name{label="value",...} value [timestamp]
//! ```
//!
//! becomes one [`Sample`]. Lines that do not fit are dropped without error;
//! parsing never fails, it only yields fewer samples.

use tracing::trace;

use crate::labels::{LabelSet, Sample};

/// Parses exposition text into samples, in input line order.
///
/// Samples without an explicit timestamp get `default_timestamp_ms`
/// (normally the scrape wall-clock time).
#[must_use]
pub fn parse(text: &str, default_timestamp_ms: i64) -> Vec<Sample> {
    text.split('\n')
        .enumerate()
        .filter_map(|(index, raw)| {
            let sample = parse_line(raw, default_timestamp_ms);
            if sample.is_none() && !is_ignorable(raw) {
                trace!(line = index + 1, "dropping malformed exposition line");
            }
            sample
        })
        .collect()
}

/// Parses a single exposition line.
///
/// Returns `None` for blank lines, comments and malformed lines.
#[must_use]
pub fn parse_line(raw: &str, default_timestamp_ms: i64) -> Option<Sample> {
    let line = raw.trim();
    if is_ignorable(line) {
        return None;
    }

    let (head, tail) = line.split_once(' ')?;
    let tail = tail.trim();
    if tail.is_empty() {
        return None;
    }

    let mut tokens = tail.split_whitespace();
    let value: f64 = tokens.next()?.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    let timestamp_ms = match tokens.next() {
        Some(token) => token.parse::<i64>().ok()?,
        None => default_timestamp_ms,
    };

    let (metric, labels) = parse_head(head);
    if metric.is_empty() {
        return None;
    }

    Some(Sample::new(metric, labels, value, timestamp_ms))
}

fn is_ignorable(line: &str) -> bool {
    let line = line.trim_start();
    line.is_empty() || line.starts_with('#')
}

/// Splits `name{labels}` into the metric name and its labels.
///
/// A missing closing brace keeps the name and drops the labels.
fn parse_head(head: &str) -> (&str, LabelSet) {
    let Some(open) = head.find('{') else {
        return (head, LabelSet::new());
    };

    let metric = &head[..open];
    let close = match head.rfind('}') {
        Some(close) if close > open => close,
        _ => return (metric, LabelSet::new()),
    };

    let inside = head[open + 1..close].trim();
    if inside.is_empty() {
        return (metric, LabelSet::new());
    }

    let mut labels = LabelSet::new();
    for pair in split_label_pairs(inside) {
        let Some((name, raw_value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        labels.insert(name, unescape_label_value(strip_quotes(raw_value.trim())));
    }

    (metric, labels)
}

/// Splits label content on commas that are not inside double quotes.
///
/// A backslash inside a quoted span escapes the next character, so `\"`
/// never closes the span.
fn split_label_pairs(inside: &str) -> Vec<&str> {
    let mut pairs = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, ch) in inside.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                push_trimmed(&mut pairs, &inside[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    push_trimmed(&mut pairs, &inside[start..]);

    pairs
}

fn push_trimmed<'a>(pairs: &mut Vec<&'a str>, fragment: &'a str) {
    let fragment = fragment.trim();
    if !fragment.is_empty() {
        pairs.push(fragment);
    }
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Reverses exposition escaping: `\n`, then `\"`, then `\\`.
fn unescape_label_value(value: &str) -> String {
    if !value.contains('\\') {
        return value.to_string();
    }
    value
        .replace("\\n", "\n")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}
