//! Core data types shared between the write and read paths

use serde::{Deserialize, Serialize};

/// Instrument kind
///
/// Part of a metric's identity: `(type, name)` is unique within the store's
/// namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Monotonically increasing value
    Counter,
    /// Value that can go up, down, or be set
    Gauge,
    /// Per-bucket observation counts plus a running sum
    Histogram,
    /// Individually expiring samples, quantiles computed at read time
    Summary,
}

impl MetricType {
    /// Lowercase name used in storage keys and exposition output
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gauge mutation operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeOp {
    /// Add the amount to the current value
    Inc,
    /// Subtract the amount from the current value
    Dec,
    /// Replace the current value
    Set,
}

/// Static description of a metric: name, help text, and label-name schema
///
/// The label-name order declared here fixes the order in which label values
/// are stored; write and read paths must agree on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDesc {
    /// Metric name, unique per type
    pub name: String,
    /// Help text for exposition output
    pub help: String,
    /// Ordered label-name schema
    pub label_names: Vec<String>,
}

/// One rendered sample within a metric family
///
/// `label_names` holds only the sample's extra labels (`le` for histogram
/// buckets, `quantile` for summaries); the family-level label names come
/// first, and `label_values` covers both in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Sample name (metric name, possibly with `_bucket`/`_count`/`_sum`)
    pub name: String,
    /// Extra per-sample label names appended to the family's
    pub label_names: Vec<String>,
    /// Label values: family values first, then per-sample extras
    pub label_values: Vec<String>,
    /// Sample value
    pub value: f64,
}

/// All series sharing one metric name, kind, and label-name schema
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    /// Metric name
    pub name: String,
    /// Help text
    pub help: String,
    /// Instrument kind
    pub metric_type: MetricType,
    /// Family-level label names
    pub label_names: Vec<String>,
    /// Rendered samples in deterministic order
    pub samples: Vec<Sample>,
}

/// Per-series metadata record, written once per series and read back at
/// collection time to interpret the raw numeric fragments
///
/// Stored as JSON under the `__meta` hash field (counters, gauges,
/// histograms) or the summary meta key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Metric name
    pub name: String,
    /// Help text
    pub help: String,
    /// Instrument kind
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// Ordered label-name schema
    pub label_names: Vec<String>,
    /// Histogram bucket upper bounds, ascending (histograms only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<f64>>,
    /// Requested quantiles (summaries only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantiles: Option<Vec<f64>>,
    /// Per-sample lifetime in seconds (summaries only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<u64>,
}

/// Default histogram bucket upper bounds (seconds-oriented, as in the
/// Prometheus client ecosystem)
pub fn default_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

/// Default summary quantiles
pub fn default_quantiles() -> Vec<f64> {
    vec![0.01, 0.05, 0.5, 0.95, 0.99]
}

/// Default summary sample lifetime in seconds
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 600;

/// Format a value the way the exposition format expects
///
/// Finite values use Rust's shortest round-trip formatting; infinities
/// render as `+Inf`/`-Inf`.
pub fn format_value(value: f64) -> String {
    if value.is_infinite() {
        if value > 0.0 {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.is_nan() {
        "NaN".to_string()
    } else {
        format!("{}", value)
    }
}
