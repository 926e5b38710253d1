//! Label codec and storage key layout
//!
//! Label values are serialized as a JSON array and then base64-encoded so
//! the result is safe to embed in composite Redis keys (no delimiter
//! collisions, lossless for unicode and empty strings). Key construction
//! for metric hashes, per-type indexes, and the summary key tree lives
//! here so the write and read paths cannot drift apart.
//!
//! # Key Schema
//!
//! ```text
//! {prefix}{type}_METRIC_KEYS                      → SET of metric hash keys
//! {prefix}:{type}:{name}                          → HASH {__meta, <field> → value}
//! {prefix}summary_METRIC_KEYS:{name}:meta         → STRING metadata JSON
//! {prefix}summary_METRIC_KEYS:{name}:{lv}:value   → STRING encoded label values
//! {prefix}summary_METRIC_KEYS:{name}:{lv}:value:{id} → STRING sample (TTL'd)
//! ```
//!
//! Counter/gauge hash fields are the JSON array of label values; histogram
//! fields carry the bucket bound as well, e.g. `{"b":0.5,"labelValues":["a"]}`
//! with `"sum"` marking the running-sum field.

use crate::error::CodecError;
use crate::types::MetricType;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Default namespace prefix for every key written by this crate
pub const DEFAULT_KEY_PREFIX: &str = "PROMETHEUS_";

/// Suffix of the per-type index set
const METRIC_KEYS_SUFFIX: &str = "_METRIC_KEYS";

/// Hash field holding the metadata record
pub const META_FIELD: &str = "__meta";

/// Encode an ordered list of label values into a storage-safe string
///
/// Deterministic and lossless; [`decode_label_values`] is its exact inverse.
pub fn encode_label_values(values: &[String]) -> Result<String, CodecError> {
    let json = serde_json::to_string(values).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(BASE64_STANDARD.encode(json))
}

/// Decode a string produced by [`encode_label_values`]
///
/// Failure signals corrupted stored data, not a normal condition.
pub fn decode_label_values(encoded: &str) -> Result<Vec<String>, CodecError> {
    let json = BASE64_STANDARD
        .decode(encoded)
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Hash field identifier for a counter or gauge series
pub fn scalar_field(label_values: &[String]) -> Result<String, CodecError> {
    serde_json::to_string(label_values).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Parse a counter/gauge hash field back into label values
pub fn parse_scalar_field(field: &str) -> Result<Vec<String>, CodecError> {
    serde_json::from_str(field).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Bucket coordinate within a histogram hash
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BucketBound {
    /// Explicit upper bound
    Le(f64),
    /// The implicit +Infinity bucket
    Inf,
    /// The running-sum field (not a bucket)
    Sum,
}

impl BucketBound {
    fn to_json(self) -> serde_json::Value {
        match self {
            BucketBound::Le(bound) => json!(bound),
            BucketBound::Inf => json!("+Inf"),
            BucketBound::Sum => json!("sum"),
        }
    }

    /// Label value rendered for the `le` exposition label
    pub fn label_value(self) -> String {
        match self {
            BucketBound::Le(bound) => crate::types::format_value(bound),
            BucketBound::Inf => "+Inf".to_string(),
            BucketBound::Sum => "sum".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct HistogramField {
    b: serde_json::Value,
    #[serde(rename = "labelValues")]
    label_values: Vec<String>,
}

/// Hash field identifier for one histogram bucket (or the sum) of a series
///
/// Both the update script arguments and the collector's reconstruction use
/// this exact encoding; `serde_json` float formatting is deterministic, so
/// writer and reader always produce identical field strings.
pub fn histogram_field(bound: BucketBound, label_values: &[String]) -> String {
    json!({ "b": bound.to_json(), "labelValues": label_values }).to_string()
}

/// Parse a histogram hash field into its bucket bound and label values
pub fn parse_histogram_field(field: &str) -> Result<(BucketBound, Vec<String>), CodecError> {
    let parsed: HistogramField =
        serde_json::from_str(field).map_err(|e| CodecError::Decode(e.to_string()))?;
    let bound = match &parsed.b {
        serde_json::Value::Number(n) => BucketBound::Le(
            n.as_f64()
                .ok_or_else(|| CodecError::Decode(format!("non-finite bucket bound: {}", n)))?,
        ),
        serde_json::Value::String(s) if s == "+Inf" => BucketBound::Inf,
        serde_json::Value::String(s) if s == "sum" => BucketBound::Sum,
        other => {
            return Err(CodecError::Decode(format!(
                "unrecognized bucket bound: {}",
                other
            )))
        },
    };
    Ok((bound, parsed.label_values))
}

/// Key construction for one registry namespace
///
/// All keys share the configured prefix so multiple registries can share a
/// Redis instance without collision, and so a namespace wipe can match
/// `{prefix}*`.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Create a key space with the given namespace prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The namespace prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Pattern matching every key in this namespace
    pub fn wipe_pattern(&self) -> String {
        format!("{}*", self.prefix)
    }

    /// Per-type index set holding every metric hash key of that kind
    pub fn index_key(&self, metric_type: MetricType) -> String {
        format!("{}{}{}", self.prefix, metric_type.as_str(), METRIC_KEYS_SUFFIX)
    }

    /// Hash key holding all series of one metric
    pub fn metric_key(&self, metric_type: MetricType, name: &str) -> String {
        format!("{}:{}:{}", self.prefix, metric_type.as_str(), name)
    }

    /// Summary metadata key for a metric name
    pub fn summary_meta_key(&self, name: &str) -> String {
        format!("{}:{}:meta", self.index_key(MetricType::Summary), name)
    }

    /// Pattern matching every summary metadata key
    pub fn summary_meta_pattern(&self) -> String {
        format!("{}:*:meta", self.index_key(MetricType::Summary))
    }

    /// Summary value key for one label set (stores the encoded label values)
    pub fn summary_value_key(&self, name: &str, encoded_label_values: &str) -> String {
        format!(
            "{}:{}:{}:value",
            self.index_key(MetricType::Summary),
            name,
            encoded_label_values
        )
    }

    /// Pattern matching every value key of one summary
    pub fn summary_value_pattern(&self, name: &str) -> String {
        format!("{}:{}:*:value", self.index_key(MetricType::Summary), name)
    }

    /// Pattern matching the live sample keys under one value key
    pub fn summary_sample_pattern(&self, value_key: &str) -> String {
        format!("{}:*", value_key)
    }

    /// Key for one summary sample
    pub fn summary_sample_key(&self, value_key: &str, sample_id: &str) -> String {
        format!("{}:{}", value_key, sample_id)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_label_codec_roundtrip() {
        let cases: Vec<Vec<String>> = vec![
            vec![],
            owned(&[""]),
            owned(&["a", "b", "c"]),
            owned(&["with:colon", "with*star", "with\"quote"]),
            owned(&["ünïcødé", "日本語", "emoji 🦀"]),
            owned(&["newline\nand\ttab", "back\\slash"]),
            owned(&["", "", ""]),
        ];

        for values in cases {
            let encoded = encode_label_values(&values).unwrap();
            // Storage-safe: no delimiter characters from the key schema
            assert!(!encoded.contains(':'), "encoded form leaked a delimiter");
            assert!(!encoded.contains('*'));
            let decoded = decode_label_values(&encoded).unwrap();
            assert_eq!(decoded, values);
        }
    }

    #[test]
    fn test_label_codec_deterministic() {
        let values = owned(&["a", "b"]);
        assert_eq!(
            encode_label_values(&values).unwrap(),
            encode_label_values(&values).unwrap()
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_label_values("!!! not base64 !!!").is_err());
        // Valid base64, invalid JSON payload
        let junk = BASE64_STANDARD.encode("not json");
        assert!(decode_label_values(&junk).is_err());
    }

    #[test]
    fn test_scalar_field_roundtrip() {
        let values = owned(&["get", "200"]);
        let field = scalar_field(&values).unwrap();
        assert_eq!(field, r#"["get","200"]"#);
        assert_eq!(parse_scalar_field(&field).unwrap(), values);
    }

    #[test]
    fn test_histogram_field_roundtrip() {
        let values = owned(&["api"]);

        let field = histogram_field(BucketBound::Le(0.5), &values);
        let (bound, back) = parse_histogram_field(&field).unwrap();
        assert_eq!(bound, BucketBound::Le(0.5));
        assert_eq!(back, values);

        let sum_field = histogram_field(BucketBound::Sum, &values);
        let (bound, _) = parse_histogram_field(&sum_field).unwrap();
        assert_eq!(bound, BucketBound::Sum);

        let inf_field = histogram_field(BucketBound::Inf, &values);
        let (bound, _) = parse_histogram_field(&inf_field).unwrap();
        assert_eq!(bound, BucketBound::Inf);
    }

    #[test]
    fn test_histogram_field_deterministic() {
        // Writer and reader must produce byte-identical field strings
        let values = owned(&["a", "b"]);
        assert_eq!(
            histogram_field(BucketBound::Le(0.1), &values),
            histogram_field(BucketBound::Le(0.1), &values)
        );
    }

    #[test]
    fn test_key_space_layout() {
        let keys = KeySpace::default();
        assert_eq!(
            keys.index_key(MetricType::Counter),
            "PROMETHEUS_counter_METRIC_KEYS"
        );
        assert_eq!(
            keys.metric_key(MetricType::Counter, "http_requests_total"),
            "PROMETHEUS_:counter:http_requests_total"
        );
        assert_eq!(
            keys.summary_meta_key("latency"),
            "PROMETHEUS_summary_METRIC_KEYS:latency:meta"
        );
        assert_eq!(keys.wipe_pattern(), "PROMETHEUS_*");
    }

    #[test]
    fn test_key_space_custom_prefix() {
        let keys = KeySpace::new("APP_METRICS_");
        assert_eq!(keys.index_key(MetricType::Gauge), "APP_METRICS_gauge_METRIC_KEYS");
        assert_eq!(
            keys.summary_value_key("latency", "W10="),
            "APP_METRICS_summary_METRIC_KEYS:latency:W10=:value"
        );
        assert_eq!(
            keys.summary_value_pattern("latency"),
            "APP_METRICS_summary_METRIC_KEYS:latency:*:value"
        );
    }

    #[test]
    fn test_bucket_label_values() {
        assert_eq!(BucketBound::Le(50.0).label_value(), "50");
        assert_eq!(BucketBound::Le(0.25).label_value(), "0.25");
        assert_eq!(BucketBound::Inf.label_value(), "+Inf");
    }
}
