//! Read-side aggregation
//!
//! Reconstructs exposition-ready metric families from the raw stored
//! fragments. Raw histogram storage is per-bucket counts, not cumulative,
//! so cumulative values are derived here in bucket order per label set,
//! with a monotonic fill-forward for buckets that received no
//! observations. Summary quantiles are computed over the live
//! (non-expired) sample set; series whose samples have all expired are
//! deleted as an incidental cleanup.
//!
//! Pure reconstruction helpers (`scalar_family`, `histogram_family`,
//! `summary_series_samples`) are kept free of I/O so the aggregation
//! algorithms are testable against plain hash maps.
//!
//! Error policy: a series whose stored fragments fail to parse or decode
//! is skipped with a warning (corruption must not take down the scrape);
//! Redis transport errors abort the pass, never yielding a half-read
//! family.

use crate::codec::{
    decode_label_values, histogram_field, parse_histogram_field, parse_scalar_field, BucketBound,
    META_FIELD,
};
use crate::error::{Error, Result, StorageError};
use crate::math::quantile;
use crate::types::{format_value, Metadata, MetricFamily, MetricType, Sample};

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use super::storage::RedisStorage;

impl RedisStorage {
    /// Collect every stored series of every kind
    pub(crate) async fn collect_families(&self) -> Result<Vec<MetricFamily>> {
        let mut families = self.collect_indexed(MetricType::Histogram).await?;
        families.extend(self.collect_indexed(MetricType::Gauge).await?);
        families.extend(self.collect_indexed(MetricType::Counter).await?);
        families.extend(self.collect_summaries().await?);
        Ok(families)
    }

    /// Collect one index-backed kind (counter, gauge, or histogram)
    async fn collect_indexed(&self, metric_type: MetricType) -> Result<Vec<MetricFamily>> {
        let index_key = self.keys.index_key(metric_type);
        let mut conn = self.pool.get().await?;

        let mut members: Vec<String> = conn
            .smembers(&index_key)
            .await
            .map_err(|e| self.pool.storage_error(e))?;
        members.sort();

        let mut families = Vec::with_capacity(members.len());
        for key in members {
            let raw: HashMap<String, String> = conn
                .hgetall(&key)
                .await
                .map_err(|e| self.pool.storage_error(e))?;

            let family = match metric_type {
                MetricType::Histogram => histogram_family(&raw),
                _ => scalar_family(&raw),
            };
            match family {
                Ok(Some(family)) => families.push(family),
                Ok(None) => {
                    warn!(key = %key, "metric hash has no metadata record, skipping");
                },
                Err(e) => {
                    warn!(key = %key, error = %e, "unreadable metric hash, skipping");
                },
            }
        }
        Ok(families)
    }

    /// Collect summaries by pattern scan over the summary key tree
    async fn collect_summaries(&self) -> Result<Vec<MetricFamily>> {
        let mut conn = self.pool.get().await?;

        let meta_keys = self
            .scan_keys(&mut conn, &self.keys.summary_meta_pattern())
            .await?;

        let mut families = Vec::new();
        for meta_key in meta_keys {
            let raw: Option<String> = conn
                .get(&meta_key)
                .await
                .map_err(|e| self.pool.storage_error(e))?;
            let Some(raw) = raw else { continue };
            let meta: Metadata = match serde_json::from_str(&raw) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(key = %meta_key, error = %e, "corrupt summary metadata, skipping");
                    continue;
                },
            };
            let quantiles = meta.quantiles.clone().unwrap_or_default();

            let mut family = MetricFamily {
                name: meta.name.clone(),
                help: meta.help.clone(),
                metric_type: MetricType::Summary,
                label_names: meta.label_names.clone(),
                samples: Vec::new(),
            };

            let value_keys = self
                .scan_keys(&mut conn, &self.keys.summary_value_pattern(&meta.name))
                .await?;

            for value_key in value_keys {
                let encoded: Option<String> = conn
                    .get(&value_key)
                    .await
                    .map_err(|e| self.pool.storage_error(e))?;
                let Some(encoded) = encoded else { continue };
                let label_values = match decode_label_values(&encoded) {
                    Ok(values) => values,
                    Err(e) => {
                        warn!(key = %value_key, error = %e, "corrupt summary series key, skipping");
                        continue;
                    },
                };

                let sample_keys = self
                    .scan_keys(&mut conn, &self.keys.summary_sample_pattern(&value_key))
                    .await?;
                let mut samples = Vec::with_capacity(sample_keys.len());
                for sample_key in sample_keys {
                    // A sample may expire between the scan and the read
                    let value: Option<String> = conn
                        .get(&sample_key)
                        .await
                        .map_err(|e| self.pool.storage_error(e))?;
                    if let Some(value) = value {
                        match value.parse::<f64>() {
                            Ok(value) => samples.push(value),
                            Err(_) => {
                                warn!(key = %sample_key, "non-numeric summary sample, skipping")
                            },
                        }
                    }
                }

                if samples.is_empty() {
                    // Every sample expired; the value key is dead weight now.
                    // Verified-empty at read time, so this is safe alongside
                    // live writers (a new observation recreates it).
                    let _: usize = conn
                        .del(&value_key)
                        .await
                        .map_err(|e| self.pool.storage_error(e))?;
                    debug!(key = %value_key, "removed summary series with no live samples");
                    continue;
                }

                samples.sort_by(|a, b| a.total_cmp(b));
                family.samples.extend(summary_series_samples(
                    &meta.name,
                    &label_values,
                    &quantiles,
                    &samples,
                ));
            }

            if family.samples.is_empty() {
                let _: usize = conn
                    .del(&meta_key)
                    .await
                    .map_err(|e| self.pool.storage_error(e))?;
                debug!(key = %meta_key, "removed summary metadata with no live series");
            } else {
                families.push(family);
            }
        }
        Ok(families)
    }

    /// Enumerate keys matching a pattern with a cursor SCAN loop
    ///
    /// SCAN instead of KEYS: the blocking O(keyspace) command has no place
    /// on a scrape path shared with live writers. SCAN may also hand back a
    /// key more than once while the keyspace is changing underneath it, so
    /// results accumulate in an ordered set; the returned list is sorted
    /// and duplicate-free.
    async fn scan_keys(
        &self,
        conn: &mut MultiplexedConnection,
        pattern: &str,
    ) -> Result<Vec<String>> {
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await
                .map_err(|e| self.pool.storage_error(e))?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys.into_iter().collect())
    }
}

fn parse_meta(raw: &HashMap<String, String>) -> Result<Option<Metadata>> {
    let Some(meta_json) = raw.get(META_FIELD) else {
        return Ok(None);
    };
    let meta = serde_json::from_str(meta_json)
        .map_err(|e| Error::from(StorageError::Corrupted(e.to_string())))?;
    Ok(Some(meta))
}

fn parse_value(field: &str, value: &str) -> Result<f64> {
    value.parse::<f64>().map_err(|_| {
        StorageError::Corrupted(format!("non-numeric value under field {field}")).into()
    })
}

/// Reconstruct a counter or gauge family from its raw hash
///
/// One sample per stored label set, sorted by concatenated label values
/// for stable, diffable output.
pub(crate) fn scalar_family(raw: &HashMap<String, String>) -> Result<Option<MetricFamily>> {
    let Some(meta) = parse_meta(raw)? else {
        return Ok(None);
    };

    // Corruption in one field loses that series only, never its siblings
    let mut samples = Vec::with_capacity(raw.len() - 1);
    for (field, value) in raw {
        if field == META_FIELD {
            continue;
        }
        let label_values = match parse_scalar_field(field) {
            Ok(values) => values,
            Err(e) => {
                warn!(field = %field, error = %e, "unreadable series field, skipping");
                continue;
            },
        };
        let value = match parse_value(field, value) {
            Ok(value) => value,
            Err(e) => {
                warn!(field = %field, error = %e, "corrupt series value, skipping");
                continue;
            },
        };
        samples.push(Sample {
            name: meta.name.clone(),
            label_names: Vec::new(),
            label_values,
            value,
        });
    }
    samples.sort_by(|a, b| a.label_values.concat().cmp(&b.label_values.concat()));

    Ok(Some(MetricFamily {
        name: meta.name.clone(),
        help: meta.help.clone(),
        metric_type: meta.metric_type,
        label_names: meta.label_names,
        samples,
    }))
}

/// Reconstruct a histogram family from its raw hash
///
/// Distinct label sets are discovered from the stored field identifiers
/// (excluding the sum field), then each one is rebuilt independently by
/// [`histogram_series`].
pub(crate) fn histogram_family(raw: &HashMap<String, String>) -> Result<Option<MetricFamily>> {
    let Some(meta) = parse_meta(raw)? else {
        return Ok(None);
    };
    let buckets = meta.buckets.clone().unwrap_or_default();

    // BTreeSet both de-duplicates and fixes the emission order; a field
    // that fails to parse loses only the series it belongs to
    let mut label_sets: BTreeSet<Vec<String>> = BTreeSet::new();
    for field in raw.keys() {
        if field == META_FIELD {
            continue;
        }
        match parse_histogram_field(field) {
            Ok((BucketBound::Sum, _)) => {},
            Ok((_, values)) => {
                label_sets.insert(values);
            },
            Err(e) => {
                warn!(field = %field, error = %e, "unreadable histogram field, skipping");
            },
        }
    }

    let mut samples = Vec::new();
    for label_values in &label_sets {
        match histogram_series(&meta.name, &buckets, label_values, raw) {
            Ok(series) => samples.extend(series),
            Err(e) => {
                warn!(metric = %meta.name, error = %e, "corrupt histogram series, skipping");
            },
        }
    }

    Ok(Some(MetricFamily {
        name: meta.name.clone(),
        help: meta.help.clone(),
        metric_type: meta.metric_type,
        label_names: meta.label_names,
        samples,
    }))
}

/// Cumulative bucket, count, and sum samples for one histogram series
///
/// Buckets are walked in ascending order with +Inf last; an absent bucket
/// emits the running accumulator unchanged (fill-forward), a present one
/// adds its count first. `_count` is the final accumulator, `_sum` the
/// stored sum field.
fn histogram_series(
    name: &str,
    buckets: &[f64],
    label_values: &[String],
    raw: &HashMap<String, String>,
) -> Result<Vec<Sample>> {
    let mut samples = Vec::with_capacity(buckets.len() + 3);
    let mut acc = 0.0;
    let bounds = buckets
        .iter()
        .map(|b| BucketBound::Le(*b))
        .chain(std::iter::once(BucketBound::Inf));
    for bound in bounds {
        let field = histogram_field(bound, label_values);
        if let Some(count) = raw.get(&field) {
            acc += parse_value(&field, count)?;
        }
        let mut bucket_labels = label_values.to_vec();
        bucket_labels.push(bound.label_value());
        samples.push(Sample {
            name: format!("{}_bucket", name),
            label_names: vec!["le".to_string()],
            label_values: bucket_labels,
            value: acc,
        });
    }

    samples.push(Sample {
        name: format!("{}_count", name),
        label_names: Vec::new(),
        label_values: label_values.to_vec(),
        value: acc,
    });

    let sum_field = histogram_field(BucketBound::Sum, label_values);
    let sum = match raw.get(&sum_field) {
        Some(value) => parse_value(&sum_field, value)?,
        None => 0.0,
    };
    samples.push(Sample {
        name: format!("{}_sum", name),
        label_names: Vec::new(),
        label_values: label_values.to_vec(),
        value: sum,
    });
    Ok(samples)
}

/// Quantile, count, and sum samples for one summary series
///
/// `sorted` must be ascending; quantiles use linear order-statistic
/// interpolation.
pub(crate) fn summary_series_samples(
    name: &str,
    label_values: &[String],
    quantiles: &[f64],
    sorted: &[f64],
) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(quantiles.len() + 2);
    for q in quantiles {
        let mut quantile_labels = label_values.to_vec();
        quantile_labels.push(format_value(*q));
        samples.push(Sample {
            name: name.to_string(),
            label_names: vec!["quantile".to_string()],
            label_values: quantile_labels,
            value: quantile(sorted, *q),
        });
    }
    samples.push(Sample {
        name: format!("{}_count", name),
        label_names: Vec::new(),
        label_values: label_values.to_vec(),
        value: sorted.len() as f64,
    });
    samples.push(Sample {
        name: format!("{}_sum", name),
        label_names: Vec::new(),
        label_values: label_values.to_vec(),
        value: sorted.iter().sum(),
    });
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::scalar_field;

    fn owned(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn meta_json(name: &str, metric_type: MetricType, buckets: Option<Vec<f64>>) -> String {
        let meta = Metadata {
            name: name.to_string(),
            help: format!("{} help", name),
            metric_type,
            label_names: owned(&["route"]),
            buckets,
            quantiles: None,
            max_age_seconds: None,
        };
        serde_json::to_string(&meta).unwrap()
    }

    #[test]
    fn test_scalar_family_reconstruction() {
        let mut raw = HashMap::new();
        raw.insert(
            META_FIELD.to_string(),
            meta_json("requests_total", MetricType::Counter, None),
        );
        raw.insert(scalar_field(&owned(&["b"])).unwrap(), "7".to_string());
        raw.insert(scalar_field(&owned(&["a"])).unwrap(), "3.5".to_string());

        let family = scalar_family(&raw).unwrap().unwrap();
        assert_eq!(family.name, "requests_total");
        assert_eq!(family.metric_type, MetricType::Counter);
        assert_eq!(family.label_names, owned(&["route"]));
        // Sorted by concatenated label values
        assert_eq!(family.samples[0].label_values, owned(&["a"]));
        assert_eq!(family.samples[0].value, 3.5);
        assert_eq!(family.samples[1].label_values, owned(&["b"]));
        assert_eq!(family.samples[1].value, 7.0);
    }

    #[test]
    fn test_scalar_family_without_meta() {
        let mut raw = HashMap::new();
        raw.insert(scalar_field(&owned(&["a"])).unwrap(), "1".to_string());
        assert!(scalar_family(&raw).unwrap().is_none());
    }

    #[test]
    fn test_scalar_family_skips_corrupt_series() {
        let mut raw = HashMap::new();
        raw.insert(
            META_FIELD.to_string(),
            meta_json("requests_total", MetricType::Counter, None),
        );
        raw.insert(scalar_field(&owned(&["a"])).unwrap(), "oops".to_string());
        raw.insert("not a field".to_string(), "1".to_string());
        raw.insert(scalar_field(&owned(&["b"])).unwrap(), "2".to_string());

        // Only the unreadable series are lost; healthy siblings survive
        let family = scalar_family(&raw).unwrap().unwrap();
        assert_eq!(family.samples.len(), 1);
        assert_eq!(family.samples[0].label_values, owned(&["b"]));
        assert_eq!(family.samples[0].value, 2.0);
    }

    #[test]
    fn test_scalar_family_corrupt_metadata_is_fatal() {
        // Without metadata the whole hash is uninterpretable
        let mut raw = HashMap::new();
        raw.insert(META_FIELD.to_string(), "not json".to_string());
        raw.insert(scalar_field(&owned(&["a"])).unwrap(), "1".to_string());
        assert!(scalar_family(&raw).is_err());
    }

    /// Simulate the write path against an in-memory hash, then reconstruct.
    fn simulate_histogram(buckets: &[f64], observations: &[(Vec<String>, f64)]) -> HashMap<String, String> {
        use crate::redis::storage::bucket_for_value;

        let mut raw: HashMap<String, String> = HashMap::new();
        raw.insert(
            META_FIELD.to_string(),
            meta_json("latency", MetricType::Histogram, Some(buckets.to_vec())),
        );
        for (label_values, value) in observations {
            let bucket = bucket_for_value(buckets, *value);
            let bucket_field = histogram_field(bucket, label_values);
            let count = raw.get(&bucket_field).map_or(0.0, |c| c.parse().unwrap());
            raw.insert(bucket_field, format!("{}", count + 1.0));

            let sum_field = histogram_field(BucketBound::Sum, label_values);
            let sum = raw.get(&sum_field).map_or(0.0, |s| s.parse().unwrap());
            raw.insert(sum_field, format!("{}", sum + value));
        }
        raw
    }

    #[test]
    fn test_histogram_cumulative_reconstruction() {
        let buckets = [50.0, 100.0, 300.0];
        let labels = owned(&["api"]);
        let raw = simulate_histogram(
            &buckets,
            &[
                (labels.clone(), 10.0),
                (labels.clone(), 60.0),
                (labels.clone(), 120.0),
                (labels.clone(), 5000.0),
            ],
        );

        let family = histogram_family(&raw).unwrap().unwrap();

        let bucket_values: Vec<(String, f64)> = family
            .samples
            .iter()
            .filter(|s| s.name == "latency_bucket")
            .map(|s| (s.label_values.last().unwrap().clone(), s.value))
            .collect();
        assert_eq!(
            bucket_values,
            vec![
                ("50".to_string(), 1.0),
                ("100".to_string(), 2.0),
                ("300".to_string(), 3.0),
                ("+Inf".to_string(), 4.0),
            ]
        );

        let count = family
            .samples
            .iter()
            .find(|s| s.name == "latency_count")
            .unwrap();
        assert_eq!(count.value, 4.0);

        let sum = family
            .samples
            .iter()
            .find(|s| s.name == "latency_sum")
            .unwrap();
        assert_eq!(sum.value, 5190.0);
    }

    #[test]
    fn test_histogram_fill_forward() {
        // Only the 100 bucket got observations; 50 must report 0 and the
        // later buckets must carry the accumulator forward.
        let buckets = [50.0, 100.0, 300.0];
        let labels = owned(&["api"]);
        let raw = simulate_histogram(&buckets, &[(labels.clone(), 60.0), (labels.clone(), 70.0)]);

        let family = histogram_family(&raw).unwrap().unwrap();
        let bucket_values: Vec<f64> = family
            .samples
            .iter()
            .filter(|s| s.name == "latency_bucket")
            .map(|s| s.value)
            .collect();
        assert_eq!(bucket_values, vec![0.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_histogram_multiple_label_sets() {
        let buckets = [1.0, 2.0];
        let raw = simulate_histogram(
            &buckets,
            &[
                (owned(&["b"]), 0.5),
                (owned(&["a"]), 1.5),
                (owned(&["a"]), 0.5),
            ],
        );

        let family = histogram_family(&raw).unwrap().unwrap();
        // Label sets come out in deterministic sorted order
        let first_labels: Vec<&str> = family
            .samples
            .iter()
            .filter(|s| s.name == "latency_count")
            .map(|s| s.label_values[0].as_str())
            .collect();
        assert_eq!(first_labels, vec!["a", "b"]);

        let a_count = family
            .samples
            .iter()
            .find(|s| s.name == "latency_count" && s.label_values[0] == "a")
            .unwrap();
        assert_eq!(a_count.value, 2.0);
    }

    #[test]
    fn test_histogram_family_skips_corrupt_series() {
        let buckets = [1.0, 2.0];
        let mut raw = simulate_histogram(&buckets, &[(owned(&["a"]), 0.5)]);
        // Series "b" exists but its bucket count is unreadable
        raw.insert(
            histogram_field(BucketBound::Le(1.0), &owned(&["b"])),
            "garbled".to_string(),
        );
        // A stray non-JSON field belongs to no series at all
        raw.insert("stray".to_string(), "3".to_string());

        let family = histogram_family(&raw).unwrap().unwrap();
        let counted: Vec<&str> = family
            .samples
            .iter()
            .filter(|s| s.name == "latency_count")
            .map(|s| s.label_values[0].as_str())
            .collect();
        assert_eq!(counted, vec!["a"]);
    }

    #[test]
    fn test_summary_series_samples() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        let samples = summary_series_samples("latency", &owned(&["api"]), &[0.5, 0.9], &sorted);

        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].label_values, owned(&["api", "0.5"]));
        assert_eq!(samples[0].value, 3.0);
        assert_eq!(samples[0].label_names, owned(&["quantile"]));
        assert!((samples[1].value - 4.6).abs() < 1e-9);

        let count = &samples[2];
        assert_eq!(count.name, "latency_count");
        assert_eq!(count.value, 5.0);
        assert_eq!(count.label_values, owned(&["api"]));

        let sum = &samples[3];
        assert_eq!(sum.name, "latency_sum");
        assert_eq!(sum.value, 15.0);
    }
}
