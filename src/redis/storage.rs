//! Redis-backed metric storage
//!
//! The write path: every observation becomes exactly one atomic operation
//! against Redis. Counters, gauges, and histograms run a Lua script that
//! couples the numeric update with first-writer metadata installation and
//! index registration; summaries store individually expiring samples via
//! `SET NX EX` (the store's own TTL replaces any sweep process).
//!
//! No client-side read-modify-write anywhere: the conditional logic lives
//! inside the scripts, so uncoordinated writer processes never lose
//! updates.

use crate::codec::{
    encode_label_values, histogram_field, scalar_field, BucketBound, KeySpace, DEFAULT_KEY_PREFIX,
};
use crate::error::{CodecError, Result};
use crate::storage::Storage;
use crate::types::{GaugeOp, Metadata, MetricDesc, MetricFamily, MetricType};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::connection::{RedisConfig, RedisPool};
use super::scripts::LuaScripts;

/// Storage namespace configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Prefix applied to every key, so independent registries can share a
    /// Redis instance
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl StorageConfig {
    /// Create a config with a custom namespace prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: prefix.into(),
        }
    }
}

/// Redis-backed implementation of [`Storage`]
pub struct RedisStorage {
    pub(crate) pool: Arc<RedisPool>,
    pub(crate) keys: KeySpace,
    scripts: LuaScripts,
}

impl RedisStorage {
    /// Connect to Redis and build a storage handle
    pub async fn connect(redis: RedisConfig, storage: StorageConfig) -> Result<Self> {
        let pool = Arc::new(RedisPool::new(redis).await?);
        Ok(Self::new(pool, storage))
    }

    /// Build a storage handle over an existing pool
    pub fn new(pool: Arc<RedisPool>, config: StorageConfig) -> Self {
        Self {
            pool,
            keys: KeySpace::new(config.key_prefix),
            scripts: LuaScripts::new(),
        }
    }

    /// The key space this store writes into
    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    fn metadata_json(
        desc: &MetricDesc,
        metric_type: MetricType,
        buckets: Option<&[f64]>,
        quantiles: Option<&[f64]>,
        max_age_seconds: Option<u64>,
    ) -> Result<String> {
        let meta = Metadata {
            name: desc.name.clone(),
            help: desc.help.clone(),
            metric_type,
            label_names: desc.label_names.clone(),
            buckets: buckets.map(|b| b.to_vec()),
            quantiles: quantiles.map(|q| q.to_vec()),
            max_age_seconds,
        };
        serde_json::to_string(&meta)
            .map_err(|e| CodecError::Encode(e.to_string()).into())
    }

    async fn run_update_script(
        &self,
        script: Arc<redis::Script>,
        metric_key: &str,
        index_key: &str,
        args: &[&str],
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let mut invocation = script.prepare_invoke();
        invocation.key(metric_key).key(index_key);
        for arg in args {
            invocation.arg(*arg);
        }
        let _: redis::Value = invocation
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| self.pool.storage_error(e))?;
        Ok(())
    }
}

/// Pick the increment command and its argument for a numeric amount
///
/// Whole-number amounts use HINCRBY so counter values stay exact integers
/// in storage; everything else goes through HINCRBYFLOAT.
fn increment_command(amount: f64) -> (&'static str, String) {
    if amount.fract() == 0.0 && amount.abs() <= i64::MAX as f64 {
        ("HINCRBY", format!("{}", amount as i64))
    } else {
        ("HINCRBYFLOAT", format!("{}", amount))
    }
}

/// First bucket whose upper bound holds the observed value, else +Inf
pub(crate) fn bucket_for_value(buckets: &[f64], value: f64) -> BucketBound {
    buckets
        .iter()
        .find(|bound| value <= **bound)
        .map(|bound| BucketBound::Le(*bound))
        .unwrap_or(BucketBound::Inf)
}

/// Collision-resistant sample identifier
///
/// Microsecond timestamp plus random entropy; uniqueness across processes
/// is ultimately enforced by the `SET NX` create, ids only need to make
/// collisions rare.
fn sample_id() -> String {
    format!(
        "{:x}-{:08x}",
        chrono::Utc::now().timestamp_micros(),
        rand::random::<u32>()
    )
}

#[async_trait]
impl Storage for RedisStorage {
    async fn update_counter(
        &self,
        desc: &MetricDesc,
        label_values: &[String],
        amount: f64,
    ) -> Result<()> {
        let metric_key = self.keys.metric_key(MetricType::Counter, &desc.name);
        let index_key = self.keys.index_key(MetricType::Counter);
        let field = scalar_field(label_values)?;
        let meta = Self::metadata_json(desc, MetricType::Counter, None, None, None)?;
        let (command, amount) = increment_command(amount);

        self.run_update_script(
            self.scripts.update_counter(),
            &metric_key,
            &index_key,
            &[command, &field, &amount, &meta],
        )
        .await
    }

    async fn update_gauge(
        &self,
        desc: &MetricDesc,
        label_values: &[String],
        op: GaugeOp,
        amount: f64,
    ) -> Result<()> {
        let metric_key = self.keys.metric_key(MetricType::Gauge, &desc.name);
        let index_key = self.keys.index_key(MetricType::Gauge);
        let field = scalar_field(label_values)?;
        let meta = Self::metadata_json(desc, MetricType::Gauge, None, None, None)?;

        let (command, value) = match op {
            GaugeOp::Inc => increment_command(amount),
            GaugeOp::Dec => increment_command(-amount),
            GaugeOp::Set => ("HSET", format!("{}", amount)),
        };

        self.run_update_script(
            self.scripts.update_gauge(),
            &metric_key,
            &index_key,
            &[command, &field, &value, &meta],
        )
        .await
    }

    async fn update_histogram(
        &self,
        desc: &MetricDesc,
        buckets: &[f64],
        label_values: &[String],
        value: f64,
    ) -> Result<()> {
        let metric_key = self.keys.metric_key(MetricType::Histogram, &desc.name);
        let index_key = self.keys.index_key(MetricType::Histogram);
        let sum_field = histogram_field(BucketBound::Sum, label_values);
        let bucket = bucket_for_value(buckets, value);
        let bucket_field = histogram_field(bucket, label_values);
        let meta =
            Self::metadata_json(desc, MetricType::Histogram, Some(buckets), None, None)?;
        let value = format!("{}", value);

        self.run_update_script(
            self.scripts.update_histogram(),
            &metric_key,
            &index_key,
            &[&sum_field, &bucket_field, &value, &meta],
        )
        .await
    }

    async fn update_summary(
        &self,
        desc: &MetricDesc,
        quantiles: &[f64],
        max_age_seconds: u64,
        label_values: &[String],
        value: f64,
    ) -> Result<()> {
        let meta_key = self.keys.summary_meta_key(&desc.name);
        let meta = Self::metadata_json(
            desc,
            MetricType::Summary,
            None,
            Some(quantiles),
            Some(max_age_seconds),
        )?;
        let encoded = encode_label_values(label_values)?;
        let value_key = self.keys.summary_value_key(&desc.name, &encoded);

        let mut conn = self.pool.get().await?;

        // Metadata and the series value key are first-writer-wins: NX never
        // overwrites what a concurrent writer already installed.
        let _: Option<String> = redis::cmd("SET")
            .arg(&meta_key)
            .arg(&meta)
            .arg("NX")
            .query_async(&mut *conn)
            .await
            .map_err(|e| self.pool.storage_error(e))?;

        let _: Option<String> = redis::cmd("SET")
            .arg(&value_key)
            .arg(&encoded)
            .arg("NX")
            .query_async(&mut *conn)
            .await
            .map_err(|e| self.pool.storage_error(e))?;

        // A colliding sample id means some other writer owns that key;
        // generate a fresh id and try again (the create is idempotent to
        // retry, the sample value is not overwritten).
        let expiry = max_age_seconds.max(1);
        loop {
            let sample_key = self
                .keys
                .summary_sample_key(&value_key, &sample_id());
            let created: Option<String> = redis::cmd("SET")
                .arg(&sample_key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(expiry)
                .query_async(&mut *conn)
                .await
                .map_err(|e| self.pool.storage_error(e))?;
            if created.is_some() {
                return Ok(());
            }
            debug!(key = %sample_key, "summary sample id collision, regenerating");
        }
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>> {
        self.collect_families().await
    }

    async fn wipe(&self) -> Result<()> {
        let pattern = self.keys.wipe_pattern();
        let script = self.scripts.wipe_namespace();
        let mut conn = self.pool.get().await?;
        let deleted: i64 = script
            .arg(&pattern)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| self.pool.storage_error(e))?;
        debug!(pattern = %pattern, deleted, "wiped metric namespace");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_selection() {
        let buckets = [50.0, 100.0, 300.0];
        assert_eq!(bucket_for_value(&buckets, 10.0), BucketBound::Le(50.0));
        assert_eq!(bucket_for_value(&buckets, 50.0), BucketBound::Le(50.0));
        assert_eq!(bucket_for_value(&buckets, 60.0), BucketBound::Le(100.0));
        assert_eq!(bucket_for_value(&buckets, 120.0), BucketBound::Le(300.0));
        assert_eq!(bucket_for_value(&buckets, 5000.0), BucketBound::Inf);
        assert_eq!(bucket_for_value(&[], 1.0), BucketBound::Inf);
    }

    #[test]
    fn test_increment_command_integer_vs_float() {
        assert_eq!(increment_command(1.0), ("HINCRBY", "1".to_string()));
        assert_eq!(increment_command(-3.0), ("HINCRBY", "-3".to_string()));
        assert_eq!(
            increment_command(2.5),
            ("HINCRBYFLOAT", "2.5".to_string())
        );
    }

    #[test]
    fn test_sample_ids_differ() {
        let a = sample_id();
        let b = sample_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_metadata_json_shape() {
        let desc = MetricDesc {
            name: "latency".to_string(),
            help: "Request latency".to_string(),
            label_names: vec!["route".to_string()],
        };
        let json = RedisStorage::metadata_json(
            &desc,
            MetricType::Summary,
            None,
            Some(&[0.5, 0.99]),
            Some(600),
        )
        .unwrap();
        assert!(json.contains("\"quantiles\":[0.5,0.99]"));
        assert!(json.contains("\"maxAgeSeconds\":600"));
        assert!(json.contains("\"type\":\"summary\""));
    }
}
