//! Storage backend seam
//!
//! Instruments and the registry talk to the store through this trait, so a
//! test double (or a different backend with equivalent atomicity
//! guarantees) can stand in for Redis. The backend owns all durable state;
//! implementations must make each update indivisible with respect to other
//! concurrent writers and keep metadata installation idempotent.

use crate::error::Result;
use crate::types::{GaugeOp, MetricDesc, MetricFamily};

use async_trait::async_trait;

/// A metric storage backend
#[async_trait]
pub trait Storage: Send + Sync {
    /// Apply one counter increment to the series identified by
    /// `(desc.name, label_values)`
    async fn update_counter(
        &self,
        desc: &MetricDesc,
        label_values: &[String],
        amount: f64,
    ) -> Result<()>;

    /// Apply one gauge mutation
    async fn update_gauge(
        &self,
        desc: &MetricDesc,
        label_values: &[String],
        op: GaugeOp,
        amount: f64,
    ) -> Result<()>;

    /// Apply one histogram observation against the declared buckets
    async fn update_histogram(
        &self,
        desc: &MetricDesc,
        buckets: &[f64],
        label_values: &[String],
        value: f64,
    ) -> Result<()>;

    /// Record one summary sample with the configured lifetime
    async fn update_summary(
        &self,
        desc: &MetricDesc,
        quantiles: &[f64],
        max_age_seconds: u64,
        label_values: &[String],
        value: f64,
    ) -> Result<()>;

    /// Read back every stored series as exposition-ready metric families
    async fn collect(&self) -> Result<Vec<MetricFamily>>;

    /// Delete every key under this store's namespace prefix
    async fn wipe(&self) -> Result<()>;
}
