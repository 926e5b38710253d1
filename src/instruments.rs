//! Instrument handles
//!
//! Lightweight facades over the storage backend. An instrument owns no
//! numeric state of its own; every operation is forwarded to the store, so
//! any number of processes can hold handles to the same metric and their
//! updates merge there. Handles are cheap to clone.
//!
//! The flip side of stateless handles is that reads need a storage round
//! trip, so the synchronous getters other metric facades offer
//! (`value()`, `count()`, `mean()`) are not available here. They return
//! [`Error::NotSupported`] instead of silently going async; the aggregate
//! read path is [`Storage::collect`].

use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::{GaugeOp, MetricDesc};

use std::sync::Arc;

fn check_arity(desc: &MetricDesc, label_values: &[&str]) -> Result<Vec<String>> {
    if label_values.len() != desc.label_names.len() {
        return Err(Error::Configuration(format!(
            "metric {} expects {} label value(s), got {}",
            desc.name,
            desc.label_names.len(),
            label_values.len()
        )));
    }
    Ok(label_values.iter().map(|s| s.to_string()).collect())
}

/// A monotonically increasing counter
#[derive(Clone)]
pub struct Counter {
    storage: Arc<dyn Storage>,
    desc: MetricDesc,
}

impl Counter {
    pub(crate) fn new(storage: Arc<dyn Storage>, desc: MetricDesc) -> Self {
        Self { storage, desc }
    }

    /// Increment the series for `label_values` by one
    pub async fn inc(&self, label_values: &[&str]) -> Result<()> {
        self.inc_by(label_values, 1.0).await
    }

    /// Increment the series for `label_values` by `amount`
    ///
    /// Rejects negative amounts; counters only go up.
    pub async fn inc_by(&self, label_values: &[&str], amount: f64) -> Result<()> {
        if amount < 0.0 || amount.is_nan() {
            return Err(Error::Configuration(format!(
                "counter {} cannot be incremented by {}",
                self.desc.name, amount
            )));
        }
        let values = check_arity(&self.desc, label_values)?;
        self.storage.update_counter(&self.desc, &values, amount).await
    }

    /// Not supported: the live value is in shared storage, not the handle
    pub fn value(&self) -> Result<f64> {
        Err(Error::NotSupported("counter value readback"))
    }

    /// The metric's descriptor
    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }
}

/// A gauge that can move in both directions
#[derive(Clone)]
pub struct Gauge {
    storage: Arc<dyn Storage>,
    desc: MetricDesc,
}

impl Gauge {
    pub(crate) fn new(storage: Arc<dyn Storage>, desc: MetricDesc) -> Self {
        Self { storage, desc }
    }

    /// Increment by one
    pub async fn inc(&self, label_values: &[&str]) -> Result<()> {
        self.inc_by(label_values, 1.0).await
    }

    /// Increment by `amount`
    pub async fn inc_by(&self, label_values: &[&str], amount: f64) -> Result<()> {
        let values = check_arity(&self.desc, label_values)?;
        self.storage
            .update_gauge(&self.desc, &values, GaugeOp::Inc, amount)
            .await
    }

    /// Decrement by one
    pub async fn dec(&self, label_values: &[&str]) -> Result<()> {
        self.dec_by(label_values, 1.0).await
    }

    /// Decrement by `amount`
    pub async fn dec_by(&self, label_values: &[&str], amount: f64) -> Result<()> {
        let values = check_arity(&self.desc, label_values)?;
        self.storage
            .update_gauge(&self.desc, &values, GaugeOp::Dec, amount)
            .await
    }

    /// Set to an absolute value
    pub async fn set(&self, label_values: &[&str], value: f64) -> Result<()> {
        let values = check_arity(&self.desc, label_values)?;
        self.storage
            .update_gauge(&self.desc, &values, GaugeOp::Set, value)
            .await
    }

    /// Not supported: the live value is in shared storage, not the handle
    pub fn value(&self) -> Result<f64> {
        Err(Error::NotSupported("gauge value readback"))
    }

    /// The metric's descriptor
    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }
}

/// A histogram with fixed upper-bound buckets
#[derive(Clone)]
pub struct Histogram {
    storage: Arc<dyn Storage>,
    desc: MetricDesc,
    buckets: Vec<f64>,
}

impl Histogram {
    pub(crate) fn new(storage: Arc<dyn Storage>, desc: MetricDesc, buckets: Vec<f64>) -> Self {
        Self {
            storage,
            desc,
            buckets,
        }
    }

    /// Record one observation
    pub async fn observe(&self, label_values: &[&str], value: f64) -> Result<()> {
        let values = check_arity(&self.desc, label_values)?;
        self.storage
            .update_histogram(&self.desc, &self.buckets, &values, value)
            .await
    }

    /// Not supported: derive the count from [`Storage::collect`]
    pub fn count(&self) -> Result<u64> {
        Err(Error::NotSupported("histogram count readback"))
    }

    /// Not supported: derive the sum from [`Storage::collect`]
    pub fn sum(&self) -> Result<f64> {
        Err(Error::NotSupported("histogram sum readback"))
    }

    /// Not supported: derive the mean from [`Storage::collect`]
    pub fn mean(&self) -> Result<f64> {
        Err(Error::NotSupported("histogram mean readback"))
    }

    /// The configured bucket upper bounds
    pub fn buckets(&self) -> &[f64] {
        &self.buckets
    }

    /// The metric's descriptor
    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }
}

/// A summary over a sliding time window of samples
#[derive(Clone)]
pub struct Summary {
    storage: Arc<dyn Storage>,
    desc: MetricDesc,
    quantiles: Vec<f64>,
    max_age_seconds: u64,
}

impl Summary {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        desc: MetricDesc,
        quantiles: Vec<f64>,
        max_age_seconds: u64,
    ) -> Self {
        Self {
            storage,
            desc,
            quantiles,
            max_age_seconds,
        }
    }

    /// Record one observation; it stays visible for the configured window
    pub async fn observe(&self, label_values: &[&str], value: f64) -> Result<()> {
        let values = check_arity(&self.desc, label_values)?;
        self.storage
            .update_summary(
                &self.desc,
                &self.quantiles,
                self.max_age_seconds,
                &values,
                value,
            )
            .await
    }

    /// Not supported: derive the count from [`Storage::collect`]
    pub fn count(&self) -> Result<u64> {
        Err(Error::NotSupported("summary count readback"))
    }

    /// Not supported: derive the sum from [`Storage::collect`]
    pub fn sum(&self) -> Result<f64> {
        Err(Error::NotSupported("summary sum readback"))
    }

    /// The configured quantiles
    pub fn quantiles(&self) -> &[f64] {
        &self.quantiles
    }

    /// Sample lifetime in seconds
    pub fn max_age_seconds(&self) -> u64 {
        self.max_age_seconds
    }

    /// The metric's descriptor
    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }
}
