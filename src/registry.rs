//! Metric registry
//!
//! The registry is the declaration point: instruments are created here,
//! their names and label schemas validated once, and inconsistent
//! redeclarations rejected before anything reaches storage. It holds no
//! metric values; declaring the same metric again with an identical shape
//! just hands back a fresh handle over the same stored series.

use crate::error::{Error, Result};
use crate::instruments::{Counter, Gauge, Histogram, Summary};
use crate::render::render_text;
use crate::storage::Storage;
use crate::types::{
    default_buckets, default_quantiles, MetricDesc, MetricFamily, MetricType,
    DEFAULT_MAX_AGE_SECONDS,
};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Name, help, and label schema for a counter or gauge
#[derive(Debug, Clone, PartialEq)]
pub struct Opts {
    /// Metric name, e.g. `http_requests_total`
    pub name: String,
    /// Help text for the exposition `# HELP` line
    pub help: String,
    /// Label names every series of this metric carries
    pub label_names: Vec<String>,
}

impl Opts {
    /// Create opts with no labels
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            label_names: Vec::new(),
        }
    }

    /// Set the label names
    pub fn label_names(mut self, names: &[&str]) -> Self {
        self.label_names = names.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Opts plus bucket upper bounds
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramOpts {
    /// Common name/help/labels
    pub opts: Opts,
    /// Bucket upper bounds, strictly increasing
    pub buckets: Vec<f64>,
}

impl HistogramOpts {
    /// Create histogram opts with the default buckets
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            opts: Opts::new(name, help),
            buckets: default_buckets(),
        }
    }

    /// Set the label names
    pub fn label_names(mut self, names: &[&str]) -> Self {
        self.opts = self.opts.label_names(names);
        self
    }

    /// Set the bucket upper bounds
    pub fn buckets(mut self, buckets: &[f64]) -> Self {
        self.buckets = buckets.to_vec();
        self
    }
}

/// Opts plus quantiles and sample lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOpts {
    /// Common name/help/labels
    pub opts: Opts,
    /// Quantiles to expose, each strictly between 0 and 1
    pub quantiles: Vec<f64>,
    /// Sliding-window length: how long each sample stays visible
    pub max_age_seconds: u64,
}

impl SummaryOpts {
    /// Create summary opts with the default quantiles and window
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            opts: Opts::new(name, help),
            quantiles: default_quantiles(),
            max_age_seconds: DEFAULT_MAX_AGE_SECONDS,
        }
    }

    /// Set the label names
    pub fn label_names(mut self, names: &[&str]) -> Self {
        self.opts = self.opts.label_names(names);
        self
    }

    /// Set the quantiles
    pub fn quantiles(mut self, quantiles: &[f64]) -> Self {
        self.quantiles = quantiles.to_vec();
        self
    }

    /// Set the sample lifetime
    pub fn max_age_seconds(mut self, seconds: u64) -> Self {
        self.max_age_seconds = seconds;
        self
    }
}

/// Shape of a declared metric, kept to detect inconsistent redeclaration
#[derive(Debug, Clone, PartialEq)]
struct Declaration {
    metric_type: MetricType,
    help: String,
    label_names: Vec<String>,
    buckets: Option<Vec<f64>>,
    quantiles: Option<Vec<f64>>,
    max_age_seconds: Option<u64>,
}

/// Metric declaration point over a storage backend
pub struct Registry {
    storage: Arc<dyn Storage>,
    declared: RwLock<HashMap<String, Declaration>>,
}

impl Registry {
    /// Create a registry over the given backend
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            declared: RwLock::new(HashMap::new()),
        }
    }

    /// Declare a counter
    pub fn counter(&self, opts: Opts) -> Result<Counter> {
        validate_opts(&opts)?;
        let declaration = Declaration {
            metric_type: MetricType::Counter,
            help: opts.help.clone(),
            label_names: opts.label_names.clone(),
            buckets: None,
            quantiles: None,
            max_age_seconds: None,
        };
        self.declare(&opts.name, declaration)?;
        Ok(Counter::new(Arc::clone(&self.storage), desc_from(opts)))
    }

    /// Declare a gauge
    pub fn gauge(&self, opts: Opts) -> Result<Gauge> {
        validate_opts(&opts)?;
        let declaration = Declaration {
            metric_type: MetricType::Gauge,
            help: opts.help.clone(),
            label_names: opts.label_names.clone(),
            buckets: None,
            quantiles: None,
            max_age_seconds: None,
        };
        self.declare(&opts.name, declaration)?;
        Ok(Gauge::new(Arc::clone(&self.storage), desc_from(opts)))
    }

    /// Declare a histogram
    pub fn histogram(&self, opts: HistogramOpts) -> Result<Histogram> {
        validate_opts(&opts.opts)?;
        validate_reserved_label(&opts.opts, "le")?;
        validate_buckets(&opts.opts.name, &opts.buckets)?;
        let declaration = Declaration {
            metric_type: MetricType::Histogram,
            help: opts.opts.help.clone(),
            label_names: opts.opts.label_names.clone(),
            buckets: Some(opts.buckets.clone()),
            quantiles: None,
            max_age_seconds: None,
        };
        self.declare(&opts.opts.name, declaration)?;
        Ok(Histogram::new(
            Arc::clone(&self.storage),
            desc_from(opts.opts),
            opts.buckets,
        ))
    }

    /// Declare a summary
    pub fn summary(&self, opts: SummaryOpts) -> Result<Summary> {
        validate_opts(&opts.opts)?;
        validate_reserved_label(&opts.opts, "quantile")?;
        validate_quantiles(&opts.opts.name, &opts.quantiles)?;
        if opts.max_age_seconds == 0 {
            return Err(Error::Configuration(format!(
                "summary {}: max_age_seconds must be at least 1",
                opts.opts.name
            )));
        }
        let declaration = Declaration {
            metric_type: MetricType::Summary,
            help: opts.opts.help.clone(),
            label_names: opts.opts.label_names.clone(),
            buckets: None,
            quantiles: Some(opts.quantiles.clone()),
            max_age_seconds: Some(opts.max_age_seconds),
        };
        self.declare(&opts.opts.name, declaration)?;
        Ok(Summary::new(
            Arc::clone(&self.storage),
            desc_from(opts.opts),
            opts.quantiles,
            opts.max_age_seconds,
        ))
    }

    /// Read back every stored metric family
    pub async fn collect(&self) -> Result<Vec<MetricFamily>> {
        self.storage.collect().await
    }

    /// Render the current state in Prometheus exposition text format
    pub async fn render(&self) -> Result<String> {
        Ok(render_text(&self.storage.collect().await?))
    }

    /// Delete every metric in the backing store's namespace
    ///
    /// Declarations are kept; the next update recreates the stored state.
    pub async fn wipe_storage(&self) -> Result<()> {
        self.storage.wipe().await
    }

    /// The backing store
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn declare(&self, name: &str, declaration: Declaration) -> Result<()> {
        let mut declared = self.declared.write();
        match declared.get(name) {
            None => {
                declared.insert(name.to_string(), declaration);
                Ok(())
            },
            Some(existing) if *existing == declaration => Ok(()),
            Some(existing) => Err(Error::Configuration(format!(
                "metric {} already declared as a {} with a different shape",
                name, existing.metric_type
            ))),
        }
    }
}

fn desc_from(opts: Opts) -> MetricDesc {
    MetricDesc {
        name: opts.name,
        help: opts.help,
        label_names: opts.label_names,
    }
}

fn valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_opts(opts: &Opts) -> Result<()> {
    if !valid_metric_name(&opts.name) {
        return Err(Error::Configuration(format!(
            "invalid metric name: {:?}",
            opts.name
        )));
    }
    for (i, label) in opts.label_names.iter().enumerate() {
        if !valid_label_name(label) {
            return Err(Error::Configuration(format!(
                "metric {}: invalid label name {:?}",
                opts.name, label
            )));
        }
        if label.starts_with("__") {
            return Err(Error::Configuration(format!(
                "metric {}: label name {:?} is reserved",
                opts.name, label
            )));
        }
        if opts.label_names[..i].contains(label) {
            return Err(Error::Configuration(format!(
                "metric {}: duplicate label name {:?}",
                opts.name, label
            )));
        }
    }
    Ok(())
}

fn validate_reserved_label(opts: &Opts, reserved: &str) -> Result<()> {
    if opts.label_names.iter().any(|l| l == reserved) {
        return Err(Error::Configuration(format!(
            "metric {}: label name {:?} is reserved for the exposition format",
            opts.name, reserved
        )));
    }
    Ok(())
}

fn validate_buckets(name: &str, buckets: &[f64]) -> Result<()> {
    if buckets.is_empty() {
        return Err(Error::Configuration(format!(
            "histogram {}: at least one bucket is required",
            name
        )));
    }
    for pair in buckets.windows(2) {
        if pair[0] >= pair[1] {
            return Err(Error::Configuration(format!(
                "histogram {}: buckets must be strictly increasing ({} then {})",
                name, pair[0], pair[1]
            )));
        }
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(Error::Configuration(format!(
            "histogram {}: bucket bounds must be finite (+Inf is implicit)",
            name
        )));
    }
    Ok(())
}

fn validate_quantiles(name: &str, quantiles: &[f64]) -> Result<()> {
    if quantiles.is_empty() {
        return Err(Error::Configuration(format!(
            "summary {}: at least one quantile is required",
            name
        )));
    }
    for q in quantiles {
        if !(*q > 0.0 && *q < 1.0) {
            return Err(Error::Configuration(format!(
                "summary {}: quantile {} is outside (0, 1)",
                name, q
            )));
        }
    }
    Ok(())
}
