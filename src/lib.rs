//! Shared-storage Prometheus metrics
//!
//! Metric state lives in Redis rather than in process memory, so short-lived
//! workers, multi-process deployments, and horizontally scaled replicas all
//! update the same series and any one of them can serve the scrape. Every
//! update is a single atomic storage operation (a Lua script or a `SET NX`
//! create); concurrent writers never lose increments.
//!
//! # Architecture
//!
//! - [`Registry`]: declaration point; validates names, label schemas,
//!   buckets, and quantiles, and hands out instrument handles
//! - [`instruments`]: stateless [`Counter`], [`Gauge`], [`Histogram`], and
//!   [`Summary`] handles that forward every operation to storage
//! - [`storage::Storage`]: the backend seam; [`RedisStorage`] is the
//!   provided implementation
//! - [`render`]: Prometheus exposition text output
//!
//! # Example
//!
//! ```no_run
//! use promredis::{Opts, RedisConfig, RedisStorage, Registry, StorageConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> promredis::Result<()> {
//! let storage = RedisStorage::connect(
//!     RedisConfig::with_url("redis://127.0.0.1:6379"),
//!     StorageConfig::default(),
//! )
//! .await?;
//! let registry = Registry::new(Arc::new(storage));
//!
//! let requests = registry
//!     .counter(Opts::new("http_requests_total", "Total HTTP requests").label_names(&["route"]))?;
//! requests.inc(&["/api"]).await?;
//!
//! let exposition = registry.render().await?;
//! # let _ = exposition;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod instruments;
pub mod math;
pub mod redis;
pub mod registry;
pub mod render;
pub mod storage;
pub mod types;

pub use error::{CodecError, Error, Result, StorageError};
pub use instruments::{Counter, Gauge, Histogram, Summary};
pub use self::redis::{ConnectBackoff, RedisConfig, RedisPool, RedisStorage, StorageConfig};
pub use registry::{HistogramOpts, Opts, Registry, SummaryOpts};
pub use render::render_text;
pub use storage::Storage;
pub use types::{GaugeOp, MetricDesc, MetricFamily, MetricType, Sample};
