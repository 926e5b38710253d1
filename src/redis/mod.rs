//! Redis storage backend
//!
//! Module organization:
//! - `connection`: multiplexed connection pool with bounded concurrency
//! - `scripts`: Lua scripts for atomic read-modify-write updates
//! - `storage`: the [`Storage`](crate::storage::Storage) implementation
//! - `collect`: read-side family reconstruction
//! - `util`: URL sanitization for error messages

pub mod connection;
pub mod scripts;
pub mod storage;
pub mod util;

mod collect;

pub use connection::{ConnectBackoff, HealthStatus, PooledConnection, RedisConfig, RedisPool};
pub use scripts::LuaScripts;
pub use storage::{RedisStorage, StorageConfig};
