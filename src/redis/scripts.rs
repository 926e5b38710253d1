//! Lua scripts for atomic metric updates
//!
//! Every write touches two pieces of state: the per-series hash and the
//! shared per-type index set. These scripts make the numeric update, the
//! first-writer metadata install, and the index registration indivisible
//! from the point of view of any concurrent writer. Metadata writes are
//! idempotent (same JSON every time), so re-running them is harmless.
//!
//! # Scripts Provided
//!
//! - `update_counter`: increment a series field, install metadata on the
//!   index-add that first registered the key
//! - `update_gauge`: inc/dec/set a series field, install metadata on the
//!   field's first write
//! - `update_histogram`: increment one bucket count and the running sum
//! - `wipe_namespace`: SCAN/DEL every key under a prefix

use parking_lot::RwLock;
use redis::Script;
use std::collections::HashMap;
use std::sync::Arc;

/// Collection of Lua scripts for atomic metric updates
///
/// Scripts are cached after first use to avoid repeated parsing.
pub struct LuaScripts {
    /// Cache of compiled scripts by name
    cache: RwLock<HashMap<String, Arc<Script>>>,
}

impl LuaScripts {
    /// Create a new LuaScripts instance
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create a cached script
    fn get_or_create(&self, name: &str, lua: &str) -> Arc<Script> {
        {
            let cache = self.cache.read();
            if let Some(script) = cache.get(name) {
                return Arc::clone(script);
            }
        }

        let script = Arc::new(Script::new(lua));
        {
            let mut cache = self.cache.write();
            cache.insert(name.to_string(), Arc::clone(&script));
        }
        script
    }

    /// Atomically apply a counter increment
    ///
    /// The `SADD` result is the first-writer signal: only the writer whose
    /// add actually registered the metric key installs the metadata record.
    ///
    /// # Keys
    /// - KEYS[1]: Metric hash key
    /// - KEYS[2]: Per-type index set key
    ///
    /// # Arguments
    /// - ARGV[1]: Increment command (HINCRBY | HINCRBYFLOAT)
    /// - ARGV[2]: Hash field (encoded label values)
    /// - ARGV[3]: Increment amount
    /// - ARGV[4]: Metadata JSON
    ///
    /// # Returns
    /// - The new field value
    pub fn update_counter(&self) -> Arc<Script> {
        self.get_or_create(
            "update_counter",
            r#"
            local metric_key = KEYS[1]
            local index_key = KEYS[2]

            local result = redis.call(ARGV[1], metric_key, ARGV[2], ARGV[3])

            local added = redis.call('SADD', index_key, metric_key)
            if added == 1 then
                redis.call('HSET', metric_key, '__meta', ARGV[4])
            end

            return result
            "#,
        )
    }

    /// Atomically apply a gauge mutation
    ///
    /// First-writer detection is per series field (HEXISTS before the
    /// mutation), so every distinct label set registers metadata and the
    /// index exactly once regardless of which operation touched it first.
    ///
    /// # Keys
    /// - KEYS[1]: Metric hash key
    /// - KEYS[2]: Per-type index set key
    ///
    /// # Arguments
    /// - ARGV[1]: Mutation command (HINCRBY | HINCRBYFLOAT | HSET)
    /// - ARGV[2]: Hash field (encoded label values)
    /// - ARGV[3]: Amount or value
    /// - ARGV[4]: Metadata JSON
    ///
    /// # Returns
    /// - The command's own result
    pub fn update_gauge(&self) -> Arc<Script> {
        self.get_or_create(
            "update_gauge",
            r#"
            local metric_key = KEYS[1]
            local index_key = KEYS[2]

            local existed = redis.call('HEXISTS', metric_key, ARGV[2])
            local result = redis.call(ARGV[1], metric_key, ARGV[2], ARGV[3])

            if existed == 0 then
                redis.call('HSET', metric_key, '__meta', ARGV[4])
                redis.call('SADD', index_key, metric_key)
            end

            return result
            "#,
        )
    }

    /// Atomically apply a histogram observation
    ///
    /// Increments the selected bucket's count and the running sum in one
    /// step. The metadata/index install condition fires on every
    /// observation with a non-negative value; both writes are idempotent,
    /// which keeps concurrent first observers safe.
    ///
    /// # Keys
    /// - KEYS[1]: Metric hash key
    /// - KEYS[2]: Per-type index set key
    ///
    /// # Arguments
    /// - ARGV[1]: Sum field (encoded label values, "sum" marker)
    /// - ARGV[2]: Bucket field (encoded label values + bucket bound)
    /// - ARGV[3]: Observed value
    /// - ARGV[4]: Metadata JSON
    ///
    /// # Returns
    /// - The new running sum
    pub fn update_histogram(&self) -> Arc<Script> {
        self.get_or_create(
            "update_histogram",
            r#"
            local metric_key = KEYS[1]
            local index_key = KEYS[2]

            local sum = redis.call('HINCRBYFLOAT', metric_key, ARGV[1], ARGV[3])
            redis.call('HINCRBY', metric_key, ARGV[2], 1)

            if tonumber(sum) >= tonumber(ARGV[3]) then
                redis.call('HSET', metric_key, '__meta', ARGV[4])
                redis.call('SADD', index_key, metric_key)
            end

            return sum
            "#,
        )
    }

    /// Delete every key matching a namespace pattern
    ///
    /// Cursor-based SCAN keeps the operation incremental on the server;
    /// safe to run concurrently with live writers (best effort).
    ///
    /// # Keys
    /// None
    ///
    /// # Arguments
    /// - ARGV[1]: Match pattern (namespace prefix + "*")
    ///
    /// # Returns
    /// - Number of keys deleted
    pub fn wipe_namespace(&self) -> Arc<Script> {
        self.get_or_create(
            "wipe_namespace",
            r#"
            local deleted = 0
            local cursor = "0"
            repeat
                local results = redis.call('SCAN', cursor, 'MATCH', ARGV[1], 'COUNT', 100)
                cursor = results[1]
                for _, key in ipairs(results[2]) do
                    redis.call('DEL', key)
                    deleted = deleted + 1
                end
            until cursor == "0"
            return deleted
            "#,
        )
    }
}

impl Default for LuaScripts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_caching() {
        let scripts = LuaScripts::new();

        let script1 = scripts.update_counter();
        let script2 = scripts.update_counter();

        // Same Arc from the cache
        assert!(Arc::ptr_eq(&script1, &script2));
    }

    #[test]
    fn test_all_scripts_compile() {
        let scripts = LuaScripts::new();

        let _ = scripts.update_counter();
        let _ = scripts.update_gauge();
        let _ = scripts.update_histogram();
        let _ = scripts.wipe_namespace();
    }
}
