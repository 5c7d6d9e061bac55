//! Versioned cache store adapter.
//!
//! Wraps a [`CachePool`] with the per-table version protocol and the four key
//! shapes. Backend failures never escape this type: they are logged, counted
//! and turned into misses or no-ops, so a cache outage degrades to uncached
//! behaviour.

use super::keys::CacheKey;
use super::traits::{CacheItem, CachePool, CacheStats};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use vernier_core::{RowId, VernierError, VersionScheme};

pub struct VersionedCache {
    pool: Arc<dyn CachePool>,
    scheme: VersionScheme,
    stats: Arc<RwLock<CacheStats>>,
}

impl std::fmt::Debug for VersionedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedCache")
            .field("scheme", &self.scheme)
            .field("stats", &self.stats())
            .finish()
    }
}

impl VersionedCache {
    pub fn new(pool: Arc<dyn CachePool>, scheme: VersionScheme) -> Self {
        Self {
            pool,
            scheme,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    pub fn scheme(&self) -> VersionScheme {
        self.scheme
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    fn backend_error(&self, operation: &str, key: &str, error: VernierError) {
        tracing::warn!(operation, key, error = %error, "Cache backend error ignored");
        self.record(|s| s.backend_errors += 1);
    }

    fn read_raw(&self, key: &str) -> Result<Option<Value>, VernierError> {
        let item = self.pool.get_item(key)?;
        Ok(if item.is_hit() { item.into_value() } else { None })
    }

    fn write_raw(&self, key: &str, value: Value) -> bool {
        match self.pool.save(CacheItem::hit(key, value)) {
            Ok(saved) => {
                if saved {
                    self.record(|s| s.writes += 1);
                }
                saved
            }
            Err(e) => {
                self.backend_error("save", key, e);
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Version tag
    // ------------------------------------------------------------------------

    /// Current version of `table`, creating it on first use.
    ///
    /// `None` means the version could not be read or persisted; callers must
    /// then bypass the cache for this operation.
    pub fn current_version(&self, table: &str) -> Option<u64> {
        let key = CacheKey::version(table).encode();
        match self.read_raw(&key) {
            Ok(Some(value)) => match value.as_u64() {
                Some(version) => return Some(version),
                None => tracing::warn!(key = %key, "Unreadable version tag, reinitializing"),
            },
            Ok(None) => {}
            Err(e) => {
                self.backend_error("get_version", &key, e);
                return None;
            }
        }

        let initial = self.scheme.initial();
        if self.write_raw(&key, Value::from(initial)) {
            tracing::debug!(table, version = initial, "Initialized table version");
            Some(initial)
        } else {
            None
        }
    }

    /// Move `table` to a strictly greater version.
    ///
    /// Every table entry under older versions becomes unreachable. When the
    /// current version cannot be read nothing is written, so a counter is
    /// never reset to a value whose entries may still exist.
    pub fn bump_version(&self, table: &str) -> Option<u64> {
        let key = CacheKey::version(table).encode();
        let current = match self.read_raw(&key) {
            Ok(value) => value.and_then(|v| v.as_u64()),
            Err(e) => {
                self.backend_error("bump_version", &key, e);
                return None;
            }
        };

        let next = self.scheme.next(current);
        if self.write_raw(&key, Value::from(next)) {
            self.record(|s| s.invalidations += 1);
            tracing::debug!(table, from = ?current, to = next, "Bumped table version");
            Some(next)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------------

    /// Look up any cache entry, counting the hit or miss.
    pub fn fetch(&self, key: &CacheKey) -> Option<Value> {
        let encoded = key.encode();
        match self.read_raw(&encoded) {
            Ok(Some(value)) => {
                self.record(|s| s.hits += 1);
                tracing::debug!(key = %encoded, "Cache hit");
                Some(value)
            }
            Ok(None) => {
                self.record(|s| s.misses += 1);
                tracing::debug!(key = %encoded, "Cache miss");
                None
            }
            Err(e) => {
                self.record(|s| s.misses += 1);
                self.backend_error("get", &encoded, e);
                None
            }
        }
    }

    pub fn store(&self, key: &CacheKey, value: Value) -> bool {
        self.write_raw(&key.encode(), value)
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        let encoded = key.encode();
        match self.pool.delete_item(&encoded) {
            Ok(deleted) => deleted,
            Err(e) => {
                self.backend_error("delete", &encoded, e);
                false
            }
        }
    }

    pub fn get_row(&self, table: &str, id: RowId) -> Option<Value> {
        self.fetch(&CacheKey::row(table, id))
    }

    pub fn set_row(&self, table: &str, id: RowId, row: Value) -> bool {
        self.store(&CacheKey::row(table, id), row)
    }

    /// Drop the row entry of `id`. Counted as an invalidation.
    pub fn delete_row(&self, table: &str, id: RowId) {
        self.remove(&CacheKey::row(table, id));
        self.record(|s| s.invalidations += 1);
    }

    pub fn get_row_id(&self, table: &str, site: &str, signature: &str) -> Option<RowId> {
        self.fetch(&CacheKey::row_id_index(table, site, signature))
            .and_then(|v| v.as_i64())
    }

    pub fn set_row_id(&self, table: &str, site: &str, signature: &str, id: RowId) -> bool {
        self.store(&CacheKey::row_id_index(table, site, signature), Value::from(id))
    }
}
