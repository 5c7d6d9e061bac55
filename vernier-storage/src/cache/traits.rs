//! Cache pool trait, cache items and statistics.

use serde_json::Value;
use vernier_core::{CacheBackendError, VernierResult};

/// Longest key LMDB stores with its default page size.
pub const MAX_KEY_BYTES: usize = 511;

/// Reject keys a backend cannot hold: empty, or over [`MAX_KEY_BYTES`].
pub fn check_key(key: &str) -> VernierResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_BYTES {
        return Err(CacheBackendError::InvalidKey {
            key: key.to_string(),
        }
        .into());
    }
    Ok(())
}

/// One lookup result or one pending write.
///
/// A miss carries no value. Calling [`set`](CacheItem::set) on a miss turns it
/// into a write candidate for [`CachePool::save`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem {
    key: String,
    value: Option<Value>,
    hit: bool,
}

impl CacheItem {
    pub fn hit(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            hit: true,
        }
    }

    pub fn miss(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            hit: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_hit(&self) -> bool {
        self.hit
    }

    /// The cached value, if any.
    pub fn get(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    pub fn set(&mut self, value: Value) -> &mut Self {
        self.value = Some(value);
        self
    }
}

/// Pluggable key/value cache backend.
///
/// Implementations must be thread-safe. Errors are reported as
/// [`vernier_core::CacheBackendError`]; callers above the pool decide whether
/// to surface them.
pub trait CachePool: Send + Sync {
    fn get_item(&self, key: &str) -> VernierResult<CacheItem>;

    fn has_item(&self, key: &str) -> VernierResult<bool> {
        Ok(self.get_item(key)?.is_hit())
    }

    /// Persist the item's value. Returns `false` when there is nothing to save.
    fn save(&self, item: CacheItem) -> VernierResult<bool>;

    /// Returns whether an entry was removed.
    fn delete_item(&self, key: &str) -> VernierResult<bool>;

    /// Drop every entry.
    fn clear(&self) -> VernierResult<()>;
}

/// Counters kept by the versioned cache adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that fell through to the store.
    pub misses: u64,
    /// Entries written.
    pub writes: u64,
    /// Row entries deleted and versions bumped.
    pub invalidations: u64,
    /// Backend errors swallowed.
    pub backend_errors: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
