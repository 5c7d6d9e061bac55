//! In-process cache pool.

use super::traits::{check_key, CacheItem, CachePool};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use vernier_core::{CacheBackendError, VernierResult};

/// `HashMap` behind a `RwLock`. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCachePool {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

fn poisoned() -> CacheBackendError {
    CacheBackendError::Unavailable {
        reason: "in-memory cache lock poisoned".to_string(),
    }
}

impl InMemoryCachePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl CachePool for InMemoryCachePool {
    fn get_item(&self, key: &str) -> VernierResult<CacheItem> {
        check_key(key)?;
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(match entries.get(key) {
            Some(value) => CacheItem::hit(key, value.clone()),
            None => CacheItem::miss(key),
        })
    }

    fn has_item(&self, key: &str) -> VernierResult<bool> {
        check_key(key)?;
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.contains_key(key))
    }

    fn save(&self, item: CacheItem) -> VernierResult<bool> {
        check_key(item.key())?;
        let key = item.key().to_string();
        let Some(value) = item.into_value() else {
            return Ok(false);
        };
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key, value);
        Ok(true)
    }

    fn delete_item(&self, key: &str) -> VernierResult<bool> {
        check_key(key)?;
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(entries.remove(key).is_some())
    }

    fn clear(&self) -> VernierResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_and_get() {
        let pool = InMemoryCachePool::new();
        let mut item = pool.get_item("k").unwrap();
        assert!(!item.is_hit());

        item.set(json!([1, 2]));
        assert!(pool.save(item).unwrap());

        let item = pool.get_item("k").unwrap();
        assert!(item.is_hit());
        assert_eq!(item.get(), Some(&json!([1, 2])));
        assert!(pool.has_item("k").unwrap());
    }

    #[test]
    fn test_save_without_value_is_noop() {
        let pool = InMemoryCachePool::new();
        assert!(!pool.save(CacheItem::miss("k")).unwrap());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_delete_and_clear() {
        let pool = InMemoryCachePool::new();
        pool.save(CacheItem::hit("a", json!(1))).unwrap();
        pool.save(CacheItem::hit("b", json!(2))).unwrap();

        assert!(pool.delete_item("a").unwrap());
        assert!(!pool.delete_item("a").unwrap());
        assert_eq!(pool.keys(), vec!["b".to_string()]);

        pool.clear().unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let pool = InMemoryCachePool::new();
        assert!(pool.get_item("").is_err());
        assert!(pool.save(CacheItem::hit("", json!(1))).is_err());
        assert!(pool.delete_item("").is_err());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let pool = InMemoryCachePool::new();
        let other = pool.clone();
        pool.save(CacheItem::hit("a", json!(null))).unwrap();
        assert!(other.get_item("a").unwrap().is_hit());
    }
}
