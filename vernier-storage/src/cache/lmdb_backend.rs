//! LMDB-backed cache pool.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key/value store that survives process restarts. Keys are the UTF-8 bytes
//! of the encoded cache key, values are JSON.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The pool uses:
//! - Read transactions for `get_item` and `has_item`
//! - Write transactions for `save`, `delete_item` and `clear`

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use vernier_core::{CacheBackendError, VernierError, VernierResult};

use super::traits::{check_key, CacheItem, CachePool};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for VernierError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Serialization(reason) => {
                VernierError::Cache(CacheBackendError::Serialization { reason })
            }
            other => VernierError::Cache(CacheBackendError::Unavailable {
                reason: other.to_string(),
            }),
        }
    }
}

/// LMDB-backed cache pool.
///
/// # Example
///
/// ```ignore
/// use vernier_storage::cache::{CachePool, LmdbCachePool};
///
/// let pool = LmdbCachePool::new("/tmp/vernier-cache", 100)?;
/// let item = pool.get_item("entity:example:version")?;
/// ```
pub struct LmdbCachePool {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for LmdbCachePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCachePool")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbCachePool {
    /// Create a new LMDB cache pool.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this pool.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
    }

    pub fn is_empty(&self) -> Result<bool, LmdbCacheError> {
        Ok(self.len()? == 0)
    }

    /// Delete every entry whose key starts with `prefix`. Returns the count.
    ///
    /// Superseded table entries are never deleted by version bumps; this
    /// reclaims their space, e.g. with [`super::CacheKey::table_prefix`].
    pub fn purge_prefix(&self, prefix: &str) -> Result<u64, LmdbCacheError> {
        let keys: Vec<Vec<u8>> = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .prefix_iter(&rtxn, prefix.as_bytes())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            iter.filter_map(|entry| entry.ok().map(|(key, _)| key.to_vec()))
                .collect()
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in &keys {
            if self
                .db
                .delete(&mut wtxn, key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(deleted)
    }
}

impl CachePool for LmdbCachePool {
    fn get_item(&self, key: &str) -> VernierResult<CacheItem> {
        check_key(key)?;
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        match self.db.get(&rtxn, key.as_bytes()) {
            Ok(Some(bytes)) => {
                let value = serde_json::from_slice(bytes)
                    .map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
                Ok(CacheItem::hit(key, value))
            }
            Ok(None) => Ok(CacheItem::miss(key)),
            Err(e) => Err(LmdbCacheError::Transaction(e.to_string()).into()),
        }
    }

    fn has_item(&self, key: &str) -> VernierResult<bool> {
        check_key(key)?;
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let found = self
            .db
            .get(&rtxn, key.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(found.is_some())
    }

    fn save(&self, item: CacheItem) -> VernierResult<bool> {
        check_key(item.key())?;
        let Some(value) = item.get() else {
            return Ok(false);
        };
        let bytes =
            serde_json::to_vec(value).map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, item.key().as_bytes(), &bytes)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(true)
    }

    fn delete_item(&self, key: &str) -> VernierResult<bool> {
        check_key(key)?;
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    fn clear(&self) -> VernierResult<()> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .clear(&mut wtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(())
    }
}
