//! Cache layer: pluggable pools and the versioned store adapter.
//!
//! Table-level results are keyed by the table's current version, so a single
//! version bump makes every older entry unreachable without enumerating keys.
//! Row entries are deleted individually by the mutations that touch them.
//!
//! ```ignore
//! let cache = VersionedCache::new(Arc::new(InMemoryCachePool::new()), VersionScheme::Counter);
//! let version = cache.current_version("example");
//! cache.bump_version("example");
//! ```

pub mod keys;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;
pub mod versioned;

pub use keys::CacheKey;
pub use lmdb_backend::{LmdbCacheError, LmdbCachePool};
pub use memory::InMemoryCachePool;
pub use traits::{CacheItem, CachePool, CacheStats};
pub use versioned::VersionedCache;
