//! VERNIER Storage - Record Access, Versioned Cache and DAO Proxy
//!
//! Layered on top of `vernier-core`:
//!
//! - [`Connection`] is the store seam, with [`SqliteConnection`] as the
//!   bundled implementation.
//! - [`GeneralDao`] builds parameterized statements from an entity
//!   declaration and runs them.
//! - [`cache`] holds the pluggable pools and the versioned cache adapter.
//! - [`DaoProxy`] combines the two with field serialization and timestamps.

pub mod cache;
pub mod connection;
pub mod dao;
pub mod proxy;
pub mod sqlite;

pub use cache::{
    CacheItem, CacheKey, CachePool, CacheStats, InMemoryCachePool, LmdbCacheError,
    LmdbCachePool, VersionedCache,
};
pub use connection::{insert_statement, transactional, Connection, Inserted};
pub use dao::{GeneralDao, GetOptions};
pub use proxy::DaoProxy;
pub use sqlite::SqliteConnection;
