//! Configuration types

use crate::error::{ConfigError, VernierResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default chunk size for multi-row INSERT statements.
pub const DEFAULT_BATCH_CREATE_CHUNK: usize = 1000;

/// Default number of identifiers per `CASE` update statement.
pub const DEFAULT_BATCH_UPDATE_CHUNK: usize = 500;

/// Default number of identifiers per `DELETE ... IN (...)` statement.
pub const DEFAULT_BATCH_DELETE_CHUNK: usize = 1000;

/// Result sets larger than this are never written to the table cache.
pub const DEFAULT_SEARCH_SIZE_CEILING: usize = 5000;

/// SQL dialect of the underlying store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    MySql,
    Sqlite,
}

impl SqlDialect {
    /// Clause appended to a point read that asks for a row lock.
    ///
    /// SQLite has no row locks; writers are serialized by the database lock.
    pub fn row_lock_clause(&self) -> Option<&'static str> {
        match self {
            SqlDialect::MySql => Some(" FOR UPDATE"),
            SqlDialect::Sqlite => None,
        }
    }
}

/// How a table's version tag advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionScheme {
    /// Starts at 1 and increments by one on every mutation.
    ///
    /// Only safe on pools that never evict on their own. If the version key
    /// is evicted while older table entries survive, the tag restarts at 1
    /// and those entries become reachable again.
    #[default]
    Counter,
    /// Clock ticks of 1e-4 seconds, forced strictly above the previous value.
    ///
    /// Survives eviction of the version key itself, since a re-created tag
    /// can never fall back onto a value used before.
    Timestamp,
}

impl VersionScheme {
    /// Value written the first time a table's version is needed.
    pub fn initial(&self) -> u64 {
        match self {
            VersionScheme::Counter => 1,
            VersionScheme::Timestamp => clock_ticks(),
        }
    }

    /// Next version strictly above `current`.
    pub fn next(&self, current: Option<u64>) -> u64 {
        match (self, current) {
            (VersionScheme::Counter, None) => 1,
            (VersionScheme::Counter, Some(v)) => v.saturating_add(1),
            (VersionScheme::Timestamp, None) => clock_ticks(),
            (VersionScheme::Timestamp, Some(v)) => clock_ticks().max(v.saturating_add(1)),
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "counter" => Some(VersionScheme::Counter),
            "timestamp" => Some(VersionScheme::Timestamp),
            _ => None,
        }
    }
}

/// Current time in 1e-4 second ticks.
fn clock_ticks() -> u64 {
    let micros = chrono::Utc::now().timestamp_micros();
    u64::try_from(micros / 100).unwrap_or(0)
}

/// Record access layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaoConfig {
    /// Rows per multi-row INSERT.
    pub batch_create_chunk: usize,
    /// Identifiers per CASE update.
    pub batch_update_chunk: usize,
    /// Identifiers per IN-list delete.
    pub batch_delete_chunk: usize,
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self {
            batch_create_chunk: DEFAULT_BATCH_CREATE_CHUNK,
            batch_update_chunk: DEFAULT_BATCH_UPDATE_CHUNK,
            batch_delete_chunk: DEFAULT_BATCH_DELETE_CHUNK,
        }
    }
}

impl DaoConfig {
    /// Create a new DAO config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `VERNIER_BATCH_CREATE_CHUNK`,
    /// `VERNIER_BATCH_UPDATE_CHUNK` and `VERNIER_BATCH_DELETE_CHUNK`, falling
    /// back to defaults for absent variables.
    pub fn from_env() -> VernierResult<Self> {
        let defaults = Self::default();
        let config = Self {
            batch_create_chunk: env_usize("VERNIER_BATCH_CREATE_CHUNK")?
                .unwrap_or(defaults.batch_create_chunk),
            batch_update_chunk: env_usize("VERNIER_BATCH_UPDATE_CHUNK")?
                .unwrap_or(defaults.batch_update_chunk),
            batch_delete_chunk: env_usize("VERNIER_BATCH_DELETE_CHUNK")?
                .unwrap_or(defaults.batch_delete_chunk),
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the multi-row INSERT chunk size.
    pub fn with_batch_create_chunk(mut self, size: usize) -> Self {
        self.batch_create_chunk = size;
        self
    }

    /// Set the CASE update chunk size.
    pub fn with_batch_update_chunk(mut self, size: usize) -> Self {
        self.batch_update_chunk = size;
        self
    }

    /// Set the IN-list delete chunk size.
    pub fn with_batch_delete_chunk(mut self, size: usize) -> Self {
        self.batch_delete_chunk = size;
        self
    }

    /// Validate the configuration. All chunk sizes must be positive.
    pub fn validate(&self) -> VernierResult<()> {
        for (field, value) in [
            ("batch_create_chunk", self.batch_create_chunk),
            ("batch_update_chunk", self.batch_update_chunk),
            ("batch_delete_chunk", self.batch_delete_chunk),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "chunk size must be greater than 0".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Cache proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Tables whose operations go through the cache. Empty disables caching.
    pub cacheable_tables: BTreeSet<String>,
    /// Find/search results with more rows than this are not cached.
    pub search_size_ceiling: usize,
    /// How version tags advance. Use [`VersionScheme::Timestamp`] with pools
    /// that may evict entries (LRU caches); the default counter is meant for
    /// pools that keep every key until it is deleted.
    pub version_scheme: VersionScheme,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cacheable_tables: BTreeSet::new(),
            search_size_ceiling: DEFAULT_SEARCH_SIZE_CEILING,
            version_scheme: VersionScheme::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `VERNIER_CACHE_TABLES` (comma separated),
    /// `VERNIER_CACHE_SEARCH_CEILING` and `VERNIER_CACHE_VERSION_SCHEME`.
    pub fn from_env() -> VernierResult<Self> {
        let defaults = Self::default();
        let cacheable_tables = std::env::var("VERNIER_CACHE_TABLES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let config = Self {
            cacheable_tables,
            search_size_ceiling: env_usize("VERNIER_CACHE_SEARCH_CEILING")?
                .unwrap_or(defaults.search_size_ceiling),
            version_scheme: match std::env::var("VERNIER_CACHE_VERSION_SCHEME") {
                Ok(raw) => VersionScheme::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                    field: "VERNIER_CACHE_VERSION_SCHEME".to_string(),
                    value: raw.clone(),
                    reason: "expected counter or timestamp".to_string(),
                })?,
                Err(_) => defaults.version_scheme,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Add a table to the cacheable set.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.cacheable_tables.insert(table.into());
        self
    }

    /// Replace the cacheable set.
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cacheable_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Set the find/search size ceiling.
    pub fn with_search_size_ceiling(mut self, ceiling: usize) -> Self {
        self.search_size_ceiling = ceiling;
        self
    }

    /// Set the version scheme.
    pub fn with_version_scheme(mut self, scheme: VersionScheme) -> Self {
        self.version_scheme = scheme;
        self
    }

    /// Whether calls against `table` go through the cache.
    pub fn is_cacheable(&self, table: &str) -> bool {
        self.cacheable_tables.contains(table)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> VernierResult<()> {
        if let Some(bad) = self
            .cacheable_tables
            .iter()
            .find(|t| crate::query::check_field_name(t).is_err())
        {
            return Err(ConfigError::InvalidValue {
                field: "cacheable_tables".to_string(),
                value: bad.clone(),
                reason: "table names must be word characters".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn env_usize(name: &str) -> VernierResult<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "expected a non-negative integer".to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}
