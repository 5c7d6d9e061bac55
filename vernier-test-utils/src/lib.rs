//! VERNIER Test Utilities
//!
//! Shared test infrastructure for the VERNIER workspace:
//! - The `example` table: declaration, SQLite schema and seeded rows
//! - A cache pool that can be switched off to simulate an outage
//! - Proptest generators for rows and hostile identifiers
//! - Assertions on `VernierError` variants

pub use vernier_core::{
    ArgumentShapeError, CacheConfig, Conditions, DaoConfig, EntityDeclaration, FieldSerializer,
    OrderBys, Paging, Row, RowId, StorageError, TimestampFields, ValidationError, VernierError,
    VernierResult, VersionScheme,
};
pub use vernier_storage::{
    CacheItem, CachePool, DaoProxy, GeneralDao, GetOptions, InMemoryCachePool, SqliteConnection,
};

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a test-friendly subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vernier_storage=warn,vernier_core=warn"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Build a row from a JSON object literal.
#[track_caller]
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("Expected a JSON object, got: {}", other),
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! The `example` table used across the storage tests.

    use super::*;
    use serde_json::json;

    pub const EXAMPLE_TABLE: &str = "example";

    pub const EXAMPLE_SCHEMA: &str = "
        CREATE TABLE example (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL DEFAULT '',
            code TEXT NOT NULL DEFAULT '',
            counter1 INTEGER NOT NULL DEFAULT 0,
            counter2 INTEGER NOT NULL DEFAULT 0,
            ids1 TEXT NOT NULL DEFAULT '',
            ids2 TEXT NOT NULL DEFAULT '',
            null_value TEXT DEFAULT NULL,
            content TEXT,
            json_serialize_value TEXT,
            delimiter_serialize_value TEXT,
            created_time INTEGER NOT NULL DEFAULT 0,
            updated_time INTEGER NOT NULL DEFAULT 0
        );
    ";

    /// Declaration of the `example` table.
    pub fn example_declaration() -> Arc<EntityDeclaration> {
        let declaration = EntityDeclaration::builder(EXAMPLE_TABLE)
            .timestamps(TimestampFields::new("created_time", "updated_time"))
            .serialize("ids1", "json")
            .serialize("ids2", "delimiter")
            .serialize("null_value", "json")
            .serialize("json_serialize_value", "json")
            .serialize("delimiter_serialize_value", "delimiter")
            .orderable(["name", "created_time"])
            .condition("name = :name")
            .condition("name pre_LIKE :pre_like")
            .condition("name suF_like :suf_name")
            .condition("name LIKE :like_name")
            .condition("id iN (:ids)")
            .condition("counter1 > :counter1_gt")
            .condition("code <> :code_not")
            .build();
        match declaration {
            Ok(declaration) => Arc::new(declaration),
            Err(e) => panic!("example declaration should build: {}", e),
        }
    }

    /// Fresh in-memory database with the `example` table.
    pub fn example_connection() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory()
            .unwrap_or_else(|e| panic!("in-memory database should open: {}", e));
        conn.execute_batch(EXAMPLE_SCHEMA)
            .unwrap_or_else(|e| panic!("example schema should apply: {}", e));
        conn
    }

    pub fn example_dao(conn: SqliteConnection, config: DaoConfig) -> GeneralDao {
        GeneralDao::new(example_declaration(), Arc::new(conn), config)
            .unwrap_or_else(|e| panic!("example dao should build: {}", e))
    }

    /// Cache config that caches the `example` table.
    pub fn cached_config() -> CacheConfig {
        CacheConfig::new().with_table(EXAMPLE_TABLE)
    }

    pub fn example_proxy(pool: Option<Arc<dyn CachePool>>, config: &CacheConfig) -> DaoProxy {
        let dao = example_dao(example_connection(), DaoConfig::new());
        DaoProxy::new(dao, Arc::new(FieldSerializer::new()), pool, config)
            .unwrap_or_else(|e| panic!("example proxy should build: {}", e))
    }

    /// Proxy over a fresh database with an inspectable in-memory pool.
    pub fn cached_example_proxy() -> (DaoProxy, InMemoryCachePool) {
        let pool = InMemoryCachePool::new();
        let proxy = example_proxy(Some(Arc::new(pool.clone())), &cached_config());
        (proxy, pool)
    }

    /// Five rows named `test1`..`test5` with one-element list fields.
    pub fn mock_rows() -> Vec<Row> {
        (1..=5)
            .map(|i| {
                row(json!({
                    "name": format!("test{}", i),
                    "ids1": [format!("{}1111", i)],
                    "ids2": [format!("{}2222", i)],
                }))
            })
            .collect()
    }

    /// The `[conditions, order_bys, paging]` arguments the proxy signs for a
    /// search, for building expected cache keys in tests.
    pub fn search_args(conditions: &Conditions, order_bys: &OrderBys, paging: &Paging) -> Value {
        Value::Array(vec![
            Value::Object(conditions.clone()),
            order_bys.to_value(),
            paging.to_value(),
        ])
    }
}

// ============================================================================
// MOCK CACHE POOLS
// ============================================================================

/// In-memory pool that fails every call while switched off.
#[derive(Debug, Clone, Default)]
pub struct FlakyCachePool {
    inner: InMemoryCachePool,
    down: Arc<AtomicBool>,
    failures: Arc<AtomicU64>,
}

impl FlakyCachePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool that starts out unavailable.
    pub fn down() -> Self {
        let pool = Self::default();
        pool.set_down(true);
        pool
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of calls rejected while down.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryCachePool {
        &self.inner
    }

    fn check(&self) -> VernierResult<()> {
        if self.down.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(vernier_core::CacheBackendError::Unavailable {
                reason: "pool switched off".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl CachePool for FlakyCachePool {
    fn get_item(&self, key: &str) -> VernierResult<CacheItem> {
        self.check()?;
        self.inner.get_item(key)
    }

    fn save(&self, item: CacheItem) -> VernierResult<bool> {
        self.check()?;
        self.inner.save(item)
    }

    fn delete_item(&self, key: &str) -> VernierResult<bool> {
        self.check()?;
        self.inner.delete_item(key)
    }

    fn clear(&self) -> VernierResult<()> {
        self.check()?;
        self.inner.clear()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    /// Valid identifiers: word characters only.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z_][a-z0-9_]{0,15}"
    }

    /// Strings that must never reach SQL text as identifiers or bounds.
    pub fn arb_hostile_fragment() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("name; DROP TABLE example".to_string()),
            Just("1 OR 1=1".to_string()),
            Just("name` --".to_string()),
            Just("id) VALUES (1); --".to_string()),
            Just("name DESC, (SELECT 1)".to_string()),
            "[a-z]{1,8}[ ;'\"()=,-][a-z0-9 ]{0,8}",
        ]
    }

    pub fn arb_name() -> impl Strategy<Value = String> {
        "[a-z]{1,12}"
    }

    /// A writable `example` row with decoded list fields.
    pub fn arb_example_row() -> impl Strategy<Value = Row> {
        (
            arb_name(),
            0i64..1000,
            prop::collection::vec(0i64..100_000, 0..4),
            prop::collection::vec("[a-z0-9]{1,6}", 0..4),
        )
            .prop_map(|(name, counter1, ids1, ids2)| {
                row(json!({
                    "name": name,
                    "counter1": counter1,
                    "ids1": ids1,
                    "ids2": ids2,
                }))
            })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &VernierResult<T>) {
        match result {
            Err(VernierError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_argument_shape_error<T: std::fmt::Debug>(result: &VernierResult<T>) {
        match result {
            Err(VernierError::ArgumentShape(_)) => {}
            other => panic!("Expected ArgumentShape error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &VernierResult<T>) {
        match result {
            Err(VernierError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &VernierResult<T>, id: RowId) {
        match result {
            Err(VernierError::Storage(StorageError::NotFound { id: got, .. })) => {
                assert_eq!(*got, id, "Wrong id in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", id, other),
        }
    }

    /// Assert that the pool holds no entry under `key`.
    #[track_caller]
    pub fn assert_not_cached(pool: &dyn CachePool, key: &str) {
        match pool.has_item(key) {
            Ok(false) => {}
            other => panic!("Expected no cache entry for {}, got: {:?}", key, other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
