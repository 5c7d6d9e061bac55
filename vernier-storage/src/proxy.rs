//! Caching DAO proxy.
//!
//! [`DaoProxy`] wraps a [`GeneralDao`] with field serialization, timestamp
//! stamping and the versioned cache. Every public operation is tagged with a
//! [`Verb`], and [`Verb::strategy`] decides how the cache treats it:
//!
//! - point reads go through the row cache, reached by the row-id index
//! - find/search/count results are cached under the table's current version
//! - mutations delete the row entries they touch and bump the version
//!
//! Tables outside [`CacheConfig::cacheable_tables`], or a proxy built without
//! a pool, pass every call straight through. Serialization and stamping
//! still apply.
//!
//! Inside [`DaoProxy::transactional`] reads go to the store and write nothing
//! to the cache. When the outermost scope closes, the row entries its
//! mutations touched are deleted again and the version is bumped once more.

use crate::cache::{CacheKey, CachePool, CacheStats, VersionedCache};
use crate::dao::{GeneralDao, GetOptions};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use vernier_core::{
    now_timestamp, records_from_value, row_id, signature_of, value_kind, CacheConfig,
    CacheStrategy, Conditions, EntityDeclaration, FieldSerializer, OrderBys, Paging,
    QueryBuilder, RowInvalidation, Row, RowId, StampPolicy, StorageError, Verb, VernierResult,
};

/// Cache bookkeeping for open transaction scopes.
#[derive(Debug, Default)]
struct TransactionScope {
    depth: usize,
    mutated: bool,
    touched: BTreeSet<RowId>,
}

/// Closes one transaction scope on drop, including on unwind.
struct ScopeGuard<'a> {
    proxy: &'a DaoProxy,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.proxy.leave_transaction();
    }
}

pub struct DaoProxy {
    dao: GeneralDao,
    serializer: Arc<FieldSerializer>,
    cache: Option<VersionedCache>,
    search_size_ceiling: usize,
    scope: Mutex<TransactionScope>,
}

impl std::fmt::Debug for DaoProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaoProxy")
            .field("dao", &self.dao)
            .field("cache", &self.cache)
            .field("search_size_ceiling", &self.search_size_ceiling)
            .finish()
    }
}

impl DaoProxy {
    /// Build a proxy. The cache applies only when `pool` is given and the
    /// table is listed in `config`.
    pub fn new(
        dao: GeneralDao,
        serializer: Arc<FieldSerializer>,
        pool: Option<Arc<dyn CachePool>>,
        config: &CacheConfig,
    ) -> VernierResult<Self> {
        config.validate()?;
        serializer.check_declaration(dao.declaration())?;

        let cache = match pool {
            Some(pool) if config.is_cacheable(dao.table()) => {
                Some(VersionedCache::new(pool, config.version_scheme))
            }
            _ => None,
        };
        tracing::debug!(
            table = dao.table(),
            cached = cache.is_some(),
            "Built DAO proxy"
        );

        Ok(Self {
            dao,
            serializer,
            cache,
            search_size_ceiling: config.search_size_ceiling,
            scope: Mutex::new(TransactionScope::default()),
        })
    }

    /// A proxy that never caches.
    pub fn uncached(dao: GeneralDao, serializer: Arc<FieldSerializer>) -> VernierResult<Self> {
        Self::new(dao, serializer, None, &CacheConfig::default())
    }

    pub fn dao(&self) -> &GeneralDao {
        &self.dao
    }

    pub fn table(&self) -> &str {
        self.dao.table()
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache(&self) -> Option<&VersionedCache> {
        self.cache.as_ref()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(VersionedCache::stats)
    }

    fn declaration(&self) -> &EntityDeclaration {
        self.dao.declaration()
    }

    // ========================================================================
    // SERIALIZATION AND STAMPING
    // ========================================================================

    fn encode(&self, mut row: Row) -> VernierResult<Row> {
        self.serializer.encode_row(self.declaration(), &mut row)?;
        Ok(row)
    }

    fn decode(&self, mut row: Row) -> VernierResult<Row> {
        self.serializer.decode_row(self.declaration(), &mut row)?;
        Ok(row)
    }

    fn decode_opt(&self, row: Option<Row>) -> VernierResult<Option<Row>> {
        row.map(|r| self.decode(r)).transpose()
    }

    fn decode_all(&self, mut rows: Vec<Row>) -> VernierResult<Vec<Row>> {
        self.serializer.decode_rows(self.declaration(), &mut rows)?;
        Ok(rows)
    }

    /// Write the timestamp columns the verb's policy asks for.
    fn stamp(&self, verb: Verb, row: &mut Row, now: i64) {
        let CacheStrategy::Mutation(policy) = verb.strategy() else {
            return;
        };
        let timestamps = self.declaration().timestamps();
        let columns = match policy.stamp {
            StampPolicy::None => [None, None],
            StampPolicy::CreateAndUpdate => [timestamps.created.as_ref(), timestamps.updated.as_ref()],
            StampPolicy::UpdateOnly => [None, timestamps.updated.as_ref()],
        };
        for column in columns.into_iter().flatten() {
            row.insert(column.clone(), Value::from(now));
        }
    }

    fn prepare(&self, verb: Verb, mut row: Row, now: i64) -> VernierResult<Row> {
        self.stamp(verb, &mut row, now);
        self.encode(row)
    }

    // ========================================================================
    // CACHE PLUMBING
    // ========================================================================

    fn scope(&self) -> MutexGuard<'_, TransactionScope> {
        self.scope.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_transaction(&self) -> bool {
        self.scope().depth > 0
    }

    /// The cache reads may use. None while a transaction is open, since rows
    /// read there may still be rolled back.
    fn read_cache(&self) -> Option<&VersionedCache> {
        if self.in_transaction() {
            return None;
        }
        self.cache.as_ref()
    }

    /// Row-cache lookup through the `(site, signature) -> id` index.
    ///
    /// `load` returns the row as stored; it is decoded before caching.
    fn row_cached<F>(&self, site: &str, args: &Value, load: F) -> VernierResult<Option<Row>>
    where
        F: FnOnce() -> VernierResult<Option<Row>>,
    {
        let Some(cache) = self.read_cache() else {
            return self.decode_opt(load()?);
        };
        let table = self.table();
        let signature = signature_of(args);

        if let Some(id) = cache.get_row_id(table, site, &signature) {
            if let Some(Value::Object(row)) = cache.get_row(table, id) {
                return Ok(Some(row));
            }
        }

        let row = self.decode_opt(load()?)?;
        if let Some(found) = &row {
            if let Some(id) = row_id(found) {
                cache.set_row(table, id, Value::Object(found.clone()));
                cache.set_row_id(table, site, &signature, id);
            }
        }
        Ok(row)
    }

    /// Table-cache lookup under the current version.
    ///
    /// Without a readable version the cache is bypassed entirely. A hit that
    /// fails `valid` is treated as a miss and overwritten.
    fn table_cached<F, V>(
        &self,
        verb: Verb,
        site: &str,
        args: &Value,
        valid: V,
        load: F,
    ) -> VernierResult<Value>
    where
        F: FnOnce() -> VernierResult<Value>,
        V: Fn(&Value) -> bool,
    {
        let Some(cache) = self.read_cache() else {
            return load();
        };
        let Some(version) = cache.current_version(self.table()) else {
            return load();
        };
        let key = CacheKey::table(self.table(), version, site, &signature_of(args));
        if let Some(hit) = cache.fetch(&key) {
            if valid(&hit) {
                return Ok(hit);
            }
            tracing::warn!(key = %key, kind = value_kind(&hit), "Malformed cache entry, reloading");
        }

        let value = load()?;
        let size_ceiling = matches!(verb.strategy(), CacheStrategy::TableLookup { size_ceiling: true });
        let oversized = size_ceiling
            && value
                .as_array()
                .is_some_and(|rows| rows.len() > self.search_size_ceiling);
        if oversized {
            tracing::debug!(key = %key, ceiling = self.search_size_ceiling, "Result too large to cache");
        } else {
            cache.store(&key, value.clone());
        }
        Ok(value)
    }

    fn cached_rows<F>(&self, verb: Verb, site: &str, args: &Value, load: F) -> VernierResult<Vec<Row>>
    where
        F: FnOnce() -> VernierResult<Vec<Row>>,
    {
        let is_rows = |v: &Value| v.as_array().is_some_and(|rows| rows.iter().all(Value::is_object));
        let value = self.table_cached(verb, site, args, is_rows, || {
            let rows = self.decode_all(load()?)?;
            Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
        })?;
        records_from_value(verb.as_str(), value)
    }

    /// Delete row entries per the verb's policy, then bump the version.
    fn invalidate(&self, verb: Verb, ids: &[RowId]) {
        let Some(cache) = &self.cache else {
            return;
        };
        let CacheStrategy::Mutation(policy) = verb.strategy() else {
            return;
        };
        let rows = policy.row_invalidation != RowInvalidation::None;
        if rows {
            for id in ids {
                cache.delete_row(self.table(), *id);
            }
        }
        cache.bump_version(self.table());

        let mut scope = self.scope();
        if scope.depth > 0 {
            scope.mutated = true;
            if rows {
                scope.touched.extend(ids.iter().copied());
            }
        }
    }

    /// Invalidate after a mutation whether or not it succeeded. A failed
    /// batch may already have written the chunks before the failing one.
    fn settle<T>(&self, verb: Verb, ids: &[RowId], result: VernierResult<T>) -> VernierResult<T> {
        if let Err(e) = &result {
            tracing::debug!(table = self.table(), verb = verb.as_str(), error = %e, "Mutation failed, invalidating anyway");
        }
        self.invalidate(verb, ids);
        result
    }

    /// Close one transaction scope. Leaving the outermost one repeats the
    /// invalidation of everything mutated inside it: after a rollback the
    /// store no longer holds what those mutations wrote, and after a commit
    /// other connections may have cached the pre-commit rows meanwhile.
    fn leave_transaction(&self) {
        let touched = {
            let mut scope = self.scope();
            scope.depth = scope.depth.saturating_sub(1);
            if scope.depth > 0 || !scope.mutated {
                return;
            }
            scope.mutated = false;
            std::mem::take(&mut scope.touched)
        };
        let Some(cache) = &self.cache else {
            return;
        };
        for id in &touched {
            cache.delete_row(self.table(), *id);
        }
        cache.bump_version(self.table());
        tracing::debug!(table = self.table(), rows = touched.len(), "Invalidated after transaction");
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Point read by id. `GetOptions::locked()` reads the store directly.
    pub fn get(&self, id: RowId, options: GetOptions) -> VernierResult<Option<Row>> {
        if options.lock {
            return self.decode_opt(self.dao.get(id, options)?);
        }
        let args = Value::Array(vec![Value::from(id)]);
        self.row_cached(Verb::Get.as_str(), &args, || self.dao.get(id, options))
    }

    /// Named point finder, row-cached under `get_<name>`.
    ///
    /// `args` must identify the call: equal arguments must mean the same row.
    pub fn get_by<F>(&self, name: &str, args: Value, load: F) -> VernierResult<Option<Row>>
    where
        F: FnOnce(&GeneralDao) -> VernierResult<Option<Row>>,
    {
        let site = format!("{}_{}", Verb::Get.as_str(), name);
        self.row_cached(&site, &args, || load(&self.dao))
    }

    pub fn get_by_fields(&self, fields: &Row) -> VernierResult<Option<Row>> {
        let args = Value::Array(vec![Value::Object(fields.clone())]);
        self.get_by("by_fields", args, |dao| dao.get_by_fields(fields))
    }

    pub fn search(
        &self,
        conditions: &Conditions,
        order_bys: &OrderBys,
        paging: &Paging,
    ) -> VernierResult<Vec<Row>> {
        // Reject bad ordering and paging before consulting the cache.
        QueryBuilder::new(self.declaration()).order_by(order_bys)?;
        paging.resolve()?;

        let args = Value::Array(vec![
            Value::Object(conditions.clone()),
            order_bys.to_value(),
            paging.to_value(),
        ]);
        self.cached_rows(Verb::Search, Verb::Search.as_str(), &args, || {
            self.dao.search(conditions, order_bys, paging)
        })
    }

    /// Named list finder, table-cached under `find_<name>`.
    pub fn find<F>(&self, name: &str, args: Value, load: F) -> VernierResult<Vec<Row>>
    where
        F: FnOnce(&GeneralDao) -> VernierResult<Vec<Row>>,
    {
        let site = format!("{}_{}", Verb::Find.as_str(), name);
        self.cached_rows(Verb::Find, &site, &args, || load(&self.dao))
    }

    pub fn find_by_fields(&self, fields: &Row) -> VernierResult<Vec<Row>> {
        let args = Value::Array(vec![Value::Object(fields.clone())]);
        self.find("by_fields", args, |dao| dao.find_by_fields(fields))
    }

    pub fn find_in_field(&self, field: &str, values: &[Value]) -> VernierResult<Vec<Row>> {
        let args = Value::Array(vec![Value::from(field), Value::Array(values.to_vec())]);
        self.find("in_field", args, |dao| dao.find_in_field(field, values))
    }

    pub fn count(&self, conditions: &Conditions) -> VernierResult<u64> {
        let args = Value::Array(vec![Value::Object(conditions.clone())]);
        let value = self.table_cached(Verb::Count, Verb::Count.as_str(), &args, Value::is_u64, || {
            self.dao.count(conditions).map(Value::from)
        })?;
        value.as_u64().ok_or_else(|| {
            StorageError::Query {
                reason: format!("count returned {}", value_kind(&value)),
            }
            .into()
        })
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    pub fn create(&self, fields: Row) -> VernierResult<Row> {
        let fields = self.prepare(Verb::Create, fields, now_timestamp())?;
        let created = self.settle(Verb::Create, &[], self.dao.create(fields))?;
        self.decode(created)
    }

    pub fn update(&self, id: RowId, fields: Row) -> VernierResult<Option<Row>> {
        let fields = self.prepare(Verb::Update, fields, now_timestamp())?;
        let updated = self.settle(Verb::Update, &[id], self.dao.update(id, fields))?;
        self.decode_opt(updated)
    }

    pub fn wave(&self, id: RowId, deltas: &Row) -> VernierResult<Option<Row>> {
        let waved = self.settle(Verb::Wave, &[id], self.dao.wave(id, deltas))?;
        self.decode_opt(waved)
    }

    pub fn delete(&self, id: RowId) -> VernierResult<RowId> {
        self.settle(Verb::Delete, &[id], self.dao.delete(id))
    }

    pub fn batch_create(&self, rows: Vec<Row>) -> VernierResult<u64> {
        let now = now_timestamp();
        let rows = rows
            .into_iter()
            .map(|row| self.prepare(Verb::BatchCreate, row, now))
            .collect::<VernierResult<Vec<_>>>()?;
        self.settle(Verb::BatchCreate, &[], self.dao.batch_create(&rows))
    }

    pub fn batch_update(&self, ids: &[RowId], rows: Vec<Row>) -> VernierResult<Vec<RowId>> {
        let now = now_timestamp();
        let rows = rows
            .into_iter()
            .map(|row| self.prepare(Verb::BatchUpdate, row, now))
            .collect::<VernierResult<Vec<_>>>()?;
        self.settle(Verb::BatchUpdate, ids, self.dao.batch_update(ids, &rows))
    }

    /// Batch update keyed by another column. The affected ids are looked up
    /// first so that their row entries can be deleted.
    pub fn batch_update_by(&self, column: &str, keys: &[Value], rows: Vec<Row>) -> VernierResult<u64> {
        let now = now_timestamp();
        let rows = rows
            .into_iter()
            .map(|row| self.prepare(Verb::BatchUpdate, row, now))
            .collect::<VernierResult<Vec<_>>>()?;
        let ids: Vec<RowId> = if self.cache.is_some() && keys.len() == rows.len() {
            self.dao
                .find_in_field(column, keys)?
                .iter()
                .filter_map(row_id)
                .collect()
        } else {
            Vec::new()
        };
        self.settle(Verb::BatchUpdate, &ids, self.dao.batch_update_by(column, keys, &rows))
    }

    pub fn batch_delete(&self, ids: &[RowId]) -> VernierResult<Vec<RowId>> {
        self.settle(Verb::BatchDelete, ids, self.dao.batch_delete(ids))
    }

    /// Delete by declared conditions. Matching ids are selected first so that
    /// their row entries can be deleted.
    pub fn batch_delete_by_conditions(&self, conditions: &Conditions) -> VernierResult<u64> {
        let declared = QueryBuilder::filter_conditions(conditions)
            .keys()
            .any(|k| self.declaration().declares_param(k));
        let ids = if self.cache.is_some() && declared {
            self.dao.find_ids(conditions)?
        } else {
            Vec::new()
        };
        self.settle(Verb::BatchDelete, &ids, self.dao.batch_delete_by_conditions(conditions))
    }

    /// Run `f` in a store transaction.
    ///
    /// Reads inside `f` bypass the cache. Whether `f` commits or rolls back,
    /// the rows it mutated are invalidated again once the scope closes.
    pub fn transactional<T, F>(&self, f: F) -> VernierResult<T>
    where
        F: FnOnce(&Self) -> VernierResult<T>,
    {
        self.scope().depth += 1;
        let _guard = ScopeGuard { proxy: self };
        self.dao.transactional(|_| f(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheItem, InMemoryCachePool};
    use crate::sqlite::SqliteConnection;
    use serde_json::json;
    use vernier_core::{DaoConfig, TimestampFields, VernierError};

    const SCHEMA: &str = "CREATE TABLE example (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL DEFAULT '',
        counter1 INTEGER NOT NULL DEFAULT 0,
        ids1 TEXT NOT NULL DEFAULT '',
        ids2 TEXT NOT NULL DEFAULT '',
        created_time INTEGER NOT NULL DEFAULT 0,
        updated_time INTEGER NOT NULL DEFAULT 0
    );";

    fn declaration() -> Arc<EntityDeclaration> {
        Arc::new(
            EntityDeclaration::builder("example")
                .timestamps(TimestampFields::new("created_time", "updated_time"))
                .serialize("ids1", "json")
                .serialize("ids2", "delimiter")
                .orderable(["name", "created_time"])
                .condition("name = :name")
                .build()
                .expect("declaration should build"),
        )
    }

    fn proxy(cached: bool) -> (DaoProxy, InMemoryCachePool) {
        let conn = SqliteConnection::open_in_memory().expect("in-memory database should open");
        conn.execute_batch(SCHEMA).expect("schema should apply");
        let dao = GeneralDao::new(declaration(), Arc::new(conn), DaoConfig::new())
            .expect("dao should build");
        let pool = InMemoryCachePool::new();
        let config = if cached {
            CacheConfig::new().with_table("example")
        } else {
            CacheConfig::new()
        };
        let proxy = DaoProxy::new(
            dao,
            Arc::new(FieldSerializer::new()),
            Some(Arc::new(pool.clone())),
            &config,
        )
        .expect("proxy should build");
        (proxy, pool)
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().expect("row is an object")
    }

    #[test]
    fn test_create_stamps_and_round_trips_fields() {
        let (proxy, _pool) = proxy(true);
        let created = proxy
            .create(row(json!({"name": "a", "ids1": [1, 2], "ids2": ["x", "y"]})))
            .unwrap();
        assert_eq!(created["ids1"], json!([1, 2]));
        assert_eq!(created["ids2"], json!(["x", "y"]));
        assert!(created["created_time"].as_i64().unwrap() > 0);
        assert_eq!(created["created_time"], created["updated_time"]);

        let stored = proxy.dao().get(1, GetOptions::default()).unwrap().unwrap();
        assert_eq!(stored["ids1"], json!("[1,2]"));
        assert_eq!(stored["ids2"], json!("|x|y|"));
    }

    #[test]
    fn test_get_populates_row_cache_and_index() {
        let (proxy, pool) = proxy(true);
        proxy.create(row(json!({"name": "a"}))).unwrap();

        let first = proxy.get(1, GetOptions::default()).unwrap();
        assert!(pool.has_item("entity:example:row:1").unwrap());
        let index = format!(
            "entity:example:rowid:get:{}",
            signature_of(&json!([1]))
        );
        assert!(pool.has_item(&index).unwrap());

        let second = proxy.get(1, GetOptions::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(proxy.cache_stats().unwrap().hits, 2);
    }

    #[test]
    fn test_missing_row_is_not_cached() {
        let (proxy, pool) = proxy(true);
        assert!(proxy.get(9999, GetOptions::default()).unwrap().is_none());
        assert!(!pool.has_item("entity:example:row:9999").unwrap());
    }

    #[test]
    fn test_update_invalidates_row_and_bumps_version() {
        let (proxy, pool) = proxy(true);
        proxy.create(row(json!({"name": "a"}))).unwrap();
        proxy.get(1, GetOptions::default()).unwrap();

        let updated = proxy.update(1, row(json!({"name": "b"}))).unwrap().unwrap();
        assert_eq!(updated["name"], json!("b"));
        assert!(!pool.has_item("entity:example:row:1").unwrap());
        assert_eq!(proxy.cache().unwrap().current_version("example"), Some(2));

        let fetched = proxy.get(1, GetOptions::default()).unwrap().unwrap();
        assert_eq!(fetched["name"], json!("b"));
    }

    #[test]
    fn test_locked_get_bypasses_cache() {
        let (proxy, pool) = proxy(true);
        proxy.create(row(json!({"name": "a", "ids1": {"k": 1}}))).unwrap();
        let row = proxy.get(1, GetOptions::locked()).unwrap().unwrap();
        assert_eq!(row["ids1"], json!({"k": 1}));
        assert!(!pool.has_item("entity:example:row:1").unwrap());
    }

    #[test]
    fn test_uncacheable_table_passes_through() {
        let (proxy, pool) = proxy(false);
        assert!(!proxy.is_cached());
        proxy.create(row(json!({"name": "a", "ids2": ["x"]}))).unwrap();
        let rows = proxy
            .search(&Conditions::new(), &OrderBys::new().asc("name"), &Paging::new(0, 10))
            .unwrap();
        assert_eq!(rows[0]["ids2"], json!(["x"]));
        proxy.get(1, GetOptions::default()).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_search_validates_before_cache() {
        let (proxy, pool) = proxy(true);
        let err = proxy
            .search(&Conditions::new(), &OrderBys::new().asc("password"), &Paging::new(0, 10))
            .unwrap_err();
        assert!(matches!(err, VernierError::Validation(_)));
        let err = proxy
            .search(&Conditions::new(), &OrderBys::new().asc("name"), &Paging::new("1; DROP TABLE", 10))
            .unwrap_err();
        assert!(matches!(err, VernierError::Validation(_)));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_search_size_ceiling() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        let dao = GeneralDao::new(declaration(), Arc::new(conn), DaoConfig::new()).unwrap();
        let pool = InMemoryCachePool::new();
        let proxy = DaoProxy::new(
            dao,
            Arc::new(FieldSerializer::new()),
            Some(Arc::new(pool.clone())),
            &CacheConfig::new().with_table("example").with_search_size_ceiling(2),
        )
        .unwrap();
        proxy
            .batch_create((0..3).map(|i| row(json!({"name": format!("n{}", i)}))).collect())
            .unwrap();

        let rows = proxy
            .search(&Conditions::new(), &OrderBys::new(), &Paging::none())
            .unwrap();
        assert_eq!(rows.len(), 3);
        let count = proxy.count(&Conditions::new()).unwrap();
        assert_eq!(count, 3);

        let keys = pool.keys();
        assert!(!keys.iter().any(|k| k.contains(":search:")));
        assert_eq!(keys.iter().filter(|k| k.contains(":count:")).count(), 1);
    }

    #[test]
    fn test_malformed_cached_count_is_reloaded() {
        let (proxy, pool) = proxy(true);
        proxy.create(row(json!({"name": "a"}))).unwrap();
        let version = proxy.cache().unwrap().current_version("example").unwrap();
        let key = CacheKey::table("example", version, "count", &signature_of(&json!([{}])));
        pool.save(CacheItem::hit(key.encode(), json!("three"))).unwrap();

        assert_eq!(proxy.count(&Conditions::new()).unwrap(), 1);
        assert_eq!(pool.get_item(&key.encode()).unwrap().into_value(), Some(json!(1)));
    }

    #[test]
    fn test_transaction_reads_skip_cache() {
        let (proxy, pool) = proxy(true);
        proxy.create(row(json!({"name": "a"}))).unwrap();
        let keys_before = pool.keys();

        proxy
            .transactional(|p| {
                assert!(p.in_transaction());
                p.get(1, GetOptions::default())?;
                p.search(&Conditions::new(), &OrderBys::new(), &Paging::none())?;
                p.count(&Conditions::new())
            })
            .unwrap();

        assert!(!proxy.in_transaction());
        assert_eq!(pool.keys(), keys_before);
        assert_eq!(proxy.cache().unwrap().current_version("example"), Some(1));
    }

    #[test]
    fn test_unknown_codec_rejected_at_construction() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let decl = EntityDeclaration::builder("example")
            .serialize("ids1", "php")
            .build()
            .unwrap();
        let dao = GeneralDao::new(Arc::new(decl), Arc::new(conn), DaoConfig::new()).unwrap();
        let err = DaoProxy::uncached(dao, Arc::new(FieldSerializer::new())).unwrap_err();
        assert!(matches!(err, VernierError::Config(_)));
    }
}
