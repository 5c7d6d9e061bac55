//! Cache availability: outages, lock bypass, uncached tables and the LMDB pool.

use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use vernier_storage::{CacheKey, CachePool, LmdbCachePool};
use vernier_test_utils::assertions::assert_config_error;
use vernier_test_utils::fixtures::{
    cached_config, cached_example_proxy, example_connection, example_dao, example_proxy,
    mock_rows, EXAMPLE_TABLE,
};
use vernier_test_utils::{
    init_tracing, row, CacheConfig, Conditions, DaoConfig, DaoProxy, FieldSerializer,
    FlakyCachePool, GetOptions, OrderBys, Paging, VersionScheme,
};

#[test]
fn outage_degrades_to_uncached_reads_and_writes() {
    init_tracing();
    let pool = FlakyCachePool::down();
    let proxy = example_proxy(Some(Arc::new(pool.clone())), &cached_config());

    proxy.batch_create(mock_rows()).unwrap();
    let created = proxy.create(row(json!({"name": "a", "ids1": [1]}))).unwrap();
    let id = created["id"].as_i64().unwrap();

    let fetched = proxy.get(id, GetOptions::default()).unwrap().unwrap();
    assert_eq!(fetched["ids1"], json!([1]));
    assert_eq!(proxy.count(&Conditions::new()).unwrap(), 6);
    proxy.update(id, row(json!({"name": "b"}))).unwrap();
    assert_eq!(proxy.get(id, GetOptions::default()).unwrap().unwrap()["name"], json!("b"));

    assert!(pool.failures() > 0);
    assert!(pool.inner().is_empty());
    assert!(proxy.cache_stats().unwrap().backend_errors > 0);
}

#[test]
fn first_mutation_after_outage_restores_freshness() {
    let pool = FlakyCachePool::new();
    let proxy = example_proxy(Some(Arc::new(pool.clone())), &cached_config());
    proxy.create(row(json!({"name": "a"}))).unwrap();

    let order = OrderBys::new().asc("name");
    let first = proxy.search(&Conditions::new(), &order, &Paging::none()).unwrap();
    assert_eq!(first[0]["name"], json!("a"));
    proxy.get(1, GetOptions::default()).unwrap();

    // Writes during the outage cannot bump the version or drop the row entry.
    pool.set_down(true);
    proxy.update(1, row(json!({"name": "b"}))).unwrap();
    pool.set_down(false);

    // The stale entries are still there; correctness after recovery relies on
    // the next successful mutation.
    proxy.update(1, row(json!({"name": "c"}))).unwrap();
    let after = proxy.search(&Conditions::new(), &order, &Paging::none()).unwrap();
    assert_eq!(after[0]["name"], json!("c"));
    assert_eq!(proxy.get(1, GetOptions::default()).unwrap().unwrap()["name"], json!("c"));
}

#[test]
fn locked_get_reads_the_store() {
    let pool = FlakyCachePool::new();
    let proxy = example_proxy(Some(Arc::new(pool.clone())), &cached_config());
    proxy.create(row(json!({"name": "a"}))).unwrap();
    proxy.get(1, GetOptions::default()).unwrap();

    // Change the row behind the proxy's back.
    proxy
        .dao()
        .connection()
        .execute_update("UPDATE example SET name = ? WHERE id = ?", &[json!("direct"), json!(1)])
        .unwrap();

    let cached = proxy.get(1, GetOptions::default()).unwrap().unwrap();
    assert_eq!(cached["name"], json!("a"));
    let locked = proxy.get(1, GetOptions::locked()).unwrap().unwrap();
    assert_eq!(locked["name"], json!("direct"));
}

#[test]
fn locked_get_inside_transaction() {
    let pool = FlakyCachePool::new();
    let proxy = example_proxy(Some(Arc::new(pool.clone())), &cached_config());
    proxy.create(row(json!({"name": "a", "counter1": 1}))).unwrap();

    let counter = proxy
        .transactional(|p| {
            let current = p.get(1, GetOptions::locked())?.unwrap_or_default();
            let next = current["counter1"].as_i64().unwrap_or(0) + 1;
            p.update(1, row(json!({"counter1": next})))?;
            Ok(next)
        })
        .unwrap();
    assert_eq!(counter, 2);
    assert_eq!(proxy.get(1, GetOptions::default()).unwrap().unwrap()["counter1"], json!(2));
}

#[test]
fn uncacheable_table_is_pure_pass_through() {
    let pool = FlakyCachePool::new();
    let proxy = example_proxy(
        Some(Arc::new(pool.clone())),
        &CacheConfig::new().with_table("other_table"),
    );
    assert!(!proxy.is_cached());
    assert!(proxy.cache_stats().is_none());

    proxy.batch_create(mock_rows()).unwrap();
    proxy.get(1, GetOptions::default()).unwrap();
    proxy.search(&Conditions::new(), &OrderBys::new(), &Paging::none()).unwrap();
    proxy.update(1, row(json!({"name": "b"}))).unwrap();

    assert!(pool.inner().is_empty());
    let fetched = proxy.get(1, GetOptions::default()).unwrap().unwrap();
    assert_eq!(fetched["ids2"], json!(["12222"]));
}

#[test]
fn timestamp_scheme_versions_are_fourteen_digits() {
    let pool = FlakyCachePool::new();
    let config = cached_config().with_version_scheme(VersionScheme::Timestamp);
    let proxy = example_proxy(Some(Arc::new(pool.clone())), &config);

    proxy.batch_create(mock_rows()).unwrap();
    let key = CacheKey::version(EXAMPLE_TABLE).encode();
    let read = || {
        pool.get_item(&key)
            .unwrap()
            .into_value()
            .and_then(|v| v.as_u64())
            .unwrap()
    };
    let version1 = read();
    assert_eq!(version1.to_string().len(), 14);

    proxy.batch_delete(&[1]).unwrap();
    assert!(read() > version1);
}

#[test]
fn lmdb_pool_backs_the_proxy() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let pool = Arc::new(LmdbCachePool::new(dir.path(), 16).expect("LMDB pool should open"));
    let proxy = example_proxy(Some(pool.clone()), &cached_config());

    proxy.batch_create(mock_rows()).unwrap();
    let order = OrderBys::new().asc("name");
    let rows = proxy.search(&Conditions::new(), &order, &Paging::new(0, 100)).unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0]["ids1"], json!(["11111"]));

    let again = proxy.search(&Conditions::new(), &order, &Paging::new(0, 100)).unwrap();
    assert_eq!(rows, again);
    assert_eq!(proxy.cache_stats().unwrap().hits, 1);

    proxy.get(2, GetOptions::default()).unwrap();
    assert!(pool.has_item(&CacheKey::row(EXAMPLE_TABLE, 2).encode()).unwrap());
    proxy.update(2, row(json!({"name": "z"}))).unwrap();
    assert!(!pool.has_item(&CacheKey::row(EXAMPLE_TABLE, 2).encode()).unwrap());

    let purged = pool
        .purge_prefix(&CacheKey::table_prefix(EXAMPLE_TABLE))
        .expect("purge should succeed");
    assert!(purged > 0);
    assert!(pool.is_empty().unwrap_or(false));
}

#[test]
fn invalid_cache_config_is_rejected() {
    let dao = example_dao(example_connection(), DaoConfig::new());
    let result = DaoProxy::new(
        dao,
        Arc::new(FieldSerializer::new()),
        Some(Arc::new(FlakyCachePool::new())),
        &cached_config().with_table("example; DROP TABLE example"),
    );
    assert_config_error(&result);
}

#[test]
fn oversized_cache_keys_degrade_to_uncached() {
    let (proxy, pool) = cached_example_proxy();
    proxy.batch_create(mock_rows()).unwrap();
    let name = "n".repeat(600);

    let found = proxy
        .find(&name, json!(["test2"]), |dao| dao.find_by_fields(&row(json!({"name": "test2"}))))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["ids2"], json!(["22222"]));

    assert!(proxy.cache_stats().unwrap().backend_errors > 0);
    assert!(!pool.keys().iter().any(|k| k.contains(&name)));
}

#[test]
fn timestamp_scheme_survives_version_key_eviction() {
    let pool = FlakyCachePool::new();
    let config = cached_config().with_version_scheme(VersionScheme::Timestamp);
    let proxy = example_proxy(Some(Arc::new(pool.clone())), &config);
    proxy.batch_create(mock_rows()).unwrap();
    let order = OrderBys::new().asc("name");
    proxy.search(&Conditions::new(), &order, &Paging::none()).unwrap();

    let key = CacheKey::version(EXAMPLE_TABLE).encode();
    let evicted = pool.get_item(&key).unwrap().into_value().and_then(|v| v.as_u64()).unwrap();
    pool.delete_item(&key).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));

    // Re-created from the clock, so entries under the evicted version stay unreachable.
    let rows = proxy.search(&Conditions::new(), &order, &Paging::none()).unwrap();
    assert_eq!(rows.len(), 5);
    let recreated = pool.get_item(&key).unwrap().into_value().and_then(|v| v.as_u64()).unwrap();
    assert!(recreated > evicted);
}
