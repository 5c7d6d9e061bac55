//! SQLite connection backed by rusqlite.
//!
//! A single `rusqlite::Connection` behind `Arc<Mutex<_>>`. SQLite serializes
//! writers, so the dialect has no row-lock clause.

use crate::connection::{insert_statement, Connection, Inserted};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection as RawConnection};
use serde_json::{Number, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use vernier_core::{Row, RowId, SqlDialect, StorageError, VernierError, VernierResult};

#[derive(Clone)]
pub struct SqliteConnection {
    conn: Arc<Mutex<RawConnection>>,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

fn query_error(e: rusqlite::Error) -> VernierError {
    StorageError::Query {
        reason: e.to_string(),
    }
    .into()
}

fn transaction_error(e: rusqlite::Error) -> VernierError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
    .into()
}

/// Bind form of a JSON value. Structured values are stored as JSON text.
fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

impl SqliteConnection {
    /// Open (or create) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> VernierResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Query {
                    reason: format!("cannot create {}: {}", parent.display(), e),
                })?;
            }
        }
        let conn = RawConnection::open(path).map_err(query_error)?;
        Ok(Self::from_raw(conn))
    }

    pub fn open_in_memory() -> VernierResult<Self> {
        let conn = RawConnection::open_in_memory().map_err(query_error)?;
        Ok(Self::from_raw(conn))
    }

    fn from_raw(conn: RawConnection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> VernierResult<MutexGuard<'_, RawConnection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Run several `;`-separated statements without parameters, e.g. a schema.
    pub fn execute_batch(&self, sql: &str) -> VernierResult<()> {
        self.lock()?.execute_batch(sql).map_err(query_error)
    }

    fn run_update(conn: &RawConnection, sql: &str, params: &[Value]) -> VernierResult<u64> {
        let bound: Vec<SqlValue> = params.iter().map(to_sql_value).collect();
        let affected = conn
            .execute(sql, params_from_iter(bound.iter()))
            .map_err(query_error)?;
        Ok(affected as u64)
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn execute_update(&self, sql: &str, params: &[Value]) -> VernierResult<u64> {
        tracing::debug!(sql, params = params.len(), "execute");
        let conn = self.lock()?;
        Self::run_update(&conn, sql, params)
    }

    fn fetch_all(&self, sql: &str, params: &[Value]) -> VernierResult<Vec<Row>> {
        tracing::debug!(sql, params = params.len(), "fetch");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(query_error)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let bound: Vec<SqlValue> = params.iter().map(to_sql_value).collect();

        let rows = stmt
            .query_map(params_from_iter(bound.iter()), |row| {
                let mut record = Row::new();
                for (idx, name) in columns.iter().enumerate() {
                    record.insert(name.clone(), from_sql_value(row.get_ref(idx)?));
                }
                Ok(record)
            })
            .map_err(query_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error)?;
        Ok(rows)
    }

    fn fetch_column(&self, sql: &str, params: &[Value]) -> VernierResult<Vec<Value>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(query_error)?;
        let bound: Vec<SqlValue> = params.iter().map(to_sql_value).collect();
        let values = stmt
            .query_map(params_from_iter(bound.iter()), |row| {
                Ok(from_sql_value(row.get_ref(0)?))
            })
            .map_err(query_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error)?;
        Ok(values)
    }

    fn last_insert_id(&self) -> VernierResult<Option<RowId>> {
        let id = self.lock()?.last_insert_rowid();
        Ok((id > 0).then_some(id))
    }

    /// Insert and read the generated id under the same lock.
    fn insert(&self, table: &str, fields: &Row) -> VernierResult<Inserted> {
        let (sql, params) = insert_statement(table, fields)?;
        tracing::debug!(sql = %sql, params = params.len(), "insert");
        let conn = self.lock()?;
        let affected = Self::run_update(&conn, &sql, &params)?;
        let id = conn.last_insert_rowid();
        Ok(Inserted {
            affected,
            last_insert_id: (affected > 0 && id > 0).then_some(id),
        })
    }

    fn begin_transaction(&self) -> VernierResult<()> {
        self.lock()?.execute_batch("BEGIN").map_err(transaction_error)
    }

    fn commit(&self) -> VernierResult<()> {
        self.lock()?.execute_batch("COMMIT").map_err(transaction_error)
    }

    fn roll_back(&self) -> VernierResult<()> {
        self.lock()?.execute_batch("ROLLBACK").map_err(transaction_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::transactional;
    use serde_json::json;

    fn connection() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().expect("in-memory database should open");
        conn.execute_batch(
            "CREATE TABLE example (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL DEFAULT '',
                counter1 INTEGER NOT NULL DEFAULT 0,
                ratio REAL
            );",
        )
        .expect("schema should apply");
        conn
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().expect("row is an object")
    }

    #[test]
    fn test_insert_and_fetch() {
        let conn = connection();
        let inserted = conn
            .insert("example", &row(json!({"name": "a", "counter1": 2, "ratio": 0.5})))
            .unwrap();
        assert_eq!(inserted.affected, 1);
        assert_eq!(inserted.last_insert_id, Some(1));

        let fetched = conn
            .fetch_one("SELECT * FROM example WHERE id = ?", &[json!(1)])
            .unwrap()
            .expect("row exists");
        assert_eq!(fetched["name"], json!("a"));
        assert_eq!(fetched["counter1"], json!(2));
        assert_eq!(fetched["ratio"], json!(0.5));
    }

    #[test]
    fn test_structured_and_bool_values_bind() {
        let conn = connection();
        conn.insert("example", &row(json!({"name": ["x"], "counter1": true})))
            .unwrap();
        let fetched = conn
            .fetch_one("SELECT name, counter1 FROM example", &[])
            .unwrap()
            .unwrap();
        assert_eq!(fetched["name"], json!("[\"x\"]"));
        assert_eq!(fetched["counter1"], json!(1));
    }

    #[test]
    fn test_fetch_column_and_update() {
        let conn = connection();
        for name in ["a", "b", "c"] {
            conn.insert("example", &row(json!({"name": name}))).unwrap();
        }
        let affected = conn
            .update("example", &row(json!({"counter1": 5})), &row(json!({"id": 2})))
            .unwrap();
        assert_eq!(affected, 1);

        let ids = conn
            .fetch_column("SELECT id FROM example WHERE counter1 = ? ORDER BY id", &[json!(5)])
            .unwrap();
        assert_eq!(ids, vec![json!(2)]);
    }

    #[test]
    fn test_bad_statement_is_query_error() {
        let conn = connection();
        let err = conn.fetch_all("SELECT * FROM missing", &[]).unwrap_err();
        assert!(matches!(err, VernierError::Storage(StorageError::Query { .. })));
    }

    #[test]
    fn test_transaction_rollback() {
        let conn = connection();
        let result: VernierResult<()> = transactional(&conn, || {
            conn.insert("example", &row(json!({"name": "temp"})))?;
            Err(StorageError::Query {
                reason: "abort".to_string(),
            }
            .into())
        });
        assert!(result.is_err());
        let count = conn
            .fetch_column("SELECT COUNT(*) FROM example", &[])
            .unwrap();
        assert_eq!(count, vec![json!(0)]);
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::TempDir::new().expect("TempDir creation should succeed");
        let path = dir.path().join("nested").join("vernier.db");
        let conn = SqliteConnection::open(&path).expect("file database should open");
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        assert!(path.exists());
    }
}
