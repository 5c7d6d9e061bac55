//! Store connection trait.
//!
//! The record access layer only ever talks to a store through [`Connection`].
//! Statements use `?` placeholders and every caller value is bound.

use serde_json::Value;
use vernier_core::{check_field_names, Row, RowId, SqlDialect, VernierResult};

/// Outcome of a single-row INSERT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    pub affected: u64,
    pub last_insert_id: Option<RowId>,
}

/// A synchronous, thread-safe store connection.
pub trait Connection: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    /// Run a write statement, returning the number of affected rows.
    fn execute_update(&self, sql: &str, params: &[Value]) -> VernierResult<u64>;

    fn fetch_all(&self, sql: &str, params: &[Value]) -> VernierResult<Vec<Row>>;

    fn fetch_one(&self, sql: &str, params: &[Value]) -> VernierResult<Option<Row>> {
        Ok(self.fetch_all(sql, params)?.into_iter().next())
    }

    /// Values of a single-column result.
    fn fetch_column(&self, sql: &str, params: &[Value]) -> VernierResult<Vec<Value>> {
        Ok(self
            .fetch_all(sql, params)?
            .into_iter()
            .filter_map(|row| row.into_iter().next().map(|(_, value)| value))
            .collect())
    }

    /// Identifier generated by the most recent INSERT on this connection.
    fn last_insert_id(&self) -> VernierResult<Option<RowId>>;

    /// `INSERT INTO table (a, b) VALUES (?, ?)`.
    ///
    /// The default reads the generated id in a second call; implementations
    /// that can do both under one lock should override it.
    fn insert(&self, table: &str, fields: &Row) -> VernierResult<Inserted> {
        let (sql, params) = insert_statement(table, fields)?;
        let affected = self.execute_update(&sql, &params)?;
        Ok(Inserted {
            affected,
            last_insert_id: self.last_insert_id()?,
        })
    }

    /// `UPDATE table SET a = ? WHERE k = ?`.
    fn update(&self, table: &str, fields: &Row, identifier: &Row) -> VernierResult<u64> {
        check_field_names(fields.keys().chain(identifier.keys()).map(String::as_str))?;
        let set: Vec<String> = fields.keys().map(|c| format!("{} = ?", c)).collect();
        let (predicate, where_params) = identifier_predicate(identifier);
        let sql = format!("UPDATE {} SET {} WHERE {}", table, set.join(", "), predicate);
        let params: Vec<Value> = fields.values().cloned().chain(where_params).collect();
        self.execute_update(&sql, &params)
    }

    /// `DELETE FROM table WHERE k = ?`.
    fn delete(&self, table: &str, identifier: &Row) -> VernierResult<u64> {
        check_field_names(identifier.keys().map(String::as_str))?;
        let (predicate, params) = identifier_predicate(identifier);
        let sql = format!("DELETE FROM {} WHERE {}", table, predicate);
        self.execute_update(&sql, &params)
    }

    fn begin_transaction(&self) -> VernierResult<()>;

    fn commit(&self) -> VernierResult<()>;

    fn roll_back(&self) -> VernierResult<()>;
}

/// Build a single-row INSERT for `fields`.
pub fn insert_statement(table: &str, fields: &Row) -> VernierResult<(String, Vec<Value>)> {
    check_field_names(fields.keys().map(String::as_str))?;
    let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
    let marks = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        marks
    );
    Ok((sql, fields.values().cloned().collect()))
}

fn identifier_predicate(identifier: &Row) -> (String, Vec<Value>) {
    let clauses: Vec<String> = identifier.keys().map(|c| format!("{} = ?", c)).collect();
    (clauses.join(" AND "), identifier.values().cloned().collect())
}

/// Run `f` inside a transaction, committing on success and rolling back on error.
pub fn transactional<T, F>(conn: &dyn Connection, f: F) -> VernierResult<T>
where
    F: FnOnce() -> VernierResult<T>,
{
    conn.begin_transaction()?;
    match f() {
        Ok(value) => {
            conn.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = conn.roll_back() {
                tracing::warn!(error = %rollback_error, "Rollback failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use vernier_core::VernierError;

    /// Records statements and returns canned results.
    #[derive(Default)]
    struct RecordingConnection {
        statements: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    }

    impl RecordingConnection {
        fn statements(&self) -> Vec<(String, Vec<Value>)> {
            self.statements.lock().unwrap().clone()
        }
    }

    impl Connection for RecordingConnection {
        fn dialect(&self) -> SqlDialect {
            SqlDialect::MySql
        }

        fn execute_update(&self, sql: &str, params: &[Value]) -> VernierResult<u64> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            Ok(1)
        }

        fn fetch_all(&self, sql: &str, params: &[Value]) -> VernierResult<Vec<Row>> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            Ok(vec![json!({"id": 3}).as_object().cloned().unwrap()])
        }

        fn last_insert_id(&self) -> VernierResult<Option<RowId>> {
            Ok(Some(9))
        }

        fn begin_transaction(&self) -> VernierResult<()> {
            self.execute_update("BEGIN", &[]).map(|_| ())
        }

        fn commit(&self) -> VernierResult<()> {
            self.execute_update("COMMIT", &[]).map(|_| ())
        }

        fn roll_back(&self) -> VernierResult<()> {
            self.execute_update("ROLLBACK", &[]).map(|_| ())
        }
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_default_insert() {
        let conn = RecordingConnection::default();
        let inserted = conn
            .insert("example", &row(json!({"name": "a", "counter1": 1})))
            .unwrap();
        assert_eq!(inserted, Inserted { affected: 1, last_insert_id: Some(9) });
        assert_eq!(
            conn.statements()[0],
            (
                "INSERT INTO example (counter1, name) VALUES (?, ?)".to_string(),
                vec![json!(1), json!("a")]
            )
        );
    }

    #[test]
    fn test_default_update_and_delete() {
        let conn = RecordingConnection::default();
        conn.update("example", &row(json!({"name": "b"})), &row(json!({"id": 1})))
            .unwrap();
        conn.delete("example", &row(json!({"id": 1}))).unwrap();
        let statements = conn.statements();
        assert_eq!(statements[0].0, "UPDATE example SET name = ? WHERE id = ?");
        assert_eq!(statements[0].1, vec![json!("b"), json!(1)]);
        assert_eq!(statements[1].0, "DELETE FROM example WHERE id = ?");
    }

    #[test]
    fn test_insert_rejects_bad_column() {
        let conn = RecordingConnection::default();
        let err = conn
            .insert("example", &row(json!({"name) VALUES (1); --": "a"})))
            .unwrap_err();
        assert!(matches!(err, VernierError::Validation(_)));
        assert!(conn.statements().is_empty());
    }

    #[test]
    fn test_fetch_column_takes_single_column() {
        let conn = RecordingConnection::default();
        assert_eq!(conn.fetch_column("SELECT id FROM example", &[]).unwrap(), vec![json!(3)]);
    }

    #[test]
    fn test_transactional_commits_and_rolls_back() {
        let conn = RecordingConnection::default();
        let value = transactional(&conn, || Ok(5)).unwrap();
        assert_eq!(value, 5);

        let result: VernierResult<()> = transactional(&conn, || {
            Err(vernier_core::StorageError::Query {
                reason: "boom".to_string(),
            }
            .into())
        });
        assert!(result.is_err());

        let sql: Vec<String> = conn.statements().into_iter().map(|(s, _)| s).collect();
        assert_eq!(sql, vec!["BEGIN", "COMMIT", "BEGIN", "ROLLBACK"]);
    }
}
