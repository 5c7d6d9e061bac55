//! Record access layer.
//!
//! [`GeneralDao`] issues the statements for one declared table: single-row
//! CRUD, atomic counter updates, conditional search and count, and the
//! chunked batch operations. It knows nothing about caching or field codecs;
//! rows go in and come out exactly as the store holds them.

use crate::connection::{self, Connection};
use serde_json::Value;
use std::sync::Arc;
use vernier_core::{
    check_field_name, check_field_names, ArgumentShapeError, Conditions, DaoConfig,
    EntityDeclaration, OrderBys, Paging, QueryBuilder, Row, RowId, StorageError, ValidationError,
    VernierResult, ID_COLUMN,
};

/// Options for point lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Read for update. Always served by the store.
    pub lock: bool,
}

impl GetOptions {
    pub fn locked() -> Self {
        Self { lock: true }
    }
}

#[derive(Clone)]
pub struct GeneralDao {
    declaration: Arc<EntityDeclaration>,
    conn: Arc<dyn Connection>,
    config: DaoConfig,
}

impl std::fmt::Debug for GeneralDao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneralDao")
            .field("table", &self.declaration.table())
            .field("dialect", &self.conn.dialect())
            .field("config", &self.config)
            .finish()
    }
}

fn column_set(row: &Row) -> Vec<String> {
    row.keys().cloned().collect()
}

impl GeneralDao {
    pub fn new(
        declaration: Arc<EntityDeclaration>,
        conn: Arc<dyn Connection>,
        config: DaoConfig,
    ) -> VernierResult<Self> {
        config.validate()?;
        Ok(Self {
            declaration,
            conn,
            config,
        })
    }

    pub fn declaration(&self) -> &EntityDeclaration {
        &self.declaration
    }

    pub fn table(&self) -> &str {
        self.declaration.table()
    }

    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    pub fn config(&self) -> &DaoConfig {
        &self.config
    }

    fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.declaration)
    }

    fn id_identifier(id: RowId) -> Row {
        let mut identifier = Row::new();
        identifier.insert(ID_COLUMN.to_string(), Value::from(id));
        identifier
    }

    // ========================================================================
    // SINGLE ROW
    // ========================================================================

    /// Insert `fields` and return the stored row.
    pub fn create(&self, fields: Row) -> VernierResult<Row> {
        if fields.is_empty() {
            return Err(ArgumentShapeError::EmptyRecord {
                operation: "create".to_string(),
            }
            .into());
        }

        let inserted = self.conn.insert(self.table(), &fields)?;
        if inserted.affected == 0 {
            return Err(StorageError::WriteFailure {
                table: self.table().to_string(),
                reason: "insert affected no rows".to_string(),
            }
            .into());
        }

        let id = inserted
            .last_insert_id
            .or_else(|| vernier_core::row_id(&fields))
            .ok_or_else(|| StorageError::WriteFailure {
                table: self.table().to_string(),
                reason: "store reported no generated id".to_string(),
            })?;

        self.get(id, GetOptions::default())?.ok_or_else(|| {
            StorageError::NotFound {
                table: self.table().to_string(),
                id,
            }
            .into()
        })
    }

    pub fn update(&self, id: RowId, fields: Row) -> VernierResult<Option<Row>> {
        if fields.is_empty() {
            return Err(ArgumentShapeError::EmptyRecord {
                operation: "update".to_string(),
            }
            .into());
        }
        self.conn
            .update(self.table(), &fields, &Self::id_identifier(id))?;
        self.get(id, GetOptions::default())
    }

    pub fn delete(&self, id: RowId) -> VernierResult<RowId> {
        self.conn.delete(self.table(), &Self::id_identifier(id))?;
        Ok(id)
    }

    /// Add each delta to its column in one statement and return the new row.
    pub fn wave(&self, id: RowId, deltas: &Row) -> VernierResult<Option<Row>> {
        if deltas.is_empty() {
            return Err(ArgumentShapeError::EmptyRecord {
                operation: "wave".to_string(),
            }
            .into());
        }
        check_field_names(deltas.keys().map(String::as_str))?;
        for (field, delta) in deltas {
            if !delta.is_number() {
                return Err(ValidationError::NonNumericDelta {
                    field: field.clone(),
                }
                .into());
            }
        }

        let sets: Vec<String> = deltas
            .keys()
            .map(|c| format!("{} = {} + ?", c, c))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.table(),
            sets.join(", "),
            ID_COLUMN
        );
        let mut params: Vec<Value> = deltas.values().cloned().collect();
        params.push(Value::from(id));
        self.conn.execute_update(&sql, &params)?;

        self.get(id, GetOptions::default())
    }

    pub fn get(&self, id: RowId, options: GetOptions) -> VernierResult<Option<Row>> {
        let lock = if options.lock {
            self.conn.dialect().row_lock_clause().unwrap_or_default()
        } else {
            ""
        };
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?{}",
            self.table(),
            ID_COLUMN,
            lock
        );
        self.conn.fetch_one(&sql, &[Value::from(id)])
    }

    // ========================================================================
    // CONDITIONAL READS
    // ========================================================================

    pub fn search(
        &self,
        conditions: &Conditions,
        order_bys: &OrderBys,
        paging: &Paging,
    ) -> VernierResult<Vec<Row>> {
        let stmt = self.query().select(conditions, order_bys, paging)?;
        self.conn.fetch_all(&stmt.sql, &stmt.params)
    }

    pub fn count(&self, conditions: &Conditions) -> VernierResult<u64> {
        let stmt = self.query().count(conditions)?;
        let value = self
            .conn
            .fetch_column(&stmt.sql, &stmt.params)?
            .into_iter()
            .next()
            .unwrap_or(Value::Null);
        Ok(match &value {
            Value::Number(n) => n.as_u64().unwrap_or(0),
            Value::String(s) => s.parse().unwrap_or(0),
            _ => 0,
        })
    }

    fn fields_predicate(operation: &str, fields: &Row) -> VernierResult<(String, Vec<Value>)> {
        if fields.is_empty() {
            return Err(ArgumentShapeError::EmptyRecord {
                operation: operation.to_string(),
            }
            .into());
        }
        check_field_names(fields.keys().map(String::as_str))?;
        let clauses: Vec<String> = fields.keys().map(|c| format!("{} = ?", c)).collect();
        Ok((clauses.join(" AND "), fields.values().cloned().collect()))
    }

    /// First row whose columns equal `fields`.
    pub fn get_by_fields(&self, fields: &Row) -> VernierResult<Option<Row>> {
        let (predicate, params) = Self::fields_predicate("get_by_fields", fields)?;
        let sql = format!("SELECT * FROM {} WHERE {} LIMIT 1", self.table(), predicate);
        self.conn.fetch_one(&sql, &params)
    }

    /// Every row whose columns equal `fields`.
    pub fn find_by_fields(&self, fields: &Row) -> VernierResult<Vec<Row>> {
        let (predicate, params) = Self::fields_predicate("find_by_fields", fields)?;
        let sql = format!("SELECT * FROM {} WHERE {}", self.table(), predicate);
        self.conn.fetch_all(&sql, &params)
    }

    /// Rows whose `field` is one of `values`. No statement for an empty list.
    pub fn find_in_field(&self, field: &str, values: &[Value]) -> VernierResult<Vec<Row>> {
        check_field_name(field)?;
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let marks = vec!["?"; values.len()].join(", ");
        let sql = format!("SELECT * FROM {} WHERE {} IN ({})", self.table(), field, marks);
        self.conn.fetch_all(&sql, values)
    }

    /// Append validated ORDER BY and LIMIT clauses to a custom statement.
    pub fn paged_sql(&self, sql: &str, order_bys: &OrderBys, paging: &Paging) -> VernierResult<String> {
        self.query().paged(sql, order_bys, paging)
    }

    /// Identifiers of the rows matching `conditions`.
    pub fn find_ids(&self, conditions: &Conditions) -> VernierResult<Vec<RowId>> {
        let stmt = self.query().select_ids(conditions)?;
        Ok(self
            .conn
            .fetch_column(&stmt.sql, &stmt.params)?
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .collect())
    }

    // ========================================================================
    // BATCH
    // ========================================================================

    fn check_uniform_columns(operation: &str, rows: &[Row]) -> VernierResult<Vec<String>> {
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let expected = column_set(first);
        if expected.is_empty() {
            return Err(ArgumentShapeError::EmptyRecord {
                operation: operation.to_string(),
            }
            .into());
        }
        for (index, row) in rows.iter().enumerate().skip(1) {
            let got = column_set(row);
            if got != expected {
                return Err(ArgumentShapeError::ColumnMismatch {
                    operation: operation.to_string(),
                    index,
                    expected,
                    got,
                }
                .into());
            }
        }
        check_field_names(expected.iter().map(String::as_str))?;
        Ok(expected)
    }

    /// Multi-row INSERT in chunks. Returns the number of inserted rows.
    pub fn batch_create(&self, rows: &[Row]) -> VernierResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns = Self::check_uniform_columns("batch_create", rows)?;
        let tuple = format!("({})", vec!["?"; columns.len()].join(", "));

        let mut affected = 0;
        for chunk in rows.chunks(self.config.batch_create_chunk) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                self.table(),
                columns.join(", "),
                vec![tuple.as_str(); chunk.len()].join(", ")
            );
            let params: Vec<Value> = chunk
                .iter()
                .flat_map(|row| columns.iter().map(move |c| row[c].clone()))
                .collect();
            affected += self.conn.execute_update(&sql, &params)?;
        }
        tracing::debug!(table = self.table(), rows = rows.len(), affected, "batch create");
        Ok(affected)
    }

    /// Update each row identified by `ids[i]` with `rows[i]`.
    ///
    /// Returns the identifiers that were addressed.
    pub fn batch_update(&self, ids: &[RowId], rows: &[Row]) -> VernierResult<Vec<RowId>> {
        let keys: Vec<Value> = ids.iter().map(|id| Value::from(*id)).collect();
        self.batch_update_by(ID_COLUMN, &keys, rows)?;
        Ok(ids.to_vec())
    }

    /// Update each row whose `column` equals `keys[i]` with `rows[i]`.
    ///
    /// Per chunk, one `SET c = CASE column WHEN ? THEN ? ... ELSE c END` per
    /// updated column, with branches in input order. Returns affected rows.
    pub fn batch_update_by(&self, column: &str, keys: &[Value], rows: &[Row]) -> VernierResult<u64> {
        if keys.len() != rows.len() {
            return Err(ArgumentShapeError::LengthMismatch {
                operation: "batch_update".to_string(),
                ids: keys.len(),
                rows: rows.len(),
            }
            .into());
        }
        if rows.is_empty() {
            return Ok(0);
        }
        check_field_name(column)?;
        let columns = Self::check_uniform_columns("batch_update", rows)?;

        let size = self.config.batch_update_chunk;
        let mut affected = 0;
        for (part_keys, part_rows) in keys.chunks(size).zip(rows.chunks(size)) {
            let mut params = Vec::new();
            let mut sets = Vec::with_capacity(columns.len());
            for update_column in &columns {
                let mut case = format!("{} = CASE {}", update_column, column);
                for (key, row) in part_keys.iter().zip(part_rows) {
                    case.push_str(" WHEN ? THEN ?");
                    params.push(key.clone());
                    params.push(row[update_column].clone());
                }
                case.push_str(&format!(" ELSE {} END", update_column));
                sets.push(case);
            }
            params.extend(part_keys.iter().cloned());
            let sql = format!(
                "UPDATE {} SET {} WHERE {} IN ({})",
                self.table(),
                sets.join(", "),
                column,
                vec!["?"; part_keys.len()].join(", ")
            );
            affected += self.conn.execute_update(&sql, &params)?;
        }
        tracing::debug!(table = self.table(), rows = rows.len(), affected, "batch update");
        Ok(affected)
    }

    /// Chunked `DELETE ... WHERE id IN (...)`. Returns the addressed identifiers.
    pub fn batch_delete(&self, ids: &[RowId]) -> VernierResult<Vec<RowId>> {
        let mut affected = 0;
        for chunk in ids.chunks(self.config.batch_delete_chunk) {
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({})",
                self.table(),
                ID_COLUMN,
                vec!["?"; chunk.len()].join(", ")
            );
            let params: Vec<Value> = chunk.iter().map(|id| Value::from(*id)).collect();
            affected += self.conn.execute_update(&sql, &params)?;
        }
        if !ids.is_empty() {
            tracing::debug!(table = self.table(), ids = ids.len(), affected, "batch delete");
        }
        Ok(ids.to_vec())
    }

    /// Delete the rows matching declared conditions. Deletes nothing, and
    /// returns 0, when no condition matches a declared template.
    pub fn batch_delete_by_conditions(&self, conditions: &Conditions) -> VernierResult<u64> {
        match self.query().delete(conditions)? {
            Some(stmt) => self.conn.execute_update(&stmt.sql, &stmt.params),
            None => Ok(0),
        }
    }

    /// Run `f` in a store transaction.
    pub fn transactional<T, F>(&self, f: F) -> VernierResult<T>
    where
        F: FnOnce(&Self) -> VernierResult<T>,
    {
        connection::transactional(self.conn.as_ref(), || f(self))
    }
}
