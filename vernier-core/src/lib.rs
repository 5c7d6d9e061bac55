//! VERNIER Core - Declarations, Query Builder and Field Serializer
//!
//! Pure types and pure logic shared by the storage and cache layers. Nothing in
//! this crate talks to a database or a cache backend.

pub mod config;
pub mod declaration;
pub mod error;
pub mod query;
pub mod serializer;
pub mod signature;
pub mod verb;

pub use config::{CacheConfig, DaoConfig, SqlDialect, VersionScheme};
pub use declaration::{EntityDeclaration, EntityDeclarationBuilder, TimestampFields};
pub use error::{
    ArgumentShapeError, CacheBackendError, CodecError, ConfigError, StorageError,
    ValidationError, VernierError, VernierResult,
};
pub use query::{
    check_field_name, check_field_names, ConditionTemplate, Operator, OrderBys, Paging,
    Predicate, QueryBuilder, Statement,
};
pub use serializer::{DelimiterCodec, FieldCodec, FieldSerializer, JsonCodec, TextCodec};
pub use signature::{canonical_json, signature_of};
pub use verb::{CacheStrategy, MutationPolicy, RowInvalidation, StampPolicy, Verb};

use serde_json::{Map, Value};

// ============================================================================
// VALUE TYPES
// ============================================================================

/// Row identifier. Every stored row carries an integer `id` column.
pub type RowId = i64;

/// A stored record: column name to scalar or decoded structured value.
pub type Row = Map<String, Value>;

/// Caller-supplied condition map: logical parameter name to value.
pub type Conditions = Map<String, Value>;

/// Name of the identifier column every table carries.
pub const ID_COLUMN: &str = "id";

/// Read the `id` column of a row as a [`RowId`].
///
/// Accepts integer values and integer strings, since some drivers hand back
/// numeric columns as text.
pub fn row_id(row: &Row) -> Option<RowId> {
    match row.get(ID_COLUMN)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Interpret a JSON payload as a list of records.
pub fn records_from_value(operation: &str, value: Value) -> VernierResult<Vec<Row>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(ArgumentShapeError::ExpectedRecordList {
                    operation: operation.to_string(),
                    got: format!("array containing {}", value_kind(&other)),
                }
                .into()),
            })
            .collect(),
        other => Err(ArgumentShapeError::ExpectedRecordList {
            operation: operation.to_string(),
            got: value_kind(&other).to_string(),
        }
        .into()),
    }
}

/// Short human name of a JSON value's kind, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Current write timestamp in unix seconds, as stamped into timestamp columns.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_id_reads_integer_and_text() {
        let row = json!({"id": 7}).as_object().cloned().unwrap();
        assert_eq!(row_id(&row), Some(7));

        let row = json!({"id": "42"}).as_object().cloned().unwrap();
        assert_eq!(row_id(&row), Some(42));

        let row = json!({"name": "x"}).as_object().cloned().unwrap();
        assert_eq!(row_id(&row), None);
    }

    #[test]
    fn test_records_from_value() {
        let rows = records_from_value("batch_create", json!([{"name": "a"}, {"name": "b"}]))
            .unwrap();
        assert_eq!(rows.len(), 2);

        let err = records_from_value("batch_create", json!({"name": "a"})).unwrap_err();
        assert!(matches!(
            err,
            VernierError::ArgumentShape(ArgumentShapeError::ExpectedRecordList { .. })
        ));

        let err = records_from_value("batch_create", json!([{"name": "a"}, 3])).unwrap_err();
        assert!(matches!(
            err,
            VernierError::ArgumentShape(ArgumentShapeError::ExpectedRecordList { .. })
        ));
    }
}
