//! Error types for VERNIER operations

use crate::RowId;
use thiserror::Error;

/// Caller input rejected before any statement reaches the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Order by field `{field}` is not allowed, expected one of: {allowed}")]
    UnknownOrderField { field: String, allowed: String },

    #[error("Order by direction must be ASC or DESC, got `{direction}`")]
    InvalidOrderDirection { direction: String },

    #[error("Paging requires both start and limit")]
    IncompletePaging,

    #[error("Paging {name} must be a non-negative integer, got `{value}`")]
    InvalidPagingValue { name: String, value: String },

    #[error("Condition `{param}` is an IN list and requires an array value")]
    InListRequiresArray { param: String },

    #[error("Condition `{param}` has a non-scalar value")]
    NonScalarCondition { param: String },

    #[error("Invalid field name `{name}`")]
    InvalidFieldName { name: String },

    #[error("Wave delta for `{field}` must be numeric")]
    NonNumericDelta { field: String },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Write failed on {table}: {reason}")]
    WriteFailure { table: String, reason: String },

    #[error("Row not found in {table} with id {id}")]
    NotFound { table: String, id: RowId },

    #[error("Query failed: {reason}")]
    Query { reason: String },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Payload shape errors for record-taking operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArgumentShapeError {
    #[error("{operation} requires a list of records, got {got}")]
    ExpectedRecordList { operation: String, got: String },

    #[error("{operation} requires at least one field")]
    EmptyRecord { operation: String },

    #[error("{operation} got {ids} identifiers but {rows} rows")]
    LengthMismatch {
        operation: String,
        ids: usize,
        rows: usize,
    },

    #[error("{operation} row {index} has columns {got:?}, expected {expected:?}")]
    ColumnMismatch {
        operation: String,
        index: usize,
        expected: Vec<String>,
        got: Vec<String>,
    },
}

/// Field codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unknown codec: {codec}")]
    UnknownCodec { codec: String },

    #[error("Codec {codec} cannot encode value: {reason}")]
    Encode { codec: String, reason: String },

    #[error("Codec {codec} cannot decode value: {reason}")]
    Decode { codec: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid condition template `{template}`")]
    InvalidConditionTemplate { template: String },

    #[error("Unknown codec `{codec}` declared for field {field}")]
    UnknownCodec { field: String, codec: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Cache backend errors. Never surfaced by the proxy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheBackendError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Invalid cache key `{key}`")]
    InvalidKey { key: String },

    #[error("Cache value serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Master error type for all VERNIER errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VernierError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Argument shape error: {0}")]
    ArgumentShape(#[from] ArgumentShapeError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache backend error: {0}")]
    Cache(#[from] CacheBackendError),
}

/// Result type alias for VERNIER operations.
pub type VernierResult<T> = Result<T, VernierError>;

// =============================================================================
// TESTS
// =============================================================================
