//! Error types for rowcache operations

use crate::FieldType;
use thiserror::Error;

/// Configuration errors. Raised while registering an entity type or when a
/// caller names a column the table does not have.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Cannot deduce a table name for entity {entity}")]
    UndeducibleTableName { entity: String },

    #[error("Entity {entity} declares no writable columns")]
    NoWritableColumns { entity: String },

    #[error("Entity {entity} declares more than one auto-generated column: {columns:?}")]
    MultipleAutoGenerated { entity: String, columns: Vec<String> },

    #[error("Column {column} does not exist in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Table {table} has no columns that an update can write")]
    NoUpdatableColumns { table: String },
}

/// Load-guard and structure collisions. The caller may retry later.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConcurrencyError {
    #[error("A load, reload or unload of table {table} is already in progress")]
    LoadInProgress { table: String },

    #[error("Table {table} is already loaded")]
    AlreadyLoaded { table: String },

    #[error("A cache for entity {entity} was already created")]
    CacheAlreadyCreated { entity: String },

    #[error("Index {column} already exists on table {table}")]
    IndexExists { table: String, column: String },

    #[error("Dictionary {column} already exists on table {table}")]
    DictionaryExists { table: String, column: String },
}

/// The database and the cache disagree. Always fatal to the call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("{operation} on table {table} affected {actual} rows, expected exactly 1")]
    UnexpectedRowCount {
        table: String,
        operation: &'static str,
        actual: u64,
    },

    #[error("Data are inconsistent: table {table} returned identity {value} for column {column}")]
    InvalidIdentity {
        table: String,
        column: String,
        value: String,
    },

    #[error("Read-only refetch on table {table} returned {rows} rows, expected exactly 1")]
    RefetchRowCount { table: String, rows: usize },

    #[error("Row from table {table} is missing column {column}")]
    MissingColumn { table: String, column: String },
}

/// Predicate compilation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("Unsupported expression: {node}")]
    UnsupportedExpression { node: String },

    #[error("Entity {entity} has no field {field}")]
    UnknownField { entity: String, field: String },

    #[error("Relation predicate joins entity {entity} with itself")]
    AmbiguousRelation { entity: String },
}

/// Calls that the current state of the cache item does not allow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("Table {table} has no key columns and is read-only")]
    ReadOnlyMode { table: String },

    #[error("Entity is not managed by the cache of table {table}")]
    NotManaged { table: String },

    #[error("Index {column} does not exist on table {table}")]
    IndexNotFound { table: String, column: String },

    #[error("Dictionary {column} does not exist on table {table}")]
    DictionaryNotFound { table: String, column: String },
}

/// Value conversion errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("Expected a {expected:?} value, found {found}")]
    TypeMismatch {
        expected: FieldType,
        found: &'static str,
    },

    #[error("Null is not allowed for a {expected:?} value")]
    UnexpectedNull { expected: FieldType },

    #[error("Entity {entity} has no field {field}")]
    UnknownField { entity: String, field: String },

    #[error("Value {value} does not fit the target type: {reason}")]
    OutOfRange { value: String, reason: String },
}

/// Driver or pool failures. The SQL is kept so the failure can be diagnosed
/// without re-deriving the statement.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Database error: {reason} (sql: {sql})")]
pub struct DatabaseError {
    pub sql: String,
    pub reason: String,
}

impl DatabaseError {
    pub fn new(sql: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            reason: reason.into(),
        }
    }

    /// Failure that happened before any statement was sent.
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::new("", reason)
    }
}

/// Master error type for all rowcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Concurrency error: {0}")]
    Concurrency(#[from] ConcurrencyError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Result type alias for rowcache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
