//! rowcache Core - Values, Schemas and Shadow State
//!
//! Data types shared by every other crate: typed column values, the static
//! entity descriptor, the current/pending record wrapper, the database
//! boundary traits and the error taxonomy.

pub mod db;
pub mod error;
pub mod options;
pub mod record;
pub mod schema;
pub mod value;

pub use db::{driver_error, Connection, Connector, Parameters, Row, Statement};
pub use error::{
    CacheError, CacheResult, ConcurrencyError, ConfigError, DatabaseError, ExpressionError,
    IntegrityError, UsageError, ValueError,
};
pub use options::CacheItemOptions;
pub use record::{EntityRecord, EntityRef, OwnerId};
pub use schema::{unknown_field, ColumnDef, Entity, EntitySchema, EntitySchemaBuilder};
pub use value::{FieldType, FromSqlValue, IndexKey, SqlValue};
