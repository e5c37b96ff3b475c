//! Static entity descriptors
//!
//! Every cached entity type supplies one [`EntitySchema`], built once and kept
//! for the life of the process. The schema is the capability table the cache
//! engine and the predicate compiler consult: table name, ordered field list
//! and each field's role (key, auto-generated, read-only).

use crate::error::ValueError;
use crate::value::{FieldType, SqlValue};

/// One declared field of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub field_type: FieldType,
    /// Part of the row identity.
    pub key: bool,
    /// Assigned by the server on insert.
    pub auto_generated: bool,
    /// Computed by the server; never written by the cache.
    pub read_only: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            key: false,
            auto_generated: false,
            read_only: false,
        }
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn auto_generated(mut self) -> Self {
        self.auto_generated = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Neither key, auto-generated nor read-only.
    pub fn is_plain(&self) -> bool {
        !self.key && !self.auto_generated && !self.read_only
    }
}

/// Descriptor for an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    entity: String,
    table: Option<String>,
    columns: Vec<ColumnDef>,
}

impl EntitySchema {
    pub fn builder(entity: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            schema: EntitySchema {
                entity: entity.into(),
                table: None,
                columns: Vec::new(),
            },
        }
    }

    /// Name of the entity type. Used to qualify columns in relation predicates.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Declared table name, if any. When absent the entity name is used.
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.key)
    }
}

/// Builder returned by [`EntitySchema::builder`].
#[derive(Debug, Clone)]
pub struct EntitySchemaBuilder {
    schema: EntitySchema,
}

impl EntitySchemaBuilder {
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.schema.table = Some(table.into());
        self
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.schema.columns.push(column);
        self
    }

    pub fn build(self) -> EntitySchema {
        self.schema
    }
}

/// A row type that can be held by a cache item.
///
/// Implementations expose their fields by column name so the engine can move
/// values between rows, statements and the shadow slots of a record.
pub trait Entity: Clone + Default + Send + Sync + 'static {
    fn schema() -> &'static EntitySchema;

    /// Read a field. `None` when the entity has no such field.
    fn get(&self, column: &str) -> Option<SqlValue>;

    /// Write a field, decoding the value into the field's Rust type.
    fn set(&mut self, column: &str, value: SqlValue) -> Result<(), ValueError>;
}

/// Error for a column name an [`Entity`] implementation does not recognise.
pub fn unknown_field<E: Entity>(column: &str) -> ValueError {
    ValueError::UnknownField {
        entity: E::schema().entity().to_string(),
        field: column.to_string(),
    }
}
