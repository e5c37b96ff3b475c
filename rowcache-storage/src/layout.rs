//! Column classification and statement building for one table.

use rowcache_core::{
    CacheItemOptions, ColumnDef, ConfigError, Entity, EntityRecord, EntitySchema, Parameters,
    SqlValue, Statement,
};
use rowcache_query::WherePart;

/// Hands out `@p1`, `@p2`, ... while a statement is being written.
struct ParamSink {
    parameters: Parameters,
}

impl ParamSink {
    fn new() -> Self {
        Self {
            parameters: Parameters::new(),
        }
    }

    fn push(&mut self, value: SqlValue) -> String {
        let name = format!("p{}", self.parameters.len() + 1);
        let placeholder = format!("@{}", name);
        self.parameters.insert(name, value);
        placeholder
    }
}

/// Resolved table name and column roles, fixed when a cache item is built.
#[derive(Debug, Clone)]
pub struct TableLayout {
    entity: String,
    table: String,
    columns: Vec<ColumnDef>,
}

impl TableLayout {
    pub fn new(schema: &EntitySchema, options: &CacheItemOptions) -> Result<Self, ConfigError> {
        let table = options
            .table_name
            .as_deref()
            .or(schema.table())
            .unwrap_or(schema.entity())
            .trim()
            .to_string();
        if table.is_empty() {
            return Err(ConfigError::UndeducibleTableName {
                entity: schema.entity().to_string(),
            });
        }

        if schema.columns().iter().all(|c| c.read_only) {
            return Err(ConfigError::NoWritableColumns {
                entity: schema.entity().to_string(),
            });
        }

        let auto: Vec<String> = schema
            .columns()
            .iter()
            .filter(|c| c.auto_generated)
            .map(|c| c.name.clone())
            .collect();
        if auto.len() > 1 {
            return Err(ConfigError::MultipleAutoGenerated {
                entity: schema.entity().to_string(),
                columns: auto,
            });
        }

        Ok(Self {
            entity: schema.entity().to_string(),
            table,
            columns: schema.columns().to_vec(),
        })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.key)
    }

    pub fn auto_column(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.auto_generated)
    }

    pub fn read_only_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.read_only)
    }

    /// Columns written by INSERT.
    pub fn insert_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(|c| !c.auto_generated && !c.read_only)
    }

    /// Columns written by UPDATE.
    pub fn update_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(|c| !c.key && !c.auto_generated && !c.read_only)
    }

    /// No key columns: the table can be loaded but never written.
    pub fn is_read_only(&self) -> bool {
        self.key_columns().next().is_none()
    }

    pub fn require_column(&self, column: &str) -> Result<&ColumnDef, ConfigError> {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .ok_or_else(|| ConfigError::UnknownColumn {
                table: self.table.clone(),
                column: column.to_string(),
            })
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    pub fn select_all(&self) -> Statement {
        Statement::new(format!("SELECT * FROM [{}]", self.table))
    }

    pub fn select_where(&self, part: &WherePart) -> Statement {
        Statement::with_parameters(
            format!("SELECT * FROM [{}] WHERE {}", self.table, part.sql),
            part.parameters.clone(),
        )
    }

    /// `INSERT` binding the entity's values for every insertable column.
    pub fn insert_statement<T: Entity>(&self, entity: &T) -> Statement {
        let mut sink = ParamSink::new();
        let mut names = Vec::new();
        let mut placeholders = Vec::new();
        for column in self.insert_columns() {
            names.push(format!("[{}]", column.name));
            placeholders.push(sink.push(entity.get(&column.name).unwrap_or_default()));
        }
        Statement::with_parameters(
            format!(
                "INSERT INTO [{}] ({}) VALUES ({})",
                self.table,
                names.join(", "),
                placeholders.join(", ")
            ),
            sink.parameters,
        )
    }

    /// `UPDATE` setting the staged values of the updatable columns, filtered
    /// by the current key values.
    pub fn update_statement<T: Entity>(
        &self,
        staged: &T,
        current: &T,
    ) -> Result<Statement, ConfigError> {
        let mut sink = ParamSink::new();
        let assignments: Vec<String> = self
            .update_columns()
            .map(|c| {
                let value = staged.get(&c.name).unwrap_or_default();
                format!("[{}] = {}", c.name, sink.push(value))
            })
            .collect();
        if assignments.is_empty() {
            return Err(ConfigError::NoUpdatableColumns {
                table: self.table.clone(),
            });
        }
        let filter = self.key_filter(current, &mut sink);
        Ok(Statement::with_parameters(
            format!(
                "UPDATE [{}] SET {} WHERE {}",
                self.table,
                assignments.join(", "),
                filter
            ),
            sink.parameters,
        ))
    }

    /// `DELETE` filtered by current key values.
    pub fn delete_statement<T: Entity>(&self, record: &EntityRecord<T>) -> Statement {
        let mut sink = ParamSink::new();
        let filter = record.read(|current| self.key_filter(current, &mut sink));
        Statement::with_parameters(
            format!("DELETE FROM [{}] WHERE {}", self.table, filter),
            sink.parameters,
        )
    }

    /// `SELECT` of the read-only columns for the row identified by `keys`.
    /// `None` when the table has no read-only columns.
    pub fn refetch_statement<T: Entity>(&self, keys: &T) -> Option<Statement> {
        let names: Vec<String> = self
            .read_only_columns()
            .map(|c| format!("[{}]", c.name))
            .collect();
        if names.is_empty() {
            return None;
        }
        let mut sink = ParamSink::new();
        let filter = self.key_filter(keys, &mut sink);
        Some(Statement::with_parameters(
            format!(
                "SELECT {} FROM [{}] WHERE {}",
                names.join(", "),
                self.table,
                filter
            ),
            sink.parameters,
        ))
    }

    fn key_filter<T: Entity>(&self, source: &T, sink: &mut ParamSink) -> String {
        self.key_columns()
            .map(|c| {
                let value = source.get(&c.name).unwrap_or_default();
                format!("[{}] = {}", c.name, sink.push(value))
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}
