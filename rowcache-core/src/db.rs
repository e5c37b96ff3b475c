//! Database boundary
//!
//! Statements are produced in a neutral dialect: identifiers are
//! bracket-quoted (`[Name]`) and parameters are named `@p1`, `@p2`, ...
//! A [`Connector`] implementation translates that dialect for its driver.

use crate::error::{CacheResult, DatabaseError};
use crate::value::SqlValue;
use async_trait::async_trait;
use indexmap::IndexMap;

/// Ordered parameter map, keyed by name without the `@` prefix.
pub type Parameters = IndexMap<String, SqlValue>;

/// A parameterised SQL command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub sql: String,
    pub parameters: Parameters,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameters(sql: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// One result row: column name to value, in select-list order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: IndexMap<String, SqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Opens connections. One connection is opened per database-touching call
/// and released when it is dropped.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> CacheResult<Box<dyn Connection>>;
}

/// An open session against the database.
#[async_trait]
pub trait Connection: Send {
    /// Run a query and return every row.
    async fn query(&mut self, statement: &Statement) -> CacheResult<Vec<Row>>;

    /// Run a command and return the number of affected rows.
    async fn execute(&mut self, statement: &Statement) -> CacheResult<u64>;

    /// Run an INSERT and return the value the server assigned to
    /// `identity_column`, if it reported one.
    async fn insert_returning(
        &mut self,
        statement: &Statement,
        identity_column: &str,
    ) -> CacheResult<Option<SqlValue>>;
}

/// Helper for connector implementations wrapping driver errors.
pub fn driver_error(statement: &Statement, err: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::new(statement.sql.clone(), err.to_string())
}
