//! Per-cache-item configuration

use serde::{Deserialize, Serialize};

/// Options recognised by a cache item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheItemOptions {
    /// Re-query read-only columns after every insert and update. Costs one
    /// extra round trip per write.
    pub refetch_read_only: bool,
    /// Table name to use instead of the one the entity declares.
    pub table_name: Option<String>,
}

impl CacheItemOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable read-only column refetch.
    pub fn with_refetch_read_only(mut self, enabled: bool) -> Self {
        self.refetch_read_only = enabled;
        self
    }

    /// Override the table name.
    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }
}
