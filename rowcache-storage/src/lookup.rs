//! Secondary lookup structures over a cache item's collection.
//!
//! An [`Index`] maps a column value to every entity carrying it; a
//! [`Dictionary`] maps it to the first entity seen with it. Both key on the
//! entity's current (committed) value and compare entries by identity.

use rowcache_core::{Entity, EntityRef, IndexKey, SqlValue};
use std::collections::HashMap;
use std::sync::Arc;

fn key_of<T: Entity>(column: &str, record: &EntityRef<T>) -> IndexKey {
    IndexKey::from(record.get(column).unwrap_or(SqlValue::Null))
}

// ============================================================================
// INDEX
// ============================================================================

#[derive(Debug)]
pub struct Index<T> {
    column: String,
    entries: HashMap<IndexKey, Vec<EntityRef<T>>>,
}

impl<T: Entity> Index<T> {
    pub fn build(column: impl Into<String>, entities: &[EntityRef<T>]) -> Self {
        let mut index = Self {
            column: column.into(),
            entries: HashMap::new(),
        };
        for record in entities {
            index.insert(record);
        }
        index
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn insert(&mut self, record: &EntityRef<T>) {
        let key = key_of(&self.column, record);
        self.entries.entry(key).or_default().push(Arc::clone(record));
    }

    /// Remove `record` from the bucket of its current value.
    pub fn remove(&mut self, record: &EntityRef<T>) {
        let key = key_of(&self.column, record);
        if let Some(bucket) = self.entries.get_mut(&key) {
            bucket.retain(|r| !Arc::ptr_eq(r, record));
            if bucket.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    pub fn find(&self, key: &IndexKey) -> Vec<EntityRef<T>> {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_map(&self) -> HashMap<IndexKey, Vec<EntityRef<T>>> {
        self.entries.clone()
    }
}

// ============================================================================
// DICTIONARY
// ============================================================================

#[derive(Debug)]
pub struct Dictionary<T> {
    column: String,
    entries: HashMap<IndexKey, EntityRef<T>>,
}

impl<T: Entity> Dictionary<T> {
    /// Later duplicates of a key are dropped.
    pub fn build(column: impl Into<String>, entities: &[EntityRef<T>]) -> Self {
        let mut dictionary = Self {
            column: column.into(),
            entries: HashMap::new(),
        };
        for record in entities {
            dictionary.insert(record);
        }
        dictionary
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Insert unless the key is already taken.
    pub fn insert(&mut self, record: &EntityRef<T>) {
        let key = key_of(&self.column, record);
        self.entries
            .entry(key)
            .or_insert_with(|| Arc::clone(record));
    }

    /// Remove the entry for the record's current value if it is this record.
    pub fn remove(&mut self, record: &EntityRef<T>) {
        let key = key_of(&self.column, record);
        if self
            .entries
            .get(&key)
            .is_some_and(|stored| Arc::ptr_eq(stored, record))
        {
            self.entries.remove(&key);
        }
    }

    pub fn find(&self, key: &IndexKey) -> Option<EntityRef<T>> {
        self.entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_map(&self) -> HashMap<IndexKey, EntityRef<T>> {
        self.entries.clone()
    }
}
