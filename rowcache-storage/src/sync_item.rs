//! Reader/writer discipline around a [`CacheItem`].
//!
//! Writes to the collection and to its lookup structures take the write
//! lock; lookups and snapshots take the read lock. Load, reload and unload
//! are NOT covered by this lock: they are only serialised against each other
//! by the item's load gate, so a reader running during a reload may see the
//! collection before or after it was swapped.

use crate::item::{CacheItem, CacheStats, LoadFilter};
use rowcache_core::{CacheItemOptions, CacheResult, Connector, Entity, EntityRef, IndexKey, SqlValue};
use rowcache_query::Expr;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A [`CacheItem`] safe to share between concurrent tasks.
#[derive(Debug)]
pub struct SyncCacheItem<T: Entity> {
    item: CacheItem<T>,
    lock: RwLock<()>,
}

impl<T: Entity> SyncCacheItem<T> {
    pub fn new(connector: Arc<dyn Connector>, options: CacheItemOptions) -> CacheResult<Self> {
        Ok(Self::wrap(CacheItem::new(connector, options)?))
    }

    pub fn wrap(item: CacheItem<T>) -> Self {
        Self {
            item,
            lock: RwLock::new(()),
        }
    }

    /// The wrapped item, bypassing the lock.
    pub fn inner(&self) -> &CacheItem<T> {
        &self.item
    }

    pub fn table(&self) -> &str {
        self.item.table()
    }

    pub fn is_loaded(&self) -> bool {
        self.item.is_loaded()
    }

    pub fn is_loading(&self) -> bool {
        self.item.is_loading()
    }

    pub fn load_filter(&self) -> Option<LoadFilter> {
        self.item.load_filter()
    }

    // ========================================================================
    // LOADING (load gate only)
    // ========================================================================

    pub async fn load_all(&self) -> CacheResult<()> {
        self.item.load_all().await
    }

    pub async fn load_where(&self, predicate: &Expr) -> CacheResult<()> {
        self.item.load_where(predicate).await
    }

    /// Relation load against a snapshot of `other` taken under its read lock.
    pub async fn load_related_with<R: Entity>(
        &self,
        other: &SyncCacheItem<R>,
        predicate: &Expr,
    ) -> CacheResult<()> {
        let related: Vec<R> = other.entities().await.iter().map(|r| r.current()).collect();
        self.item.load_related_values(&related, predicate).await
    }

    pub async fn reload(&self) -> CacheResult<()> {
        self.item.reload().await
    }

    pub fn unload(&self) -> CacheResult<()> {
        self.item.unload()
    }

    // ========================================================================
    // WRITE LOCK
    // ========================================================================

    pub async fn insert(&self, entity: &T) -> CacheResult<EntityRef<T>> {
        let _guard = self.lock.write().await;
        self.item.insert(entity).await
    }

    pub async fn update(&self, record: &EntityRef<T>) -> CacheResult<()> {
        let _guard = self.lock.write().await;
        self.item.update(record).await
    }

    pub async fn delete(&self, record: &EntityRef<T>) -> CacheResult<()> {
        let _guard = self.lock.write().await;
        self.item.delete(record).await
    }

    pub async fn build_index(&self, column: &str) -> CacheResult<()> {
        let _guard = self.lock.write().await;
        self.item.build_index(column)
    }

    pub async fn build_dictionary(&self, column: &str) -> CacheResult<()> {
        let _guard = self.lock.write().await;
        self.item.build_dictionary(column)
    }

    // ========================================================================
    // READ LOCK
    // ========================================================================

    pub async fn find_in_index(
        &self,
        column: &str,
        value: impl Into<SqlValue>,
    ) -> CacheResult<Vec<EntityRef<T>>> {
        let _guard = self.lock.read().await;
        self.item.find_in_index(column, value)
    }

    pub async fn find_in_dictionary(
        &self,
        column: &str,
        value: impl Into<SqlValue>,
    ) -> CacheResult<Option<EntityRef<T>>> {
        let _guard = self.lock.read().await;
        self.item.find_in_dictionary(column, value)
    }

    pub async fn entities(&self) -> Vec<EntityRef<T>> {
        let _guard = self.lock.read().await;
        self.item.entities()
    }

    pub async fn len(&self) -> usize {
        let _guard = self.lock.read().await;
        self.item.len()
    }

    pub async fn is_empty(&self) -> bool {
        let _guard = self.lock.read().await;
        self.item.is_empty()
    }

    pub async fn get_index(&self, column: &str) -> CacheResult<HashMap<IndexKey, Vec<EntityRef<T>>>> {
        let _guard = self.lock.read().await;
        self.item.get_index(column)
    }

    pub async fn get_dictionary(&self, column: &str) -> CacheResult<HashMap<IndexKey, EntityRef<T>>> {
        let _guard = self.lock.read().await;
        self.item.get_dictionary(column)
    }

    pub async fn index_names(&self) -> Vec<String> {
        let _guard = self.lock.read().await;
        self.item.index_names()
    }

    pub async fn dictionary_names(&self) -> Vec<String> {
        let _guard = self.lock.read().await;
        self.item.dictionary_names()
    }

    pub async fn stats(&self) -> CacheStats {
        let _guard = self.lock.read().await;
        self.item.stats()
    }
}
