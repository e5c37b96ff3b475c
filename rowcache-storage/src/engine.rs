//! Registry of cache items, one per entity type.

use crate::sync_item::SyncCacheItem;
use parking_lot::RwLock;
use rowcache_core::{CacheItemOptions, CacheResult, ConcurrencyError, Connector, Entity};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

struct Registration {
    entity: &'static str,
    handle: Arc<dyn Any + Send + Sync>,
}

/// Owns the cache items created against one connector.
///
/// Handles are typed by the caller's generic parameter, so lookups never
/// need to inspect the stored value beyond a downcast keyed by `TypeId`.
pub struct CacheEngine {
    connector: Arc<dyn Connector>,
    items: RwLock<HashMap<TypeId, Registration>>,
}

impl CacheEngine {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// Create the cache item for `T`. A second call for the same type fails.
    pub fn create_cache<T: Entity>(
        &self,
        options: CacheItemOptions,
    ) -> CacheResult<Arc<SyncCacheItem<T>>> {
        let mut items = self.items.write();
        if items.contains_key(&TypeId::of::<T>()) {
            return Err(ConcurrencyError::CacheAlreadyCreated {
                entity: T::schema().entity().to_string(),
            }
            .into());
        }
        let item = Arc::new(SyncCacheItem::<T>::new(Arc::clone(&self.connector), options)?);
        items.insert(
            TypeId::of::<T>(),
            Registration {
                entity: std::any::type_name::<T>(),
                handle: item.clone(),
            },
        );
        tracing::debug!(entity = T::schema().entity(), table = item.table(), "cache registered");
        Ok(item)
    }

    pub fn cache<T: Entity>(&self) -> Option<Arc<SyncCacheItem<T>>> {
        self.items
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|r| Arc::clone(&r.handle).downcast::<SyncCacheItem<T>>().ok())
    }

    /// Unregister the item for `T`. Handles already given out stay usable.
    pub fn remove_cache<T: Entity>(&self) -> Option<Arc<SyncCacheItem<T>>> {
        self.items
            .write()
            .remove(&TypeId::of::<T>())
            .and_then(|r| r.handle.downcast::<SyncCacheItem<T>>().ok())
    }

    pub fn contains<T: Entity>(&self) -> bool {
        self.items.read().contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Rust type names of the registered entities, sorted.
    pub fn registered(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.items.read().values().map(|r| r.entity).collect();
        names.sort_unstable();
        names
    }
}
