//! rowcache Storage - Write-Through Table Cache
//!
//! [`CacheItem`] mirrors one table in memory and writes every change to the
//! database before the in-memory view moves. [`SyncCacheItem`] adds the
//! reader/writer lock for shared use and [`CacheEngine`] keeps one item per
//! entity type. [`PgConnector`] is the PostgreSQL backend.

pub mod engine;
pub mod gate;
pub mod item;
pub mod layout;
pub mod lookup;
pub mod postgres;
pub mod sync_item;

pub use engine::CacheEngine;
pub use gate::{LoadGate, LoadPermit};
pub use item::{CacheItem, CacheStats, LoadFilter};
pub use layout::TableLayout;
pub use lookup::{Dictionary, Index};
pub use postgres::{translate, DbConfig, PgConnection, PgConnector};
pub use sync_item::SyncCacheItem;
