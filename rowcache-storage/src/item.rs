//! Cache Engine for a single table
//!
//! A [`CacheItem`] owns the managed entities of one table together with the
//! indexes and dictionaries declared over them. Every write goes to the
//! database first; in-memory structures change only after the database step
//! succeeded, and entity values become visible only through an explicit
//! commit of the record's pending state.
//!
//! # Load lifecycle
//!
//! `Unloaded -> Loaded` through one of the load calls, `Loaded -> Loaded`
//! through [`CacheItem::reload`] and back to `Unloaded` through
//! [`CacheItem::unload`]. These calls are single-flight: a second caller
//! gets [`ConcurrencyError::LoadInProgress`] immediately instead of waiting.

use crate::gate::{LoadGate, LoadPermit};
use crate::layout::TableLayout;
use crate::lookup::{Dictionary, Index};
use parking_lot::RwLock;
use rowcache_core::{
    CacheError, CacheItemOptions, CacheResult, ConcurrencyError, Connection, Connector, Entity,
    EntityRecord, EntityRef, IndexKey, IntegrityError, OwnerId, Row, SqlValue, Statement,
    UsageError,
};
use rowcache_query::{compile, fetch_all, load_related, Expr, WherePart};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// LOAD STATE
// ============================================================================

/// What a loaded item was loaded with, replayed by [`CacheItem::reload`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoadFilter {
    /// A compiled single-entity predicate.
    Predicate(WherePart),
    /// The resolved per-row statements of a relation load.
    Relation(Vec<Statement>),
}

#[derive(Debug, Clone, Default)]
enum LoadState {
    #[default]
    Unloaded,
    Loaded(Option<LoadFilter>),
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Snapshot of a cache item's size and lookup counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Number of entities in the collection.
    pub entity_count: usize,
    /// Number of declared indexes.
    pub index_count: usize,
    /// Number of declared dictionaries.
    pub dictionary_count: usize,
    /// Index/dictionary lookups that found something.
    pub hits: u64,
    /// Index/dictionary lookups that found nothing.
    pub misses: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

struct Store<T> {
    entities: Vec<EntityRef<T>>,
    indexes: BTreeMap<String, Index<T>>,
    dictionaries: BTreeMap<String, Dictionary<T>>,
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            indexes: BTreeMap::new(),
            dictionaries: BTreeMap::new(),
        }
    }
}

impl<T: Entity> Store<T> {
    fn index_record(&mut self, record: &EntityRef<T>) {
        for index in self.indexes.values_mut() {
            index.insert(record);
        }
        for dictionary in self.dictionaries.values_mut() {
            dictionary.insert(record);
        }
    }

    fn unindex_record(&mut self, record: &EntityRef<T>) {
        for index in self.indexes.values_mut() {
            index.remove(record);
        }
        for dictionary in self.dictionaries.values_mut() {
            dictionary.remove(record);
        }
    }

    /// Repopulate every declared structure from the current collection.
    fn rebuild(&mut self) {
        let entities = &self.entities;
        for index in self.indexes.values_mut() {
            let column = index.column().to_string();
            *index = Index::build(column, entities);
        }
        for dictionary in self.dictionaries.values_mut() {
            let column = dictionary.column().to_string();
            *dictionary = Dictionary::build(column, entities);
        }
    }

    fn release_all(&mut self) -> usize {
        let count = self.entities.len();
        for record in self.entities.drain(..) {
            record.release();
        }
        count
    }
}

// ============================================================================
// CACHE ITEM
// ============================================================================

/// In-memory mirror of one table.
pub struct CacheItem<T: Entity> {
    owner: OwnerId,
    layout: TableLayout,
    options: CacheItemOptions,
    connector: Arc<dyn Connector>,
    gate: LoadGate,
    state: RwLock<LoadState>,
    store: RwLock<Store<T>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Entity> fmt::Debug for CacheItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheItem")
            .field("entity", &self.layout.entity())
            .field("table", &self.layout.table())
            .field("loaded", &self.is_loaded())
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Entity> CacheItem<T> {
    /// Classify the entity's columns and resolve the table name. Fails on a
    /// schema the engine cannot work with; no database call is made.
    pub fn new(connector: Arc<dyn Connector>, options: CacheItemOptions) -> CacheResult<Self> {
        let layout = TableLayout::new(T::schema(), &options)?;
        tracing::debug!(
            entity = layout.entity(),
            table = layout.table(),
            read_only = layout.is_read_only(),
            "cache item created"
        );
        Ok(Self {
            owner: OwnerId::next(),
            layout,
            options,
            connector,
            gate: LoadGate::new(),
            state: RwLock::new(LoadState::Unloaded),
            store: RwLock::new(Store::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn table(&self) -> &str {
        self.layout.table()
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    pub fn options(&self) -> &CacheItemOptions {
        &self.options
    }

    /// Identity stamped on every record this item manages.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// True when the item has no key columns and rejects every write.
    pub fn is_read_only(&self) -> bool {
        self.layout.is_read_only()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.read(), LoadState::Loaded(_))
    }

    /// True while a load, reload or unload is in flight.
    pub fn is_loading(&self) -> bool {
        self.gate.is_busy()
    }

    /// Filter the item was loaded with. `None` when unloaded or fully loaded.
    pub fn load_filter(&self) -> Option<LoadFilter> {
        match &*self.state.read() {
            LoadState::Loaded(filter) => filter.clone(),
            LoadState::Unloaded => None,
        }
    }

    /// Snapshot of the collection in load/insert order.
    pub fn entities(&self) -> Vec<EntityRef<T>> {
        self.store.read().entities.clone()
    }

    pub fn len(&self) -> usize {
        self.store.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().entities.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.store.read();
        CacheStats {
            entity_count: store.entities.len(),
            index_count: store.indexes.len(),
            dictionary_count: store.dictionaries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // LOADING
    // ========================================================================

    /// Load every row of the table.
    pub async fn load_all(&self) -> CacheResult<()> {
        let _permit = self.begin_load()?;
        let records = self.fetch_records(&self.layout.select_all()).await?;
        let count = self.install(records, None);
        tracing::info!(table = self.table(), rows = count, "loaded all rows");
        Ok(())
    }

    /// Load the rows matching `predicate`, remembering it for reloads.
    pub async fn load_where(&self, predicate: &Expr) -> CacheResult<()> {
        let _permit = self.begin_load()?;
        let part = compile::<T>(predicate)?;
        let records = self
            .fetch_records(&self.layout.select_where(&part))
            .await?;
        let count = self.install(records, Some(LoadFilter::Predicate(part)));
        tracing::info!(table = self.table(), rows = count, "loaded filtered rows");
        Ok(())
    }

    /// Load the rows matching `predicate` for at least one entity currently
    /// held by `other`. Rows matching several related entities appear once
    /// per match.
    pub async fn load_related_with<R: Entity>(
        &self,
        other: &CacheItem<R>,
        predicate: &Expr,
    ) -> CacheResult<()> {
        let related: Vec<R> = other.entities().iter().map(|r| r.current()).collect();
        self.load_related_values(&related, predicate).await
    }

    /// Relation load against an explicit related collection.
    pub async fn load_related_values<R: Entity>(
        &self,
        related: &[R],
        predicate: &Expr,
    ) -> CacheResult<()> {
        let _permit = self.begin_load()?;
        let (rows, statements) =
            load_related::<T, R>(self.connector.as_ref(), self.table(), predicate, related)
                .await
                .map_err(|e| self.failed(e))?;
        let records = self.materialize(&rows)?;
        let count = self.install(records, Some(LoadFilter::Relation(statements)));
        tracing::info!(
            table = self.table(),
            related = related.len(),
            rows = count,
            "loaded related rows"
        );
        Ok(())
    }

    /// Re-run the remembered load and replace the collection. Declared
    /// indexes and dictionaries keep their names and are rebuilt from the
    /// fresh entities. From the unloaded state this is a full load.
    pub async fn reload(&self) -> CacheResult<()> {
        let _permit = self.acquire_gate()?;
        let filter = self.load_filter();
        let records = match &filter {
            None => self.fetch_records(&self.layout.select_all()).await?,
            Some(LoadFilter::Predicate(part)) => {
                self.fetch_records(&self.layout.select_where(part)).await?
            }
            Some(LoadFilter::Relation(statements)) => {
                let rows = fetch_all(self.connector.as_ref(), statements)
                    .await
                    .map_err(|e| self.failed(e))?;
                self.materialize(&rows)?
            }
        };

        let count = records.len();
        let released = {
            let mut store = self.store.write();
            let released = store.release_all();
            store.entities = records;
            store.rebuild();
            released
        };
        *self.state.write() = LoadState::Loaded(filter);
        tracing::info!(
            table = self.table(),
            rows = count,
            released = released,
            "reloaded"
        );
        Ok(())
    }

    /// Drop every entity and every index/dictionary declaration.
    pub fn unload(&self) -> CacheResult<()> {
        let _permit = self.acquire_gate()?;
        let released = {
            let mut store = self.store.write();
            store.indexes.clear();
            store.dictionaries.clear();
            store.release_all()
        };
        *self.state.write() = LoadState::Unloaded;
        tracing::info!(table = self.table(), released = released, "unloaded");
        Ok(())
    }

    // ========================================================================
    // INDEXES AND DICTIONARIES
    // ========================================================================

    pub fn build_index(&self, column: &str) -> CacheResult<()> {
        self.layout.require_column(column)?;
        let mut store = self.store.write();
        if store.indexes.contains_key(column) {
            return Err(ConcurrencyError::IndexExists {
                table: self.table().to_string(),
                column: column.to_string(),
            }
            .into());
        }
        let index = Index::build(column, &store.entities);
        tracing::debug!(table = self.table(), column, keys = index.len(), "index built");
        store.indexes.insert(column.to_string(), index);
        Ok(())
    }

    /// Build a unique lookup over `column`. When several entities share a
    /// value only the first one is kept.
    pub fn build_dictionary(&self, column: &str) -> CacheResult<()> {
        self.layout.require_column(column)?;
        let mut store = self.store.write();
        if store.dictionaries.contains_key(column) {
            return Err(ConcurrencyError::DictionaryExists {
                table: self.table().to_string(),
                column: column.to_string(),
            }
            .into());
        }
        let dictionary = Dictionary::build(column, &store.entities);
        let dropped = store.entities.len().saturating_sub(dictionary.len());
        tracing::debug!(
            table = self.table(),
            column,
            keys = dictionary.len(),
            dropped,
            "dictionary built"
        );
        store.dictionaries.insert(column.to_string(), dictionary);
        Ok(())
    }

    pub fn find_in_index(
        &self,
        column: &str,
        value: impl Into<SqlValue>,
    ) -> CacheResult<Vec<EntityRef<T>>> {
        let key = self.lookup_key(column, value.into());
        let store = self.store.read();
        let index = store
            .indexes
            .get(column)
            .ok_or_else(|| self.index_not_found(column))?;
        let found = index.find(&key);
        self.record_lookup(!found.is_empty());
        Ok(found)
    }

    pub fn find_in_dictionary(
        &self,
        column: &str,
        value: impl Into<SqlValue>,
    ) -> CacheResult<Option<EntityRef<T>>> {
        let key = self.lookup_key(column, value.into());
        let store = self.store.read();
        let dictionary = store
            .dictionaries
            .get(column)
            .ok_or_else(|| self.dictionary_not_found(column))?;
        let found = dictionary.find(&key);
        self.record_lookup(found.is_some());
        Ok(found)
    }

    /// Copy of an index's contents. Later mutations do not show through.
    pub fn get_index(&self, column: &str) -> CacheResult<HashMap<IndexKey, Vec<EntityRef<T>>>> {
        self.store
            .read()
            .indexes
            .get(column)
            .map(Index::to_map)
            .ok_or_else(|| self.index_not_found(column))
    }

    /// Copy of a dictionary's contents.
    pub fn get_dictionary(&self, column: &str) -> CacheResult<HashMap<IndexKey, EntityRef<T>>> {
        self.store
            .read()
            .dictionaries
            .get(column)
            .map(Dictionary::to_map)
            .ok_or_else(|| self.dictionary_not_found(column))
    }

    pub fn has_index(&self, column: &str) -> bool {
        self.store.read().indexes.contains_key(column)
    }

    pub fn has_dictionary(&self, column: &str) -> bool {
        self.store.read().dictionaries.contains_key(column)
    }

    /// Declared index names, sorted.
    pub fn index_names(&self) -> Vec<String> {
        self.store.read().indexes.keys().cloned().collect()
    }

    /// Declared dictionary names, sorted.
    pub fn dictionary_names(&self) -> Vec<String> {
        self.store.read().dictionaries.keys().cloned().collect()
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert `entity` and return the new managed record. The argument is
    /// only read; the returned record is a separate instance carrying the
    /// server-assigned identity.
    pub async fn insert(&self, entity: &T) -> CacheResult<EntityRef<T>> {
        self.ensure_writable()?;
        let statement = self.layout.insert_statement(entity);

        let mut value = T::default();
        for column in self.layout.insert_columns() {
            value.set(&column.name, entity.get(&column.name).unwrap_or_default())?;
        }

        let mut conn = self.connect().await?;
        match self.layout.auto_column() {
            Some(auto) => {
                tracing::debug!(table = self.table(), sql = %statement.sql, "insert");
                let returned = conn
                    .insert_returning(&statement, &auto.name)
                    .await
                    .map_err(|e| self.failed(e))?;
                let identity = self.parse_identity(&auto.name, returned)?;
                value.set(&auto.name, SqlValue::Int(identity))?;
            }
            None => {
                let affected = self.execute_on(conn.as_mut(), &statement).await?;
                self.expect_single("INSERT", affected)?;
            }
        }
        if self.options.refetch_read_only {
            self.refetch(conn.as_mut(), &mut value).await?;
        }
        drop(conn);

        let record = EntityRecord::new_managed(value, self.owner);
        {
            let mut store = self.store.write();
            store.index_record(&record);
            store.entities.push(Arc::clone(&record));
        }
        Ok(record)
    }

    /// Write the record's pending values and commit what was written.
    ///
    /// Only the updatable columns are written. Staged edits to key,
    /// auto-generated and read-only columns are discarded, and read-only
    /// columns take the refetched values when refetching is enabled. Edits
    /// staged while the write is in flight stay pending.
    pub async fn update(&self, record: &EntityRef<T>) -> CacheResult<()> {
        self.ensure_writable()?;
        self.ensure_managed(record)?;
        let (current, staged) = record.snapshot();
        let statement = self.layout.update_statement(&staged, &current)?;

        let mut written = current.clone();
        for column in self.layout.update_columns() {
            written.set(&column.name, staged.get(&column.name).unwrap_or_default())?;
        }

        let mut conn = self.connect().await?;
        let affected = self.execute_on(conn.as_mut(), &statement).await?;
        self.expect_single("UPDATE", affected)?;
        if self.options.refetch_read_only {
            self.refetch(conn.as_mut(), &mut written).await?;
        }
        drop(conn);

        let mut store = self.store.write();
        store.unindex_record(record);
        let committed = record.commit_written(&staged, written);
        store.index_record(record);
        committed?;
        Ok(())
    }

    /// Delete the record's row, drop it from the collection and release it.
    pub async fn delete(&self, record: &EntityRef<T>) -> CacheResult<()> {
        self.ensure_writable()?;
        self.ensure_managed(record)?;
        let statement = self.layout.delete_statement(record);

        let mut conn = self.connect().await?;
        let affected = self.execute_on(conn.as_mut(), &statement).await?;
        drop(conn);
        self.expect_single("DELETE", affected)?;

        {
            let mut store = self.store.write();
            store.unindex_record(record);
            store.entities.retain(|r| !Arc::ptr_eq(r, record));
        }
        record.release();
        Ok(())
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn acquire_gate(&self) -> CacheResult<LoadPermit<'_>> {
        self.gate.try_acquire().ok_or_else(|| {
            ConcurrencyError::LoadInProgress {
                table: self.table().to_string(),
            }
            .into()
        })
    }

    fn begin_load(&self) -> CacheResult<LoadPermit<'_>> {
        let permit = self.acquire_gate()?;
        if self.is_loaded() {
            return Err(ConcurrencyError::AlreadyLoaded {
                table: self.table().to_string(),
            }
            .into());
        }
        Ok(permit)
    }

    /// Append freshly loaded records and mark the item loaded.
    fn install(&self, records: Vec<EntityRef<T>>, filter: Option<LoadFilter>) -> usize {
        let count = records.len();
        {
            let mut store = self.store.write();
            for record in &records {
                store.index_record(record);
            }
            store.entities.extend(records);
        }
        *self.state.write() = LoadState::Loaded(filter);
        count
    }

    fn materialize(&self, rows: &[Row]) -> CacheResult<Vec<EntityRef<T>>> {
        rows.iter().map(|row| self.materialize_row(row)).collect()
    }

    fn materialize_row(&self, row: &Row) -> CacheResult<EntityRef<T>> {
        let record = EntityRecord::new_managed(T::default(), self.owner);
        for column in self.layout.columns() {
            record.set(&column.name, self.column_value(row, &column.name)?)?;
        }
        record.commit();
        Ok(record)
    }

    fn column_value(&self, row: &Row, column: &str) -> CacheResult<SqlValue> {
        row.get(column).cloned().ok_or_else(|| {
            self.integrity(IntegrityError::MissingColumn {
                table: self.table().to_string(),
                column: column.to_string(),
            })
        })
    }

    async fn connect(&self) -> CacheResult<Box<dyn Connection>> {
        self.connector.connect().await.map_err(|e| self.failed(e))
    }

    async fn fetch_records(&self, statement: &Statement) -> CacheResult<Vec<EntityRef<T>>> {
        let rows = {
            let mut conn = self.connect().await?;
            self.query_on(conn.as_mut(), statement).await?
        };
        self.materialize(&rows)
    }

    async fn query_on(&self, conn: &mut dyn Connection, statement: &Statement) -> CacheResult<Vec<Row>> {
        tracing::debug!(table = self.table(), sql = %statement.sql, "query");
        conn.query(statement).await.map_err(|e| self.failed(e))
    }

    async fn execute_on(&self, conn: &mut dyn Connection, statement: &Statement) -> CacheResult<u64> {
        tracing::debug!(table = self.table(), sql = %statement.sql, "execute");
        conn.execute(statement).await.map_err(|e| self.failed(e))
    }

    /// Re-query the read-only columns of the row identified by the keys of
    /// `target` and write them into it.
    async fn refetch(&self, conn: &mut dyn Connection, target: &mut T) -> CacheResult<()> {
        let Some(statement) = self.layout.refetch_statement(target) else {
            return Ok(());
        };
        let rows = self.query_on(conn, &statement).await?;
        let [row] = rows.as_slice() else {
            return Err(self.integrity(IntegrityError::RefetchRowCount {
                table: self.table().to_string(),
                rows: rows.len(),
            }));
        };
        for column in self.layout.read_only_columns() {
            target.set(&column.name, self.column_value(row, &column.name)?)?;
        }
        Ok(())
    }

    fn parse_identity(&self, column: &str, returned: Option<SqlValue>) -> CacheResult<i64> {
        let parsed = match &returned {
            Some(SqlValue::Int(n)) => Some(*n),
            Some(SqlValue::Text(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        match parsed {
            Some(identity) if identity > 0 => Ok(identity),
            _ => Err(self.integrity(IntegrityError::InvalidIdentity {
                table: self.table().to_string(),
                column: column.to_string(),
                value: returned
                    .map(|v| v.to_sql_literal())
                    .unwrap_or_else(|| "nothing".to_string()),
            })),
        }
    }

    fn expect_single(&self, operation: &'static str, affected: u64) -> CacheResult<()> {
        if affected == 1 {
            return Ok(());
        }
        Err(self.integrity(IntegrityError::UnexpectedRowCount {
            table: self.table().to_string(),
            operation,
            actual: affected,
        }))
    }

    fn ensure_writable(&self) -> CacheResult<()> {
        if self.layout.is_read_only() {
            return Err(UsageError::ReadOnlyMode {
                table: self.table().to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn ensure_managed(&self, record: &EntityRecord<T>) -> CacheResult<()> {
        if !record.is_managed_by(self.owner) {
            return Err(UsageError::NotManaged {
                table: self.table().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Key for a caller-supplied value, converted to the column's type so
    /// that `5` finds a float column's `5.0`.
    fn lookup_key(&self, column: &str, value: SqlValue) -> IndexKey {
        match self.layout.require_column(column) {
            Ok(def) => IndexKey::from(value.coerce(def.field_type)),
            Err(_) => IndexKey::from(value),
        }
    }

    fn record_lookup(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn index_not_found(&self, column: &str) -> CacheError {
        UsageError::IndexNotFound {
            table: self.table().to_string(),
            column: column.to_string(),
        }
        .into()
    }

    fn dictionary_not_found(&self, column: &str) -> CacheError {
        UsageError::DictionaryNotFound {
            table: self.table().to_string(),
            column: column.to_string(),
        }
        .into()
    }

    fn integrity(&self, err: IntegrityError) -> CacheError {
        tracing::warn!(table = self.table(), error = %err, "data integrity failure");
        err.into()
    }

    /// Log driver failures on their way out.
    fn failed(&self, err: CacheError) -> CacheError {
        if let CacheError::Database(db) = &err {
            tracing::error!(
                table = self.table(),
                sql = %db.sql,
                reason = %db.reason,
                "database call failed"
            );
        }
        err
    }
}
