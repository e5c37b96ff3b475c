//! Shadow-state records
//!
//! A record holds two copies of an entity: the *current* value, which is what
//! every observer of the cache sees, and the *pending* value, where edits are
//! staged. While a record is managed by a cache item, edits only ever reach
//! the pending copy; once the database write has succeeded the engine
//! publishes exactly what it wrote with [`EntityRecord::commit_written`]. An
//! unmanaged record has no pending write to guard, so edits land in both
//! copies at once.

use crate::error::ValueError;
use crate::schema::Entity;
use crate::value::SqlValue;
use parking_lot::RwLock;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared handle to a record. Cache items hand these out; two handles to the
/// same row are `Arc::ptr_eq`.
pub type EntityRef<T> = Arc<EntityRecord<T>>;

/// Identity of the cache item that manages a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(NonZeroU64);

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

impl OwnerId {
    /// Allocate a process-unique owner id.
    pub fn next() -> Self {
        let raw = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and would need 2^64 allocations to wrap.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

struct Shadow<T> {
    current: T,
    pending: T,
}

/// An entity with current/pending slots and a managed flag.
pub struct EntityRecord<T> {
    state: RwLock<Shadow<T>>,
    /// 0 when unmanaged, otherwise the owning cache item's id.
    owner: AtomicU64,
}

impl<T: Entity> EntityRecord<T> {
    /// Wrap a value in an unmanaged record.
    pub fn new(value: T) -> EntityRef<T> {
        Arc::new(Self::with_owner(value, 0))
    }

    /// Create a record already managed by `owner`. Used by cache items when
    /// they materialise rows.
    pub fn new_managed(value: T, owner: OwnerId) -> EntityRef<T> {
        Arc::new(Self::with_owner(value, owner.get()))
    }

    fn with_owner(value: T, owner: u64) -> Self {
        Self {
            state: RwLock::new(Shadow {
                pending: value.clone(),
                current: value,
            }),
            owner: AtomicU64::new(owner),
        }
    }

    pub fn is_managed(&self) -> bool {
        self.owner.load(Ordering::Acquire) != 0
    }

    pub fn is_managed_by(&self, owner: OwnerId) -> bool {
        self.owner.load(Ordering::Acquire) == owner.get()
    }

    /// Drop the managed flag. Subsequent edits go straight to current.
    pub fn release(&self) {
        self.owner.store(0, Ordering::Release);
    }

    /// Snapshot of the current (committed) value.
    pub fn current(&self) -> T {
        self.state.read().current.clone()
    }

    /// Snapshot of the pending (staged) value.
    pub fn pending(&self) -> T {
        self.state.read().pending.clone()
    }

    /// Current and pending values, read together.
    pub fn snapshot(&self) -> (T, T) {
        let state = self.state.read();
        (state.current.clone(), state.pending.clone())
    }

    /// Borrow the current value without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.read().current)
    }

    pub fn get(&self, column: &str) -> Option<SqlValue> {
        self.state.read().current.get(column)
    }

    pub fn get_pending(&self, column: &str) -> Option<SqlValue> {
        self.state.read().pending.get(column)
    }

    /// Write one field by column name.
    pub fn set(&self, column: &str, value: SqlValue) -> Result<(), ValueError> {
        let managed = self.is_managed();
        let mut state = self.state.write();
        if managed {
            state.pending.set(column, value)
        } else {
            state.current.set(column, value.clone())?;
            state.pending.set(column, value)
        }
    }

    /// Apply a typed edit. Same visibility rules as [`EntityRecord::set`].
    pub fn edit(&self, f: impl FnOnce(&mut T)) {
        let managed = self.is_managed();
        let mut state = self.state.write();
        f(&mut state.pending);
        if !managed {
            state.current = state.pending.clone();
        }
    }

    /// Copy pending into current.
    pub fn commit(&self) {
        let mut state = self.state.write();
        state.current = state.pending.clone();
    }

    /// Publish `written` as the current value of a write that was built from
    /// the pending snapshot `staged`. Pending columns still equal to `staged`
    /// follow `written`; a column edited after the snapshot keeps its newer
    /// staged value.
    pub fn commit_written(&self, staged: &T, written: T) -> Result<(), ValueError> {
        let mut state = self.state.write();
        for column in T::schema().columns() {
            if state.pending.get(&column.name) != staged.get(&column.name) {
                continue;
            }
            if let Some(value) = written.get(&column.name) {
                state.pending.set(&column.name, value)?;
            }
        }
        state.current = written;
        Ok(())
    }

    /// Copy current into pending, discarding staged edits.
    pub fn rollback(&self) {
        let mut state = self.state.write();
        state.pending = state.current.clone();
    }

    /// True when any declared column differs between pending and current.
    pub fn is_dirty(&self) -> bool {
        let state = self.state.read();
        T::schema()
            .columns()
            .iter()
            .any(|c| state.current.get(&c.name) != state.pending.get(&c.name))
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("EntityRecord")
            .field("current", &state.current)
            .field("pending", &state.pending)
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .finish()
    }
}
