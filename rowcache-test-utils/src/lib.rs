//! rowcache Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - a scriptable mock database ([`MockDatabase`])
//! - fixture entity types ([`fixtures`])
//! - proptest strategies and row builders
//! - opt-in tracing output for debugging a failing test

pub mod fixtures;
pub mod mock;

pub use fixtures::{AuditEntry, Customer, DoubleIdentity, Hollow, Order, Tag, User};
pub use mock::{Call, CallKind, MockDatabase, Response};

// Re-export core types for convenience
pub use rowcache_core::{CacheError, CacheResult, Entity, EntityRef, Row, SqlValue, Statement};

use proptest::prelude::*;

// ============================================================================
// ROW BUILDERS
// ============================================================================

/// Row for the `Users` table as the database would return it.
pub fn user_row(id: i64, name: &str) -> Row {
    Row::new()
        .with("Id", id)
        .with("Name", name)
        .with("Active", true)
        .with("Email", SqlValue::Null)
        .with("Created", SqlValue::Null)
}

pub fn customer_row(id: i64, name: &str, vip: bool) -> Row {
    Row::new().with("Id", id).with("Name", name).with("Vip", vip)
}

pub fn order_row(id: i64, customer_id: i64, total: f64) -> Row {
    Row::new()
        .with("Id", id)
        .with("CustomerId", customer_id)
        .with("Total", total)
        .with("Note", SqlValue::Null)
}

// ============================================================================
// PROPTEST STRATEGIES
// ============================================================================

/// Strategy for user names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Z][a-z]{2,12}",
        // Names that need quoting
        "[A-Z][a-z]{1,5}'[A-Z][a-z]{1,5}",
        Just("N".to_string()),
    ]
}

/// Strategy for unsaved users (id left at zero).
pub fn user_strategy() -> impl Strategy<Value = User> {
    (
        name_strategy(),
        any::<bool>(),
        proptest::option::of("[a-z]{3,8}@example\\.com"),
    )
        .prop_map(|(name, active, email)| User {
            id: 0,
            name,
            active,
            email,
            created: None,
        })
}

/// Strategy for database rows of the `Users` table with unique ids.
pub fn user_rows_strategy(max: usize) -> impl Strategy<Value = Vec<Row>> {
    proptest::collection::vec(name_strategy(), 0..max).prop_map(|names| {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| user_row(i as i64 + 1, name))
            .collect()
    })
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
