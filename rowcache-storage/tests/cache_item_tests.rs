//! Cache Item Behaviour Tests
//!
//! Load lifecycle, write-through mutations, index/dictionary maintenance and
//! failure handling of a single cache item, driven against the scriptable
//! [`MockDatabase`].

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rowcache_core::{
    CacheError, CacheItemOptions, ConcurrencyError, ConfigError, EntityRecord, ExpressionError,
    IntegrityError, Row, SqlValue, UsageError,
};
use rowcache_query::{col, field, Expr};
use rowcache_storage::{CacheItem, LoadFilter};
use rowcache_test_utils::{
    customer_row, order_row, user_row, AuditEntry, CallKind, Customer, MockDatabase, Order,
    Response, Tag, User,
};
use std::sync::Arc;

// ============================================================================
// HELPERS
// ============================================================================

fn users(db: &MockDatabase) -> CacheItem<User> {
    users_with(db, CacheItemOptions::default())
}

fn users_with(db: &MockDatabase, options: CacheItemOptions) -> CacheItem<User> {
    CacheItem::new(Arc::new(db.clone()), options).unwrap()
}

fn names(cache: &CacheItem<User>) -> Vec<String> {
    cache.entities().iter().map(|r| r.current().name).collect()
}

/// Mock whose SELECT result can be swapped between calls.
fn switchable(rows: Vec<Row>) -> (MockDatabase, Arc<Mutex<Vec<Row>>>) {
    let shared = Arc::new(Mutex::new(rows));
    let source = Arc::clone(&shared);
    let db = MockDatabase::new(move |call| {
        Ok(match call.kind {
            CallKind::Query => Response::Rows(source.lock().clone()),
            CallKind::Execute => Response::Affected(1),
            CallKind::InsertReturning { .. } => Response::Identity(Some(SqlValue::Int(100))),
        })
    });
    (db, shared)
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

#[test]
fn test_construction_makes_no_database_calls() {
    let db = MockDatabase::table(vec![], 1);
    let cache = users(&db);
    assert_eq!(cache.table(), "Users");
    assert!(!cache.is_loaded());
    assert!(cache.is_empty());
    assert_eq!(db.connections_opened(), 0);
}

#[test]
fn test_table_name_override_is_used_in_sql() {
    let db = MockDatabase::table(vec![], 1);
    let cache = users_with(&db, CacheItemOptions::new().with_table_name("people"));
    assert_eq!(cache.table(), "people");
    assert_eq!(cache.layout().select_all().sql, "SELECT * FROM [people]");
}

// ============================================================================
// LOADING
// ============================================================================

#[tokio::test]
async fn test_load_all_materialises_committed_managed_entities() {
    let db = MockDatabase::table(vec![user_row(1, "Ann"), user_row(2, "Bob")], 1);
    let cache = users(&db);
    cache.load_all().await.unwrap();

    assert!(cache.is_loaded());
    assert_eq!(names(&cache), vec!["Ann", "Bob"]);
    for record in cache.entities() {
        assert!(record.is_managed_by(cache.owner()));
        assert!(!record.is_dirty());
    }
    assert_eq!(db.statements(), vec!["SELECT * FROM [Users]"]);
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_second_load_fails_already_loaded() {
    let db = MockDatabase::table(vec![user_row(1, "Ann")], 1);
    let cache = users(&db);
    cache.load_all().await.unwrap();

    let err = cache.load_all().await.unwrap_err();
    assert_eq!(
        err,
        CacheError::Concurrency(ConcurrencyError::AlreadyLoaded {
            table: "Users".to_string()
        })
    );
    let err = cache.load_where(&col("Id").gt(0)).await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::Concurrency(ConcurrencyError::AlreadyLoaded { .. })
    ));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_load_where_sends_compiled_predicate() {
    let db = MockDatabase::table(vec![user_row(5, "Sam")], 1);
    let cache = users(&db);
    cache.load_where(&col("Name").starts_with("S")).await.unwrap();

    let calls = db.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].sql(), "SELECT * FROM [Users] WHERE [Name] LIKE @p1");
    assert_eq!(
        calls[0].statement.parameters.get("p1"),
        Some(&SqlValue::from("S%"))
    );
    assert!(matches!(cache.load_filter(), Some(LoadFilter::Predicate(_))));
}

#[tokio::test]
async fn test_unsupported_predicate_fails_without_database_traffic() {
    let db = MockDatabase::table(vec![], 1);
    let cache = users(&db);
    let predicate = col("Name").call("ToUpper", vec![]).eq("ANN");

    let err = cache.load_where(&predicate).await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::Expression(ExpressionError::UnsupportedExpression { .. })
    ));
    assert!(db.calls().is_empty());
    assert!(!cache.is_loaded());
    assert!(!cache.is_loading());
}

#[tokio::test]
async fn test_load_all_unload_load_all_round_trip() {
    let rows = vec![user_row(1, "Ann"), user_row(2, "Bob"), user_row(3, "Cy")];
    let db = MockDatabase::table(rows, 1);
    let cache = users(&db);

    cache.load_all().await.unwrap();
    let first: Vec<User> = cache.entities().iter().map(|r| r.current()).collect();
    let first_records = cache.entities();
    cache.build_index("Name").unwrap();

    cache.unload().unwrap();
    assert!(!cache.is_loaded());
    assert!(cache.is_empty());
    assert!(cache.index_names().is_empty());
    assert!(first_records.iter().all(|r| !r.is_managed()));

    cache.load_all().await.unwrap();
    let second: Vec<User> = cache.entities().iter().map(|r| r.current()).collect();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_database_failure_leaves_item_unloaded() {
    let db = MockDatabase::failing("connection reset");
    let cache = users(&db);

    let err = cache.load_all().await.unwrap_err();
    match &err {
        CacheError::Database(db_err) => {
            assert_eq!(db_err.sql, "SELECT * FROM [Users]");
            assert_eq!(db_err.reason, "connection reset");
        }
        other => panic!("expected a database error, got {:?}", other),
    }
    assert!(!cache.is_loaded());
    // The gate was released: the retry fails the same way, not as contention.
    assert!(matches!(cache.load_all().await, Err(CacheError::Database(_))));
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_row_missing_a_column_is_an_integrity_error() {
    let db = MockDatabase::table(vec![Row::new().with("Id", 1_i64).with("Name", "Ann")], 1);
    let cache = users(&db);
    let err = cache.load_all().await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::Integrity(IntegrityError::MissingColumn { ref column, .. }) if column == "Active"
    ));
    assert!(cache.is_empty());
    assert!(!cache.is_loaded());
}

// ============================================================================
// RELOAD
// ============================================================================

#[tokio::test]
async fn test_reload_rebuilds_declared_lookups() {
    let (db, rows) = switchable(vec![user_row(1, "Ann"), user_row(2, "Bob")]);
    let cache = users(&db);
    cache.load_all().await.unwrap();
    cache.build_index("Name").unwrap();
    cache.build_dictionary("Id").unwrap();
    let old_ann = cache.find_in_dictionary("Id", 1_i64).unwrap().unwrap();

    *rows.lock() = vec![user_row(1, "Ann"), user_row(3, "Cy")];
    cache.reload().await.unwrap();

    assert_eq!(cache.index_names(), vec!["Name"]);
    assert_eq!(cache.dictionary_names(), vec!["Id"]);
    assert_eq!(names(&cache), vec!["Ann", "Cy"]);
    assert!(cache.find_in_index("Name", "Bob").unwrap().is_empty());
    assert_eq!(cache.find_in_index("Name", "Cy").unwrap().len(), 1);

    let new_ann = cache.find_in_dictionary("Id", 1_i64).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&old_ann, &new_ann));
    assert!(!old_ann.is_managed());
    assert!(new_ann.is_managed_by(cache.owner()));
}

#[tokio::test]
async fn test_reload_replays_predicate() {
    let db = MockDatabase::table(vec![user_row(5, "Sam")], 1);
    let cache = users(&db);
    cache.load_where(&col("Id").gt(4)).await.unwrap();
    db.clear_log();

    cache.reload().await.unwrap();
    assert_eq!(db.statements(), vec!["SELECT * FROM [Users] WHERE [Id] > 4"]);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_reload_from_unloaded_is_a_full_load() {
    let db = MockDatabase::table(vec![user_row(1, "Ann")], 1);
    let cache = users(&db);
    cache.reload().await.unwrap();
    assert!(cache.is_loaded());
    assert_eq!(db.statements(), vec!["SELECT * FROM [Users]"]);
    assert_eq!(cache.load_filter(), None);
}

// ============================================================================
// RELATION LOAD
// ============================================================================

fn shop() -> MockDatabase {
    MockDatabase::new(|call| {
        let sql = call.sql();
        let rows = if sql == "SELECT * FROM [Customers]" {
            vec![
                customer_row(1, "Ada", true),
                customer_row(2, "Bea", false),
                customer_row(3, "Cid", false),
            ]
        } else if sql.ends_with("[CustomerId] = 1") {
            vec![order_row(10, 1, 5.0), order_row(11, 1, 7.5)]
        } else if sql.ends_with("[CustomerId] = 2") {
            vec![order_row(20, 2, 1.0)]
        } else {
            vec![]
        };
        Ok(Response::Rows(rows))
    })
}

fn by_customer() -> Expr {
    field::<Order>("CustomerId").eq(field::<Customer>("Id"))
}

#[tokio::test]
async fn test_load_related_with_unions_rows_per_related_entity() {
    let db = shop();
    let customers: CacheItem<Customer> =
        CacheItem::new(Arc::new(db.clone()), CacheItemOptions::default()).unwrap();
    let orders: CacheItem<Order> =
        CacheItem::new(Arc::new(db.clone()), CacheItemOptions::default()).unwrap();
    customers.load_all().await.unwrap();
    db.clear_log();

    orders.load_related_with(&customers, &by_customer()).await.unwrap();

    let ids: Vec<i64> = orders.entities().iter().map(|r| r.current().id).collect();
    assert_eq!(ids, vec![10, 11, 20]);
    let mut sql = db.statements();
    sql.sort();
    assert_eq!(
        sql,
        vec![
            "SELECT * FROM [Orders] WHERE [CustomerId] = 1",
            "SELECT * FROM [Orders] WHERE [CustomerId] = 2",
            "SELECT * FROM [Orders] WHERE [CustomerId] = 3",
        ]
    );
    assert_eq!(db.connections_opened(), 3);
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_related_rows_are_not_deduplicated() {
    let db = MockDatabase::new(|call| {
        Ok(Response::Rows(if call.sql().contains("[Orders]") {
            vec![order_row(10, 1, 5.0)]
        } else {
            vec![]
        }))
    });
    let orders: CacheItem<Order> =
        CacheItem::new(Arc::new(db.clone()), CacheItemOptions::default()).unwrap();
    let related = vec![
        Customer { id: 1, name: "A".into(), vip: false },
        Customer { id: 1, name: "A again".into(), vip: false },
    ];
    orders.load_related_values(&related, &by_customer()).await.unwrap();
    assert_eq!(orders.len(), 2);
}

#[tokio::test]
async fn test_reload_replays_relation_statements() {
    let db = shop();
    let customers: CacheItem<Customer> =
        CacheItem::new(Arc::new(db.clone()), CacheItemOptions::default()).unwrap();
    let orders: CacheItem<Order> =
        CacheItem::new(Arc::new(db.clone()), CacheItemOptions::default()).unwrap();
    customers.load_all().await.unwrap();
    orders.load_related_with(&customers, &by_customer()).await.unwrap();
    orders.build_index("CustomerId").unwrap();

    // The related collection changing afterwards does not affect the replay.
    customers.unload().unwrap();
    db.clear_log();
    orders.reload().await.unwrap();

    match orders.load_filter() {
        Some(LoadFilter::Relation(statements)) => assert_eq!(statements.len(), 3),
        other => panic!("expected a relation filter, got {:?}", other),
    }
    assert_eq!(db.statements().len(), 3);
    assert_eq!(orders.len(), 3);
    assert_eq!(orders.find_in_index("CustomerId", 1_i64).unwrap().len(), 2);
}

#[tokio::test]
async fn test_relation_load_failure_is_fatal() {
    let db = MockDatabase::new(|call| {
        if call.sql().ends_with("= 2") {
            Err(rowcache_core::DatabaseError::new(call.sql(), "boom").into())
        } else {
            Ok(Response::Rows(vec![order_row(1, 1, 1.0)]))
        }
    });
    let orders: CacheItem<Order> =
        CacheItem::new(Arc::new(db.clone()), CacheItemOptions::default()).unwrap();
    let related = vec![
        Customer { id: 1, ..Default::default() },
        Customer { id: 2, ..Default::default() },
    ];
    let err = orders
        .load_related_values(&related, &by_customer())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Database(_)));
    assert!(orders.is_empty());
    assert!(!orders.is_loaded());
}

// ============================================================================
// INDEXES AND DICTIONARIES
// ============================================================================

#[tokio::test]
async fn test_find_in_index_requires_build_index() {
    let db = MockDatabase::table(vec![], 42);
    let cache = users(&db);
    let brian = cache.insert(&User::named("Brian")).await.unwrap();

    let err = cache.find_in_index("Name", "Brian").unwrap_err();
    assert_eq!(
        err,
        CacheError::Usage(UsageError::IndexNotFound {
            table: "Users".to_string(),
            column: "Name".to_string()
        })
    );
    assert!(err.to_string().contains("does not exist"));

    cache.build_index("Name").unwrap();
    let found = cache.find_in_index("Name", "Brian").unwrap();
    assert_eq!(found.len(), 1);
    assert!(Arc::ptr_eq(&found[0], &brian));
    assert!(cache.find_in_index("Name", "Nobody").unwrap().is_empty());
}

#[tokio::test]
async fn test_build_index_twice_fails_without_change() {
    let db = MockDatabase::table(vec![user_row(1, "Ann"), user_row(2, "Ann")], 1);
    let cache = users(&db);
    cache.load_all().await.unwrap();
    cache.build_index("Name").unwrap();
    let before = cache.find_in_index("Name", "Ann").unwrap();

    let err = cache.build_index("Name").unwrap_err();
    assert!(matches!(
        err,
        CacheError::Concurrency(ConcurrencyError::IndexExists { .. })
    ));
    assert_eq!(cache.index_names(), vec!["Name"]);
    let after = cache.find_in_index("Name", "Ann").unwrap();
    assert_eq!(before.len(), after.len());
    assert!(before.iter().zip(&after).all(|(a, b)| Arc::ptr_eq(a, b)));

    cache.build_dictionary("Name").unwrap();
    assert!(matches!(
        cache.build_dictionary("Name"),
        Err(CacheError::Concurrency(ConcurrencyError::DictionaryExists { .. }))
    ));
}

#[test]
fn test_lookup_on_unknown_column_is_a_config_error() {
    let cache = users(&MockDatabase::table(vec![], 1));
    assert!(matches!(
        cache.build_index("Nope"),
        Err(CacheError::Config(ConfigError::UnknownColumn { .. }))
    ));
    assert!(matches!(
        cache.build_dictionary("Nope"),
        Err(CacheError::Config(ConfigError::UnknownColumn { .. }))
    ));
    assert!(matches!(
        cache.find_in_dictionary("Id", 1_i64),
        Err(CacheError::Usage(UsageError::DictionaryNotFound { .. }))
    ));
}

#[tokio::test]
async fn test_dictionary_keeps_first_duplicate() {
    let db = MockDatabase::table(vec![user_row(1, "Ann"), user_row(2, "Ann")], 1);
    let cache = users(&db);
    cache.load_all().await.unwrap();
    cache.build_dictionary("Name").unwrap();

    let ann = cache.find_in_dictionary("Name", "Ann").unwrap().unwrap();
    assert_eq!(ann.current().id, 1);
    assert_eq!(cache.get_dictionary("Name").unwrap().len(), 1);
}

#[tokio::test]
async fn test_null_values_are_indexed_under_a_sentinel() {
    let db = MockDatabase::table(vec![user_row(1, "Ann"), user_row(2, "Bob")], 1);
    let cache = users(&db);
    cache.load_all().await.unwrap();
    cache.build_index("Email").unwrap();
    assert_eq!(cache.find_in_index("Email", SqlValue::Null).unwrap().len(), 2);
    assert_eq!(cache.find_in_index("Email", None::<String>).unwrap().len(), 2);
}

#[tokio::test]
async fn test_lookup_value_is_converted_to_column_type() {
    let db = MockDatabase::table(vec![order_row(10, 1, 5.0), order_row(11, 1, 7.5)], 1);
    let orders: CacheItem<Order> =
        CacheItem::new(Arc::new(db), CacheItemOptions::default()).unwrap();
    orders.load_all().await.unwrap();
    orders.build_index("Total").unwrap();
    orders.build_dictionary("Total").unwrap();
    orders.build_index("CustomerId").unwrap();

    let found = orders.find_in_index("Total", 5_i64).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].current().id, 10);
    assert!(orders.find_in_dictionary("Total", 5_i64).unwrap().is_some());
    assert_eq!(orders.find_in_index("CustomerId", 1.0).unwrap().len(), 2);
    assert!(orders.find_in_index("Total", 6_i64).unwrap().is_empty());
}

// ============================================================================
// INSERT
// ============================================================================

#[tokio::test]
async fn test_insert_returns_new_managed_instance() {
    let db = MockDatabase::table(vec![], 42);
    let cache = users(&db);
    let argument = User::named("Brian");

    let brian = cache.insert(&argument).await.unwrap();

    let current = brian.current();
    assert_eq!(current.id, 42);
    assert_eq!(current.name, "Brian");
    assert!(brian.is_managed_by(cache.owner()));
    assert!(!brian.is_dirty());
    assert_eq!(argument.id, 0);

    let entities = cache.entities();
    assert_eq!(entities.len(), 1);
    assert!(Arc::ptr_eq(&entities[0], &brian));

    let calls = db.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].kind,
        CallKind::InsertReturning {
            identity_column: "Id".to_string()
        }
    );
    assert_eq!(
        calls[0].sql(),
        "INSERT INTO [Users] ([Name], [Active], [Email]) VALUES (@p1, @p2, @p3)"
    );
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_inserted_entity_is_the_dictionary_entry() {
    let db = MockDatabase::table(vec![], 7);
    let cache = users(&db);
    cache.build_dictionary("Id").unwrap();
    cache.build_index("Name").unwrap();

    let record = cache.insert(&User::named("Ann")).await.unwrap();

    let found = cache.find_in_dictionary("Id", 7_i64).unwrap().unwrap();
    assert!(Arc::ptr_eq(&found, &record));
    let by_name = cache.find_in_index("Name", "Ann").unwrap();
    assert!(Arc::ptr_eq(&by_name[0], &record));
}

#[tokio::test]
async fn test_insert_with_invalid_identity_is_fatal() {
    for returned in [None, Some(SqlValue::Int(0)), Some(SqlValue::from("x"))] {
        let db = MockDatabase::new(move |_| Ok(Response::Identity(returned.clone())));
        let cache = users(&db);
        let err = cache.insert(&User::named("Ann")).await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Integrity(IntegrityError::InvalidIdentity { .. })
        ));
        assert!(err.to_string().contains("Data are inconsistent"));
        assert!(cache.is_empty());
        assert_eq!(db.open_connections(), 0);
    }
}

#[tokio::test]
async fn test_insert_without_identity_column_requires_one_row() {
    let db = MockDatabase::table(vec![], 1);
    let tags: CacheItem<Tag> =
        CacheItem::new(Arc::new(db.clone()), CacheItemOptions::default()).unwrap();
    let tag = Tag {
        owner: 3,
        label: "red".to_string(),
        color: Some("#f00".to_string()),
    };

    let record = tags.insert(&tag).await.unwrap();
    assert_eq!(record.current(), tag);
    let calls = db.calls();
    assert_eq!(calls[0].kind, CallKind::Execute);
    assert_eq!(
        calls[0].sql(),
        "INSERT INTO [Tags] ([Owner], [Label], [Color]) VALUES (@p1, @p2, @p3)"
    );

    let none = MockDatabase::new(|_| Ok(Response::Affected(0)));
    let tags: CacheItem<Tag> =
        CacheItem::new(Arc::new(none), CacheItemOptions::default()).unwrap();
    let err = tags.insert(&tag).await.unwrap_err();
    assert!(matches!(
        err,
        CacheError::Integrity(IntegrityError::UnexpectedRowCount {
            operation: "INSERT",
            actual: 0,
            ..
        })
    ));
    assert!(tags.is_empty());
}

// ============================================================================
// READ-ONLY COLUMN REFETCH
// ============================================================================

fn refetching(created_rows: usize) -> MockDatabase {
    let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    MockDatabase::new(move |call| {
        Ok(match call.kind {
            CallKind::InsertReturning { .. } => Response::Identity(Some(SqlValue::Int(42))),
            CallKind::Execute => Response::Affected(1),
            CallKind::Query if call.sql().starts_with("SELECT [Created]") => Response::Rows(
                (0..created_rows)
                    .map(|_| Row::new().with("Created", created))
                    .collect(),
            ),
            CallKind::Query => Response::Rows(vec![user_row(1, "Ann")]),
        })
    })
}

#[tokio::test]
async fn test_insert_refetches_read_only_columns_when_enabled() {
    let db = refetching(1);
    let cache = users_with(&db, CacheItemOptions::new().with_refetch_read_only(true));

    let record = cache.insert(&User::named("Ann")).await.unwrap();

    assert_eq!(
        record.current().created,
        Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
    );
    let calls = db.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].sql(), "SELECT [Created] FROM [Users] WHERE [Id] = @p1");
    assert_eq!(
        calls[1].statement.parameters.get("p1"),
        Some(&SqlValue::Int(42))
    );
    // Both statements ran on the same connection.
    assert_eq!(db.connections_opened(), 1);
}

#[tokio::test]
async fn test_refetch_is_off_by_default() {
    let db = refetching(1);
    let cache = users(&db);
    let record = cache.insert(&User::named("Ann")).await.unwrap();
    assert_eq!(record.current().created, None);
    assert_eq!(db.calls().len(), 1);
}

#[tokio::test]
async fn test_refetch_row_count_mismatch_leaves_cache_untouched() {
    for rows in [0, 2] {
        let db = refetching(rows);
        let cache = users_with(&db, CacheItemOptions::new().with_refetch_read_only(true));
        cache.build_index("Name").unwrap();
        let err = cache.insert(&User::named("Ann")).await.unwrap_err();
        assert_eq!(
            err,
            CacheError::Integrity(IntegrityError::RefetchRowCount {
                table: "Users".to_string(),
                rows
            })
        );
        assert!(cache.is_empty());
        assert!(cache.find_in_index("Name", "Ann").unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_update_refetches_read_only_columns() {
    let db = refetching(1);
    let cache = users_with(&db, CacheItemOptions::new().with_refetch_read_only(true));
    cache.load_all().await.unwrap();
    let ann = cache.entities()[0].clone();
    assert_eq!(ann.current().created, None);

    ann.edit(|u| u.active = false);
    cache.update(&ann).await.unwrap();

    let current = ann.current();
    assert!(!current.active);
    assert!(current.created.is_some());
}

// ============================================================================
// UPDATE
// ============================================================================

#[tokio::test]
async fn test_update_of_unmanaged_entity_fails() {
    let db = MockDatabase::table(vec![], 1);
    let cache = users(&db);
    let stranger = EntityRecord::new(User {
        id: 1,
        name: "X".to_string(),
        ..User::default()
    });

    let err = cache.update(&stranger).await.unwrap_err();
    assert_eq!(
        err,
        CacheError::Usage(UsageError::NotManaged {
            table: "Users".to_string()
        })
    );
    assert!(err.to_string().contains("not managed"));
    assert!(db.calls().is_empty());
}

#[tokio::test]
async fn test_update_of_entity_managed_elsewhere_fails() {
    let db = MockDatabase::table(vec![user_row(1, "Ann")], 1);
    let first = users(&db);
    let second = users(&db);
    first.load_all().await.unwrap();
    db.clear_log();

    let ann = first.entities()[0].clone();
    assert!(matches!(
        second.update(&ann).await,
        Err(CacheError::Usage(UsageError::NotManaged { .. }))
    ));
    assert!(matches!(
        second.delete(&ann).await,
        Err(CacheError::Usage(UsageError::NotManaged { .. }))
    ));
    assert!(db.calls().is_empty());
}

#[tokio::test]
async fn test_update_commits_pending_and_reindexes() {
    let db = MockDatabase::table(vec![user_row(1, "Ann"), user_row(2, "Bob")], 1);
    let cache = users(&db);
    cache.load_all().await.unwrap();
    cache.build_index("Name").unwrap();
    cache.build_dictionary("Name").unwrap();
    let ann = cache.find_in_dictionary("Name", "Ann").unwrap().unwrap();
    db.clear_log();

    ann.edit(|u| u.name = "Anna".to_string());
    // Staged only: readers still see the committed value.
    assert_eq!(ann.current().name, "Ann");
    assert!(cache.find_in_index("Name", "Anna").unwrap().is_empty());

    cache.update(&ann).await.unwrap();

    assert_eq!(ann.current().name, "Anna");
    assert!(!ann.is_dirty());
    assert!(cache.find_in_index("Name", "Ann").unwrap().is_empty());
    assert!(Arc::ptr_eq(&cache.find_in_index("Name", "Anna").unwrap()[0], &ann));
    assert!(cache.find_in_dictionary("Name", "Ann").unwrap().is_none());
    assert!(Arc::ptr_eq(
        &cache.find_in_dictionary("Name", "Anna").unwrap().unwrap(),
        &ann
    ));

    let calls = db.calls();
    assert_eq!(calls[0].kind, CallKind::Execute);
    assert_eq!(
        calls[0].sql(),
        "UPDATE [Users] SET [Name] = @p1, [Active] = @p2, [Email] = @p3 WHERE [Id] = @p4"
    );
    assert_eq!(
        calls[0].statement.parameters.get("p1"),
        Some(&SqlValue::from("Anna"))
    );
    assert_eq!(
        calls[0].statement.parameters.get("p4"),
        Some(&SqlValue::Int(1))
    );
}

#[tokio::test]
async fn test_failed_update_keeps_pending_uncommitted() {
    for affected in [0, 2] {
        let rows = vec![user_row(1, "Ann")];
        let db = MockDatabase::new(move |call| {
            Ok(match call.kind {
                CallKind::Query => Response::Rows(rows.clone()),
                _ => Response::Affected(affected),
            })
        });
        let cache = users(&db);
        cache.load_all().await.unwrap();
        cache.build_index("Name").unwrap();
        let ann = cache.entities()[0].clone();

        ann.edit(|u| u.name = "Anna".to_string());
        let err = cache.update(&ann).await.unwrap_err();
        assert_eq!(
            err,
            CacheError::Integrity(IntegrityError::UnexpectedRowCount {
                table: "Users".to_string(),
                operation: "UPDATE",
                actual: affected,
            })
        );
        assert_eq!(ann.current().name, "Ann");
        assert_eq!(ann.pending().name, "Anna");
        assert_eq!(cache.find_in_index("Name", "Ann").unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_update_discards_staged_key_edits() {
    let db = MockDatabase::table(vec![user_row(1, "Ann")], 1);
    let cache = users(&db);
    cache.load_all().await.unwrap();
    cache.build_dictionary("Id").unwrap();
    let ann = cache.entities()[0].clone();
    db.clear_log();

    ann.edit(|u| {
        u.id = 99;
        u.name = "Anna".to_string();
    });
    cache.update(&ann).await.unwrap();

    let current = ann.current();
    assert_eq!(current.id, 1);
    assert_eq!(current.name, "Anna");
    assert!(!ann.is_dirty());
    assert!(!db.statements()[0].contains("SET [Id]"));
    assert!(cache.find_in_dictionary("Id", 1_i64).unwrap().is_some());
    assert!(cache.find_in_dictionary("Id", 99_i64).unwrap().is_none());
}

#[tokio::test]
async fn test_update_discards_staged_read_only_edits() {
    let db = MockDatabase::table(vec![user_row(1, "Ann")], 1);
    let cache = users(&db);
    cache.load_all().await.unwrap();
    let ann = cache.entities()[0].clone();
    assert_eq!(ann.current().created, None);
    db.clear_log();

    ann.edit(|u| {
        u.name = "Anna".to_string();
        u.created = Some(Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap());
    });
    cache.update(&ann).await.unwrap();

    assert_eq!(
        db.statements()[0],
        "UPDATE [Users] SET [Name] = @p1, [Active] = @p2, [Email] = @p3 WHERE [Id] = @p4"
    );
    let current = ann.current();
    assert_eq!(current.name, "Anna");
    assert_eq!(current.created, None);
    assert_eq!(ann.pending().created, None);
    assert!(!ann.is_dirty());
}

#[tokio::test]
async fn test_edit_staged_during_update_stays_pending() {
    let in_flight: Arc<Mutex<Option<Arc<EntityRecord<User>>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&in_flight);
    let db = MockDatabase::new(move |call| {
        Ok(match call.kind {
            CallKind::Query => Response::Rows(vec![user_row(1, "Ann")]),
            _ => {
                if let Some(record) = slot.lock().as_ref() {
                    record.edit(|u| u.name = "Later".to_string());
                }
                Response::Affected(1)
            }
        })
    });
    let cache = users(&db);
    cache.load_all().await.unwrap();
    cache.build_index("Name").unwrap();
    let ann = cache.entities()[0].clone();
    *in_flight.lock() = Some(Arc::clone(&ann));

    ann.edit(|u| u.name = "Anna".to_string());
    cache.update(&ann).await.unwrap();

    let written = db.calls().pop().unwrap();
    assert_eq!(
        written.statement.parameters.get("p1"),
        Some(&SqlValue::from("Anna"))
    );
    assert_eq!(ann.current().name, "Anna");
    assert_eq!(ann.pending().name, "Later");
    assert!(ann.is_dirty());
    assert_eq!(cache.find_in_index("Name", "Anna").unwrap().len(), 1);
    assert!(cache.find_in_index("Name", "Later").unwrap().is_empty());
}

// ============================================================================
// DELETE
// ============================================================================

#[tokio::test]
async fn test_delete_removes_everywhere_and_releases() {
    let db = MockDatabase::table(vec![user_row(1, "Ann"), user_row(2, "Bob")], 1);
    let cache = users(&db);
    cache.load_all().await.unwrap();
    cache.build_index("Name").unwrap();
    cache.build_dictionary("Id").unwrap();
    let ann = cache.find_in_dictionary("Id", 1_i64).unwrap().unwrap();
    db.clear_log();

    cache.delete(&ann).await.unwrap();

    assert_eq!(names(&cache), vec!["Bob"]);
    assert!(cache.find_in_index("Name", "Ann").unwrap().is_empty());
    assert!(cache.find_in_dictionary("Id", 1_i64).unwrap().is_none());
    assert!(!ann.is_managed());
    assert_eq!(db.statements(), vec!["DELETE FROM [Users] WHERE [Id] = @p1"]);

    // A released record can be edited freely but not written back.
    ann.edit(|u| u.name = "Ghost".to_string());
    assert_eq!(ann.current().name, "Ghost");
    assert!(matches!(
        cache.delete(&ann).await,
        Err(CacheError::Usage(UsageError::NotManaged { .. }))
    ));
}

#[tokio::test]
async fn test_failed_delete_keeps_entity() {
    let rows = vec![user_row(1, "Ann")];
    let db = MockDatabase::new(move |call| {
        Ok(match call.kind {
            CallKind::Query => Response::Rows(rows.clone()),
            _ => Response::Affected(0),
        })
    });
    let cache = users(&db);
    cache.load_all().await.unwrap();
    let ann = cache.entities()[0].clone();

    assert!(matches!(
        cache.delete(&ann).await,
        Err(CacheError::Integrity(IntegrityError::UnexpectedRowCount {
            operation: "DELETE",
            ..
        }))
    ));
    assert_eq!(cache.len(), 1);
    assert!(ann.is_managed_by(cache.owner()));
}

// ============================================================================
// READ-ONLY MODE
// ============================================================================

#[tokio::test]
async fn test_read_only_mode_rejects_writes_before_touching_the_database() {
    let rows = vec![Row::new().with("Message", "boot").with("Level", 1_i64)];
    let db = MockDatabase::table(rows, 1);
    let audit: CacheItem<AuditEntry> =
        CacheItem::new(Arc::new(db.clone()), CacheItemOptions::default()).unwrap();
    assert!(audit.is_read_only());

    audit.load_all().await.unwrap();
    let entry = audit.entities()[0].clone();
    db.clear_log();

    let expected = CacheError::Usage(UsageError::ReadOnlyMode {
        table: "AuditLog".to_string(),
    });
    assert_eq!(audit.insert(&AuditEntry::default()).await.unwrap_err(), expected);
    assert_eq!(audit.update(&entry).await.unwrap_err(), expected);
    assert_eq!(audit.delete(&entry).await.unwrap_err(), expected);
    assert!(db.calls().is_empty());
    assert_eq!(db.connections_opened(), 1);
}

// ============================================================================
// STATISTICS
// ============================================================================

#[tokio::test]
async fn test_stats_count_lookups() {
    let db = MockDatabase::table(vec![user_row(1, "Ann")], 1);
    let cache = users(&db);
    cache.load_all().await.unwrap();
    cache.build_index("Name").unwrap();

    cache.find_in_index("Name", "Ann").unwrap();
    cache.find_in_index("Name", "Ann").unwrap();
    cache.find_in_index("Name", "Bob").unwrap();
    let _ = cache.find_in_index("Id", 1_i64);

    let stats = cache.stats();
    assert_eq!(stats.entity_count, 1);
    assert_eq!(stats.index_count, 1);
    assert_eq!(stats.dictionary_count, 0);
    assert_eq!((stats.hits, stats.misses), (2, 1));
    assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
}
