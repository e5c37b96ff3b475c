//! Scriptable in-memory database
//!
//! [`MockDatabase`] answers every call through a handler closure and keeps a
//! log of what was executed, so tests can assert both on results and on the
//! SQL the cache produced (or on the absence of any database traffic).

use async_trait::async_trait;
use parking_lot::Mutex;
use rowcache_core::{
    CacheResult, Connection, Connector, DatabaseError, Row, SqlValue, Statement,
};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Which connection method was invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Query,
    Execute,
    InsertReturning { identity_column: String },
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub kind: CallKind,
    pub statement: Statement,
}

impl Call {
    pub fn sql(&self) -> &str {
        &self.statement.sql
    }
}

/// What the handler answers with.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Rows(Vec<Row>),
    Affected(u64),
    Identity(Option<SqlValue>),
}

type Handler = dyn Fn(&Call) -> CacheResult<Response> + Send + Sync;

struct Inner {
    handler: Box<Handler>,
    log: Mutex<Vec<Call>>,
    opened: AtomicUsize,
    open: AtomicUsize,
}

/// Connector whose every call is answered by a closure.
#[derive(Clone)]
pub struct MockDatabase {
    inner: Arc<Inner>,
}

impl MockDatabase {
    pub fn new(handler: impl Fn(&Call) -> CacheResult<Response> + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler: Box::new(handler),
                log: Mutex::new(Vec::new()),
                opened: AtomicUsize::new(0),
                open: AtomicUsize::new(0),
            }),
        }
    }

    /// Queries return `rows`, commands affect one row, inserts return
    /// identities counting up from `first_identity`.
    pub fn table(rows: Vec<Row>, first_identity: i64) -> Self {
        let next = AtomicI64::new(first_identity);
        Self::new(move |call| {
            Ok(match call.kind {
                CallKind::Query => Response::Rows(rows.clone()),
                CallKind::Execute => Response::Affected(1),
                CallKind::InsertReturning { .. } => {
                    Response::Identity(Some(SqlValue::Int(next.fetch_add(1, Ordering::SeqCst))))
                }
            })
        })
    }

    /// Every call fails with the given reason.
    pub fn failing(reason: &'static str) -> Self {
        Self::new(move |call| Err(DatabaseError::new(call.sql(), reason).into()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.log.lock().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.inner
            .log
            .lock()
            .iter()
            .map(|c| c.statement.sql.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        self.inner.log.lock().clear();
    }

    /// Connections opened so far.
    pub fn connections_opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Connections currently not yet dropped.
    pub fn open_connections(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockDatabase {
    async fn connect(&self) -> CacheResult<Box<dyn Connection>> {
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockConnection {
    inner: Arc<Inner>,
}

impl MockConnection {
    fn dispatch(&self, kind: CallKind, statement: &Statement) -> CacheResult<Response> {
        let call = Call {
            kind,
            statement: statement.clone(),
        };
        let response = (self.inner.handler)(&call);
        self.inner.log.lock().push(call);
        response
    }
}

fn wrong_response(statement: &Statement, got: &Response) -> DatabaseError {
    DatabaseError::new(
        statement.sql.clone(),
        format!("mock handler returned {:?} for this call kind", got),
    )
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&mut self, statement: &Statement) -> CacheResult<Vec<Row>> {
        match self.dispatch(CallKind::Query, statement)? {
            Response::Rows(rows) => Ok(rows),
            other => Err(wrong_response(statement, &other).into()),
        }
    }

    async fn execute(&mut self, statement: &Statement) -> CacheResult<u64> {
        match self.dispatch(CallKind::Execute, statement)? {
            Response::Affected(n) => Ok(n),
            other => Err(wrong_response(statement, &other).into()),
        }
    }

    async fn insert_returning(
        &mut self,
        statement: &Statement,
        identity_column: &str,
    ) -> CacheResult<Option<SqlValue>> {
        let kind = CallKind::InsertReturning {
            identity_column: identity_column.to_string(),
        };
        match self.dispatch(kind, statement)? {
            Response::Identity(value) => Ok(value),
            other => Err(wrong_response(statement, &other).into()),
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.inner.open.fetch_sub(1, Ordering::SeqCst);
    }
}
