//! Relation join evaluator
//!
//! Loads the rows of a target table that match a two-entity predicate for at
//! least one row of a related, already-materialised collection. The compiled
//! predicate is a template: for every related entity its qualified columns
//! are replaced with that entity's values, parameters are inlined as
//! literals, and the target's qualification is stripped. Each resolved
//! clause becomes one `SELECT * FROM [table] WHERE ...` on its own
//! connection; the results are concatenated in related-entity order and not
//! deduplicated.

use crate::compiler::{compile_relation, WherePart};
use crate::expr::Expr;
use futures_util::future::try_join_all;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rowcache_core::{CacheResult, Connector, Entity, ExpressionError, Row, SqlValue, Statement};
use std::marker::PhantomData;
use tracing::debug;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]]+)\]\.\[([^\]]+)\]|@(p\d+)").expect("placeholder pattern is valid")
});

/// A compiled two-entity predicate, ready to be resolved per related row.
#[derive(Debug, Clone)]
pub struct RelationTemplate<T, R> {
    part: WherePart,
    target_entity: String,
    related_entity: String,
    _types: PhantomData<fn() -> (T, R)>,
}

impl<T: Entity, R: Entity> RelationTemplate<T, R> {
    pub fn compile(expr: &Expr) -> Result<Self, ExpressionError> {
        Ok(Self {
            part: compile_relation::<T, R>(expr)?,
            target_entity: T::schema().entity().to_string(),
            related_entity: R::schema().entity().to_string(),
            _types: PhantomData,
        })
    }

    pub fn where_part(&self) -> &WherePart {
        &self.part
    }

    /// Resolve the template against one related entity.
    pub fn resolve(&self, related: &R) -> String {
        PLACEHOLDER
            .replace_all(&self.part.sql, |caps: &Captures<'_>| {
                if let Some(name) = caps.get(3) {
                    return self
                        .part
                        .parameters
                        .get(name.as_str())
                        .map(SqlValue::to_sql_literal)
                        .unwrap_or_else(|| caps[0].to_string());
                }
                let (entity, column) = (&caps[1], &caps[2]);
                if entity == self.related_entity {
                    related
                        .get(column)
                        .unwrap_or(SqlValue::Null)
                        .to_sql_literal()
                } else if entity == self.target_entity {
                    format!("[{}]", column)
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// One statement per related entity, in input order.
    pub fn statements(&self, table: &str, related: &[R]) -> Vec<Statement> {
        related
            .iter()
            .map(|r| Statement::new(format!("SELECT * FROM [{}] WHERE {}", table, self.resolve(r))))
            .collect()
    }
}

/// Run every statement on its own connection, concurrently, and concatenate
/// the rows in statement order. The first failure aborts the whole call.
pub async fn fetch_all(connector: &dyn Connector, statements: &[Statement]) -> CacheResult<Vec<Row>> {
    let queries = statements.iter().map(|statement| async move {
        let mut conn = connector.connect().await?;
        debug!(sql = %statement.sql, "relation query");
        conn.query(statement).await
    });
    let batches = try_join_all(queries).await?;
    Ok(batches.into_iter().flatten().collect())
}

/// Compile, resolve and execute in one step. Returns the rows together with
/// the statements that produced them.
pub async fn load_related<T: Entity, R: Entity>(
    connector: &dyn Connector,
    table: &str,
    expr: &Expr,
    related: &[R],
) -> CacheResult<(Vec<Row>, Vec<Statement>)> {
    let template = RelationTemplate::<T, R>::compile(expr)?;
    let statements = template.statements(table, related);
    let rows = fetch_all(connector, &statements).await?;
    Ok((rows, statements))
}
