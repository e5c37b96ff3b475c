//! PostgreSQL Connector
//!
//! Connection pooling through deadpool-postgres. Statements arrive in the
//! neutral dialect the cache generates (`[Column]` identifiers, `@pN`
//! parameters) and are rewritten to PostgreSQL's (`"Column"`, `$k`) before
//! they are sent. Identity retrieval uses `RETURNING`.

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use rowcache_core::{
    driver_error, CacheResult, Connection, Connector, DatabaseError, Row, SqlValue, Statement,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;
use uuid::Uuid;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connect and pool wait timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "rowcache".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: var("ROWCACHE_DB_HOST").unwrap_or(defaults.host),
            port: var("ROWCACHE_DB_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: var("ROWCACHE_DB_NAME").unwrap_or(defaults.dbname),
            user: var("ROWCACHE_DB_USER").unwrap_or(defaults.user),
            password: var("ROWCACHE_DB_PASSWORD").unwrap_or_default(),
            max_size: var("ROWCACHE_DB_POOL_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: var("ROWCACHE_DB_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> CacheResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool = PoolConfig::new(self.max_size);
        pool.timeouts.wait = Some(self.timeout);
        pool.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::connection(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// [`Connector`] handing out pooled PostgreSQL connections.
#[derive(Clone)]
pub struct PgConnector {
    pool: Pool,
}

impl PgConnector {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> CacheResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> CacheResult<Box<dyn Connection>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DatabaseError::connection(e.to_string()))?;
        Ok(Box::new(PgConnection { client }))
    }
}

/// One pooled client, returned to the pool on drop.
pub struct PgConnection {
    client: deadpool_postgres::Object,
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&mut self, statement: &Statement) -> CacheResult<Vec<Row>> {
        let (sql, values) = translate(statement)?;
        let params: Vec<PgValue<'_>> = values.into_iter().map(PgValue).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let rows = self
            .client
            .query(sql.as_str(), &refs)
            .await
            .map_err(|e| driver_error(statement, e))?;
        rows.iter()
            .map(|row| convert_row(row).map_err(|e| driver_error(statement, e).into()))
            .collect()
    }

    async fn execute(&mut self, statement: &Statement) -> CacheResult<u64> {
        let (sql, values) = translate(statement)?;
        let params: Vec<PgValue<'_>> = values.into_iter().map(PgValue).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let affected = self
            .client
            .execute(sql.as_str(), &refs)
            .await
            .map_err(|e| driver_error(statement, e))?;
        Ok(affected)
    }

    async fn insert_returning(
        &mut self,
        statement: &Statement,
        identity_column: &str,
    ) -> CacheResult<Option<SqlValue>> {
        let (sql, values) = translate(statement)?;
        let sql = format!("{} RETURNING {}", sql, quote_identifier(identity_column));
        let params: Vec<PgValue<'_>> = values.into_iter().map(PgValue).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let row = self
            .client
            .query_opt(sql.as_str(), &refs)
            .await
            .map_err(|e| driver_error(statement, e))?;
        match row {
            Some(row) if !row.is_empty() => read_value(&row, 0)
                .map(Some)
                .map_err(|e| driver_error(statement, e).into()),
            _ => Ok(None),
        }
    }
}

// ============================================================================
// DIALECT
// ============================================================================

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Rewrite a neutral-dialect statement for PostgreSQL.
///
/// `[name]` becomes `"name"` and every distinct `@name` becomes `$k` in
/// order of first appearance; text inside single-quoted literals is copied
/// untouched. `IS`/`IS NOT` against a parameter bound to null become
/// `IS NOT DISTINCT FROM`/`IS DISTINCT FROM`. Returns the SQL with the
/// values in `$k` order.
pub fn translate(statement: &Statement) -> CacheResult<(String, Vec<&SqlValue>)> {
    let src = statement.sql.as_str();
    let mut sql = String::with_capacity(src.len() + 8);
    let mut values: Vec<&SqlValue> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut in_literal = false;
    let mut cursor = 0;

    while let Some(c) = src[cursor..].chars().next() {
        let start = cursor + c.len_utf8();
        if in_literal {
            in_literal = c != '\'';
            sql.push(c);
            cursor = start;
            continue;
        }
        match c {
            '\'' => {
                in_literal = true;
                sql.push(c);
                cursor = start;
            }
            '[' => {
                let end = src[start..]
                    .find(']')
                    .map(|n| start + n)
                    .ok_or_else(|| DatabaseError::new(src, "unterminated [identifier]"))?;
                sql.push_str(&quote_identifier(&src[start..end]));
                cursor = end + 1;
            }
            '@' => {
                let len = src[start..]
                    .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                    .unwrap_or(src.len() - start);
                if len == 0 {
                    sql.push(c);
                    cursor = start;
                    continue;
                }
                let name = &src[start..start + len];
                let value = statement.parameters.get(name).ok_or_else(|| {
                    DatabaseError::new(src, format!("unbound parameter @{}", name))
                })?;
                // PostgreSQL takes no parameter after IS: compare nulls with
                // the DISTINCT FROM forms instead.
                let null = value.is_null();
                if null && sql.ends_with(" IS NOT ") {
                    sql.truncate(sql.len() - "NOT ".len());
                    sql.push_str("DISTINCT FROM ");
                } else if null && sql.ends_with(" IS ") {
                    sql.push_str("NOT DISTINCT FROM ");
                }
                let position = *positions.entry(name).or_insert_with(|| {
                    values.push(value);
                    values.len()
                });
                sql.push_str(&format!("${}", position));
                cursor = start + len;
                if null {
                    let rest = &src[cursor..];
                    if rest.starts_with(" IS NOT ") {
                        sql.push_str(" IS DISTINCT FROM ");
                        cursor += " IS NOT ".len();
                    } else if rest.starts_with(" IS ") {
                        sql.push_str(" IS NOT DISTINCT FROM ");
                        cursor += " IS ".len();
                    }
                }
            }
            _ => {
                sql.push(c);
                cursor = start;
            }
        }
    }

    if in_literal {
        return Err(DatabaseError::new(src, "unterminated string literal").into());
    }
    Ok((sql, values))
}

// ============================================================================
// VALUE CONVERSION
// ============================================================================

/// Binds a [`SqlValue`] to whatever parameter type the server inferred.
#[derive(Debug)]
struct PgValue<'a>(&'a SqlValue);

impl ToSql for PgValue<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql(ty, out),
            SqlValue::Int(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            SqlValue::Float(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::Uuid(v) => v.to_sql(ty, out),
            SqlValue::Timestamp(v) => {
                if *ty == Type::TIMESTAMP {
                    v.naive_utc().to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            SqlValue::Bytes(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn convert_row(row: &tokio_postgres::Row) -> Result<Row, tokio_postgres::Error> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| Ok((column.name().to_string(), read_value(row, idx)?)))
        .collect()
}

fn read_value(row: &tokio_postgres::Row, idx: usize) -> Result<SqlValue, tokio_postgres::Error> {
    let ty = row.columns()[idx].type_();
    let value: SqlValue = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.into()
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.into()
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.into()
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.into()
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.into()
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.into()
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<Uuid>>(idx)?.into()
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)?.into()
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|naive| naive.and_utc())
            .into()
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)?.into()
    } else {
        row.try_get::<_, Option<String>>(idx)?.into()
    };
    Ok(value)
}
