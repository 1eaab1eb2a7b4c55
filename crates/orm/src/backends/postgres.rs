//! PostgreSQL Backend Implementation
//!
//! Connection and transaction handles over a sqlx `PgPool`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Pool, Postgres, Row, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::debug;

use super::core::*;
use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// Pool sizing for [`PostgresConnection::connect`]
#[derive(Debug, Clone)]
pub struct PostgresPoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
}

impl Default for PostgresPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600),
        }
    }
}

/// PostgreSQL connection over a shared pool
#[derive(Clone)]
pub struct PostgresConnection {
    pool: Pool<Postgres>,
}

impl PostgresConnection {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Open a pool for `database_url`
    pub async fn connect(database_url: &str, config: PostgresPoolConfig) -> OrmResult<Self> {
        if !database_url.starts_with("postgresql://") && !database_url.starts_with("postgres://") {
            return Err(OrmError::Connection("Invalid PostgreSQL URL scheme".to_string()));
        }

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds));

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| OrmError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<ExecResult> {
        let query = bind_all(sqlx::query(sql), params)?;
        let result = query.execute(&self.pool).await?;
        Ok(ExecResult::new(result.rows_affected()))
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let query = bind_all(sqlx::query(sql), params)?;
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn fetch_optional(&self, sql: &str, params: &[Value]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        let query = bind_all(sqlx::query(sql), params)?;
        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.map(|r| Box::new(PostgresRow::new(r)) as Box<dyn DatabaseRow>))
    }

    async fn begin(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::CantStartTransaction(e.to_string()))?;
        debug!("Began PostgreSQL transaction");
        Ok(Box::new(PostgresTransaction {
            tx: Mutex::new(Some(tx)),
        }))
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

#[async_trait]
impl DatabaseConnection for PostgresTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<ExecResult> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(OrmError::InvalidTransaction)?;
        let query = bind_all(sqlx::query(sql), params)?;
        let result = query.execute(&mut **tx).await?;
        Ok(ExecResult::new(result.rows_affected()))
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(OrmError::InvalidTransaction)?;
        let query = bind_all(sqlx::query(sql), params)?;
        let rows = query.fetch_all(&mut **tx).await?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn begin(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        Err(OrmError::CantStartTransaction(
            "already inside a transaction".to_string(),
        ))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    fn connection(&self) -> &dyn DatabaseConnection {
        self
    }

    async fn commit(&self) -> OrmResult<()> {
        let tx = self.tx.lock().await.take().ok_or(OrmError::InvalidTransaction)?;
        tx.commit().await?;
        debug!("Committed PostgreSQL transaction");
        Ok(())
    }

    async fn rollback(&self) -> OrmResult<()> {
        let tx = self.tx.lock().await.take().ok_or(OrmError::InvalidTransaction)?;
        tx.rollback().await?;
        debug!("Rolled back PostgreSQL transaction");
        Ok(())
    }
}

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> OrmResult<Value> {
        postgres_value(&self.row, index)
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> OrmResult<Query<'q, Postgres, PgArguments>> {
    for param in params {
        query = bind_value(query, param)?;
    }
    Ok(query)
}

/// Bind a Value to a sqlx query
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> OrmResult<Query<'q, Postgres, PgArguments>> {
    Ok(match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::UInt(u) => {
            let signed = i64::try_from(*u)
                .map_err(|_| OrmError::Database(format!("unsigned value {} exceeds BIGINT", u)))?;
            query.bind(signed)
        }
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Uuid(u) => query.bind(*u),
        Value::DateTime(dt) => query.bind(*dt),
        Value::Date(d) => query.bind(*d),
        Value::Time(t) => query.bind(*t),
        Value::Json(j) => query.bind(j.clone()),
    })
}

/// Convert a PostgreSQL column value to a Value
fn postgres_value(row: &PgRow, index: usize) -> OrmResult<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => Value::Bool(row.try_get(index)?),
        "INT2" => Value::Int(row.try_get::<i16, _>(index)? as i64),
        "INT4" => Value::Int(row.try_get::<i32, _>(index)? as i64),
        "INT8" => Value::Int(row.try_get(index)?),
        "FLOAT4" => Value::Float(row.try_get::<f32, _>(index)? as f64),
        "FLOAT8" => Value::Float(row.try_get(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::String(row.try_get(index)?),
        "BYTEA" => Value::Bytes(row.try_get(index)?),
        "UUID" => Value::Uuid(row.try_get(index)?),
        "TIMESTAMPTZ" => Value::DateTime(row.try_get(index)?),
        "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get(index)?;
            Value::DateTime(naive.and_utc())
        }
        "DATE" => Value::Date(row.try_get(index)?),
        "TIME" => Value::Time(row.try_get(index)?),
        "JSON" | "JSONB" => Value::Json(row.try_get::<JsonValue, _>(index)?),
        other => {
            let text: String = row.try_get(index).map_err(|e| {
                OrmError::Database(format!("Failed to read column of type '{}': {}", other, e))
            })?;
            Value::String(text)
        }
    };
    Ok(value)
}
