//! Core Database Backend Traits
//!
//! These traits abstract the driver away from the mapper. A connection
//! executes rendered SQL with positional [`Value`] parameters, yields rows, and
//! opens transactions. Transactions expose the same connection surface so the
//! mapper can swap one for the other on a scope.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// Outcome of a statement that returns no rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Generated key reported by the driver, when it reports one
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    pub fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id: None,
        }
    }

    pub fn with_last_insert_id(mut self, id: i64) -> Self {
        self.last_insert_id = Some(id);
        self
    }
}

/// Abstract database connection trait
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Execute a statement and report affected rows
    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<ExecResult>;

    /// Execute a query and return the result rows
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query and return the first result row
    async fn fetch_optional(&self, sql: &str, params: &[Value]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    /// Begin a transaction
    async fn begin(&self) -> OrmResult<Box<dyn DatabaseTransaction>>;
}

/// Abstract database transaction trait
#[async_trait]
pub trait DatabaseTransaction: Send + Sync {
    /// Statements issued through this handle run inside the transaction
    fn connection(&self) -> &dyn DatabaseConnection;

    /// Commit the transaction
    async fn commit(&self) -> OrmResult<()>;

    /// Rollback the transaction
    async fn rollback(&self) -> OrmResult<()>;
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> OrmResult<Value>;

    /// Get column count
    fn column_count(&self) -> usize;

    /// Get column names
    fn column_names(&self) -> Vec<String>;

    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> OrmResult<Value> {
        let index = self
            .column_names()
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| OrmError::Database(format!("Column '{}' not found", name)))?;
        self.get_by_index(index)
    }

    /// Convert row to a column -> value map
    fn to_map(&self) -> OrmResult<HashMap<String, Value>> {
        let mut map = HashMap::new();
        for (i, name) in self.column_names().into_iter().enumerate() {
            map.insert(name, self.get_by_index(i)?);
        }
        Ok(map)
    }
}
