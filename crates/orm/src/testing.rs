//! In-memory connection for tests
//!
//! [`MockConnection`] records every statement with its arguments and
//! whether it ran inside a transaction, and answers from a queue of
//! scripted results. With an empty queue, statements report one affected
//! row and an increasing last-insert id, and queries return no rows.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::backends::{DatabaseConnection, DatabaseRow, DatabaseTransaction, ExecResult};
use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// A row with named columns in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockRow {
    columns: Vec<(String, Value)>,
}

impl MockRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn col(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.columns.push((name.to_string(), value.into()));
        self
    }
}

impl DatabaseRow for MockRow {
    fn get_by_index(&self, index: usize) -> OrmResult<Value> {
        self.columns
            .get(index)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| OrmError::Database(format!("Column at index {} not found", index)))
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// One executed statement
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
    pub in_transaction: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Begin,
    Commit,
    Rollback,
}

/// Scripted answer to the next statement
#[derive(Debug, Clone)]
pub enum MockResult {
    Rows(Vec<MockRow>),
    Exec(ExecResult),
    Error(OrmError),
}

#[derive(Default)]
struct MockState {
    statements: Vec<Statement>,
    results: VecDeque<MockResult>,
    events: Vec<TxEvent>,
    last_insert_id: i64,
    begin_error: Option<String>,
}

#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
    in_transaction: bool,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the rows returned by the next statement
    pub fn push_rows(&self, rows: Vec<MockRow>) -> &Self {
        self.state().results.push_back(MockResult::Rows(rows));
        self
    }

    pub fn push_exec(&self, result: ExecResult) -> &Self {
        self.state().results.push_back(MockResult::Exec(result));
        self
    }

    /// Make the next statement fail
    pub fn push_error(&self, err: OrmError) -> &Self {
        self.state().results.push_back(MockResult::Error(err));
        self
    }

    /// Make every later `begin` fail with `message`
    pub fn fail_begin(&self, message: &str) -> &Self {
        self.state().begin_error = Some(message.to_string());
        self
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.state().statements.clone()
    }

    /// SQL text of every statement, in execution order
    pub fn sqls(&self) -> Vec<String> {
        self.state().statements.iter().map(|s| s.sql.clone()).collect()
    }

    pub fn events(&self) -> Vec<TxEvent> {
        self.state().events.clone()
    }

    /// Forget recorded statements and events; queued results stay
    pub fn clear(&self) {
        let mut state = self.state();
        state.statements.clear();
        state.events.clear();
    }

    fn record(&self, sql: &str, params: &[Value]) -> Option<MockResult> {
        let mut state = self.state();
        state.statements.push(Statement {
            sql: sql.to_string(),
            args: params.to_vec(),
            in_transaction: self.in_transaction,
        });
        state.results.pop_front()
    }
}

#[async_trait]
impl DatabaseConnection for MockConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<ExecResult> {
        match self.record(sql, params) {
            Some(MockResult::Exec(result)) => Ok(result),
            Some(MockResult::Rows(rows)) => Ok(ExecResult::new(rows.len() as u64)),
            Some(MockResult::Error(err)) => Err(err),
            None => {
                let mut state = self.state();
                state.last_insert_id += 1;
                Ok(ExecResult::new(1).with_last_insert_id(state.last_insert_id))
            }
        }
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        match self.record(sql, params) {
            Some(MockResult::Rows(rows)) => Ok(rows
                .into_iter()
                .map(|row| Box::new(row) as Box<dyn DatabaseRow>)
                .collect()),
            Some(MockResult::Exec(_)) | None => Ok(Vec::new()),
            Some(MockResult::Error(err)) => Err(err),
        }
    }

    async fn begin(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let mut state = self.state();
        if let Some(message) = &state.begin_error {
            return Err(OrmError::Connection(message.clone()));
        }
        state.events.push(TxEvent::Begin);
        Ok(Box::new(MockTransaction {
            conn: MockConnection {
                state: self.state.clone(),
                in_transaction: true,
            },
        }))
    }
}

/// Transaction over the same recorded state
pub struct MockTransaction {
    conn: MockConnection,
}

#[async_trait]
impl DatabaseTransaction for MockTransaction {
    fn connection(&self) -> &dyn DatabaseConnection {
        &self.conn
    }

    async fn commit(&self) -> OrmResult<()> {
        self.conn.state().events.push(TxEvent::Commit);
        Ok(())
    }

    async fn rollback(&self) -> OrmResult<()> {
        self.conn.state().events.push(TxEvent::Rollback);
        Ok(())
    }
}
