//! Database Backend Abstractions
//!
//! Connection traits, SQL dialects, and the PostgreSQL driver adapter.

pub mod core;
pub mod dialect;
pub mod postgres;

pub use self::core::{DatabaseConnection, DatabaseRow, DatabaseTransaction, ExecResult};
pub use dialect::{dialect_for, Dialect, MySqlDialect, PostgresDialect, SqliteDialect};
pub use postgres::{PostgresConnection, PostgresPoolConfig, PostgresRow, PostgresTransaction};
