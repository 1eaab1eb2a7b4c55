//! SQL dialects
//!
//! A [`Dialect`] turns abstract pieces of a statement into one database's
//! syntax: bind placeholders, identifier quoting, LIMIT/OFFSET, column types,
//! generated-key retrieval, catalog probes and duplicate-key error parsing.

use std::fmt;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::core::DatabaseConnection;
use crate::config::DialectKind;
use crate::error::{OrmError, OrmResult};
use crate::schema::{FieldDescriptor, IndexDescriptor};
use crate::value::{Value, ValueKind};

static PG_DUPLICATE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"duplicate key value violates unique constraint "(?P<name>[^"]+)""#).ok());
static MYSQL_DUPLICATE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"Duplicate entry '.*' for key '(?:[^.']+\.)?(?P<name>[^']+)'").ok());
static SQLITE_DUPLICATE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"UNIQUE constraint failed: (?P<columns>[\w\., ]+)").ok());

#[async_trait]
pub trait Dialect: Send + Sync + fmt::Debug {
    fn kind(&self) -> DialectKind;

    /// Bind variable for the 1-based argument `position`
    fn bind_placeholder(&self, position: usize) -> String;

    fn quote(&self, identifier: &str) -> String;

    fn render_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    /// Column type for DDL
    fn data_type_for(&self, field: &FieldDescriptor) -> String;

    /// Trailing clause that makes an INSERT return the generated key;
    /// empty when the driver reports it as a last-insert id
    fn last_insert_suffix(&self, _table: &str, _column: &str) -> String {
        String::new()
    }

    /// Body of an INSERT that sets no columns
    fn default_values_clause(&self) -> &'static str {
        "DEFAULT VALUES"
    }

    /// `FROM` clause required for a bare `SELECT <values>`
    fn select_from_dummy_table(&self) -> &'static str {
        ""
    }

    /// Recognize a unique-index violation in a raw driver error
    fn duplicate_unique_index_error(
        &self,
        indexes: &[IndexDescriptor],
        table: &str,
        raw: &OrmError,
    ) -> Option<OrmError>;

    async fn has_table(&self, conn: &dyn DatabaseConnection, table: &str) -> OrmResult<bool>;

    async fn has_column(&self, conn: &dyn DatabaseConnection, table: &str, column: &str) -> OrmResult<bool>;

    async fn has_index(&self, conn: &dyn DatabaseConnection, table: &str, index: &str) -> OrmResult<bool>;
}

/// Build the dialect selected by configuration
pub fn dialect_for(kind: DialectKind) -> std::sync::Arc<dyn Dialect> {
    match kind {
        DialectKind::Postgres => std::sync::Arc::new(PostgresDialect),
        DialectKind::MySql => std::sync::Arc::new(MySqlDialect),
        DialectKind::Sqlite => std::sync::Arc::new(SqliteDialect),
    }
}

fn quote_with(identifier: &str, quote: char) -> String {
    let doubled = format!("{}{}", quote, quote);
    format!("{q}{}{q}", identifier.replace(quote, &doubled), q = quote)
}

async fn count_positive(conn: &dyn DatabaseConnection, sql: &str, params: &[Value]) -> OrmResult<bool> {
    let row = conn.fetch_optional(sql, params).await?;
    match row {
        Some(row) => Ok(row.get_by_index(0)?.as_i64().unwrap_or(0) > 0),
        None => Ok(false),
    }
}

fn raw_message(raw: &OrmError) -> Option<&str> {
    match raw.root() {
        OrmError::Database(message) => Some(message.as_str()),
        _ => None,
    }
}

fn duplicate_by_name(indexes: &[IndexDescriptor], table: &str, name: &str, message: &str) -> OrmError {
    let columns = indexes
        .iter()
        .find(|index| index.name == name)
        .map(|index| index.columns.clone())
        .unwrap_or_default();
    OrmError::DuplicateUniqueIndex {
        index: name.to_string(),
        table: table.to_string(),
        columns,
        message: message.to_string(),
    }
}

fn sized_string(field: &FieldDescriptor, max_varchar: usize) -> String {
    match field.size() {
        Some(size) if size > 0 && size < max_varchar => format!("varchar({})", size),
        _ => "text".to_string(),
    }
}

/// PostgreSQL: `$n` placeholders, `RETURNING` for generated keys
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

#[async_trait]
impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn bind_placeholder(&self, position: usize) -> String {
        format!("${}", position)
    }

    fn quote(&self, identifier: &str) -> String {
        quote_with(identifier, '"')
    }

    fn data_type_for(&self, field: &FieldDescriptor) -> String {
        let auto = field.is_auto_increment();
        match field.kind() {
            ValueKind::Bool => "boolean".to_string(),
            ValueKind::Int | ValueKind::UInt if auto => "bigserial".to_string(),
            ValueKind::Int | ValueKind::UInt => "bigint".to_string(),
            ValueKind::Float => "numeric".to_string(),
            ValueKind::String => sized_string(field, 65532),
            ValueKind::Bytes => "bytea".to_string(),
            ValueKind::Uuid => "uuid".to_string(),
            ValueKind::DateTime => "timestamp with time zone".to_string(),
            ValueKind::Date => "date".to_string(),
            ValueKind::Time => "time".to_string(),
            ValueKind::Json => "jsonb".to_string(),
        }
    }

    fn last_insert_suffix(&self, table: &str, column: &str) -> String {
        format!("RETURNING {}.{}", self.quote(table), self.quote(column))
    }

    fn duplicate_unique_index_error(
        &self,
        indexes: &[IndexDescriptor],
        table: &str,
        raw: &OrmError,
    ) -> Option<OrmError> {
        let message = raw_message(raw)?;
        let captures = PG_DUPLICATE.as_ref()?.captures(message)?;
        Some(duplicate_by_name(indexes, table, &captures["name"], message))
    }

    async fn has_table(&self, conn: &dyn DatabaseConnection, table: &str) -> OrmResult<bool> {
        count_positive(
            conn,
            "SELECT count(*) FROM INFORMATION_SCHEMA.tables WHERE table_name = $1 AND table_type = 'BASE TABLE' AND table_schema = CURRENT_SCHEMA()",
            &[Value::from(table)],
        )
        .await
    }

    async fn has_column(&self, conn: &dyn DatabaseConnection, table: &str, column: &str) -> OrmResult<bool> {
        count_positive(
            conn,
            "SELECT count(*) FROM INFORMATION_SCHEMA.columns WHERE table_name = $1 AND column_name = $2 AND table_schema = CURRENT_SCHEMA()",
            &[Value::from(table), Value::from(column)],
        )
        .await
    }

    async fn has_index(&self, conn: &dyn DatabaseConnection, table: &str, index: &str) -> OrmResult<bool> {
        count_positive(
            conn,
            "SELECT count(*) FROM pg_indexes WHERE tablename = $1 AND indexname = $2 AND schemaname = CURRENT_SCHEMA()",
            &[Value::from(table), Value::from(index)],
        )
        .await
    }
}

/// MySQL: `?` placeholders, backtick quoting, driver-reported insert ids
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

#[async_trait]
impl Dialect for MySqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn bind_placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn quote(&self, identifier: &str) -> String {
        quote_with(identifier, '`')
    }

    fn render_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        // MySQL cannot express OFFSET without LIMIT
        match (limit, offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (None, Some(offset)) => format!(" LIMIT 18446744073709551615 OFFSET {}", offset),
            (None, None) => String::new(),
        }
    }

    fn data_type_for(&self, field: &FieldDescriptor) -> String {
        let auto = if field.is_auto_increment() { " AUTO_INCREMENT" } else { "" };
        match field.kind() {
            ValueKind::Bool => "boolean".to_string(),
            ValueKind::Int => format!("bigint{}", auto),
            ValueKind::UInt => format!("bigint unsigned{}", auto),
            ValueKind::Float => "double".to_string(),
            ValueKind::String => match field.size() {
                Some(size) if size > 0 && size < 65532 => format!("varchar({})", size),
                _ => "longtext".to_string(),
            },
            ValueKind::Bytes => "longblob".to_string(),
            ValueKind::Uuid => "binary(16)".to_string(),
            ValueKind::DateTime => "datetime(6)".to_string(),
            ValueKind::Date => "date".to_string(),
            ValueKind::Time => "time".to_string(),
            ValueKind::Json => "json".to_string(),
        }
    }

    fn select_from_dummy_table(&self) -> &'static str {
        "FROM DUAL"
    }

    fn default_values_clause(&self) -> &'static str {
        "VALUES()"
    }

    fn duplicate_unique_index_error(
        &self,
        indexes: &[IndexDescriptor],
        table: &str,
        raw: &OrmError,
    ) -> Option<OrmError> {
        let message = raw_message(raw)?;
        let captures = MYSQL_DUPLICATE.as_ref()?.captures(message)?;
        Some(duplicate_by_name(indexes, table, &captures["name"], message))
    }

    async fn has_table(&self, conn: &dyn DatabaseConnection, table: &str) -> OrmResult<bool> {
        count_positive(
            conn,
            "SELECT count(*) FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND TABLE_TYPE = 'BASE TABLE'",
            &[Value::from(table)],
        )
        .await
    }

    async fn has_column(&self, conn: &dyn DatabaseConnection, table: &str, column: &str) -> OrmResult<bool> {
        count_positive(
            conn,
            "SELECT count(*) FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?",
            &[Value::from(table), Value::from(column)],
        )
        .await
    }

    async fn has_index(&self, conn: &dyn DatabaseConnection, table: &str, index: &str) -> OrmResult<bool> {
        count_positive(
            conn,
            "SELECT count(*) FROM INFORMATION_SCHEMA.STATISTICS WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND INDEX_NAME = ?",
            &[Value::from(table), Value::from(index)],
        )
        .await
    }
}

/// SQLite: `?` placeholders, double-quote quoting, rowid insert ids
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

#[async_trait]
impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn bind_placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn quote(&self, identifier: &str) -> String {
        quote_with(identifier, '"')
    }

    fn render_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (None, Some(offset)) => format!(" LIMIT -1 OFFSET {}", offset),
            (None, None) => String::new(),
        }
    }

    fn data_type_for(&self, field: &FieldDescriptor) -> String {
        match field.kind() {
            ValueKind::Bool => "bool".to_string(),
            ValueKind::Int | ValueKind::UInt if field.is_auto_increment() => {
                "integer primary key autoincrement".to_string()
            }
            ValueKind::Int | ValueKind::UInt => "bigint".to_string(),
            ValueKind::Float => "real".to_string(),
            ValueKind::String => match field.size() {
                Some(size) if size > 0 && size < 65532 => format!("varchar({})", size),
                _ => "text".to_string(),
            },
            ValueKind::Bytes | ValueKind::Uuid => "blob".to_string(),
            ValueKind::DateTime => "datetime".to_string(),
            ValueKind::Date => "date".to_string(),
            ValueKind::Time => "time".to_string(),
            ValueKind::Json => "text".to_string(),
        }
    }

    fn duplicate_unique_index_error(
        &self,
        indexes: &[IndexDescriptor],
        table: &str,
        raw: &OrmError,
    ) -> Option<OrmError> {
        let message = raw_message(raw)?;
        let captures = SQLITE_DUPLICATE.as_ref()?.captures(message)?;
        let columns: Vec<String> = captures["columns"]
            .split(',')
            .map(|qualified| {
                let qualified = qualified.trim();
                qualified.rsplit('.').next().unwrap_or(qualified).to_string()
            })
            .collect();

        let index = indexes
            .iter()
            .find(|index| index.unique && index.columns == columns)
            .map(|index| index.name.clone())
            .unwrap_or_else(|| format!("uix_{}_{}", table, columns.join("_")));

        Some(OrmError::DuplicateUniqueIndex {
            index,
            table: table.to_string(),
            columns,
            message: message.to_string(),
        })
    }

    async fn has_table(&self, conn: &dyn DatabaseConnection, table: &str) -> OrmResult<bool> {
        count_positive(
            conn,
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[Value::from(table)],
        )
        .await
    }

    async fn has_column(&self, conn: &dyn DatabaseConnection, table: &str, column: &str) -> OrmResult<bool> {
        count_positive(
            conn,
            "SELECT count(*) FROM pragma_table_info(?) WHERE name = ?",
            &[Value::from(table), Value::from(column)],
        )
        .await
    }

    async fn has_index(&self, conn: &dyn DatabaseConnection, table: &str, index: &str) -> OrmResult<bool> {
        count_positive(
            conn,
            "SELECT count(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND name = ?",
            &[Value::from(table), Value::from(index)],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_email() -> Vec<IndexDescriptor> {
        vec![IndexDescriptor {
            name: "uix_users_email".to_string(),
            unique: true,
            columns: vec!["email".to_string()],
        }]
    }

    #[test]
    fn placeholders_and_quoting() {
        assert_eq!(PostgresDialect.bind_placeholder(3), "$3");
        assert_eq!(SqliteDialect.bind_placeholder(3), "?");
        assert_eq!(PostgresDialect.quote("users"), "\"users\"");
        assert_eq!(MySqlDialect.quote("users"), "`users`");
        assert_eq!(PostgresDialect.quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn limit_offset_rendering() {
        assert_eq!(PostgresDialect.render_limit_offset(Some(10), Some(5)), " LIMIT 10 OFFSET 5");
        assert_eq!(PostgresDialect.render_limit_offset(None, None), "");
        assert_eq!(SqliteDialect.render_limit_offset(None, Some(5)), " LIMIT -1 OFFSET 5");
    }

    #[test]
    fn returning_suffix_only_for_postgres() {
        assert_eq!(PostgresDialect.last_insert_suffix("users", "id"), "RETURNING \"users\".\"id\"");
        assert_eq!(SqliteDialect.last_insert_suffix("users", "id"), "");
        assert_eq!(MySqlDialect.last_insert_suffix("users", "id"), "");
    }

    #[test]
    fn postgres_duplicate_error_is_translated() {
        let raw = OrmError::Database(
            "duplicate key value violates unique constraint \"uix_users_email\"".to_string(),
        );
        match PostgresDialect.duplicate_unique_index_error(&unique_email(), "users", &raw) {
            Some(OrmError::DuplicateUniqueIndex { index, columns, .. }) => {
                assert_eq!(index, "uix_users_email");
                assert_eq!(columns, vec!["email".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sqlite_duplicate_error_is_matched_by_columns() {
        let raw = OrmError::Database("UNIQUE constraint failed: users.email".to_string())
            .with_statement("INSERT", &[]);
        match SqliteDialect.duplicate_unique_index_error(&unique_email(), "users", &raw) {
            Some(OrmError::DuplicateUniqueIndex { index, .. }) => assert_eq!(index, "uix_users_email"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn mysql_duplicate_error_strips_table_prefix() {
        let raw = OrmError::Database("Duplicate entry 'a@b.c' for key 'users.uix_users_email'".to_string());
        match MySqlDialect.duplicate_unique_index_error(&unique_email(), "users", &raw) {
            Some(OrmError::DuplicateUniqueIndex { index, .. }) => assert_eq!(index, "uix_users_email"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unrelated_errors_are_not_translated() {
        let raw = OrmError::Database("connection reset".to_string());
        assert!(PostgresDialect.duplicate_unique_index_error(&unique_email(), "users", &raw).is_none());
    }
}
