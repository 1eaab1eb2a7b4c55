//! Error types for the mapper
//!
//! Every fallible operation returns [`OrmResult`]. Operations that run a
//! callback chain accumulate failures in an [`ErrorList`] and surface either
//! the single recorded error or [`OrmError::Multiple`].

use std::fmt;

use crate::value::Value;

/// Result type alias for mapper operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for mapper operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrmError {
    /// Zero rows matched a single-record lookup
    #[error("record not found")]
    RecordNotFound,

    /// The statement could not be assembled
    #[error("invalid SQL: {0}")]
    InvalidSql(String),

    /// Commit or rollback requested outside of a transaction
    #[error("no valid transaction")]
    InvalidTransaction,

    /// The connection refused to open a transaction
    #[error("cannot start transaction: {0}")]
    CantStartTransaction(String),

    /// A write targeted a value that cannot be written through
    #[error("using unaddressable value: {0}")]
    Unaddressable(String),

    /// A record update had neither a primary key nor conditions
    #[error("update of a single {table} record requires a primary key or conditions")]
    SingleUpdateRequiresKey { table: String },

    /// A table-level update or delete had no conditions
    #[error("missing WHERE clause while {operation} table {table}")]
    MissingWhereClause { operation: String, table: String },

    /// The database rejected a write because of a unique index
    #[error("duplicate value for unique index {index} on {table} ({})", .columns.join(", "))]
    DuplicateUniqueIndex {
        index: String,
        table: String,
        columns: Vec<String>,
        message: String,
    },

    /// The declaration of a model is malformed
    #[error("schema error for {type_name}: {message}")]
    Schema { type_name: String, message: String },

    /// An association could not be resolved
    #[error("relationship error for {type_name}.{field}: {message}")]
    Relationship {
        type_name: String,
        field: String,
        message: String,
    },

    /// A value could not be written into a field
    #[error("type mismatch for {field}: expected {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// An identifier could not be encoded or decoded
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// A preload path could not be served
    #[error("preload error: {0}")]
    Preload(String),

    /// A statement failed; carries the statement for diagnostics
    #[error("{source} [sql: {sql}] [args: {}]", .args.join(", "))]
    Query {
        sql: String,
        args: Vec<String>,
        #[source]
        source: Box<OrmError>,
    },

    /// Driver-level failure
    #[error("database error: {0}")]
    Database(String),

    /// Connection-level failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Callback chain misuse
    #[error("callback error: {0}")]
    Callback(String),

    /// A model hook failed
    #[error("{hook} hook failed: {message}")]
    Hook { hook: String, message: String },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Several errors recorded during one operation
    #[error("{0}")]
    Multiple(ErrorList),
}

impl OrmError {
    /// True when this error is, or wraps, [`OrmError::RecordNotFound`]
    pub fn is_not_found(&self) -> bool {
        match self {
            OrmError::RecordNotFound => true,
            OrmError::Query { source, .. } => source.is_not_found(),
            OrmError::Multiple(list) => list.iter().any(OrmError::is_not_found),
            _ => false,
        }
    }

    /// Wrap a statement failure with the offending SQL and arguments
    pub fn with_statement(self, sql: &str, args: &[Value]) -> Self {
        match self {
            OrmError::RecordNotFound
            | OrmError::DuplicateUniqueIndex { .. }
            | OrmError::Query { .. } => self,
            other => OrmError::Query {
                sql: sql.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through statement wrappers
    pub fn root(&self) -> &OrmError {
        match self {
            OrmError::Query { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn schema(type_name: &str, message: impl Into<String>) -> Self {
        OrmError::Schema {
            type_name: type_name.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn relationship(type_name: &str, field: &str, message: impl Into<String>) -> Self {
        OrmError::Relationship {
            type_name: type_name.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Errors recorded while running one operation, deduplicated by equality
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorList(Vec<OrmError>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error unless an equal one is already present
    pub fn push(&mut self, err: OrmError) {
        match err {
            OrmError::Multiple(list) => {
                for inner in list.0 {
                    self.push(inner);
                }
            }
            err => {
                if !self.0.contains(&err) {
                    self.0.push(err);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OrmError> {
        self.0.iter()
    }

    /// Collapse into a result: no errors is `Ok`, one error is itself
    pub fn into_result(mut self) -> OrmResult<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(OrmError::Multiple(self)),
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => OrmError::RecordNotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => OrmError::Connection(err.to_string()),
            other => OrmError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::TypeMismatch {
            field: "json".to_string(),
            expected: "valid JSON".to_string(),
            found: err.to_string(),
        }
    }
}

impl From<crate::config::ConfigError> for OrmError {
    fn from(err: crate::config::ConfigError) -> Self {
        OrmError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_list_deduplicates_equal_errors() {
        let mut list = ErrorList::new();
        list.push(OrmError::RecordNotFound);
        list.push(OrmError::RecordNotFound);
        list.push(OrmError::InvalidTransaction);
        assert_eq!(list.len(), 2);

        match list.into_result() {
            Err(OrmError::Multiple(inner)) => assert_eq!(inner.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn single_error_is_returned_unwrapped() {
        let mut list = ErrorList::new();
        list.push(OrmError::InvalidTransaction);
        assert_eq!(list.into_result(), Err(OrmError::InvalidTransaction));
    }

    #[test]
    fn not_found_is_detected_through_wrappers() {
        let wrapped = OrmError::Database("boom".into()).with_statement("SELECT 1", &[Value::Int(1)]);
        assert!(!wrapped.is_not_found());
        assert!(wrapped.to_string().contains("SELECT 1"));

        let mut list = ErrorList::new();
        list.push(OrmError::Database("boom".into()));
        list.push(OrmError::RecordNotFound);
        assert!(OrmError::Multiple(list).is_not_found());
    }

    #[test]
    fn sqlx_row_not_found_maps_to_record_not_found() {
        let err: OrmError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }
}
