//! Mapper configuration
//!
//! Settings can be built in code, deserialized with serde, or read from
//! `RELMAP_*` environment variables.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Which SQL dialect the mapper renders for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    Postgres,
    MySql,
    Sqlite,
}

impl Default for DialectKind {
    fn default() -> Self {
        DialectKind::Postgres
    }
}

impl FromStr for DialectKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DialectKind::Postgres),
            "mysql" => Ok(DialectKind::MySql),
            "sqlite" | "sqlite3" => Ok(DialectKind::Sqlite),
            _ => Err(ConfigError::InvalidValue {
                field: "dialect".to_string(),
                value: s.to_string(),
                expected: "postgres, mysql, or sqlite".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for DialectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DialectKind::Postgres => "postgres",
            DialectKind::MySql => "mysql",
            DialectKind::Sqlite => "sqlite",
        };
        write!(f, "{}", name)
    }
}

/// Global mapper settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    pub dialect: DialectKind,
    /// Prepended to every generated table name
    pub table_prefix: String,
    /// Use `user` instead of `users` for generated table names
    pub singular_table: bool,
    /// Do not wrap create/update/delete in an implicit transaction
    pub skip_default_transaction: bool,
    /// Permit table-level update/delete without conditions
    pub allow_global_update: bool,
    /// Statements slower than this are logged at warn level
    pub slow_query_threshold_ms: u64,
    /// Include bound arguments in statement logs
    pub log_sql_args: bool,
}

impl OrmConfig {
    pub fn new() -> Self {
        Self {
            dialect: DialectKind::Postgres,
            table_prefix: String::new(),
            singular_table: false,
            skip_default_transaction: false,
            allow_global_update: false,
            slow_query_threshold_ms: 200,
            log_sql_args: false,
        }
    }

    pub fn with_dialect(mut self, dialect: DialectKind) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn with_singular_table(mut self, singular: bool) -> Self {
        self.singular_table = singular;
        self
    }

    pub fn with_skip_default_transaction(mut self, skip: bool) -> Self {
        self.skip_default_transaction = skip;
        self
    }

    pub fn with_allow_global_update(mut self, allow: bool) -> Self {
        self.allow_global_update = allow;
        self
    }

    /// Load configuration from `RELMAP_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(dialect) = lookup("RELMAP_DIALECT") {
            config.dialect = dialect.parse()?;
        }

        if let Some(prefix) = lookup("RELMAP_TABLE_PREFIX") {
            config.table_prefix = prefix;
        }

        if let Some(value) = lookup("RELMAP_SINGULAR_TABLE") {
            config.singular_table = parse_flag("singular_table", &value)?;
        }

        if let Some(value) = lookup("RELMAP_SKIP_DEFAULT_TRANSACTION") {
            config.skip_default_transaction = parse_flag("skip_default_transaction", &value)?;
        }

        if let Some(value) = lookup("RELMAP_ALLOW_GLOBAL_UPDATE") {
            config.allow_global_update = parse_flag("allow_global_update", &value)?;
        }

        if let Some(value) = lookup("RELMAP_SLOW_QUERY_MS") {
            config.slow_query_threshold_ms = value.parse().map_err(|_| ConfigError::InvalidValue {
                field: "slow_query_threshold_ms".to_string(),
                value: value.clone(),
                expected: "a whole number of milliseconds".to_string(),
            })?;
        }

        if let Some(value) = lookup("RELMAP_LOG_SQL_ARGS") {
            config.log_sql_args = parse_flag("log_sql_args", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidValue {
                field: "table_prefix".to_string(),
                value: self.table_prefix.clone(),
                expected: "ASCII letters, digits and underscores".to_string(),
            });
        }

        if self.table_prefix.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(ConfigError::ValidationFailed {
                message: "table_prefix must not start with a digit".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_flag(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_postgres_with_transactions() {
        let config = OrmConfig::default();
        assert_eq!(config.dialect, DialectKind::Postgres);
        assert!(!config.skip_default_transaction);
        assert!(!config.allow_global_update);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_settings_from_lookup() {
        let config = OrmConfig::from_lookup(lookup_from(&[
            ("RELMAP_DIALECT", "sqlite"),
            ("RELMAP_TABLE_PREFIX", "app_"),
            ("RELMAP_SINGULAR_TABLE", "yes"),
            ("RELMAP_SLOW_QUERY_MS", "50"),
        ]))
        .unwrap();

        assert_eq!(config.dialect, DialectKind::Sqlite);
        assert_eq!(config.table_prefix, "app_");
        assert!(config.singular_table);
        assert_eq!(config.slow_query_threshold_ms, 50);
    }

    #[test]
    fn rejects_bad_values() {
        let err = OrmConfig::from_lookup(lookup_from(&[("RELMAP_DIALECT", "oracle")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "dialect"));

        let err = OrmConfig::from_lookup(lookup_from(&[("RELMAP_TABLE_PREFIX", "bad-prefix")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "table_prefix"));

        let err = OrmConfig::from_lookup(lookup_from(&[("RELMAP_LOG_SQL_ARGS", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: OrmConfig = serde_json::from_str(r#"{"dialect":"mysql","singular_table":true}"#).unwrap();
        assert_eq!(config.dialect, DialectKind::MySql);
        assert!(config.singular_table);
        assert_eq!(config.slow_query_threshold_ms, 200);
    }
}
