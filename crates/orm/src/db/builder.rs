//! Assembling a [`Db`] from its parts

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::{CallOptions, Clock, ConnHandle, Db, Shared};
use crate::backends::{dialect_for, DatabaseConnection, Dialect};
use crate::callbacks::Callbacks;
use crate::config::OrmConfig;
use crate::error::{OrmError, OrmResult};
use crate::schema::Registry;
use crate::search::Search;

/// Builder for [`Db`]
///
/// Only the connection is required. The dialect defaults to the one named
/// by the configuration, the registry to a fresh one using the configured
/// naming, the callbacks to the built-in chains and the clock to UTC now.
#[derive(Default)]
pub struct DbBuilder {
    connection: Option<Arc<dyn DatabaseConnection>>,
    dialect: Option<Arc<dyn Dialect>>,
    config: Option<OrmConfig>,
    registry: Option<Arc<Registry>>,
    callbacks: Option<Callbacks>,
    clock: Option<Clock>,
}

impl DbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(mut self, connection: Arc<dyn DatabaseConnection>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn config(mut self, config: OrmConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share schemas with other handles
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Time source for timestamp and soft-delete columns
    pub fn clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> chrono::DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn build(self) -> OrmResult<Db> {
        let connection = self
            .connection
            .ok_or_else(|| OrmError::Configuration("a database connection is required".to_string()))?;
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let dialect = self.dialect.unwrap_or_else(|| dialect_for(config.dialect));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(Registry::from_config(&config)));
        let clock = self.clock.unwrap_or_else(|| Arc::new(Utc::now));
        debug!("building handle for {} dialect", config.dialect);

        Ok(Db {
            shared: Arc::new(Shared {
                registry,
                dialect,
                config,
                clock,
            }),
            callbacks: Arc::new(self.callbacks.unwrap_or_default()),
            conn: ConnHandle::Pool(connection),
            search: Arc::new(Search::default()),
            options: CallOptions::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectKind;
    use crate::testing::MockConnection;

    #[test]
    fn build_requires_a_connection() {
        let err = DbBuilder::new().build().unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
    }

    #[test]
    fn dialect_follows_configuration() {
        let db = DbBuilder::new()
            .connection(Arc::new(MockConnection::new()))
            .config(OrmConfig::new().with_dialect(DialectKind::MySql))
            .build()
            .unwrap();
        assert_eq!(db.dialect().kind(), DialectKind::MySql);
        assert_eq!(db.dialect().quote("users"), "`users`");
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let result = DbBuilder::new()
            .connection(Arc::new(MockConnection::new()))
            .config(OrmConfig::new().with_table_prefix("bad prefix"))
            .build();
        assert!(matches!(result, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn injected_clock_is_used() {
        let fixed = chrono::DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let db = DbBuilder::new()
            .connection(Arc::new(MockConnection::new()))
            .clock(move || fixed)
            .build()
            .unwrap();
        assert_eq!(db.now(), fixed);
    }
}
