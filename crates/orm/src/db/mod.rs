//! The query handle
//!
//! A [`Db`] bundles the shared state (registry, dialect, configuration,
//! clock), the callback chains, the connection or open transaction, the
//! accumulated [`Search`] and the per-call options. Builder methods never
//! modify the receiver: each returns a new handle, so a partially built
//! query can be reused.

mod builder;
mod operations;
mod transaction;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

pub use builder::DbBuilder;

use crate::backends::{DatabaseConnection, DatabaseRow, DatabaseTransaction, Dialect, ExecResult};
use crate::callbacks::Callbacks;
use crate::config::OrmConfig;
use crate::error::{OrmError, OrmResult};
use crate::schema::registry::schema_of;
use crate::schema::{Model, Registry, Schema};
use crate::search::{expr, Arg, Attrs, Condition, Expr, PreloadScope, Search};
use crate::value::Value;

/// Source of the current time for timestamps and soft deletes
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub(crate) struct Shared {
    pub(crate) registry: Arc<Registry>,
    pub(crate) dialect: Arc<dyn Dialect>,
    pub(crate) config: OrmConfig,
    pub(crate) clock: Clock,
}

/// Pooled connection, or a transaction every statement must run in
#[derive(Clone)]
pub(crate) enum ConnHandle {
    Pool(Arc<dyn DatabaseConnection>),
    Tx(Arc<dyn DatabaseTransaction>),
}

impl ConnHandle {
    fn connection(&self) -> &dyn DatabaseConnection {
        match self {
            ConnHandle::Pool(conn) => conn.as_ref(),
            ConnHandle::Tx(tx) => tx.connection(),
        }
    }
}

/// Per-call switches that travel with the handle
#[derive(Debug, Clone, Default)]
pub(crate) struct CallOptions {
    pub(crate) save_associations: Option<bool>,
    pub(crate) auto_create: Option<bool>,
    pub(crate) auto_update: Option<bool>,
    pub(crate) save_reference: Option<bool>,
    pub(crate) allow_global_update: bool,
    /// Write the given columns only: no hooks, timestamps or associations
    pub(crate) update_column: bool,
    pub(crate) current_user: Option<Value>,
    /// Appended to SELECT statements, e.g. `FOR UPDATE`
    pub(crate) query_option: Option<String>,
}

#[derive(Clone)]
pub struct Db {
    pub(crate) shared: Arc<Shared>,
    pub(crate) callbacks: Arc<Callbacks>,
    pub(crate) conn: ConnHandle,
    pub(crate) search: Arc<Search>,
    pub(crate) options: CallOptions,
}

impl Db {
    pub fn builder() -> DbBuilder {
        DbBuilder::new()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.shared.dialect
    }

    pub fn config(&self) -> &OrmConfig {
        &self.shared.config
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub fn search(&self) -> &Search {
        &self.search
    }

    /// Current time according to the configured clock
    pub fn now(&self) -> DateTime<Utc> {
        (self.shared.clock)()
    }

    pub fn in_transaction(&self) -> bool {
        matches!(self.conn, ConnHandle::Tx(_))
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    pub(crate) fn connection(&self) -> &dyn DatabaseConnection {
        self.conn.connection()
    }

    /// Schema of `M` from this handle's registry
    pub fn schema_of<M: Model>(&self) -> OrmResult<Arc<Schema>> {
        self.shared.registry.get_or_build::<M>()
    }

    /// Same connection and options with an empty query
    pub fn session(&self) -> Db {
        Db {
            search: Arc::new(Search::default()),
            ..self.clone()
        }
    }

    /// Replace the callback chains for handles derived from the result
    pub fn with_callbacks<F>(&self, configure: F) -> Db
    where
        F: FnOnce(&mut Callbacks),
    {
        let mut callbacks = (*self.callbacks).clone();
        configure(&mut callbacks);
        Db {
            callbacks: Arc::new(callbacks),
            ..self.clone()
        }
    }

    fn with_search<F>(&self, change: F) -> Db
    where
        F: FnOnce(&mut Search),
    {
        let mut db = self.clone();
        change(Arc::make_mut(&mut db.search));
        db
    }

    fn with_options<F>(&self, change: F) -> Db
    where
        F: FnOnce(&mut CallOptions),
    {
        let mut db = self.clone();
        change(&mut db.options);
        db
    }

    /// Target the table of `M` for table-level operations
    pub fn model<M: Model>(&self) -> Db {
        self.with_search(|s| {
            s.model(schema_of::<M>);
        })
    }

    pub fn table(&self, name: &str) -> Db {
        self.with_search(|s| {
            s.table(name);
        })
    }

    pub fn where_(&self, condition: impl Into<Condition>) -> Db {
        let condition = condition.into();
        self.with_search(|s| {
            s.where_(condition);
        })
    }

    pub fn or(&self, condition: impl Into<Condition>) -> Db {
        let condition = condition.into();
        self.with_search(|s| {
            s.or(condition);
        })
    }

    pub fn not(&self, condition: impl Into<Condition>) -> Db {
        let condition = condition.into();
        self.with_search(|s| {
            s.not(condition);
        })
    }

    pub fn having(&self, condition: impl Into<Condition>) -> Db {
        let condition = condition.into();
        self.with_search(|s| {
            s.having(condition);
        })
    }

    pub fn joins(&self, sql: &str, args: Vec<Arg>) -> Db {
        let join = Expr {
            sql: sql.to_string(),
            args,
        };
        self.with_search(|s| {
            s.joins(join);
        })
    }

    pub fn select(&self, sql: &str, args: Vec<Arg>) -> Db {
        let select = Expr {
            sql: sql.to_string(),
            args,
        };
        self.with_search(|s| {
            s.select(select);
        })
    }

    pub fn omit(&self, columns: &[&str]) -> Db {
        self.with_search(|s| {
            s.omit(columns);
        })
    }

    pub fn order(&self, order: &str) -> Db {
        let order = expr(order, Vec::new());
        self.with_search(|s| {
            s.order(order, false);
        })
    }

    /// Drop earlier orderings before adding this one
    pub fn reorder(&self, order: &str) -> Db {
        let order = expr(order, Vec::new());
        self.with_search(|s| {
            s.order(order, true);
        })
    }

    pub fn group(&self, group: &str) -> Db {
        self.with_search(|s| {
            s.group(group);
        })
    }

    pub fn limit(&self, limit: u64) -> Db {
        self.with_search(|s| {
            s.limit(Some(limit));
        })
    }

    pub fn offset(&self, offset: u64) -> Db {
        self.with_search(|s| {
            s.offset(Some(offset));
        })
    }

    /// Load the association path after the main query
    pub fn preload(&self, path: &str) -> Db {
        self.with_search(|s| {
            s.preload(path, None);
        })
    }

    /// Like [`preload`](Self::preload), narrowing the query of the last level
    pub fn preload_with<F>(&self, path: &str, narrow: F) -> Db
    where
        F: Fn(Db) -> Db + Send + Sync + 'static,
    {
        let narrow: PreloadScope = Arc::new(narrow);
        self.with_search(|s| {
            s.preload(path, Some(narrow));
        })
    }

    /// Load a belongs-to path through joins of the main query
    pub fn inline_preload(&self, path: &str) -> Db {
        self.with_search(|s| {
            s.inline_preload(path);
        })
    }

    /// Include soft-deleted rows and delete for real
    pub fn unscoped(&self) -> Db {
        self.with_search(|s| {
            s.unscoped();
        })
    }

    pub fn raw(&self, sql: &str, args: Vec<Arg>) -> Db {
        let raw = Expr {
            sql: sql.to_string(),
            args,
        };
        self.with_search(|s| {
            s.raw(raw);
        })
    }

    /// Attributes applied only when `first_or_init`/`first_or_create` find nothing
    pub fn attrs(&self, attrs: Attrs) -> Db {
        self.with_search(|s| {
            s.attrs(attrs);
        })
    }

    /// Attributes applied by `first_or_init`/`first_or_create` in every case
    pub fn assign(&self, attrs: Attrs) -> Db {
        self.with_search(|s| {
            s.assign(attrs);
        })
    }

    /// Apply reusable query fragments in order
    pub fn scopes<I, F>(&self, scopes: I) -> Db
    where
        I: IntoIterator<Item = F>,
        F: FnOnce(Db) -> Db,
    {
        scopes.into_iter().fold(self.clone(), |db, scope| scope(db))
    }

    pub(crate) fn extra_select(&self, select: Expr) -> Db {
        self.with_search(|s| {
            s.extra_selects.push(select);
        })
    }

    /// Permit table-level update and delete without conditions
    pub fn allow_global_update(&self) -> Db {
        self.with_options(|o| o.allow_global_update = true)
    }

    pub fn save_associations(&self, enabled: bool) -> Db {
        self.with_options(|o| o.save_associations = Some(enabled))
    }

    pub fn association_autocreate(&self, enabled: bool) -> Db {
        self.with_options(|o| o.auto_create = Some(enabled))
    }

    pub fn association_autoupdate(&self, enabled: bool) -> Db {
        self.with_options(|o| o.auto_update = Some(enabled))
    }

    pub fn association_save_reference(&self, enabled: bool) -> Db {
        self.with_options(|o| o.save_reference = Some(enabled))
    }

    /// Write only the given columns, skipping hooks, timestamps and associations
    pub fn update_column_mode(&self) -> Db {
        self.with_options(|o| o.update_column = true)
    }

    /// Actor recorded in `created_by_id`, `updated_by_id` and `deleted_by_id`
    pub fn with_current_user(&self, user: impl Into<Value>) -> Db {
        let user = user.into();
        self.with_options(|o| o.current_user = Some(user))
    }

    /// Suffix for SELECT statements, e.g. `FOR UPDATE`
    pub fn query_option(&self, option: &str) -> Db {
        let option = option.to_string();
        self.with_options(|o| o.query_option = Some(option))
    }

    fn log_statement(&self, sql: &str, vars: &[Value], started: Instant, rows: u64) {
        let elapsed = started.elapsed();
        let millis = elapsed.as_secs_f64() * 1000.0;
        let args = if self.shared.config.log_sql_args {
            vars.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
        } else {
            format!("{} args", vars.len())
        };
        if elapsed.as_millis() as u64 >= self.shared.config.slow_query_threshold_ms {
            tracing::warn!("slow statement ({:.3}ms, {} rows): {} [{}]", millis, rows, sql, args);
        } else {
            tracing::debug!("({:.3}ms, {} rows) {} [{}]", millis, rows, sql, args);
        }
    }

    /// Translate a driver error: unique-index violations become
    /// [`OrmError::DuplicateUniqueIndex`](crate::OrmError::DuplicateUniqueIndex),
    /// everything else carries the statement
    fn statement_error(&self, err: OrmError, sql: &str, vars: &[Value], schema: Option<&Schema>) -> OrmError {
        if let Some(schema) = schema {
            if let Some(duplicate) =
                self.shared
                    .dialect
                    .duplicate_unique_index_error(schema.indexes(), schema.table_name(), &err)
            {
                return duplicate;
            }
        }
        tracing::debug!("statement failed: {} ({})", sql, err);
        err.with_statement(sql, vars)
    }

    pub(crate) async fn execute_sql(&self, sql: &str, vars: &[Value], schema: Option<&Schema>) -> OrmResult<ExecResult> {
        let started = Instant::now();
        match self.connection().execute(sql, vars).await {
            Ok(result) => {
                self.log_statement(sql, vars, started, result.rows_affected);
                Ok(result)
            }
            Err(err) => Err(self.statement_error(err, sql, vars, schema)),
        }
    }

    pub(crate) async fn fetch_sql(
        &self,
        sql: &str,
        vars: &[Value],
        schema: Option<&Schema>,
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let started = Instant::now();
        match self.connection().fetch_all(sql, vars).await {
            Ok(rows) => {
                self.log_statement(sql, vars, started, rows.len() as u64);
                Ok(rows)
            }
            Err(err) => Err(self.statement_error(err, sql, vars, schema)),
        }
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("dialect", &self.shared.dialect.kind())
            .field("in_transaction", &self.in_transaction())
            .field("search", &self.search)
            .field("options", &self.options)
            .finish()
    }
}
