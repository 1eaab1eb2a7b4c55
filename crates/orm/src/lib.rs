//! # relmap: relational mapper core
//!
//! Models describe themselves once through [`Model::describe`]; the
//! [`Registry`] turns that into cached [`Schema`]s with resolved
//! relationships. A [`Db`] handle accumulates conditions, joins, ordering
//! and preload requests, and its terminal operations run per-operation
//! [`Scope`]s through the create, query, update and delete callback chains.
//!
//! Associations are saved around their owner according to per-call and
//! per-field policies, and loaded either with one extra query per level
//! (`preload`) or through LEFT JOINs of the main query (`inline_preload`).

pub mod backends;
pub mod callbacks;
pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod id;
pub mod instance;
pub mod naming;
pub mod preload;
pub mod schema;
pub mod scope;
pub mod search;
pub mod testing;
pub mod value;

// Re-export core traits and types
pub use backends::{
    DatabaseConnection, DatabaseRow, DatabaseTransaction, Dialect, ExecResult, MySqlDialect, PostgresConnection,
    PostgresDialect, SqliteDialect,
};
pub use callbacks::{callback_fn, Callback, CallbackChain, Callbacks};
pub use config::{ConfigError, DialectKind, OrmConfig};
pub use db::{Clock, Db, DbBuilder};
pub use error::{ErrorList, OrmError, OrmResult};
pub use hooks::{HookPoint, ModelHooks};
pub use id::{BinaryId, BinaryKey, BytesId, Id, IdPart, IdValue, IntId, StringId, UIntId};
pub use instance::Instance;
pub use naming::NamingStrategy;
pub use preload::VirtualFieldLoader;
pub use schema::{
    Assigner, ColumnAssigner, FieldBuilder, FieldDescriptor, FieldInput, KeyGenerator, Model, Records, Registry,
    Relationship, RelationshipKind, Schema, SchemaBuilder,
};
pub use scope::{Operation, Scope};
pub use search::{cond, expr, Arg, Attrs, Condition, Expr, Search};
pub use value::{ColumnType, Value, ValueKind};
