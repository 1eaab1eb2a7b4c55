//! Per-operation execution context
//!
//! Every terminal operation on [`Db`] builds one [`Scope`] and runs it
//! through the matching callback chain. The scope owns a private copy of the
//! accumulated [`Search`], the destination of the operation, the statement
//! being assembled and the errors recorded so far.

use std::sync::Arc;

use crate::backends::{DatabaseRow, ExecResult};
use crate::db::{ConnHandle, Db};
use crate::error::{ErrorList, OrmError, OrmResult};
use crate::instance::Instance;
use crate::preload::inline::InlineSlot;
use crate::schema::{Dyn, FieldDescriptor, FieldInput, RecordSink, Records, Schema};
use crate::search::render::{quote_table, Renderer};
use crate::search::{Arg, Search};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Query,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Query => "query",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// What the operation reads into or writes from
pub(crate) enum Target<'a> {
    /// Table-level statement without a record
    Table,
    One(&'a mut Dyn),
    Many(&'a mut dyn Records),
    Stream(&'a mut dyn RecordSink),
}

/// How an update chooses its columns
pub(crate) enum UpdateInput {
    /// Every persisted column of the record
    Record,
    Attrs(crate::search::Attrs),
}

/// One `SET` entry of an update
#[derive(Debug, Clone)]
pub(crate) struct UpdateColumn {
    pub(crate) column: String,
    pub(crate) field: Option<Arc<FieldDescriptor>>,
    pub(crate) value: Arg,
    /// Named by the caller's attributes rather than read from the record
    pub(crate) explicit: bool,
}

#[derive(Default)]
pub(crate) struct ScopeState {
    pub(crate) update_input: Option<UpdateInput>,
    pub(crate) update_columns: Vec<UpdateColumn>,
    /// Blank fields with a database default, reloaded after insert
    pub(crate) blank_columns_with_default: Vec<Arc<FieldDescriptor>>,
    /// Extra select values of each scanned row, in row order
    pub(crate) extra_rows: Vec<Vec<Value>>,
    pub(crate) inline: Vec<InlineSlot>,
    /// Connection to restore once the implicit transaction ends
    pub(crate) original_conn: Option<ConnHandle>,
}

/// What a finished scope hands back to its caller
#[derive(Debug, Default)]
pub(crate) struct Finished {
    pub(crate) rows_affected: u64,
    pub(crate) extra_rows: Vec<Vec<Value>>,
}

pub struct Scope<'a> {
    pub(crate) db: Db,
    pub(crate) schema: Arc<Schema>,
    pub(crate) search: Search,
    pub(crate) target: Target<'a>,
    operation: Operation,
    pub(crate) sql: String,
    pub(crate) vars: Vec<Value>,
    pub(crate) errors: ErrorList,
    pub(crate) skipped: bool,
    pub(crate) rows_affected: u64,
    pub(crate) state: ScopeState,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(db: Db, schema: Arc<Schema>, search: Search, target: Target<'a>, operation: Operation) -> Self {
        Self {
            db,
            schema,
            search,
            target,
            operation,
            sql: String::new(),
            vars: Vec::new(),
            errors: ErrorList::new(),
            skipped: false,
            rows_affected: 0,
            state: ScopeState::default(),
        }
    }

    /// Run the chain registered for this operation
    pub(crate) async fn run(mut self) -> OrmResult<Finished> {
        let callbacks = self.db.callbacks.clone();
        callbacks.chain(self.operation).run(&mut self).await;
        let Scope {
            errors,
            rows_affected,
            state,
            ..
        } = self;
        errors.into_result()?;
        Ok(Finished {
            rows_affected,
            extra_rows: state.extra_rows,
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn search(&self) -> &Search {
        &self.search
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Table override from the query, else the schema's table
    pub fn table_name(&self) -> &str {
        self.search.table_name.as_deref().unwrap_or(self.schema.table_name())
    }

    pub fn quoted_table_name(&self) -> String {
        quote_table(self.db.dialect().as_ref(), self.table_name())
    }

    /// Statement most recently assembled by the chain
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn vars(&self) -> &[Value] {
        &self.vars
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn add_error(&mut self, err: OrmError) {
        self.errors.push(err);
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &ErrorList {
        &self.errors
    }

    /// Skip every remaining callback that does not always run
    pub fn skip_left(&mut self) {
        self.skipped = true;
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn in_transaction(&self) -> bool {
        self.db.in_transaction()
    }

    /// The single record of the operation, if it has one
    pub fn record(&self) -> Option<&Dyn> {
        match &self.target {
            Target::One(value) => Some(&**value),
            _ => None,
        }
    }

    pub fn record_mut(&mut self) -> Option<&mut Dyn> {
        match &mut self.target {
            Target::One(value) => Some(&mut **value),
            _ => None,
        }
    }

    /// Every record held by the destination
    pub fn records_mut(&mut self) -> Vec<&mut Dyn> {
        match &mut self.target {
            Target::One(value) => vec![&mut **value],
            Target::Many(records) => records.items_mut(),
            Target::Table | Target::Stream(_) => Vec::new(),
        }
    }

    /// True for a record operation whose primary key is not fully set
    pub fn primary_key_zero(&mut self) -> bool {
        let schema = self.schema.clone();
        match &mut self.target {
            Target::One(value) => Instance::bind(schema, &mut **value).primary_key_zero(),
            _ => true,
        }
    }

    /// Set a field on every record, and on the pending update when one is assembled
    pub fn set_column(&mut self, name: &str, value: Value) -> OrmResult<()> {
        let schema = self.schema.clone();
        let field = schema
            .find_column(name)
            .cloned()
            .ok_or_else(|| OrmError::schema(schema.type_name(), format!("no column named {}", name)))?;
        for record in self.records_mut() {
            field.set(record, FieldInput::Value(value.clone()))?;
        }
        if self.operation == Operation::Update {
            let arg = Arg::Value(value);
            match self.state.update_columns.iter_mut().find(|c| c.column == field.column()) {
                Some(existing) => existing.value = arg,
                None => self.state.update_columns.push(UpdateColumn {
                    column: field.column().to_string(),
                    field: Some(field.clone()),
                    value: arg,
                    explicit: false,
                }),
            }
        }
        Ok(())
    }

    /// Render the SELECT for this scope into `sql` and `vars`
    pub(crate) fn prepare_query_sql(&mut self) -> OrmResult<()> {
        let shared = self.db.shared();
        let table = self.quoted_table_name();
        let mut renderer = Renderer::new(shared.dialect.as_ref(), &shared.registry);
        let sql = renderer.query_sql(
            &self.schema,
            &table,
            &self.search,
            self.record(),
            self.db.options.query_option.as_deref(),
        )?;
        self.sql = sql;
        self.vars = renderer.vars;
        Ok(())
    }

    /// Execute `sql` with `vars`, recording the affected row count
    pub(crate) async fn exec(&mut self) -> OrmResult<ExecResult> {
        let result = self.db.execute_sql(&self.sql, &self.vars, Some(&self.schema)).await?;
        self.rows_affected = result.rows_affected;
        Ok(result)
    }

    pub(crate) async fn fetch(&mut self) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = self.db.fetch_sql(&self.sql, &self.vars, Some(&self.schema)).await?;
        self.rows_affected = rows.len() as u64;
        Ok(rows)
    }
}

/// Copy one row into `dest`: the leading columns by name, the trailing
/// `extras` positionally. Returns the extra values.
pub(crate) fn scan_row(schema: &Schema, row: &dyn DatabaseRow, extras: usize, dest: &mut Dyn) -> OrmResult<Vec<Value>> {
    let names = row.column_names();
    let regular = names.len().saturating_sub(extras);
    let mut filled = vec![false; schema.fields().len()];
    for (index, name) in names.iter().enumerate().take(regular) {
        let field = schema
            .columns()
            .find(|f| f.column() == name && !filled.get(f.position()).copied().unwrap_or(true));
        if let Some(field) = field {
            if let Some(slot) = filled.get_mut(field.position()) {
                *slot = true;
            }
            field.set(dest, FieldInput::Value(row.get_by_index(index)?))?;
        }
    }
    (regular..names.len()).map(|index| row.get_by_index(index)).collect()
}
