//! Terminal operations
//!
//! Each terminal builds a [`Scope`] over a private copy of the search and
//! runs it through the chain for its operation. Counting, plucking and raw
//! statements bypass the chains and render directly.

use std::sync::Arc;

use tracing::debug;

use super::Db;
use crate::backends::DatabaseRow;
use crate::error::{OrmError, OrmResult};
use crate::instance::Instance;
use crate::schema::access::{DynRecords, FnSink};
use crate::schema::{Dyn, FieldInput, Model, Schema};
use crate::scope::{Finished, Operation, Scope, Target, UpdateInput};
use crate::search::render::{is_identifier, quote_table, Renderer};
use crate::search::{expr, Arg, Attrs, Condition, Search};
use crate::value::Value;

impl Db {
    /// Schema selected by `model` or `table`
    fn target_schema(&self) -> OrmResult<Arc<Schema>> {
        if let Some(schema_fn) = self.search.model {
            return schema_fn(&self.shared.registry);
        }
        match &self.search.table_name {
            Some(table) => Ok(Arc::new(Schema::anonymous(table.clone()))),
            None => Err(OrmError::InvalidSql(
                "table-level operation needs a model or a table name".to_string(),
            )),
        }
    }

    fn table_for(&self, schema: &Schema) -> String {
        let table = self.search.table_name.as_deref().unwrap_or(schema.table_name());
        quote_table(self.shared.dialect.as_ref(), table)
    }

    fn scope<'t>(&self, schema: Arc<Schema>, target: Target<'t>, operation: Operation) -> Scope<'t> {
        Scope::new(self.clone(), schema, (*self.search).clone(), target, operation)
    }

    /// Insert `record`, then save its associations
    pub async fn create<M: Model>(&self, record: &mut M) -> OrmResult<()> {
        let schema = self.schema_of::<M>()?;
        self.create_value(schema, record).await
    }

    pub(crate) async fn create_value(&self, schema: Arc<Schema>, value: &mut Dyn) -> OrmResult<()> {
        self.scope(schema, Target::One(value), Operation::Create).run().await?;
        Ok(())
    }

    /// Update every column of `record`, or create it when its key is blank
    /// or no row was updated
    pub async fn save<M: Model>(&self, record: &mut M) -> OrmResult<()> {
        let schema = self.schema_of::<M>()?;
        self.save_value(schema, record).await
    }

    pub(crate) async fn save_value(&self, schema: Arc<Schema>, value: &mut Dyn) -> OrmResult<()> {
        if Instance::bind(schema.clone(), &mut *value).primary_key_zero() {
            return self.create_value(schema, value).await;
        }
        let mut scope = self.scope(schema.clone(), Target::One(&mut *value), Operation::Update);
        scope.state.update_input = Some(UpdateInput::Record);
        let finished = scope.run().await?;
        if finished.rows_affected == 0 && !self.record_exists(&schema, value).await? {
            debug!("no {} row updated, creating it", schema.type_name());
            return self.create_value(schema, value).await;
        }
        Ok(())
    }

    /// Update the given attributes of `record`, returning the affected row count
    pub async fn updates<M: Model>(&self, record: &mut M, attrs: Attrs) -> OrmResult<u64> {
        let schema = self.schema_of::<M>()?;
        let mut scope = self.scope(schema, Target::One(record), Operation::Update);
        scope.state.update_input = Some(UpdateInput::Attrs(attrs));
        Ok(scope.run().await?.rows_affected)
    }

    /// Like [`updates`](Self::updates) without hooks, timestamps or associations
    pub async fn update_columns<M: Model>(&self, record: &mut M, attrs: Attrs) -> OrmResult<u64> {
        self.update_column_mode().updates(record, attrs).await
    }

    /// Update the rows matched by the conditions of a `model` or `table` query
    pub async fn update_all(&self, attrs: Attrs) -> OrmResult<u64> {
        let schema = self.target_schema()?;
        let mut scope = self.scope(schema, Target::Table, Operation::Update);
        scope.state.update_input = Some(UpdateInput::Attrs(attrs));
        Ok(scope.run().await?.rows_affected)
    }

    /// Delete `record`; soft when the model has a `DeletedAt` column
    pub async fn delete<M: Model>(&self, record: &mut M) -> OrmResult<u64> {
        let schema = self.schema_of::<M>()?;
        Ok(self.scope(schema, Target::One(record), Operation::Delete).run().await?.rows_affected)
    }

    /// Delete the rows matched by the conditions of a `model` or `table` query
    pub async fn delete_all(&self) -> OrmResult<u64> {
        let schema = self.target_schema()?;
        Ok(self.scope(schema, Target::Table, Operation::Delete).run().await?.rows_affected)
    }

    async fn query_one(&self, schema: Arc<Schema>, dest: &mut Dyn, direction: Option<&str>) -> OrmResult<()> {
        let mut search = (*self.search).clone();
        search.limit(Some(1));
        if let (Some(direction), Some(pk)) = (direction, schema.primary_field()) {
            let order = format!(
                "{}.{} {}",
                self.table_for(&schema),
                self.shared.dialect.quote(pk.column()),
                direction
            );
            search.orders.push(expr(order, Vec::new()));
        }
        Scope::new(self.clone(), schema, search, Target::One(dest), Operation::Query)
            .run()
            .await?;
        Ok(())
    }

    /// First record ordered by primary key
    pub async fn first<M: Model>(&self) -> OrmResult<M> {
        let mut record = M::default();
        self.first_into(&mut record).await?;
        Ok(record)
    }

    /// Load the first record into `dest`; a key already set on `dest` is a condition
    pub async fn first_into<M: Model>(&self, dest: &mut M) -> OrmResult<()> {
        let schema = self.schema_of::<M>()?;
        self.query_one(schema, dest, Some("ASC")).await
    }

    /// Last record ordered by primary key
    pub async fn last<M: Model>(&self) -> OrmResult<M> {
        let schema = self.schema_of::<M>()?;
        let mut record = M::default();
        self.query_one(schema, &mut record, Some("DESC")).await?;
        Ok(record)
    }

    /// One record in no particular order
    pub async fn take<M: Model>(&self) -> OrmResult<M> {
        let schema = self.schema_of::<M>()?;
        let mut record = M::default();
        self.query_one(schema, &mut record, None).await?;
        Ok(record)
    }

    pub async fn find_by_id<M: Model>(&self, id: impl Into<Condition>) -> OrmResult<M> {
        self.where_(id).first().await
    }

    /// Every matching record
    pub async fn find<M: Model>(&self) -> OrmResult<Vec<M>> {
        let mut records = Vec::new();
        self.find_into(&mut records).await?;
        Ok(records)
    }

    /// Replace the contents of `dest` with every matching record
    pub async fn find_into<M: Model>(&self, dest: &mut Vec<M>) -> OrmResult<()> {
        let schema = self.schema_of::<M>()?;
        self.scope(schema, Target::Many(dest), Operation::Query).run().await?;
        Ok(())
    }

    /// Hand each matching record to `f` as soon as it is scanned
    ///
    /// Classic preloads are not available here; inline preloads are.
    pub async fn find_each<M, F>(&self, f: F) -> OrmResult<()>
    where
        M: Model,
        F: FnMut(M) -> OrmResult<()> + Send,
    {
        let schema = self.schema_of::<M>()?;
        let mut sink = FnSink::<M, F>::new(f);
        self.scope(schema, Target::Stream(&mut sink), Operation::Query).run().await?;
        Ok(())
    }

    pub(crate) async fn query_dyn(&self, schema: Arc<Schema>, records: &mut DynRecords) -> OrmResult<Finished> {
        self.scope(schema, Target::Many(records), Operation::Query).run().await
    }

    /// Search without ordering, paging or preloads, for aggregate selects
    fn aggregate_search(&self) -> Search {
        let mut search = (*self.search).clone();
        search.orders.clear();
        search.limit = None;
        search.offset = None;
        search.preload.clear();
        search.inline_preload.clear();
        search.extra_selects.clear();
        search.ignore_primary_select = true;
        search
    }

    async fn fetch_search(&self, schema: &Schema, search: &Search) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let shared = self.shared();
        let table = self.table_for(schema);
        let mut renderer = Renderer::new(shared.dialect.as_ref(), &shared.registry);
        let sql = renderer.query_sql(schema, &table, search, None, self.options.query_option.as_deref())?;
        self.fetch_sql(&sql, &renderer.vars, Some(schema)).await
    }

    /// Number of rows matching the conditions of a `model` or `table` query
    pub async fn count(&self) -> OrmResult<i64> {
        let schema = self.target_schema()?;
        let shared = self.shared();
        let table = self.table_for(&schema);
        let mut search = self.aggregate_search();
        let mut renderer = Renderer::new(shared.dialect.as_ref(), &shared.registry);

        let sql = if search.group.is_some() {
            let inner = renderer.query_sql(&schema, &table, &search, None, None)?;
            format!("SELECT count(*) FROM ({}) AS count_table", inner)
        } else {
            search.selects = Some(expr("count(*)", Vec::new()));
            renderer.query_sql(&schema, &table, &search, None, None)?
        };
        let rows = self.fetch_sql(&sql, &renderer.vars, Some(&schema)).await?;
        let value = match rows.first() {
            Some(row) => row.get_by_index(0)?,
            None => Value::Int(0),
        };
        value
            .as_i64()
            .ok_or_else(|| OrmError::Database(format!("count returned {}", value)))
    }

    /// Values of one column over the matching rows
    pub async fn pluck(&self, column: &str) -> OrmResult<Vec<Value>> {
        let schema = self.target_schema()?;
        let mut search = (*self.search).clone();
        search.preload.clear();
        search.inline_preload.clear();
        search.extra_selects.clear();
        let select = if is_identifier(column) {
            format!("{}.{}", self.table_for(&schema), self.shared.dialect.quote(column))
        } else {
            column.to_string()
        };
        search.selects = Some(expr(select, Vec::new()));

        let rows = self.fetch_search(&schema, &search).await?;
        rows.iter().map(|row| row.get_by_index(0)).collect()
    }

    /// Whether any row matches the conditions of a `model` or `table` query
    pub async fn exists(&self) -> OrmResult<bool> {
        let schema = self.target_schema()?;
        let mut search = self.aggregate_search();
        search.selects = Some(expr("1", Vec::new()));
        search.limit = Some(1);
        Ok(!self.fetch_search(&schema, &search).await?.is_empty())
    }

    async fn record_exists(&self, schema: &Schema, record: &Dyn) -> OrmResult<bool> {
        let shared = self.shared();
        let table = self.table_for(schema);
        let mut search = Search::default();
        search.selects = Some(expr("1", Vec::new()));
        search.limit = Some(1);
        let mut renderer = Renderer::new(shared.dialect.as_ref(), &shared.registry);
        let sql = renderer.query_sql(schema, &table, &search, Some(record), None)?;
        Ok(!self.fetch_sql(&sql, &renderer.vars, Some(schema)).await?.is_empty())
    }

    /// Copy column equality conditions and a same-typed record condition into `record`
    fn init_from_conditions(&self, schema: &Schema, record: &mut Dyn) -> OrmResult<()> {
        for condition in &self.search.where_conditions {
            match condition {
                Condition::Columns(attrs) => apply_attrs(schema, record, attrs, false)?,
                Condition::Record { value, schema: schema_fn } => {
                    let source = schema_fn(&self.shared.registry)?;
                    if source.type_id() != schema.type_id() {
                        continue;
                    }
                    for field in source.columns() {
                        if !field.is_blank(&**value) {
                            field.set(&mut *record, FieldInput::Value(field.read(&**value)?))?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// First matching record, or a new one built from the conditions and `attrs`;
    /// `assign` attributes apply in both cases. Nothing is written.
    pub async fn first_or_init<M: Model>(&self) -> OrmResult<M> {
        let schema = self.schema_of::<M>()?;
        let mut record = M::default();
        match self.first_into(&mut record).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                record = M::default();
                self.init_from_conditions(&schema, &mut record)?;
                for attrs in &self.search.init_attrs {
                    apply_attrs(&schema, &mut record, attrs, true)?;
                }
            }
            Err(err) => return Err(err),
        }
        for attrs in &self.search.assign_attrs {
            apply_attrs(&schema, &mut record, attrs, true)?;
        }
        Ok(record)
    }

    /// Like [`first_or_init`](Self::first_or_init), then creates the new
    /// record or writes the `assign` attributes to the found one
    pub async fn first_or_create<M: Model>(&self) -> OrmResult<M> {
        let schema = self.schema_of::<M>()?;
        let mut record = M::default();
        match self.first_into(&mut record).await {
            Ok(()) => {
                let assigned: Attrs = self
                    .search
                    .assign_attrs
                    .iter()
                    .flat_map(|attrs| attrs.iter().map(|(k, v)| (k.clone(), v.clone())))
                    .collect();
                if !assigned.is_empty() {
                    self.session().updates(&mut record, assigned).await?;
                }
            }
            Err(err) if err.is_not_found() => {
                record = M::default();
                self.init_from_conditions(&schema, &mut record)?;
                for attrs in self.search.init_attrs.iter().chain(&self.search.assign_attrs) {
                    apply_attrs(&schema, &mut record, attrs, true)?;
                }
                self.session().create(&mut record).await?;
            }
            Err(err) => return Err(err),
        }
        Ok(record)
    }

    /// Run a raw statement with `?` placeholders, returning the affected row count
    pub async fn exec(&self, sql: &str, args: Vec<Arg>) -> OrmResult<u64> {
        let shared = self.shared();
        let mut renderer = Renderer::new(shared.dialect.as_ref(), &shared.registry);
        let sql = renderer.substitute(sql, &args)?;
        Ok(self.execute_sql(&sql, &renderer.vars, None).await?.rows_affected)
    }

    /// Rows of the current query, or of the `raw` statement when one is set
    pub async fn rows(&self) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let schema = match (&self.search.raw, self.target_schema()) {
            (_, Ok(schema)) => schema,
            (Some(_), Err(_)) => Arc::new(Schema::anonymous("")),
            (None, Err(err)) => return Err(err),
        };
        self.fetch_search(&schema, &self.search).await
    }

    pub async fn has_table(&self, table: &str) -> OrmResult<bool> {
        self.shared.dialect.has_table(self.connection(), table).await
    }
}

/// Write the plain values of `attrs` into `record`; unknown keys are an
/// error only when `strict`
fn apply_attrs(schema: &Schema, record: &mut Dyn, attrs: &Attrs, strict: bool) -> OrmResult<()> {
    for (key, arg) in attrs {
        let Some(field) = schema.find_column(key) else {
            if strict {
                return Err(OrmError::schema(schema.type_name(), format!("{} is not a column", key)));
            }
            continue;
        };
        if let Arg::Value(value) = arg {
            field.set(&mut *record, FieldInput::Value(value.clone()))?;
        }
    }
    Ok(())
}
