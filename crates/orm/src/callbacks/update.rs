//! Update step and the unconditioned-write guard

use crate::error::{OrmError, OrmResult};
use crate::schema::FieldInput;
use crate::scope::{Operation, Scope, Target, UpdateColumn, UpdateInput};
use crate::search::render::{is_identifier, Renderer};
use crate::search::Arg;

const CREATION_COLUMNS: [&str; 2] = ["created_at", "created_by_id"];

/// Resolve the columns to write from the record or the given attributes
///
/// Attributes naming a field are written into the record as well; values
/// equal to what the record already holds are dropped. Nothing left to
/// write skips the rest of the chain.
pub(super) fn assign_updating_attributes(scope: &mut Scope<'_>) -> OrmResult<()> {
    let Some(input) = scope.state.update_input.take() else {
        return Ok(());
    };
    let schema = scope.schema.clone();
    let mut columns = Vec::new();

    match input {
        UpdateInput::Record => {
            let record = scope
                .record()
                .ok_or_else(|| OrmError::InvalidSql("save requires a record".to_string()))?;
            for field in schema.columns() {
                if field.is_primary_key()
                    || field.is_read_only()
                    || scope.search.is_omitted(field.column())
                    || scope.search.is_omitted(field.name())
                {
                    continue;
                }
                // creation stamps the caller never loaded stay as stored
                if CREATION_COLUMNS.contains(&field.column()) && field.is_blank(record) {
                    continue;
                }
                columns.push(UpdateColumn {
                    column: field.column().to_string(),
                    field: Some(field.clone()),
                    value: Arg::Value(field.read(record)?),
                    explicit: false,
                });
            }
        }
        UpdateInput::Attrs(attrs) => {
            for (key, value) in attrs {
                let field = schema.find_column(&key).cloned();
                let omitted = scope.search.is_omitted(&key)
                    || field.as_ref().map_or(false, |f| scope.search.is_omitted(f.column()));
                if omitted {
                    continue;
                }
                match (field, scope.record_mut()) {
                    (Some(field), Some(record)) => {
                        if let Arg::Value(plain) = &value {
                            if field.read(record)? == *plain {
                                continue;
                            }
                            field.set(record, FieldInput::Value(plain.clone()))?;
                        }
                        columns.push(UpdateColumn {
                            column: field.column().to_string(),
                            field: Some(field),
                            value,
                            explicit: true,
                        });
                    }
                    (Some(field), None) => columns.push(UpdateColumn {
                        column: field.column().to_string(),
                        field: Some(field),
                        value,
                        explicit: true,
                    }),
                    (None, _) if is_identifier(&key) => columns.push(UpdateColumn {
                        column: key,
                        field: None,
                        value,
                        explicit: true,
                    }),
                    (None, _) => {
                        return Err(OrmError::schema(
                            schema.type_name(),
                            format!("{} is not a column", key),
                        ))
                    }
                }
            }
        }
    }

    if columns.is_empty() {
        scope.skip_left();
    }
    scope.state.update_columns = columns;
    Ok(())
}

/// Refuse writes that would touch every row
pub(super) fn prevent_global_update(scope: &mut Scope<'_>) -> OrmResult<()> {
    let allowed = scope.db.options.allow_global_update || scope.db.config().allow_global_update;
    if allowed || scope.search.has_conditions() {
        return Ok(());
    }
    let operation = scope.operation();
    let table = scope.table_name().to_string();
    if matches!(scope.target, Target::One(_)) {
        if !scope.primary_key_zero() {
            return Ok(());
        }
        if operation == Operation::Update {
            return Err(OrmError::SingleUpdateRequiresKey { table });
        }
    }
    let operation = match operation {
        Operation::Update => "updating",
        _ => "deleting",
    };
    Err(OrmError::MissingWhereClause {
        operation: operation.to_string(),
        table,
    })
}

pub(super) async fn update(scope: &mut Scope<'_>) -> OrmResult<()> {
    if scope.state.update_columns.is_empty() {
        return Ok(());
    }
    let shared = scope.db.shared();
    let schema = scope.schema.clone();
    let table = scope.quoted_table_name();
    let mut renderer = Renderer::new(shared.dialect.as_ref(), &shared.registry);

    let mut sets = Vec::with_capacity(scope.state.update_columns.len());
    for column in &scope.state.update_columns {
        let target = renderer.quote(&column.column);
        let placeholder = match (&column.value, &column.field) {
            (Arg::Value(value), Some(field)) => renderer.bind_field(field, value.clone()),
            (Arg::Expr(expr), _) => renderer.substitute(&expr.sql, &expr.args)?,
            (arg, _) => renderer.bind_arg(arg)?,
        };
        sets.push(format!("{} = {}", target, placeholder));
    }
    let where_sql = renderer.where_sql(&schema, &table, &scope.search, scope.record())?;

    let mut sql = format!("UPDATE {} SET {}", table, sets.join(", "));
    if !where_sql.is_empty() {
        sql.push(' ');
        sql.push_str(&where_sql);
    }
    scope.sql = sql;
    scope.vars = renderer.vars;
    scope.exec().await?;
    Ok(())
}
