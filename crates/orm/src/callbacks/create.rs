//! Insert step

use crate::error::{OrmError, OrmResult};
use crate::schema::FieldInput;
use crate::scope::Scope;
use crate::search::render::Renderer;
use crate::value::Value;

/// Fill blank primary keys that declare a generator
pub(super) fn generate_primary_key(scope: &mut Scope<'_>) -> OrmResult<()> {
    let schema = scope.schema.clone();
    for record in scope.records_mut() {
        for field in schema.primary_fields() {
            if let Some(generator) = &field.options().generator {
                if field.is_blank(record) {
                    field.set(record, FieldInput::Value(generator.generate()))?;
                }
            }
        }
    }
    Ok(())
}

pub(super) async fn create(scope: &mut Scope<'_>) -> OrmResult<()> {
    let shared = scope.db.shared();
    let dialect = shared.dialect.as_ref();
    let schema = scope.schema.clone();
    let table = scope.quoted_table_name();
    let record = scope
        .record()
        .ok_or_else(|| OrmError::InvalidSql("create requires a record".to_string()))?;

    let mut renderer = Renderer::new(dialect, &shared.registry);
    let mut columns = Vec::new();
    let mut placeholders = Vec::new();
    let mut blank_with_default = Vec::new();
    for field in schema.columns() {
        if field.is_read_only() || scope.search.is_omitted(field.column()) || scope.search.is_omitted(field.name()) {
            continue;
        }
        let blank = field.is_blank(record);
        if blank && field.has_default() {
            blank_with_default.push(field.clone());
            continue;
        }
        if blank && field.is_primary_key() {
            continue;
        }
        columns.push(renderer.quote(field.column()));
        let value = field.read(record)?;
        placeholders.push(renderer.bind_field(field, value));
    }

    // a single blank key is generated by the database
    let generated = match schema.primary_field() {
        Some(pk) if schema.primary_fields().count() == 1 && pk.is_blank(record) => Some(pk.clone()),
        _ => None,
    };
    let suffix = generated
        .as_ref()
        .map(|pk| dialect.last_insert_suffix(scope.table_name(), pk.column()))
        .unwrap_or_default();

    let mut sql = if columns.is_empty() {
        format!("INSERT INTO {} {}", table, dialect.default_values_clause())
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(","),
            placeholders.join(",")
        )
    };
    if !suffix.is_empty() {
        sql.push(' ');
        sql.push_str(&suffix);
    }

    scope.state.blank_columns_with_default = blank_with_default;
    scope.sql = sql;
    scope.vars = renderer.vars;

    match generated {
        Some(pk) if !suffix.is_empty() => {
            let rows = scope.fetch().await?;
            if let Some(row) = rows.first() {
                let key = row.get_by_index(0)?;
                if let Some(record) = scope.record_mut() {
                    pk.set(record, FieldInput::Value(key))?;
                }
            }
        }
        Some(pk) => {
            let result = scope.exec().await?;
            if let (Some(key), Some(record)) = (result.last_insert_id, scope.record_mut()) {
                pk.set(record, FieldInput::Value(Value::Int(key)))?;
            }
        }
        None => {
            scope.exec().await?;
        }
    }
    Ok(())
}

/// Read back columns that were left to their database default
pub(super) async fn force_reload_after_create(scope: &mut Scope<'_>) -> OrmResult<()> {
    let fields = std::mem::take(&mut scope.state.blank_columns_with_default);
    let schema = scope.schema.clone();
    if fields.is_empty() || !schema.has_primary_key() {
        return Ok(());
    }
    let shared = scope.db.shared();
    let table = scope.quoted_table_name();
    let mut renderer = Renderer::new(shared.dialect.as_ref(), &shared.registry);
    let record = scope
        .record()
        .ok_or_else(|| OrmError::InvalidSql("reload requires a record".to_string()))?;

    let select: Vec<String> = fields.iter().map(|f| renderer.quote(f.column())).collect();
    let mut keys = Vec::new();
    for pk in schema.primary_fields() {
        let value = pk.read(record)?;
        let placeholder = renderer.bind_field(pk, value);
        keys.push(format!("{}.{} = {}", table, renderer.quote(pk.column()), placeholder));
    }
    let sql = format!("SELECT {} FROM {} WHERE {}", select.join(","), table, keys.join(" AND "));

    let rows = scope.db.fetch_sql(&sql, &renderer.vars, Some(&schema)).await?;
    if let (Some(row), Some(record)) = (rows.first(), scope.record_mut()) {
        for (index, field) in fields.iter().enumerate() {
            field.set(record, FieldInput::Value(row.get_by_index(index)?))?;
        }
    }
    Ok(())
}
