//! One query per association level, keyed by the owners' values

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backends::Dialect;
use crate::db::Db;
use crate::error::{OrmError, OrmResult};
use crate::schema::access::DynRecords;
use crate::schema::{Dyn, FieldDescriptor, Relationship, RelationshipKind, Schema};
use crate::search::render::quote_table;
use crate::search::{cond, expr, Arg, Condition, PreloadScope};
use crate::value::Value;

pub(super) async fn load(
    db: &Db,
    owner: &Schema,
    field: &FieldDescriptor,
    relationship: &Relationship,
    records: &mut [&mut Dyn],
    narrow: Option<PreloadScope>,
) -> OrmResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    match relationship.kind {
        RelationshipKind::HasOne | RelationshipKind::HasMany => {
            has(db, owner, field, relationship, records, narrow).await
        }
        RelationshipKind::BelongsTo => belongs_to(db, owner, field, relationship, records, narrow).await,
        RelationshipKind::ManyToMany => many_to_many(db, owner, field, relationship, records, narrow).await,
    }
}

fn key_fields(schema: &Schema, names: &[String]) -> OrmResult<Vec<Arc<FieldDescriptor>>> {
    names
        .iter()
        .map(|name| {
            schema
                .find_field(name)
                .cloned()
                .ok_or_else(|| OrmError::Preload(format!("{} has no key field {}", schema.type_name(), name)))
        })
        .collect()
}

fn key_of(fields: &[Arc<FieldDescriptor>], record: &Dyn) -> OrmResult<Vec<Value>> {
    fields.iter().map(|f| f.read(record)).collect()
}

/// Distinct key tuples of `records`, first-seen order, skipping any with a NULL part
fn distinct_keys(fields: &[Arc<FieldDescriptor>], records: &[&mut Dyn]) -> OrmResult<Vec<Vec<Value>>> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for record in records {
        let key = key_of(fields, &**record)?;
        if key.iter().any(Value::is_null) {
            continue;
        }
        if seen.insert(Value::tuple_key(&key)) {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// `t.c IN (?)` for one column, `(t.a,t.b) IN ((?,?),..)` for several
fn in_condition(dialect: &dyn Dialect, table: &str, columns: &[String], keys: &[Vec<Value>]) -> Condition {
    let quoted: Vec<String> = columns
        .iter()
        .map(|c| format!("{}.{}", table, dialect.quote(c)))
        .collect();
    if quoted.len() == 1 {
        let values = keys
            .iter()
            .map(|k| k.first().cloned().unwrap_or(Value::Null))
            .collect();
        return cond(format!("{} IN (?)", quoted.join("")), vec![Arg::List(values)]);
    }
    let tuple = format!("({})", vec!["?"; quoted.len()].join(","));
    let sql = format!("({}) IN ({})", quoted.join(","), vec![tuple; keys.len()].join(","));
    cond(sql, keys.iter().flatten().cloned().map(Arg::Value).collect())
}

/// Group result indexes by the tuple key computed for each
fn group<I>(keys: I) -> HashMap<String, Vec<usize>>
where
    I: IntoIterator<Item = Vec<Value>>,
{
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, key) in keys.into_iter().enumerate() {
        groups.entry(Value::tuple_key(&key)).or_default().push(index);
    }
    groups
}

/// Replace the association slot of each record with its matches
fn assign(
    field: &FieldDescriptor,
    associated: &Schema,
    owner_fields: &[Arc<FieldDescriptor>],
    records: &mut [&mut Dyn],
    results: &DynRecords,
    groups: &HashMap<String, Vec<usize>>,
    many: bool,
) -> OrmResult<()> {
    for record in records.iter_mut() {
        let key = Value::tuple_key(&key_of(owner_fields, &**record)?);
        field.clear_associated(&mut **record)?;
        let Some(matches) = groups.get(&key) else {
            continue;
        };
        let take = if many { matches.len() } else { 1 };
        for index in matches.iter().take(take) {
            if let Some(item) = results.items.get(*index) {
                field.push_associated(&mut **record, associated.clone_value(item.as_ref())?)?;
            }
        }
    }
    Ok(())
}

fn narrowed(query: Db, narrow: Option<PreloadScope>) -> Db {
    match narrow {
        Some(narrow) => narrow(query),
        None => query,
    }
}

async fn has(
    db: &Db,
    owner: &Schema,
    field: &FieldDescriptor,
    relationship: &Relationship,
    records: &mut [&mut Dyn],
    narrow: Option<PreloadScope>,
) -> OrmResult<()> {
    let associated = relationship.associated.clone();
    let owner_fields = key_fields(owner, &relationship.association_foreign_field_names)?;
    let foreign_fields = key_fields(&associated, &relationship.foreign_field_names)?;
    let keys = distinct_keys(&owner_fields, records)?;
    if keys.is_empty() {
        return Ok(());
    }

    let dialect = db.dialect().clone();
    let table = quote_table(dialect.as_ref(), associated.table_name());
    let mut query = db.where_(in_condition(dialect.as_ref(), &table, &relationship.foreign_db_names, &keys));
    if let Some(polymorphic) = &relationship.polymorphic {
        query = query.where_(cond(
            format!("{}.{} = ?", table, dialect.quote(&polymorphic.type_column)),
            vec![Arg::from(polymorphic.value.clone())],
        ));
    }
    let query = narrowed(query, narrow);

    let mut results = DynRecords::new(associated.clone());
    query.query_dyn(associated.clone(), &mut results).await?;

    let result_keys = results
        .items
        .iter()
        .map(|item| key_of(&foreign_fields, item.as_ref()))
        .collect::<OrmResult<Vec<_>>>()?;
    let groups = group(result_keys);
    assign(
        field,
        &associated,
        &owner_fields,
        records,
        &results,
        &groups,
        relationship.kind == RelationshipKind::HasMany,
    )
}

async fn belongs_to(
    db: &Db,
    owner: &Schema,
    field: &FieldDescriptor,
    relationship: &Relationship,
    records: &mut [&mut Dyn],
    narrow: Option<PreloadScope>,
) -> OrmResult<()> {
    let associated = relationship.associated.clone();
    let owner_fields = key_fields(owner, &relationship.foreign_field_names)?;
    let target_fields = key_fields(&associated, &relationship.association_foreign_field_names)?;
    let keys = distinct_keys(&owner_fields, records)?;
    if keys.is_empty() {
        return Ok(());
    }

    let dialect = db.dialect().clone();
    let table = quote_table(dialect.as_ref(), associated.table_name());
    let query = db.where_(in_condition(
        dialect.as_ref(),
        &table,
        &relationship.association_foreign_db_names,
        &keys,
    ));
    let query = narrowed(query, narrow);

    let mut results = DynRecords::new(associated.clone());
    query.query_dyn(associated.clone(), &mut results).await?;

    let result_keys = results
        .items
        .iter()
        .map(|item| key_of(&target_fields, item.as_ref()))
        .collect::<OrmResult<Vec<_>>>()?;
    let groups = group(result_keys);
    assign(field, &associated, &owner_fields, records, &results, &groups, false)
}

async fn many_to_many(
    db: &Db,
    owner: &Schema,
    field: &FieldDescriptor,
    relationship: &Relationship,
    records: &mut [&mut Dyn],
    narrow: Option<PreloadScope>,
) -> OrmResult<()> {
    let join = relationship
        .join_table
        .as_ref()
        .ok_or_else(|| OrmError::Preload(format!("{} has no join table", relationship.field_name)))?;
    let associated = relationship.associated.clone();
    let source_names: Vec<String> = join.source_keys.iter().map(|k| k.field_name.clone()).collect();
    let owner_fields = key_fields(owner, &source_names)?;
    let keys = distinct_keys(&owner_fields, records)?;
    if keys.is_empty() {
        return Ok(());
    }

    let dialect = db.dialect().clone();
    let table = quote_table(dialect.as_ref(), associated.table_name());
    let join_table = quote_table(dialect.as_ref(), &join.table);
    let on = join
        .destination_keys
        .iter()
        .map(|k| {
            format!(
                "{}.{} = {}.{}",
                join_table,
                dialect.quote(&k.column),
                table,
                dialect.quote(&k.field_column)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    let source_columns: Vec<String> = join.source_keys.iter().map(|k| k.column.clone()).collect();

    let mut query = db
        .joins(&format!("INNER JOIN {} ON {}", join_table, on), Vec::new())
        .where_(in_condition(dialect.as_ref(), &join_table, &source_columns, &keys));
    for column in &source_columns {
        query = query.extra_select(expr(format!("{}.{}", join_table, dialect.quote(column)), Vec::new()));
    }
    let query = narrowed(query, narrow);

    let mut results = DynRecords::new(associated.clone());
    let finished = query.query_dyn(associated.clone(), &mut results).await?;

    let groups = group(finished.extra_rows);
    assign(field, &associated, &owner_fields, records, &results, &groups, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{PostgresDialect, SqliteDialect};

    #[test]
    fn single_column_keys_render_a_list() {
        let keys = vec![vec![Value::Int(1)], vec![Value::Int(2)]];
        let condition = in_condition(&SqliteDialect, "\"toys\"", &["owner_id".to_string()], &keys);
        match condition {
            Condition::Sql { sql, args } => {
                assert_eq!(sql, "\"toys\".\"owner_id\" IN (?)");
                assert_eq!(args, vec![Arg::List(vec![Value::Int(1), Value::Int(2)])]);
            }
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn composite_keys_render_row_values() {
        let keys = vec![
            vec![Value::Int(1), Value::from("a")],
            vec![Value::Int(2), Value::from("b")],
        ];
        let columns = ["org_id".to_string(), "code".to_string()];
        let condition = in_condition(&PostgresDialect, "\"t\"", &columns, &keys);
        match condition {
            Condition::Sql { sql, args } => {
                assert_eq!(sql, "(\"t\".\"org_id\",\"t\".\"code\") IN ((?,?),(?,?))");
                assert_eq!(args.len(), 4);
            }
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn groups_collect_indexes_per_key() {
        let groups = group(vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::UInt(1)]]);
        assert_eq!(groups.get(&Value::tuple_key(&[Value::Int(1)])), Some(&vec![0, 2]));
        assert_eq!(groups.len(), 2);
    }
}
