//! Saving associated records around the owner
//!
//! belongs-to targets are saved before the owner so their keys can be
//! copied into it; has-one, has-many and many-to-many children are saved
//! after, once the owner key is known.

use std::sync::Arc;

use crate::db::{CallOptions, Db};
use crate::error::{OrmError, OrmResult};
use crate::instance::Instance;
use crate::schema::{Dyn, FieldDescriptor, FieldInput, JoinTable, RelationshipKind, Schema};
use crate::scope::Scope;
use crate::search::render::{quote_table, Renderer};
use crate::value::Value;

/// Effective switches for one association field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SavePolicy {
    pub(crate) auto_create: bool,
    pub(crate) auto_update: bool,
    pub(crate) save_reference: bool,
}

/// Call options win over field options; everything defaults to on.
/// `None` when saving the association is disabled.
pub(crate) fn save_policy(options: &CallOptions, field: &FieldDescriptor) -> Option<SavePolicy> {
    let declared = field.options();
    if !options.save_associations.or(declared.save_associations).unwrap_or(true) {
        return None;
    }
    Some(SavePolicy {
        auto_create: options.auto_create.or(declared.auto_create).unwrap_or(true),
        auto_update: options.auto_update.or(declared.auto_update).unwrap_or(true),
        save_reference: options.save_reference.or(declared.save_reference).unwrap_or(true),
    })
}

async fn save_child(db: &Db, schema: &Arc<Schema>, child: &mut Dyn, policy: SavePolicy) -> OrmResult<()> {
    if Instance::bind(schema.clone(), &mut *child).primary_key_zero() {
        if policy.auto_create {
            db.create_value(schema.clone(), child).await?;
        }
    } else if policy.auto_update {
        db.save_value(schema.clone(), child).await?;
    }
    Ok(())
}

fn read_fields(schema: &Schema, names: &[String], record: &Dyn) -> OrmResult<Vec<Value>> {
    names
        .iter()
        .map(|name| {
            schema
                .find_field(name)
                .ok_or_else(|| OrmError::schema(schema.type_name(), format!("missing key field {}", name)))?
                .read(record)
        })
        .collect()
}

pub(super) async fn save_before(scope: &mut Scope<'_>) -> OrmResult<()> {
    if scope.db.options.update_column {
        return Ok(());
    }
    let schema = scope.schema.clone();
    let options = scope.db.options.clone();
    let db = scope.db.session();

    for field in schema.associations() {
        let Some(relationship) = field.relationship() else {
            continue;
        };
        if relationship.kind != RelationshipKind::BelongsTo {
            continue;
        }
        let Some(policy) = save_policy(&options, field) else {
            continue;
        };
        let Some(record) = scope.record_mut() else {
            return Ok(());
        };
        let associated = relationship.associated.clone();

        let mut keys = None;
        for target in field.associated_mut(record) {
            save_child(&db, &associated, &mut *target, policy).await?;
            keys = Some(read_fields(&associated, &relationship.association_foreign_field_names, target)?);
        }
        // through the scope so a pending UPDATE carries the new key
        if let (Some(keys), true) = (keys, policy.save_reference) {
            for (name, value) in relationship.foreign_field_names.iter().zip(keys) {
                if schema.find_field(name).is_some() {
                    scope.set_column(name, value)?;
                }
            }
        }
    }
    Ok(())
}

pub(super) async fn save_after(scope: &mut Scope<'_>) -> OrmResult<()> {
    if scope.db.options.update_column {
        return Ok(());
    }
    let schema = scope.schema.clone();
    let options = scope.db.options.clone();
    let db = scope.db.session();

    for field in schema.associations() {
        let Some(relationship) = field.relationship() else {
            continue;
        };
        if relationship.kind == RelationshipKind::BelongsTo {
            continue;
        }
        let Some(policy) = save_policy(&options, field) else {
            continue;
        };
        let Some(record) = scope.record_mut() else {
            return Ok(());
        };
        let associated = relationship.associated.clone();
        let join = relationship.join_table.as_ref();

        let owner_keys = match join {
            Some(join) => {
                let names: Vec<String> = join.source_keys.iter().map(|k| k.field_name.clone()).collect();
                read_fields(&schema, &names, record)?
            }
            None => read_fields(&schema, &relationship.association_foreign_field_names, record)?,
        };

        let mut join_rows = Vec::new();
        for child in field.associated_mut(record) {
            if join.is_none() && policy.save_reference {
                for (name, value) in relationship.foreign_field_names.iter().zip(&owner_keys) {
                    if let Some(foreign) = associated.find_field(name) {
                        foreign.set(&mut *child, FieldInput::Value(value.clone()))?;
                    }
                }
                if let Some(polymorphic) = &relationship.polymorphic {
                    if let Some(discriminator) = associated.find_field(&polymorphic.type_field) {
                        discriminator.set(&mut *child, FieldInput::Value(Value::String(polymorphic.value.clone())))?;
                    }
                }
            }
            save_child(&db, &associated, &mut *child, policy).await?;
            if let (Some(join), true) = (join, policy.save_reference) {
                let names: Vec<String> = join.destination_keys.iter().map(|k| k.field_name.clone()).collect();
                join_rows.push(read_fields(&associated, &names, child)?);
            }
        }

        if let Some(join) = join {
            for destination in join_rows {
                insert_join_row(&db, join, &owner_keys, &destination).await?;
            }
        }
    }
    Ok(())
}

/// Link two records through the join table unless they already are
async fn insert_join_row(db: &Db, join: &JoinTable, source: &[Value], destination: &[Value]) -> OrmResult<()> {
    let shared = db.shared();
    let dialect = shared.dialect.as_ref();
    let mut renderer = Renderer::new(dialect, &shared.registry);
    let table = quote_table(dialect, &join.table);

    let columns: Vec<String> = join
        .source_keys
        .iter()
        .chain(&join.destination_keys)
        .map(|k| renderer.quote(&k.column))
        .collect();
    let values: Vec<Value> = source.iter().chain(destination).cloned().collect();

    let mut selects = Vec::with_capacity(values.len());
    for value in &values {
        selects.push(renderer.bind(value.clone()));
    }
    let mut conditions = Vec::with_capacity(values.len());
    for (column, value) in columns.iter().zip(&values) {
        conditions.push(format!("{} = {}", column, renderer.bind(value.clone())));
    }

    let mut select = selects.join(",");
    let dummy = dialect.select_from_dummy_table();
    if !dummy.is_empty() {
        select.push(' ');
        select.push_str(dummy);
    }
    let sql = format!(
        "INSERT INTO {} ({}) SELECT {} WHERE NOT EXISTS (SELECT * FROM {} WHERE {})",
        table,
        columns.join(","),
        select,
        table,
        conditions.join(" AND ")
    );
    db.execute_sql(&sql, &renderer.vars, None).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Model, Registry, SchemaBuilder};

    #[derive(Debug, Clone, Default)]
    struct Owner {
        id: i64,
    }

    impl Model for Owner {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field("ID", |o| &o.id, |o| &mut o.id);
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Pet {
        id: i64,
        owner_id: i64,
        owner: Option<Owner>,
    }

    impl Model for Pet {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field("ID", |p| &p.id, |p| &mut p.id);
            schema.field("OwnerID", |p| &p.owner_id, |p| &mut p.owner_id);
            schema
                .one("Owner", |p| &p.owner, |p| &mut p.owner)
                .association_autoupdate(false);
        }
    }

    #[test]
    fn call_options_override_field_options() {
        let registry = Registry::new();
        let schema = registry.get_or_build::<Pet>().unwrap();
        let field = schema.find_field("Owner").unwrap();

        let policy = save_policy(&CallOptions::default(), field).unwrap();
        assert!(policy.auto_create);
        assert!(!policy.auto_update);
        assert!(policy.save_reference);

        let options = CallOptions {
            auto_update: Some(true),
            ..CallOptions::default()
        };
        assert!(save_policy(&options, field).unwrap().auto_update);

        let disabled = CallOptions {
            save_associations: Some(false),
            ..CallOptions::default()
        };
        assert!(save_policy(&disabled, field).is_none());
    }
}
