//! Creation, update and actor stamps

use std::sync::Arc;

use crate::error::OrmResult;
use crate::schema::{FieldDescriptor, FieldInput, Schema};
use crate::scope::{Operation, Scope};
use crate::value::Value;

fn column<'s>(schema: &'s Schema, name: &str) -> Option<&'s Arc<FieldDescriptor>> {
    schema.columns().find(|f| f.column() == name)
}

pub(super) fn update_time_stamp(scope: &mut Scope<'_>) -> OrmResult<()> {
    let now = Value::DateTime(scope.db.now());
    let user = scope.db.options.current_user.clone();
    let schema = scope.schema.clone();

    match scope.operation() {
        Operation::Create => {
            let stamps = [
                ("created_at", Some(now.clone())),
                ("updated_at", Some(now)),
                ("created_by_id", user.clone()),
                ("updated_by_id", user),
            ];
            for record in scope.records_mut() {
                for (name, value) in &stamps {
                    let (Some(field), Some(value)) = (column(&schema, name), value) else {
                        continue;
                    };
                    if field.is_blank(record) {
                        field.set(record, FieldInput::Value(value.clone()))?;
                    }
                }
            }
        }
        Operation::Update if !scope.db.options.update_column => {
            for (name, value) in [("updated_at", Some(now)), ("updated_by_id", user)] {
                let Some(value) = value else { continue };
                if column(&schema, name).is_none()
                    || scope.state.update_columns.iter().any(|c| c.column == name && c.explicit)
                {
                    continue;
                }
                scope.set_column(name, value)?;
            }
        }
        _ => {}
    }
    Ok(())
}
