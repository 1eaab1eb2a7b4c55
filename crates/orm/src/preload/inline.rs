//! belongs-to associations loaded through LEFT JOINs of the main query
//!
//! Each path level gets a join aliased `ip_<path>` and appends its marker
//! key followed by every column of the joined table to the extra selects.
//! A NULL marker means no associated row and leaves the slot empty.

use std::sync::Arc;

use crate::error::{OrmError, OrmResult};
use crate::naming::to_snake;
use crate::schema::{Dyn, FieldDescriptor, FieldInput, RelationshipKind, Schema};
use crate::scope::Scope;
use crate::search::expr;
use crate::search::render::quote_table;
use crate::value::Value;

/// Where one joined level lands in the extra selects and in the record
#[derive(Debug, Clone)]
pub(crate) struct InlineSlot {
    pub(crate) alias: String,
    /// Association fields from the root to this level
    pub(crate) path: Vec<Arc<FieldDescriptor>>,
    pub(crate) schema: Arc<Schema>,
    /// Index of the marker within the extra selects
    pub(crate) start: usize,
    pub(crate) columns: Vec<Arc<FieldDescriptor>>,
}

/// Add joins and extra selects for every inline preload path
pub(crate) fn prepare(scope: &mut Scope<'_>) -> OrmResult<()> {
    if scope.search.inline_preload.is_empty() {
        return Ok(());
    }
    let dialect = scope.db.dialect().clone();
    let root_table = scope.quoted_table_name();
    let paths = scope.search.inline_preload.clone();

    for path in &paths {
        let mut owner = scope.schema.clone();
        let mut parent_alias = root_table.clone();
        let mut fields: Vec<Arc<FieldDescriptor>> = Vec::new();
        let mut alias_parts = Vec::new();

        for segment in path.split('.').map(str::trim) {
            let field = owner
                .find_field(segment)
                .filter(|f| f.is_association())
                .cloned()
                .ok_or_else(|| {
                    OrmError::Preload(format!("can't preload field {} for {}", segment, owner.type_name()))
                })?;
            let relationship = field
                .relationship()
                .cloned()
                .ok_or_else(|| OrmError::Preload(format!("association {} is unresolved", segment)))?;
            if relationship.kind != RelationshipKind::BelongsTo {
                return Err(OrmError::Preload(format!(
                    "inline preload of {} needs a belongs_to association, found {}",
                    segment,
                    relationship.kind.as_str()
                )));
            }

            let associated = relationship.associated.clone();
            alias_parts.push(to_snake(field.name()));
            let alias = format!("ip_{}", alias_parts.join("_"));
            let quoted_alias = dialect.quote(&alias);
            fields.push(field.clone());

            if !scope.state.inline.iter().any(|slot| slot.alias == alias) {
                let on = relationship
                    .foreign_db_names
                    .iter()
                    .zip(&relationship.association_foreign_db_names)
                    .map(|(foreign, key)| {
                        format!(
                            "{}.{} = {}.{}",
                            quoted_alias,
                            dialect.quote(key),
                            parent_alias,
                            dialect.quote(foreign)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let mut join = format!(
                    "LEFT JOIN {} AS {} ON {}",
                    quote_table(dialect.as_ref(), associated.table_name()),
                    quoted_alias,
                    on
                );
                if associated.columns().any(|f| f.column() == "deleted_at") {
                    join.push_str(&format!(" AND {}.{} IS NULL", quoted_alias, dialect.quote("deleted_at")));
                }
                scope.search.joins.push(expr(join, Vec::new()));

                let marker = associated
                    .primary_field()
                    .map(|pk| pk.column().to_string())
                    .or_else(|| relationship.association_foreign_db_names.first().cloned())
                    .ok_or_else(|| OrmError::Preload(format!("{} has no key to join on", associated.type_name())))?;
                let start = scope.search.extra_selects.len();
                scope
                    .search
                    .extra_selects
                    .push(expr(format!("{}.{}", quoted_alias, dialect.quote(&marker)), Vec::new()));
                let columns: Vec<Arc<FieldDescriptor>> = associated.columns().cloned().collect();
                for column in &columns {
                    scope
                        .search
                        .extra_selects
                        .push(expr(format!("{}.{}", quoted_alias, dialect.quote(column.column())), Vec::new()));
                }
                scope.state.inline.push(InlineSlot {
                    alias,
                    path: fields.clone(),
                    schema: associated.clone(),
                    start,
                    columns,
                });
            }

            parent_alias = quoted_alias;
            owner = associated;
        }
    }
    Ok(())
}

/// Build the joined records of one row and store them on `root`
pub(crate) fn place(slots: &[InlineSlot], root: &mut Dyn, extras: &[Value]) -> OrmResult<()> {
    for slot in slots {
        let marker = extras.get(slot.start).cloned().unwrap_or(Value::Null);
        if marker.is_null() {
            continue;
        }
        let mut item = slot.schema.new_value();
        for (offset, column) in slot.columns.iter().enumerate() {
            if let Some(value) = extras.get(slot.start + 1 + offset) {
                column.set(item.as_mut(), FieldInput::Value(value.clone()))?;
            }
        }

        let Some((last, parents)) = slot.path.split_last() else {
            continue;
        };
        let mut holder = Some(&mut *root);
        for field in parents {
            holder = holder.and_then(|record| field.associated_mut(record).into_iter().next());
        }
        if let Some(holder) = holder {
            last.clear_associated(&mut *holder)?;
            last.push_associated(holder, item)?;
        }
    }
    Ok(())
}
