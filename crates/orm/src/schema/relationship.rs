//! Association resolution
//!
//! Infers the kind and key columns of every association field from naming
//! conventions, overridable per field:
//!
//! - a list field is many-to-many when a join table is declared, else
//!   has-many with foreign key `<OwnerType><PrimaryKey>` on the associated model;
//! - a single field is has-one when the associated model carries
//!   `<OwnerType><PrimaryKey>`, else belongs-to when the owner carries
//!   `<FieldName><PrimaryKey>`;
//! - polymorphic associations replace the owner type with the declared
//!   name and add the `<Name>Type` discriminator column.

use std::sync::Arc;

use super::field::FieldDescriptor;
use super::Schema;
use crate::error::{OrmError, OrmResult};
use crate::naming::{to_snake, NamingStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    HasOne,
    HasMany,
    BelongsTo,
    ManyToMany,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::HasOne => "has_one",
            RelationshipKind::HasMany => "has_many",
            RelationshipKind::BelongsTo => "belongs_to",
            RelationshipKind::ManyToMany => "many_to_many",
        }
    }
}

/// Discriminator of a polymorphic association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polymorphic {
    /// Field on the associated model holding the discriminator
    pub type_field: String,
    pub type_column: String,
    /// Stored value identifying the owner type
    pub value: String,
}

/// One key column of a join table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinKey {
    /// Column in the join table
    pub column: String,
    /// Referenced field on the source or destination model
    pub field_name: String,
    pub field_column: String,
}

/// Join table of a many-to-many association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: String,
    /// Keys referencing the owner
    pub source_keys: Vec<JoinKey>,
    /// Keys referencing the associated model
    pub destination_keys: Vec<JoinKey>,
}

/// Resolved association
///
/// Key lists are parallel: entry `i` of the foreign list pairs with entry
/// `i` of the association list.
///
/// | kind | foreign side | association side |
/// |------|--------------|------------------|
/// | has_one, has_many | fields of the associated model | owner fields |
/// | belongs_to | owner fields | fields of the associated model |
/// | many_to_many | owner fields / join-table source columns | associated fields / join-table destination columns |
#[derive(Debug, Clone)]
pub struct Relationship {
    pub kind: RelationshipKind,
    pub field_name: String,
    pub owner_type: String,
    pub associated: Arc<Schema>,
    pub foreign_field_names: Vec<String>,
    pub foreign_db_names: Vec<String>,
    pub association_foreign_field_names: Vec<String>,
    pub association_foreign_db_names: Vec<String>,
    pub polymorphic: Option<Polymorphic>,
    pub join_table: Option<JoinTable>,
}

impl Relationship {
    fn new(kind: RelationshipKind, owner: &Schema, field: &FieldDescriptor, associated: &Arc<Schema>) -> Self {
        Self {
            kind,
            field_name: field.name.clone(),
            owner_type: owner.type_name.clone(),
            associated: associated.clone(),
            foreign_field_names: Vec::new(),
            foreign_db_names: Vec::new(),
            association_foreign_field_names: Vec::new(),
            association_foreign_db_names: Vec::new(),
            polymorphic: None,
            join_table: None,
        }
    }

    fn push_pair(&mut self, foreign: &FieldDescriptor, association: &FieldDescriptor) {
        self.foreign_field_names.push(foreign.name.clone());
        self.foreign_db_names.push(foreign.column.clone());
        self.association_foreign_field_names.push(association.name.clone());
        self.association_foreign_db_names.push(association.column.clone());
    }

    pub fn is_many(&self) -> bool {
        matches!(self.kind, RelationshipKind::HasMany | RelationshipKind::ManyToMany)
    }
}

fn err(owner: &Schema, field: &FieldDescriptor, message: impl Into<String>) -> OrmError {
    OrmError::relationship(&owner.type_name, &field.name, message)
}

/// Resolve the association declared by `field` on `owner` against `associated`
pub(crate) fn resolve(
    owner: &Arc<Schema>,
    field: &FieldDescriptor,
    associated: &Arc<Schema>,
    naming: &NamingStrategy,
) -> OrmResult<Relationship> {
    let many = field.holder().map(|h| h.is_many()).unwrap_or(false);
    if many {
        if field.options.many2many.is_some() {
            resolve_many_to_many(owner, field, associated, naming)
        } else {
            resolve_has(owner, field, associated, RelationshipKind::HasMany)?
                .ok_or_else(|| unresolved(owner, field, associated))
        }
    } else {
        if field.options.many2many.is_some() {
            return Err(err(owner, field, "many2many requires a list field"));
        }
        if let Some(has_one) = resolve_has(owner, field, associated, RelationshipKind::HasOne)? {
            return Ok(has_one);
        }
        resolve_belongs_to(owner, field, associated)?.ok_or_else(|| unresolved(owner, field, associated))
    }
}

fn unresolved(owner: &Schema, field: &FieldDescriptor, associated: &Schema) -> OrmError {
    if !field.options.foreign_keys.is_empty() {
        return err(
            owner,
            field,
            format!("unknown foreign key field {}", field.options.foreign_keys.join(", ")),
        );
    }
    if !owner.has_primary_key() && !associated.has_primary_key() {
        return err(owner, field, "no primary key to infer a foreign key from");
    }
    err(
        owner,
        field,
        format!("cannot infer foreign key to {}", associated.type_name),
    )
}

/// Pair foreign keys with association keys the way both one-sided kinds do
///
/// `prefix` is the name foreign keys are composed with (owner type or
/// polymorphic name for has-*, field name for belongs-to); `keyed` is the
/// schema whose keys the foreign keys reference.
fn pair_keys(
    owner: &Schema,
    field: &FieldDescriptor,
    prefix: &str,
    keyed: &Schema,
) -> OrmResult<(Vec<String>, Vec<String>)> {
    let declared_foreign = &field.options.foreign_keys;
    let declared_association = &field.options.association_foreign_keys;
    let mut foreign_keys = Vec::new();
    let mut association_keys = Vec::new();

    if declared_foreign.is_empty() {
        if declared_association.is_empty() {
            for pk in keyed.primary_fields() {
                foreign_keys.push(format!("{}{}", prefix, pk.name));
                association_keys.push(pk.name.clone());
            }
        } else {
            for key in declared_association.iter().filter_map(|name| keyed.find_column(name)) {
                foreign_keys.push(format!("{}{}", prefix, key.name));
                association_keys.push(key.name.clone());
            }
        }
    } else if declared_association.is_empty() {
        foreign_keys = declared_foreign.clone();
        for name in declared_foreign {
            if let Some(rest) = name.strip_prefix(prefix) {
                if let Some(key) = keyed.find_column(rest) {
                    association_keys.push(key.name.clone());
                }
            }
        }
        if association_keys.len() != foreign_keys.len() {
            association_keys.clear();
            if foreign_keys.len() == 1 {
                if let Some(pk) = keyed.primary_field() {
                    association_keys.push(pk.name.clone());
                }
            }
        }
    } else {
        if declared_foreign.len() != declared_association.len() {
            return Err(err(
                owner,
                field,
                "foreign keys and association foreign keys differ in length",
            ));
        }
        foreign_keys = declared_foreign.clone();
        association_keys = declared_association.clone();
    }

    Ok((foreign_keys, association_keys))
}

fn resolve_has(
    owner: &Arc<Schema>,
    field: &FieldDescriptor,
    associated: &Arc<Schema>,
    kind: RelationshipKind,
) -> OrmResult<Option<Relationship>> {
    let mut relationship = Relationship::new(kind, owner, field, associated);
    let mut association_type = owner.type_name.clone();

    if let Some(name) = &field.options.polymorphic {
        let type_field_name = format!("{}Type", name);
        let type_field = associated.find_column(&type_field_name).ok_or_else(|| {
            err(
                owner,
                field,
                format!("polymorphic type field {} not found on {}", type_field_name, associated.type_name),
            )
        })?;
        type_field.mark_foreign_key();
        relationship.polymorphic = Some(Polymorphic {
            type_field: type_field.name.clone(),
            type_column: type_field.column.clone(),
            value: field
                .options
                .polymorphic_value
                .clone()
                .unwrap_or_else(|| owner.table_name.clone()),
        });
        association_type = name.clone();
    }

    let (foreign_keys, association_keys) = pair_keys(owner, field, &association_type, owner)?;
    if foreign_keys.len() != association_keys.len() {
        return Ok(None);
    }

    let mut matched = Vec::new();
    for (foreign, association) in foreign_keys.iter().zip(&association_keys) {
        if let (Some(foreign_field), Some(association_field)) =
            (associated.find_column(foreign), owner.find_column(association))
        {
            matched.push((foreign_field.clone(), association_field.clone()));
        }
    }
    if matched.is_empty() || matched.len() != foreign_keys.len() {
        if relationship.polymorphic.is_some() {
            return Err(err(owner, field, "polymorphic association has no matching foreign key"));
        }
        return Ok(None);
    }

    for (foreign_field, association_field) in &matched {
        foreign_field.mark_foreign_key();
        relationship.push_pair(foreign_field, association_field);
    }
    Ok(Some(relationship))
}

fn resolve_belongs_to(
    owner: &Arc<Schema>,
    field: &FieldDescriptor,
    associated: &Arc<Schema>,
) -> OrmResult<Option<Relationship>> {
    let mut relationship = Relationship::new(RelationshipKind::BelongsTo, owner, field, associated);
    let (foreign_keys, association_keys) = pair_keys(owner, field, &field.name, associated)?;
    if foreign_keys.is_empty() || foreign_keys.len() != association_keys.len() {
        return Ok(None);
    }

    let mut matched = Vec::new();
    for (foreign, association) in foreign_keys.iter().zip(&association_keys) {
        if let (Some(foreign_field), Some(association_field)) =
            (owner.find_column(foreign), associated.find_column(association))
        {
            matched.push((foreign_field.clone(), association_field.clone()));
        }
    }
    if matched.len() != foreign_keys.len() {
        return Ok(None);
    }

    for (foreign_field, association_field) in &matched {
        foreign_field.mark_foreign_key();
        relationship.push_pair(foreign_field, association_field);
    }
    Ok(Some(relationship))
}

fn resolve_many_to_many(
    owner: &Arc<Schema>,
    field: &FieldDescriptor,
    associated: &Arc<Schema>,
    naming: &NamingStrategy,
) -> OrmResult<Relationship> {
    let options = &field.options;
    let table = naming.prefixed(options.many2many.as_deref().unwrap_or_default());
    let mut relationship = Relationship::new(RelationshipKind::ManyToMany, owner, field, associated);

    let source_fields = key_fields(owner, field, owner, &options.foreign_keys)?;
    let destination_fields = key_fields(owner, field, associated, &options.association_foreign_keys)?;

    let self_referencing = Arc::ptr_eq(owner, associated);
    let mut source_keys = Vec::new();
    for (index, key) in source_fields.iter().enumerate() {
        let column = options
            .jointable_foreign_keys
            .get(index)
            .cloned()
            .unwrap_or_else(|| naming.join_table_column(&owner.type_name, &key.column));
        source_keys.push(JoinKey {
            column,
            field_name: key.name.clone(),
            field_column: key.column.clone(),
        });
    }

    let mut destination_keys = Vec::new();
    for (index, key) in destination_fields.iter().enumerate() {
        let column = match options.association_jointable_foreign_keys.get(index) {
            Some(explicit) => explicit.clone(),
            None => {
                let column = naming.join_table_column(&associated.type_name, &key.column);
                if self_referencing || source_keys.iter().any(|k| k.column == column) {
                    format!("association_{}", column)
                } else {
                    column
                }
            }
        };
        destination_keys.push(JoinKey {
            column,
            field_name: key.name.clone(),
            field_column: key.column.clone(),
        });
    }

    for key in &source_keys {
        relationship.foreign_field_names.push(key.field_name.clone());
        relationship.foreign_db_names.push(key.column.clone());
    }
    for key in &destination_keys {
        relationship.association_foreign_field_names.push(key.field_name.clone());
        relationship.association_foreign_db_names.push(key.column.clone());
    }
    relationship.join_table = Some(JoinTable {
        table,
        source_keys,
        destination_keys,
    });
    Ok(relationship)
}

/// Key fields of one side of a many-to-many: explicit names or the primary key
fn key_fields(
    owner: &Schema,
    field: &FieldDescriptor,
    side: &Schema,
    declared: &[String],
) -> OrmResult<Vec<Arc<FieldDescriptor>>> {
    if declared.is_empty() {
        if !side.has_primary_key() {
            return Err(err(
                owner,
                field,
                format!("{} has no primary key for the join table", side.type_name),
            ));
        }
        return Ok(side.primary_fields().cloned().collect());
    }
    declared
        .iter()
        .map(|name| {
            side.find_column(name).cloned().ok_or_else(|| {
                err(
                    owner,
                    field,
                    format!("unknown key {} on {}", name, to_snake(&side.type_name)),
                )
            })
        })
        .collect()
}
