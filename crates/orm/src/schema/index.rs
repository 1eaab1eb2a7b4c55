//! Index declarations collected from field options

use super::field::FieldDescriptor;
use crate::naming::NamingStrategy;

/// A table index; fields declaring the same index name share one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

/// Merge per-field index options into named indexes, in declaration order
pub(crate) fn collect_indexes(fields: &[FieldDescriptor], table: &str, naming: &NamingStrategy) -> Vec<IndexDescriptor> {
    let mut indexes: Vec<IndexDescriptor> = Vec::new();
    for field in fields.iter().filter(|f| f.is_normal()) {
        for option in &field.options.indexes {
            let name = option
                .name
                .clone()
                .unwrap_or_else(|| naming.index_name(option.unique, table, &field.column));
            match indexes.iter_mut().find(|index| index.name == name) {
                Some(existing) => {
                    existing.unique |= option.unique;
                    existing.columns.push(field.column.clone());
                }
                None => indexes.push(IndexDescriptor {
                    name,
                    unique: option.unique,
                    columns: vec![field.column.clone()],
                }),
            }
        }
    }
    indexes
}
