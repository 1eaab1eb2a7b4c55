//! Model metadata
//!
//! Each model type is described once through [`Model::describe`] and turned
//! into an immutable [`Schema`] by the [`Registry`]. Schemas are shared as
//! `Arc<Schema>` and never change after publication, apart from the
//! registered virtual fields.

pub mod access;
pub mod assigner;
pub mod builder;
pub mod field;
pub mod index;
pub mod registry;
pub mod relationship;

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, RwLock};

pub use access::{Dyn, Projection, RecordSink, Records};
pub use assigner::{Assigner, ColumnAssigner};
pub use builder::{FieldBuilder, SchemaBuilder};
pub use field::{FieldDescriptor, FieldFlags, FieldInput, FieldOptions, IndexOption, KeyGenerator};
pub use index::IndexDescriptor;
pub use registry::Registry;
pub use relationship::{JoinKey, JoinTable, Polymorphic, Relationship, RelationshipKind};

use crate::error::{OrmError, OrmResult};
use crate::hooks::ErasedHooks;
use crate::naming::to_snake;
use crate::preload::VirtualFieldLoader;

/// A persistable record type
pub trait Model: Any + Send + Sync + Default + Clone + fmt::Debug {
    /// Declare fields, associations and table options
    fn describe(schema: &mut SchemaBuilder<Self>);
}

/// A field registered at runtime and filled by a custom loader during preload
#[derive(Clone)]
pub struct VirtualField {
    pub name: String,
    pub loader: Arc<dyn VirtualFieldLoader>,
}

/// Resolved metadata of one model type
pub struct Schema {
    pub(crate) type_id: Option<TypeId>,
    pub(crate) type_name: String,
    pub(crate) full_type_name: &'static str,
    pub(crate) table_name: String,
    pub(crate) fields: Vec<Arc<FieldDescriptor>>,
    pub(crate) primary_fields: Vec<usize>,
    pub(crate) indexes: Vec<IndexDescriptor>,
    pub(crate) hooks: Option<Arc<dyn ErasedHooks>>,
    pub(crate) factory: Option<fn() -> Box<Dyn>>,
    pub(crate) cloner: Option<fn(&Dyn) -> Option<Box<Dyn>>>,
    pub(crate) virtual_fields: RwLock<Vec<VirtualField>>,
}

impl Schema {
    /// Schema for table-level operations without a model type
    pub fn anonymous(table: impl Into<String>) -> Self {
        Self {
            type_id: None,
            type_name: String::new(),
            full_type_name: "",
            table_name: table.into(),
            fields: Vec::new(),
            primary_fields: Vec::new(),
            indexes: Vec::new(),
            hooks: None,
            factory: None,
            cloner: None,
            virtual_fields: RwLock::new(Vec::new()),
        }
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn full_type_name(&self) -> &'static str {
        self.full_type_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn is_anonymous(&self) -> bool {
        self.type_id.is_none()
    }

    pub fn fields(&self) -> &[Arc<FieldDescriptor>] {
        &self.fields
    }

    pub fn indexes(&self) -> &[IndexDescriptor] {
        &self.indexes
    }

    pub fn primary_fields(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> + '_ {
        self.primary_fields.iter().map(move |&i| &self.fields[i])
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_fields.is_empty()
    }

    /// The primary field whose column is `id`, else the first primary field
    pub fn primary_field(&self) -> Option<&Arc<FieldDescriptor>> {
        self.primary_fields()
            .find(|f| f.column == "id")
            .or_else(|| self.primary_fields().next())
    }

    /// Persisted columns in declaration order
    pub fn columns(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> + '_ {
        self.fields.iter().filter(|f| f.is_normal())
    }

    pub fn associations(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> + '_ {
        self.fields.iter().filter(|f| f.is_association())
    }

    /// Look a field up by name or column
    ///
    /// Exact name or column matches win over the snake-cased form of
    /// `name`, which wins over a case- and underscore-insensitive match.
    /// Within a pass the first declared field wins.
    pub fn find_field(&self, name: &str) -> Option<&Arc<FieldDescriptor>> {
        self.lookup(name, |_| true)
    }

    /// Like [`find_field`](Self::find_field) but only persisted columns
    pub fn find_column(&self, name: &str) -> Option<&Arc<FieldDescriptor>> {
        self.lookup(name, FieldDescriptor::is_normal)
    }

    fn lookup(&self, name: &str, accept: impl Fn(&FieldDescriptor) -> bool) -> Option<&Arc<FieldDescriptor>> {
        let candidates: Vec<&Arc<FieldDescriptor>> = self.fields.iter().filter(|f| accept(f)).collect();
        if let Some(field) = candidates.iter().find(|f| f.name == name || f.column == name) {
            return Some(*field);
        }
        let snake = to_snake(name);
        if let Some(field) = candidates.iter().find(|f| f.column == snake) {
            return Some(*field);
        }
        let loose = loose_key(name);
        candidates
            .into_iter()
            .find(|f| loose_key(&f.name) == loose || loose_key(&f.column) == loose)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.find_column(name).is_some()
    }

    /// A fresh default value of the model type
    pub fn new_value(&self) -> Box<Dyn> {
        match self.factory {
            Some(factory) => factory(),
            None => Box::new(()),
        }
    }

    /// Deep copy of a record of this schema's type
    pub fn clone_value(&self, value: &Dyn) -> OrmResult<Box<Dyn>> {
        self.cloner
            .and_then(|clone| clone(value))
            .ok_or_else(|| OrmError::Unaddressable(format!("value is not a {}", self.type_name)))
    }

    pub(crate) fn hooks(&self) -> Option<&Arc<dyn ErasedHooks>> {
        self.hooks.as_ref()
    }

    pub fn virtual_fields(&self) -> Vec<VirtualField> {
        self.virtual_fields
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn add_virtual_field(&self, field: VirtualField) {
        let mut fields = self
            .virtual_fields
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        fields.retain(|existing| existing.name != field.name);
        fields.push(field);
    }

    pub fn find_virtual_field(&self, name: &str) -> Option<VirtualField> {
        self.virtual_fields().into_iter().find(|f| f.name == name)
    }

    /// Values of the primary key columns in `record`
    pub fn primary_values(&self, record: &Dyn) -> OrmResult<Vec<crate::value::Value>> {
        self.primary_fields().map(|f| f.read(record)).collect()
    }
}

fn loose_key(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("type_name", &self.type_name)
            .field("table_name", &self.table_name)
            .field("fields", &self.fields.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[derive(Debug, Clone, Default)]
    struct Address {
        street: String,
        city: String,
    }

    impl Model for Address {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field("Street", |m| &m.street, |m| &mut m.street);
            schema.field("City", |m| &m.city, |m| &mut m.city).index();
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Customer {
        id: i64,
        email: String,
        nickname: Option<String>,
        home: Address,
        note: String,
    }

    impl Model for Customer {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field("ID", |m| &m.id, |m| &mut m.id);
            schema
                .field("Email", |m| &m.email, |m| &mut m.email)
                .size(255)
                .unique_index();
            schema.field("Nickname", |m| &m.nickname, |m| &mut m.nickname);
            schema.embed("Home", |m| &m.home, |m| &mut m.home).prefix("home_");
            schema.field("Note", |m| &m.note, |m| &mut m.note).ignore();
        }
    }

    #[test]
    fn column_named_id_becomes_primary_key() {
        let registry = Registry::new();
        let schema = registry.get_or_build::<Customer>().unwrap();

        assert_eq!(schema.table_name(), "customers");
        let pk = schema.primary_field().unwrap();
        assert_eq!(pk.name(), "ID");
        assert!(pk.is_primary_key());
        assert!(pk.is_auto_increment());
    }

    #[test]
    fn embedded_fields_are_flattened_with_prefix() {
        let registry = Registry::new();
        let schema = registry.get_or_build::<Customer>().unwrap();

        let columns: Vec<&str> = schema.columns().map(|f| f.column()).collect();
        assert_eq!(columns, vec!["id", "email", "nickname", "home_street", "home_city"]);

        let city = schema.find_field("City").unwrap();
        assert_eq!(city.path(), &[3, 1]);

        let mut customer = Customer::default();
        city.set(&mut customer, Value::from("Shanghai")).unwrap();
        assert_eq!(customer.home.city, "Shanghai");
        assert_eq!(city.read(&customer).unwrap(), Value::from("Shanghai"));
    }

    #[test]
    fn indexes_are_named_after_table_and_column() {
        let registry = Registry::new();
        let schema = registry.get_or_build::<Customer>().unwrap();

        let names: Vec<(&str, bool)> = schema.indexes().iter().map(|i| (i.name.as_str(), i.unique)).collect();
        assert_eq!(
            names,
            vec![("uix_customers_email", true), ("idx_customers_home_city", false)]
        );
    }

    #[test]
    fn lookup_by_name_column_or_snake_case() {
        let registry = Registry::new();
        let schema = registry.get_or_build::<Customer>().unwrap();

        assert_eq!(schema.find_field("Email").unwrap().column(), "email");
        assert_eq!(schema.find_field("email").unwrap().name(), "Email");
        assert_eq!(schema.find_field("HomeStreet").unwrap().name(), "Street");
        assert!(schema.find_field("Missing").is_none());
        assert!(schema.find_column("Note").is_none());
        assert!(schema.find_field("Note").unwrap().is_ignored());
    }

    #[test]
    fn set_converts_and_reports_mismatches() {
        let registry = Registry::new();
        let schema = registry.get_or_build::<Customer>().unwrap();
        let mut customer = Customer::default();

        let nickname = schema.find_field("Nickname").unwrap();
        assert!(nickname.is_blank(&customer));
        nickname.set(&mut customer, FieldInput::boxed("jin".to_string())).unwrap();
        assert_eq!(customer.nickname.as_deref(), Some("jin"));
        nickname.set(&mut customer, Value::Null).unwrap();
        assert_eq!(customer.nickname, None);

        let id = schema.find_field("ID").unwrap();
        let err = id.set(&mut customer, FieldInput::boxed(vec![1u8])).unwrap_err();
        assert!(matches!(err, OrmError::TypeMismatch { ref field, .. } if field == "ID"));
    }
}
