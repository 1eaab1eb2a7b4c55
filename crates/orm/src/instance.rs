//! A schema bound to one concrete record

use std::sync::Arc;

use crate::error::{OrmError, OrmResult};
use crate::id::Id;
use crate::schema::{Dyn, FieldDescriptor, FieldInput, Schema};
use crate::value::Value;

/// Live field access to one record
pub struct Instance<'a> {
    schema: Arc<Schema>,
    value: &'a mut Dyn,
}

impl<'a> Instance<'a> {
    pub fn bind(schema: Arc<Schema>, value: &'a mut Dyn) -> Self {
        Self { schema, value }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn value(&self) -> &Dyn {
        self.value
    }

    pub fn value_mut(&mut self) -> &mut Dyn {
        self.value
    }

    /// Field by exact name, column, snake-cased name or loose match, in that order
    pub fn find_by_name_or_column(&self, name: &str) -> Option<Arc<FieldDescriptor>> {
        self.schema.find_field(name).cloned()
    }

    fn require(&self, name: &str) -> OrmResult<Arc<FieldDescriptor>> {
        self.find_by_name_or_column(name).ok_or_else(|| {
            OrmError::schema(&self.schema.type_name, format!("no field or column named {}", name))
        })
    }

    pub fn get(&self, name: &str) -> OrmResult<Value> {
        self.require(name)?.read(self.value)
    }

    pub fn is_blank(&self, name: &str) -> OrmResult<bool> {
        Ok(self.require(name)?.is_blank(self.value))
    }

    pub fn set(&mut self, name: &str, input: impl Into<FieldInput>) -> OrmResult<()> {
        let field = self.require(name)?;
        if field.is_association() {
            return Err(OrmError::Unaddressable(format!("{} is an association", field.name())));
        }
        field.set(self.value, input)
    }

    /// True without a primary key, or when any key column is blank
    pub fn primary_key_zero(&self) -> bool {
        if !self.schema.has_primary_key() {
            return true;
        }
        self.schema.primary_fields().any(|f| f.is_blank(self.value))
    }

    pub fn primary_values(&self) -> OrmResult<Vec<Value>> {
        self.schema.primary_values(self.value)
    }

    pub fn id(&self) -> OrmResult<Id> {
        Id::from_record(&self.schema, self.value)
    }

    /// Persisted columns with their current values, in declaration order
    pub fn column_values(&self) -> OrmResult<Vec<(Arc<FieldDescriptor>, Value)>> {
        self.schema
            .columns()
            .map(|f| Ok((f.clone(), f.read(self.value)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Model, Registry, SchemaBuilder};

    #[derive(Debug, Clone, Default)]
    struct Membership {
        org_id: i64,
        user_id: i64,
        role: String,
        expires: Option<i64>,
    }

    impl Model for Membership {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field("OrgID", |m| &m.org_id, |m| &mut m.org_id).primary_key();
            schema.field("UserID", |m| &m.user_id, |m| &mut m.user_id).primary_key();
            schema.field("Role", |m| &m.role, |m| &mut m.role);
            schema.field("Expires", |m| &m.expires, |m| &mut m.expires);
        }
    }

    #[test]
    fn reads_and_writes_by_name_or_column() {
        let registry = Registry::new();
        let schema = registry.get_or_build::<Membership>().unwrap();
        let mut membership = Membership::default();
        let mut instance = Instance::bind(schema, &mut membership);

        instance.set("role", Value::from("admin")).unwrap();
        instance.set("Expires", FieldInput::boxed(30i64)).unwrap();
        assert_eq!(instance.get("Role").unwrap(), Value::from("admin"));
        assert!(!instance.is_blank("expires").unwrap());
        assert!(instance.set("Nope", Value::Null).is_err());

        assert_eq!(membership.role, "admin");
        assert_eq!(membership.expires, Some(30));
    }

    #[test]
    fn composite_key_is_zero_until_every_part_is_set() {
        let registry = Registry::new();
        let schema = registry.get_or_build::<Membership>().unwrap();
        let mut membership = Membership {
            org_id: 4,
            ..Default::default()
        };

        let mut instance = Instance::bind(schema, &mut membership);
        assert!(instance.primary_key_zero());
        instance.set("user_id", Value::Int(9)).unwrap();
        assert!(!instance.primary_key_zero());

        let id = instance.id().unwrap();
        assert!(id.is_composite());
        assert_eq!(id.to_string(), "4,9");
    }
}
