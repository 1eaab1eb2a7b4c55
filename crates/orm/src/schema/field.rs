//! Field descriptors
//!
//! A [`FieldDescriptor`] is the flattened, resolved form of one declared
//! field: embedded structs have been inlined, column names derived, and
//! association fields carry their [`Relationship`] once resolution ran.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::access::{Dyn, Holder, Nested, Projection};
use super::assigner::Assigner;
use super::registry::SchemaThunk;
use super::relationship::Relationship;
use crate::backends::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::value::{Value, ValueKind};

/// Produces a key value for a blank primary key before insert
#[derive(Clone)]
pub struct KeyGenerator(Arc<dyn Fn() -> Value + Send + Sync>);

impl KeyGenerator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Random version 4 UUIDs
    pub fn uuid_v4() -> Self {
        Self::new(|| Value::Uuid(uuid::Uuid::new_v4()))
    }

    pub fn generate(&self) -> Value {
        (self.0)()
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyGenerator")
    }
}

/// Index membership declared on a field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOption {
    /// Explicit name; fields sharing a name form a composite index
    pub name: Option<String>,
    pub unique: bool,
}

/// Declared options of a field, as given to the schema builder
#[derive(Debug, Clone, Default)]
pub struct FieldOptions {
    pub column: Option<String>,
    pub primary_key: bool,
    pub auto_increment: Option<bool>,
    pub default: Option<String>,
    pub sql_type: Option<String>,
    pub size: Option<usize>,
    pub not_null: bool,
    pub unique: bool,
    pub read_only: bool,
    pub ignored: bool,
    pub indexes: Vec<IndexOption>,
    pub generator: Option<KeyGenerator>,
    pub embedded_prefix: Option<String>,

    pub foreign_keys: Vec<String>,
    pub association_foreign_keys: Vec<String>,
    pub many2many: Option<String>,
    pub jointable_foreign_keys: Vec<String>,
    pub association_jointable_foreign_keys: Vec<String>,
    pub polymorphic: Option<String>,
    pub polymorphic_value: Option<String>,
    pub auto_create: Option<bool>,
    pub auto_update: Option<bool>,
    pub save_reference: Option<bool>,
    pub save_associations: Option<bool>,
}

/// Resolved boolean properties of a field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldFlags {
    pub primary_key: bool,
    pub read_only: bool,
    pub ignored: bool,
    pub has_default: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub not_null: bool,
}

#[derive(Clone)]
pub(crate) enum FieldShape {
    /// Built-in column type
    Scalar { assigner: Arc<dyn Assigner> },
    /// Column converted by an application-supplied assigner
    Scanner { assigner: Arc<dyn Assigner> },
    /// Association slot holding records of another model
    Association {
        holder: Arc<dyn Holder>,
        target: SchemaThunk,
        target_name: &'static str,
    },
}

/// Value handed to [`FieldDescriptor::set`]
pub enum FieldInput {
    /// A storage value, converted through the field's assigner
    Value(Value),
    /// An in-memory value, assigned directly when its type fits
    Boxed(Box<Dyn>),
}

impl FieldInput {
    pub fn boxed<T: std::any::Any + Send + Sync>(value: T) -> Self {
        FieldInput::Boxed(Box::new(value))
    }
}

impl From<Value> for FieldInput {
    fn from(value: Value) -> Self {
        FieldInput::Value(value)
    }
}

/// One resolved field of a [`Schema`](super::Schema)
pub struct FieldDescriptor {
    pub(crate) name: String,
    pub(crate) column: String,
    pub(crate) position: usize,
    pub(crate) path: Vec<usize>,
    pub(crate) declared_type: &'static str,
    pub(crate) flags: FieldFlags,
    pub(crate) options: FieldOptions,
    pub(crate) projection: Arc<dyn Projection>,
    pub(crate) shape: FieldShape,
    pub(crate) is_foreign_key: AtomicBool,
    pub(crate) relationship: OnceCell<Arc<Relationship>>,
}

impl FieldDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        column: String,
        path: Vec<usize>,
        declared_type: &'static str,
        flags: FieldFlags,
        options: FieldOptions,
        projection: Arc<dyn Projection>,
        shape: FieldShape,
    ) -> Self {
        Self {
            name,
            column,
            position: 0,
            path,
            declared_type,
            flags,
            options,
            projection,
            shape,
            is_foreign_key: AtomicBool::new(false),
            relationship: OnceCell::new(),
        }
    }

    /// Copy of an embedded struct's field as seen from the embedding model
    pub(crate) fn embedded(&self, outer: &Arc<dyn Projection>, outer_index: usize, prefix: &str) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.push(outer_index);
        path.extend_from_slice(&self.path);
        let column = match &self.options.column {
            Some(explicit) => explicit.clone(),
            None => format!("{}{}", prefix, self.column),
        };
        let copy = Self::new(
            self.name.clone(),
            column,
            path,
            self.declared_type,
            self.flags,
            self.options.clone(),
            Arc::new(Nested::new(outer.clone(), self.projection.clone())),
            self.shape.clone(),
        );
        copy.is_foreign_key.store(self.is_foreign_key(), Ordering::Relaxed);
        copy
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Index into the schema's field list
    pub fn position(&self) -> usize {
        self.position
    }

    /// Declaration indexes from the root model down to this field
    pub fn path(&self) -> &[usize] {
        &self.path
    }

    pub fn declared_type(&self) -> &'static str {
        self.declared_type
    }

    pub fn flags(&self) -> FieldFlags {
        self.flags
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    pub fn is_primary_key(&self) -> bool {
        self.flags.primary_key
    }

    pub fn is_ignored(&self) -> bool {
        self.flags.ignored
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.read_only
    }

    pub fn has_default(&self) -> bool {
        self.flags.has_default
    }

    pub fn is_auto_increment(&self) -> bool {
        self.flags.auto_increment
    }

    pub fn is_foreign_key(&self) -> bool {
        self.is_foreign_key.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_foreign_key(&self) {
        self.is_foreign_key.store(true, Ordering::Relaxed);
    }

    /// A persisted column: not ignored and not an association
    pub fn is_normal(&self) -> bool {
        !self.flags.ignored && !self.is_association()
    }

    pub fn is_association(&self) -> bool {
        matches!(self.shape, FieldShape::Association { .. })
    }

    /// Converted by an application-supplied assigner
    pub fn is_scanner(&self) -> bool {
        matches!(self.shape, FieldShape::Scanner { .. })
    }

    pub fn relationship(&self) -> Option<&Arc<Relationship>> {
        self.relationship.get()
    }

    /// Name of the associated model's type, for association fields
    pub fn target_type(&self) -> Option<&'static str> {
        match &self.shape {
            FieldShape::Association { target_name, .. } => Some(target_name),
            _ => None,
        }
    }

    pub(crate) fn assigner(&self) -> Option<&Arc<dyn Assigner>> {
        match &self.shape {
            FieldShape::Scalar { assigner } | FieldShape::Scanner { assigner } => Some(assigner),
            FieldShape::Association { .. } => None,
        }
    }

    pub(crate) fn holder(&self) -> Option<&Arc<dyn Holder>> {
        match &self.shape {
            FieldShape::Association { holder, .. } => Some(holder),
            _ => None,
        }
    }

    /// Storage kind of the column; associations report `Json`
    pub fn kind(&self) -> ValueKind {
        self.assigner().map(|a| a.kind()).unwrap_or(ValueKind::Json)
    }

    pub fn size(&self) -> Option<usize> {
        self.options
            .size
            .or_else(|| self.assigner().and_then(|a| a.sql_size()))
    }

    pub fn is_nullable(&self) -> bool {
        self.assigner().map(|a| a.nullable()).unwrap_or(true)
    }

    /// Column definition for DDL: explicit type, assigner override, then dialect mapping
    pub fn sql_type(&self, dialect: &dyn Dialect) -> String {
        let base = match &self.options.sql_type {
            Some(explicit) => explicit.clone(),
            None => self
                .assigner()
                .and_then(|a| a.sql_type(dialect))
                .unwrap_or_else(|| dialect.data_type_for(self)),
        };
        let mut definition = base;
        if self.flags.not_null {
            definition.push_str(" NOT NULL");
        }
        if self.flags.unique {
            definition.push_str(" UNIQUE");
        }
        if let Some(default) = &self.options.default {
            definition.push_str(" DEFAULT ");
            definition.push_str(default);
        }
        definition
    }

    /// Placeholder for binding this column's value at `position`
    pub(crate) fn placeholder(&self, dialect: &dyn Dialect, position: usize) -> String {
        self.assigner()
            .and_then(|a| a.bind_placeholder(dialect, position))
            .unwrap_or_else(|| dialect.bind_placeholder(position))
    }

    pub(crate) fn value_ref<'a>(&self, root: &'a Dyn) -> OrmResult<&'a Dyn> {
        self.projection
            .project(root)
            .ok_or_else(|| OrmError::Unaddressable(self.name.clone()))
    }

    pub(crate) fn value_mut<'a>(&self, root: &'a mut Dyn) -> OrmResult<&'a mut Dyn> {
        self.projection
            .project_mut(root)
            .ok_or_else(|| OrmError::Unaddressable(self.name.clone()))
    }

    /// Current value of the column in `root`
    pub fn read(&self, root: &Dyn) -> OrmResult<Value> {
        let assigner = self
            .assigner()
            .ok_or_else(|| OrmError::Unaddressable(format!("{} is an association", self.name)))?;
        assigner
            .to_storage(self.value_ref(root)?)
            .map_err(|e| self.annotate(e))
    }

    /// Zero value, or an association slot holding nothing
    pub fn is_blank(&self, root: &Dyn) -> bool {
        let Ok(value) = self.value_ref(root) else {
            return true;
        };
        match &self.shape {
            FieldShape::Scalar { assigner } | FieldShape::Scanner { assigner } => assigner.is_zero(value),
            FieldShape::Association { holder, .. } => holder.items(value).is_empty(),
        }
    }

    /// Write `input` into the field of `root`
    ///
    /// Boxed inputs are assigned directly when the type fits (or wraps the
    /// field's type one level); a boxed [`Value`] goes through the
    /// assigner's storage conversion.
    pub fn set(&self, root: &mut Dyn, input: impl Into<FieldInput>) -> OrmResult<()> {
        let assigner = self
            .assigner()
            .ok_or_else(|| OrmError::Unaddressable(format!("{} is an association", self.name)))?
            .clone();
        let dest = self.value_mut(root)?;
        let result = match input.into() {
            FieldInput::Value(value) => assigner.from_storage(value, dest),
            FieldInput::Boxed(boxed) => match assigner.assign_direct(dest, boxed) {
                Ok(()) => Ok(()),
                Err(rejected) => match rejected.downcast::<Value>() {
                    Ok(value) => assigner.from_storage(*value, dest),
                    Err(_) => Err(OrmError::TypeMismatch {
                        field: String::new(),
                        expected: self.declared_type.to_string(),
                        found: "value of an unsupported type".to_string(),
                    }),
                },
            },
        };
        result.map_err(|e| self.annotate(e))
    }

    pub(crate) fn associated<'a>(&self, root: &'a Dyn) -> Vec<&'a Dyn> {
        match (self.holder(), self.value_ref(root)) {
            (Some(holder), Ok(slot)) => holder.items(slot),
            _ => Vec::new(),
        }
    }

    pub(crate) fn associated_mut<'a>(&self, root: &'a mut Dyn) -> Vec<&'a mut Dyn> {
        let Some(holder) = self.holder().cloned() else {
            return Vec::new();
        };
        match self.value_mut(root) {
            Ok(slot) => holder.items_mut(slot),
            Err(_) => Vec::new(),
        }
    }

    pub(crate) fn clear_associated(&self, root: &mut Dyn) -> OrmResult<()> {
        let holder = self
            .holder()
            .ok_or_else(|| OrmError::Unaddressable(format!("{} is not an association", self.name)))?
            .clone();
        holder.clear(self.value_mut(root)?);
        Ok(())
    }

    pub(crate) fn push_associated(&self, root: &mut Dyn, item: Box<Dyn>) -> OrmResult<()> {
        let holder = self
            .holder()
            .ok_or_else(|| OrmError::Unaddressable(format!("{} is not an association", self.name)))?
            .clone();
        holder
            .push(self.value_mut(root)?, item)
            .map_err(|e| self.annotate(e))
    }

    fn annotate(&self, err: OrmError) -> OrmError {
        match err {
            OrmError::TypeMismatch { field, expected, found } if field.is_empty() => OrmError::TypeMismatch {
                field: self.name.clone(),
                expected,
                found,
            },
            other => other,
        }
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("position", &self.position)
            .field("flags", &self.flags)
            .field("association", &self.is_association())
            .finish()
    }
}
