//! Declarative model description
//!
//! Models describe themselves once, in [`Model::describe`](super::Model::describe):
//!
//! ```ignore
//! impl Model for Owner {
//!     fn describe(schema: &mut SchemaBuilder<Self>) {
//!         schema.field("ID", |m| &m.id, |m| &mut m.id).primary_key();
//!         schema.field("Name", |m| &m.name, |m| &mut m.name).size(100);
//!         schema.many("Children", |m| &m.children, |m| &mut m.children);
//!     }
//! }
//! ```

use std::any::{type_name, Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use super::access::{BoxedHolder, Holder, Lens, ManyHolder, OptionHolder, Projection};
use super::assigner::{Assigner, ColumnAssigner};
use super::field::{FieldOptions, IndexOption, KeyGenerator};
use super::registry::{build_thunk, SchemaThunk};
use super::Model;
use crate::hooks::{ErasedHooks, HookAdapter, ModelHooks};
use crate::naming::short_type_name;
use crate::value::ColumnType;

pub(crate) enum DeclKind {
    Column {
        assigner: Arc<dyn Assigner>,
        type_id: TypeId,
        custom: bool,
    },
    Embedded {
        schema: SchemaThunk,
    },
    Association {
        holder: Arc<dyn Holder>,
        target: SchemaThunk,
        target_name: &'static str,
    },
}

pub(crate) struct FieldDecl {
    pub(crate) name: String,
    pub(crate) declared_type: &'static str,
    pub(crate) options: FieldOptions,
    pub(crate) projection: Arc<dyn Projection>,
    pub(crate) kind: DeclKind,
}

/// Collected declaration of one model
pub(crate) struct Declaration {
    pub(crate) type_name: String,
    pub(crate) full_type_name: &'static str,
    pub(crate) table: Option<String>,
    pub(crate) decls: Vec<FieldDecl>,
    pub(crate) hooks: Option<Arc<dyn ErasedHooks>>,
}

/// Receives the field declarations of model `M`
pub struct SchemaBuilder<M> {
    type_name: String,
    table: Option<String>,
    decls: Vec<FieldDecl>,
    hooks: Option<Arc<dyn ErasedHooks>>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> SchemaBuilder<M> {
    pub(crate) fn new() -> Self {
        Self {
            type_name: short_type_name(type_name::<M>()).to_string(),
            table: None,
            decls: Vec::new(),
            hooks: None,
            _model: PhantomData,
        }
    }

    pub(crate) fn into_declaration(self) -> Declaration {
        Declaration {
            type_name: self.type_name,
            full_type_name: type_name::<M>(),
            table: self.table,
            decls: self.decls,
            hooks: self.hooks,
        }
    }

    /// Explicit table name instead of the pluralized type name
    pub fn table(&mut self, name: impl Into<String>) -> &mut Self {
        self.table = Some(name.into());
        self
    }

    /// Logical type name used for table naming and foreign-key inference
    pub fn type_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.type_name = name.into();
        self
    }

    /// Run the model's [`ModelHooks`] at the lifecycle points of the callback chains
    pub fn hooks(&mut self) -> &mut Self
    where
        M: ModelHooks,
    {
        self.hooks = Some(Arc::new(HookAdapter::<M>::new()));
        self
    }

    fn push(&mut self, name: &str, declared_type: &'static str, projection: Arc<dyn Projection>, kind: DeclKind) -> FieldBuilder<'_> {
        self.decls.push(FieldDecl {
            name: name.to_string(),
            declared_type,
            options: FieldOptions::default(),
            projection,
            kind,
        });
        let last = self.decls.len() - 1;
        FieldBuilder {
            decl: &mut self.decls[last],
        }
    }

    /// A column of a built-in type
    pub fn field<T: ColumnType>(&mut self, name: &str, get: fn(&M) -> &T, get_mut: fn(&mut M) -> &mut T) -> FieldBuilder<'_> {
        let kind = DeclKind::Column {
            assigner: Arc::new(ColumnAssigner::<T>::new()),
            type_id: TypeId::of::<T>(),
            custom: false,
        };
        self.push(name, type_name::<T>(), Arc::new(Lens::new(get, get_mut)), kind)
    }

    /// A column converted by an application-supplied assigner
    pub fn field_with<T>(
        &mut self,
        name: &str,
        get: fn(&M) -> &T,
        get_mut: fn(&mut M) -> &mut T,
        assigner: Arc<dyn Assigner>,
    ) -> FieldBuilder<'_>
    where
        T: Any + Send + Sync,
    {
        let kind = DeclKind::Column {
            assigner,
            type_id: TypeId::of::<T>(),
            custom: true,
        };
        self.push(name, type_name::<T>(), Arc::new(Lens::new(get, get_mut)), kind)
    }

    /// Inline the fields of another model; chain [`FieldBuilder::prefix`] to prefix its columns
    pub fn embed<E: Model>(&mut self, name: &str, get: fn(&M) -> &E, get_mut: fn(&mut M) -> &mut E) -> FieldBuilder<'_> {
        let kind = DeclKind::Embedded {
            schema: build_thunk::<E>,
        };
        self.push(name, type_name::<E>(), Arc::new(Lens::new(get, get_mut)), kind)
    }

    /// A single associated record (has-one or belongs-to)
    pub fn one<T: Model>(&mut self, name: &str, get: fn(&M) -> &Option<T>, get_mut: fn(&mut M) -> &mut Option<T>) -> FieldBuilder<'_> {
        let kind = DeclKind::Association {
            holder: Arc::new(OptionHolder::<T>::new()),
            target: build_thunk::<T>,
            target_name: type_name::<T>(),
        };
        self.push(name, type_name::<Option<T>>(), Arc::new(Lens::new(get, get_mut)), kind)
    }

    /// A single associated record behind a box, for models that refer to themselves
    pub fn one_boxed<T: Model>(
        &mut self,
        name: &str,
        get: fn(&M) -> &Option<Box<T>>,
        get_mut: fn(&mut M) -> &mut Option<Box<T>>,
    ) -> FieldBuilder<'_> {
        let kind = DeclKind::Association {
            holder: Arc::new(BoxedHolder::<T>::new()),
            target: build_thunk::<T>,
            target_name: type_name::<T>(),
        };
        self.push(name, type_name::<Option<Box<T>>>(), Arc::new(Lens::new(get, get_mut)), kind)
    }

    /// A list of associated records (has-many or many-to-many)
    pub fn many<T: Model>(&mut self, name: &str, get: fn(&M) -> &Vec<T>, get_mut: fn(&mut M) -> &mut Vec<T>) -> FieldBuilder<'_> {
        let kind = DeclKind::Association {
            holder: Arc::new(ManyHolder::<T>::new()),
            target: build_thunk::<T>,
            target_name: type_name::<T>(),
        };
        self.push(name, type_name::<Vec<T>>(), Arc::new(Lens::new(get, get_mut)), kind)
    }
}

/// Options of the field just declared
pub struct FieldBuilder<'b> {
    decl: &'b mut FieldDecl,
}

fn split_names(names: &str) -> impl Iterator<Item = String> + '_ {
    names
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

impl<'b> FieldBuilder<'b> {
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.decl.options.column = Some(name.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.decl.options.primary_key = true;
        self
    }

    /// Override auto-increment detection; integer primary keys auto-increment by default
    pub fn auto_increment(mut self, enabled: bool) -> Self {
        self.decl.options.auto_increment = Some(enabled);
        self
    }

    /// Database-side default expression; blank values are omitted on insert and reloaded
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.decl.options.default = Some(expr.into());
        self
    }

    pub fn sql_type(mut self, sql_type: impl Into<String>) -> Self {
        self.decl.options.sql_type = Some(sql_type.into());
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.decl.options.size = Some(size);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.decl.options.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.decl.options.unique = true;
        self
    }

    /// Read from the database, never written
    pub fn read_only(mut self) -> Self {
        self.decl.options.read_only = true;
        self
    }

    /// Not persisted
    pub fn ignore(mut self) -> Self {
        self.decl.options.ignored = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.decl.options.indexes.push(IndexOption { name: None, unique: false });
        self
    }

    pub fn index_named(mut self, name: impl Into<String>) -> Self {
        self.decl.options.indexes.push(IndexOption {
            name: Some(name.into()),
            unique: false,
        });
        self
    }

    pub fn unique_index(mut self) -> Self {
        self.decl.options.indexes.push(IndexOption { name: None, unique: true });
        self
    }

    pub fn unique_index_named(mut self, name: impl Into<String>) -> Self {
        self.decl.options.indexes.push(IndexOption {
            name: Some(name.into()),
            unique: true,
        });
        self
    }

    /// Convert this column with `assigner` instead of the built-in conversion
    pub fn assigner(mut self, assigner: Arc<dyn Assigner>) -> Self {
        if let DeclKind::Column { assigner: current, custom, .. } = &mut self.decl.kind {
            *current = assigner;
            *custom = true;
        }
        self
    }

    /// Fill a blank primary key before insert
    pub fn generator(mut self, generator: KeyGenerator) -> Self {
        self.decl.options.generator = Some(generator);
        self
    }

    /// Column prefix for the fields of an embedded model
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.decl.options.embedded_prefix = Some(prefix.into());
        self
    }

    /// Foreign key field names, comma separated for composite keys
    pub fn foreign_key(mut self, names: &str) -> Self {
        self.decl.options.foreign_keys.extend(split_names(names));
        self
    }

    pub fn association_foreign_key(mut self, names: &str) -> Self {
        self.decl.options.association_foreign_keys.extend(split_names(names));
        self
    }

    /// Declare a many-to-many association through `join_table`
    pub fn many2many(mut self, join_table: impl Into<String>) -> Self {
        self.decl.options.many2many = Some(join_table.into());
        self
    }

    /// Join-table columns referencing the owner
    pub fn jointable_foreign_key(mut self, columns: &str) -> Self {
        self.decl.options.jointable_foreign_keys.extend(split_names(columns));
        self
    }

    /// Join-table columns referencing the associated model
    pub fn association_jointable_foreign_key(mut self, columns: &str) -> Self {
        self.decl.options.association_jointable_foreign_keys.extend(split_names(columns));
        self
    }

    /// Polymorphic association through `<name>Type` and `<name>ID` on the associated model
    pub fn polymorphic(mut self, name: impl Into<String>) -> Self {
        self.decl.options.polymorphic = Some(name.into());
        self
    }

    /// Discriminator stored for this owner; defaults to the owner's table name
    pub fn polymorphic_value(mut self, value: impl Into<String>) -> Self {
        self.decl.options.polymorphic_value = Some(value.into());
        self
    }

    pub fn association_autocreate(mut self, enabled: bool) -> Self {
        self.decl.options.auto_create = Some(enabled);
        self
    }

    pub fn association_autoupdate(mut self, enabled: bool) -> Self {
        self.decl.options.auto_update = Some(enabled);
        self
    }

    pub fn association_save_reference(mut self, enabled: bool) -> Self {
        self.decl.options.save_reference = Some(enabled);
        self
    }

    pub fn save_associations(mut self, enabled: bool) -> Self {
        self.decl.options.save_associations = Some(enabled);
        self
    }
}
