//! Schema registry
//!
//! Builds each model's [`Schema`] on first use and caches it for the life of
//! the registry. Construction runs under a single build lock; lookups of
//! published schemas are lock-free. Associations are resolved after every
//! schema reachable from the requested model has been assembled, so cyclic
//! model graphs (owner has children, child belongs to owner) resolve
//! against the same shared schemas.

use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use tracing::{debug, warn};

use super::access::Dyn;
use super::assigner::Assigner;
use super::builder::{DeclKind, Declaration, SchemaBuilder};
use super::field::{FieldDescriptor, FieldFlags, FieldShape};
use super::index::collect_indexes;
use super::relationship;
use super::{Model, Schema, VirtualField};
use crate::config::OrmConfig;
use crate::error::{OrmError, OrmResult};
use crate::naming::NamingStrategy;
use crate::preload::VirtualFieldLoader;
use crate::value::ValueKind;

/// Builds (or finds) the schema of one model type inside a build
pub(crate) type SchemaThunk = fn(&mut BuildCtx<'_>) -> OrmResult<Arc<Schema>>;

pub(crate) fn build_thunk<M: Model>(ctx: &mut BuildCtx<'_>) -> OrmResult<Arc<Schema>> {
    ctx.build::<M>()
}

fn factory<M: Model>() -> Box<Dyn> {
    Box::new(M::default())
}

fn cloner<M: Model>(value: &Dyn) -> Option<Box<Dyn>> {
    value.downcast_ref::<M>().map(|m| Box::new(m.clone()) as Box<Dyn>)
}

/// Process-wide cache of model schemas
pub struct Registry {
    schemas: DashMap<TypeId, Arc<Schema>>,
    failures: DashMap<TypeId, OrmError>,
    assigners: DashMap<TypeId, Arc<dyn Assigner>>,
    naming: NamingStrategy,
    build_lock: Mutex<()>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_naming(NamingStrategy::default())
    }

    pub fn with_naming(naming: NamingStrategy) -> Self {
        Self {
            schemas: DashMap::new(),
            failures: DashMap::new(),
            assigners: DashMap::new(),
            naming,
            build_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &OrmConfig) -> Self {
        Self::with_naming(NamingStrategy::new(config.table_prefix.clone(), config.singular_table))
    }

    pub fn naming(&self) -> &NamingStrategy {
        &self.naming
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Schema of `M`, built on first request
    ///
    /// A failed build is cached: later requests return the same error
    /// without re-running the declaration.
    pub fn get_or_build<M: Model>(&self) -> OrmResult<Arc<Schema>> {
        let id = TypeId::of::<M>();
        if let Some(schema) = self.lookup(id)? {
            return Ok(schema);
        }

        let _guard = self
            .build_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(schema) = self.lookup(id)? {
            return Ok(schema);
        }

        let mut ctx = BuildCtx::new(self);
        let result = ctx.build::<M>().and_then(|schema| {
            ctx.resolve_deferred()?;
            Ok(schema)
        });

        match result {
            Ok(schema) => {
                for (type_id, built) in ctx.pending.drain() {
                    self.schemas.insert(type_id, built);
                }
                debug!("Registered schema {} (table {})", schema.type_name, schema.table_name);
                Ok(schema)
            }
            Err(err) => {
                warn!("Schema build for {} failed: {}", type_name::<M>(), err);
                self.failures.insert(id, err.clone());
                Err(err)
            }
        }
    }

    fn lookup(&self, id: TypeId) -> OrmResult<Option<Arc<Schema>>> {
        if let Some(schema) = self.schemas.get(&id) {
            return Ok(Some(schema.value().clone()));
        }
        if let Some(err) = self.failures.get(&id) {
            return Err(err.value().clone());
        }
        Ok(None)
    }

    /// Published schema for a type id, if it was built
    pub fn get(&self, id: TypeId) -> Option<Arc<Schema>> {
        self.schemas.get(&id).map(|s| s.value().clone())
    }

    /// Use `assigner` for every column of type `T` in schemas built afterwards
    pub fn register_assigner<T: 'static>(&self, assigner: Arc<dyn Assigner>) {
        if !self.schemas.is_empty() {
            warn!(
                "Assigner for {} registered after schemas were built; existing schemas keep their conversion",
                type_name::<T>()
            );
        }
        self.assigners.insert(TypeId::of::<T>(), assigner);
    }

    pub(crate) fn assigner_for(&self, id: TypeId) -> Option<Arc<dyn Assigner>> {
        self.assigners.get(&id).map(|a| a.value().clone())
    }

    /// Attach a virtual field to `M`, filled by `loader` when preloaded by name
    pub fn add_virtual_field<M: Model>(&self, name: impl Into<String>, loader: Arc<dyn VirtualFieldLoader>) -> OrmResult<()> {
        let schema = self.get_or_build::<M>()?;
        let name = name.into();
        if schema.find_field(&name).is_some() {
            return Err(OrmError::schema(
                &schema.type_name,
                format!("virtual field {} collides with a declared field", name),
            ));
        }
        schema.add_virtual_field(VirtualField { name, loader });
        Ok(())
    }
}

/// Free function form of [`Registry::get_or_build`]
pub fn schema_of<M: Model>(registry: &Registry) -> OrmResult<Arc<Schema>> {
    registry.get_or_build::<M>()
}

/// State of one build: schemas assembled but not yet published
pub(crate) struct BuildCtx<'r> {
    registry: &'r Registry,
    pending: HashMap<TypeId, Arc<Schema>>,
    in_progress: HashSet<TypeId>,
    deferred: VecDeque<(Arc<Schema>, Arc<FieldDescriptor>)>,
}

impl<'r> BuildCtx<'r> {
    fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            pending: HashMap::new(),
            in_progress: HashSet::new(),
            deferred: VecDeque::new(),
        }
    }

    pub(crate) fn build<M: Model>(&mut self) -> OrmResult<Arc<Schema>> {
        let id = TypeId::of::<M>();
        if let Some(schema) = self.registry.lookup(id)? {
            return Ok(schema);
        }
        if let Some(schema) = self.pending.get(&id) {
            return Ok(schema.clone());
        }
        if !self.in_progress.insert(id) {
            return Err(OrmError::schema(
                type_name::<M>(),
                "model embeds itself, directly or through another embedded model",
            ));
        }

        let mut builder = SchemaBuilder::<M>::new();
        M::describe(&mut builder);
        let assembled = self.assemble(builder.into_declaration(), id, factory::<M>, cloner::<M>);
        self.in_progress.remove(&id);
        let schema = Arc::new(assembled?);

        for field in schema.associations() {
            self.deferred.push_back((schema.clone(), field.clone()));
        }
        self.pending.insert(id, schema.clone());
        debug!("Assembled schema {} with {} fields", schema.type_name, schema.fields.len());
        Ok(schema)
    }

    fn assemble(
        &mut self,
        decl: Declaration,
        id: TypeId,
        factory: fn() -> Box<Dyn>,
        cloner: fn(&Dyn) -> Option<Box<Dyn>>,
    ) -> OrmResult<Schema> {
        let naming = self.registry.naming.clone();
        let type_name = decl.type_name;
        if type_name.is_empty() {
            return Err(OrmError::schema(decl.full_type_name, "type name must not be empty"));
        }
        let table_name = match &decl.table {
            Some(table) => naming.prefixed(table),
            None => naming.table_name(&type_name),
        };

        let mut fields: Vec<FieldDescriptor> = Vec::new();
        for (index, field) in decl.decls.into_iter().enumerate() {
            if field.name.is_empty() {
                return Err(OrmError::schema(&type_name, format!("field #{} has no name", index)));
            }
            match field.kind {
                DeclKind::Column { assigner, type_id, custom } => {
                    let overridden = if custom { None } else { self.registry.assigner_for(type_id) };
                    let shape = match overridden {
                        Some(assigner) => FieldShape::Scanner { assigner },
                        None if custom => FieldShape::Scanner { assigner },
                        None => FieldShape::Scalar { assigner },
                    };
                    let column = field
                        .options
                        .column
                        .clone()
                        .unwrap_or_else(|| naming.column_name(&field.name));
                    fields.push(FieldDescriptor::new(
                        field.name,
                        column,
                        vec![index],
                        field.declared_type,
                        FieldFlags::default(),
                        field.options,
                        field.projection,
                        shape,
                    ));
                }
                DeclKind::Embedded { schema } => {
                    let embedded = schema(self)?;
                    let prefix = field.options.embedded_prefix.clone().unwrap_or_default();
                    for inner in embedded.fields.iter() {
                        fields.push(inner.embedded(&field.projection, index, &prefix));
                    }
                }
                DeclKind::Association { holder, target, target_name } => {
                    let column = naming.column_name(&field.name);
                    fields.push(FieldDescriptor::new(
                        field.name,
                        column,
                        vec![index],
                        field.declared_type,
                        FieldFlags::default(),
                        field.options,
                        field.projection,
                        FieldShape::Association {
                            holder,
                            target,
                            target_name,
                        },
                    ));
                }
            }
        }

        for (position, field) in fields.iter_mut().enumerate() {
            field.position = position;
            field.flags = resolve_flags(field);
        }

        let mut primary_fields: Vec<usize> = fields
            .iter()
            .filter(|f| f.flags.primary_key && f.is_normal())
            .map(|f| f.position)
            .collect();
        if primary_fields.is_empty() {
            if let Some(field) = fields.iter_mut().find(|f| f.is_normal() && f.column == "id") {
                field.flags.primary_key = true;
                field.flags = resolve_flags(field);
                primary_fields.push(field.position);
            }
        }

        let indexes = collect_indexes(&fields, &table_name, &naming);

        Ok(Schema {
            type_id: Some(id),
            type_name,
            full_type_name: decl.full_type_name,
            table_name,
            fields: fields.into_iter().map(Arc::new).collect(),
            primary_fields,
            indexes,
            hooks: decl.hooks,
            factory: Some(factory),
            cloner: Some(cloner),
            virtual_fields: RwLock::new(Vec::new()),
        })
    }

    /// Resolve every queued association; may assemble further schemas
    pub(crate) fn resolve_deferred(&mut self) -> OrmResult<()> {
        while let Some((owner, field)) = self.deferred.pop_front() {
            if field.relationship.get().is_some() {
                continue;
            }
            let target = match &field.shape {
                FieldShape::Association { target, .. } => target(self)?,
                _ => continue,
            };
            let resolved = relationship::resolve(&owner, &field, &target, &self.registry.naming)?;
            debug!(
                "Resolved {}.{} as {:?} to {}",
                owner.type_name, field.name, resolved.kind, target.type_name
            );
            // each field is queued once and skipped above when resolved
            if field.relationship.set(Arc::new(resolved)).is_err() {
                return Err(OrmError::relationship(
                    &owner.type_name,
                    &field.name,
                    "association resolved twice",
                ));
            }
        }
        Ok(())
    }
}

fn resolve_flags(field: &FieldDescriptor) -> FieldFlags {
    let options = &field.options;
    let primary_key = options.primary_key || field.flags.primary_key;
    let integer = matches!(field.kind(), ValueKind::Int | ValueKind::UInt);
    let auto_increment = match options.auto_increment {
        Some(explicit) => explicit,
        None => primary_key && integer && options.generator.is_none() && field.is_normal(),
    };
    FieldFlags {
        primary_key,
        read_only: options.read_only,
        ignored: options.ignored,
        has_default: options.default.is_some() || (auto_increment && !primary_key),
        auto_increment,
        unique: options.unique,
        not_null: options.not_null,
    }
}
