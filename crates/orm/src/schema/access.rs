//! Type-erased access into model values
//!
//! Models are handled as `&dyn Any`; projections reach a field inside a
//! model (following embedding), holders reach the records stored in an
//! association slot, and [`Records`] abstracts over query destinations.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{Model, Schema};
use crate::error::{OrmError, OrmResult};

/// A type-erased model or field value
pub type Dyn = dyn Any + Send + Sync;

/// Reach one field inside a root value
pub trait Projection: Send + Sync {
    fn project<'a>(&self, root: &'a Dyn) -> Option<&'a Dyn>;
    fn project_mut<'a>(&self, root: &'a mut Dyn) -> Option<&'a mut Dyn>;
}

/// Direct field of `M` of type `T`
pub(crate) struct Lens<M, T> {
    get: fn(&M) -> &T,
    get_mut: fn(&mut M) -> &mut T,
}

impl<M, T> Lens<M, T> {
    pub(crate) fn new(get: fn(&M) -> &T, get_mut: fn(&mut M) -> &mut T) -> Self {
        Self { get, get_mut }
    }
}

impl<M, T> Projection for Lens<M, T>
where
    M: Any + Send + Sync,
    T: Any + Send + Sync,
{
    fn project<'a>(&self, root: &'a Dyn) -> Option<&'a Dyn> {
        root.downcast_ref::<M>().map(|m| (self.get)(m) as &Dyn)
    }

    fn project_mut<'a>(&self, root: &'a mut Dyn) -> Option<&'a mut Dyn> {
        root.downcast_mut::<M>().map(|m| (self.get_mut)(m) as &mut Dyn)
    }
}

/// Field of an embedded struct, reached through the embedding field
pub(crate) struct Nested {
    outer: Arc<dyn Projection>,
    inner: Arc<dyn Projection>,
}

impl Nested {
    pub(crate) fn new(outer: Arc<dyn Projection>, inner: Arc<dyn Projection>) -> Self {
        Self { outer, inner }
    }
}

impl Projection for Nested {
    fn project<'a>(&self, root: &'a Dyn) -> Option<&'a Dyn> {
        self.outer.project(root).and_then(|v| self.inner.project(v))
    }

    fn project_mut<'a>(&self, root: &'a mut Dyn) -> Option<&'a mut Dyn> {
        match self.outer.project_mut(root) {
            Some(v) => self.inner.project_mut(v),
            None => None,
        }
    }
}

/// Storage shape of an association slot
pub(crate) trait Holder: Send + Sync {
    fn is_many(&self) -> bool;
    fn items<'a>(&self, slot: &'a Dyn) -> Vec<&'a Dyn>;
    fn items_mut<'a>(&self, slot: &'a mut Dyn) -> Vec<&'a mut Dyn>;
    fn clear(&self, slot: &mut Dyn);
    fn push(&self, slot: &mut Dyn, item: Box<Dyn>) -> OrmResult<()>;
}

fn slot_mismatch<T>() -> OrmError {
    OrmError::Unaddressable(format!("association slot is not {}", std::any::type_name::<T>()))
}

fn item_mismatch<T>() -> OrmError {
    OrmError::TypeMismatch {
        field: String::new(),
        expected: std::any::type_name::<T>().to_string(),
        found: "record of another type".to_string(),
    }
}

/// `Vec<T>`
pub(crate) struct ManyHolder<T>(PhantomData<fn() -> T>);

impl<T> ManyHolder<T> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: Model> Holder for ManyHolder<T> {
    fn is_many(&self) -> bool {
        true
    }

    fn items<'a>(&self, slot: &'a Dyn) -> Vec<&'a Dyn> {
        match slot.downcast_ref::<Vec<T>>() {
            Some(list) => list.iter().map(|t| t as &Dyn).collect(),
            None => Vec::new(),
        }
    }

    fn items_mut<'a>(&self, slot: &'a mut Dyn) -> Vec<&'a mut Dyn> {
        match slot.downcast_mut::<Vec<T>>() {
            Some(list) => list.iter_mut().map(|t| t as &mut Dyn).collect(),
            None => Vec::new(),
        }
    }

    fn clear(&self, slot: &mut Dyn) {
        if let Some(list) = slot.downcast_mut::<Vec<T>>() {
            list.clear();
        }
    }

    fn push(&self, slot: &mut Dyn, item: Box<Dyn>) -> OrmResult<()> {
        let list = slot.downcast_mut::<Vec<T>>().ok_or_else(slot_mismatch::<Vec<T>>)?;
        let item = item.downcast::<T>().map_err(|_| item_mismatch::<T>())?;
        list.push(*item);
        Ok(())
    }
}

/// `Option<T>`
pub(crate) struct OptionHolder<T>(PhantomData<fn() -> T>);

impl<T> OptionHolder<T> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: Model> Holder for OptionHolder<T> {
    fn is_many(&self) -> bool {
        false
    }

    fn items<'a>(&self, slot: &'a Dyn) -> Vec<&'a Dyn> {
        slot.downcast_ref::<Option<T>>()
            .and_then(|o| o.as_ref())
            .map(|t| vec![t as &Dyn])
            .unwrap_or_default()
    }

    fn items_mut<'a>(&self, slot: &'a mut Dyn) -> Vec<&'a mut Dyn> {
        slot.downcast_mut::<Option<T>>()
            .and_then(|o| o.as_mut())
            .map(|t| vec![t as &mut Dyn])
            .unwrap_or_default()
    }

    fn clear(&self, slot: &mut Dyn) {
        if let Some(o) = slot.downcast_mut::<Option<T>>() {
            *o = None;
        }
    }

    fn push(&self, slot: &mut Dyn, item: Box<Dyn>) -> OrmResult<()> {
        let o = slot.downcast_mut::<Option<T>>().ok_or_else(slot_mismatch::<Option<T>>)?;
        let item = item.downcast::<T>().map_err(|_| item_mismatch::<T>())?;
        *o = Some(*item);
        Ok(())
    }
}

/// `Option<Box<T>>`, for self-referencing models
pub(crate) struct BoxedHolder<T>(PhantomData<fn() -> T>);

impl<T> BoxedHolder<T> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: Model> Holder for BoxedHolder<T> {
    fn is_many(&self) -> bool {
        false
    }

    fn items<'a>(&self, slot: &'a Dyn) -> Vec<&'a Dyn> {
        slot.downcast_ref::<Option<Box<T>>>()
            .and_then(|o| o.as_deref())
            .map(|t| vec![t as &Dyn])
            .unwrap_or_default()
    }

    fn items_mut<'a>(&self, slot: &'a mut Dyn) -> Vec<&'a mut Dyn> {
        slot.downcast_mut::<Option<Box<T>>>()
            .and_then(|o| o.as_deref_mut())
            .map(|t| vec![t as &mut Dyn])
            .unwrap_or_default()
    }

    fn clear(&self, slot: &mut Dyn) {
        if let Some(o) = slot.downcast_mut::<Option<Box<T>>>() {
            *o = None;
        }
    }

    fn push(&self, slot: &mut Dyn, item: Box<Dyn>) -> OrmResult<()> {
        let o = slot.downcast_mut::<Option<Box<T>>>().ok_or_else(slot_mismatch::<Option<Box<T>>>)?;
        let item = item.downcast::<T>().map_err(|_| item_mismatch::<T>())?;
        *o = Some(item);
        Ok(())
    }
}

/// A growable destination for query results
pub trait Records: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);

    /// Append a default record and return it for scanning
    fn push_default(&mut self) -> &mut Dyn;

    fn items(&self) -> Vec<&Dyn>;

    fn items_mut(&mut self) -> Vec<&mut Dyn>;
}

impl<M: Model> Records for Vec<M> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn clear(&mut self) {
        Vec::clear(self)
    }

    fn push_default(&mut self) -> &mut Dyn {
        self.push(M::default());
        let last = Vec::len(self) - 1;
        &mut self[last]
    }

    fn items(&self) -> Vec<&Dyn> {
        self.iter().map(|m| m as &Dyn).collect()
    }

    fn items_mut(&mut self) -> Vec<&mut Dyn> {
        self.iter_mut().map(|m| m as &mut Dyn).collect()
    }
}

/// Records of a type known only through its schema
pub(crate) struct DynRecords {
    schema: Arc<Schema>,
    pub(crate) items: Vec<Box<Dyn>>,
}

impl DynRecords {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            items: Vec::new(),
        }
    }
}

impl Records for DynRecords {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn clear(&mut self) {
        self.items.clear()
    }

    fn push_default(&mut self) -> &mut Dyn {
        self.items.push(self.schema.new_value());
        let last = self.items.len() - 1;
        &mut *self.items[last]
    }

    fn items(&self) -> Vec<&Dyn> {
        self.items.iter().map(|b| &**b).collect()
    }

    fn items_mut(&mut self) -> Vec<&mut Dyn> {
        self.items.iter_mut().map(|b| &mut **b).collect()
    }
}

/// Streaming destination: receives each record as soon as it is scanned
pub trait RecordSink: Send {
    fn accept(&mut self, record: Box<Dyn>) -> OrmResult<()>;
}

/// Adapts a typed closure into a [`RecordSink`]
pub(crate) struct FnSink<M, F> {
    f: F,
    _model: PhantomData<fn(M)>,
}

impl<M, F> FnSink<M, F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f, _model: PhantomData }
    }
}

impl<M, F> RecordSink for FnSink<M, F>
where
    M: Model,
    F: FnMut(M) -> OrmResult<()> + Send,
{
    fn accept(&mut self, record: Box<Dyn>) -> OrmResult<()> {
        let record = record.downcast::<M>().map_err(|_| item_mismatch::<M>())?;
        (self.f)(*record)
    }
}
