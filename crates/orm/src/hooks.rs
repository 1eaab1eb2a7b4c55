//! Model lifecycle hooks
//!
//! A model opts in with [`SchemaBuilder::hooks`](crate::schema::SchemaBuilder::hooks);
//! the callback chains then run its [`ModelHooks`] at the matching points.
//! An error returned from a hook aborts the operation and rolls back the
//! surrounding transaction.

use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::db::Db;
use crate::error::OrmResult;
use crate::schema::{Dyn, Model};

#[async_trait]
pub trait ModelHooks: Send + Sync {
    async fn before_save(&mut self, _db: &Db) -> OrmResult<()> {
        Ok(())
    }

    async fn before_create(&mut self, _db: &Db) -> OrmResult<()> {
        Ok(())
    }

    async fn after_create(&mut self, _db: &Db) -> OrmResult<()> {
        Ok(())
    }

    async fn after_save(&mut self, _db: &Db) -> OrmResult<()> {
        Ok(())
    }

    async fn before_update(&mut self, _db: &Db) -> OrmResult<()> {
        Ok(())
    }

    async fn after_update(&mut self, _db: &Db) -> OrmResult<()> {
        Ok(())
    }

    async fn before_delete(&mut self, _db: &Db) -> OrmResult<()> {
        Ok(())
    }

    async fn after_delete(&mut self, _db: &Db) -> OrmResult<()> {
        Ok(())
    }

    async fn after_find(&mut self, _db: &Db) -> OrmResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    BeforeSave,
    BeforeCreate,
    AfterCreate,
    AfterSave,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    AfterFind,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookPoint::BeforeSave => "before_save",
            HookPoint::BeforeCreate => "before_create",
            HookPoint::AfterCreate => "after_create",
            HookPoint::AfterSave => "after_save",
            HookPoint::BeforeUpdate => "before_update",
            HookPoint::AfterUpdate => "after_update",
            HookPoint::BeforeDelete => "before_delete",
            HookPoint::AfterDelete => "after_delete",
            HookPoint::AfterFind => "after_find",
        };
        f.write_str(name)
    }
}

/// Hooks of one model type, callable on an erased record
#[async_trait]
pub(crate) trait ErasedHooks: Send + Sync {
    async fn run(&self, point: HookPoint, record: &mut Dyn, db: &Db) -> OrmResult<()>;
}

pub(crate) struct HookAdapter<M>(PhantomData<fn() -> M>);

impl<M> HookAdapter<M> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<M: Model + ModelHooks> ErasedHooks for HookAdapter<M> {
    async fn run(&self, point: HookPoint, record: &mut Dyn, db: &Db) -> OrmResult<()> {
        let Some(model) = record.downcast_mut::<M>() else {
            return Ok(());
        };
        match point {
            HookPoint::BeforeSave => model.before_save(db).await,
            HookPoint::BeforeCreate => model.before_create(db).await,
            HookPoint::AfterCreate => model.after_create(db).await,
            HookPoint::AfterSave => model.after_save(db).await,
            HookPoint::BeforeUpdate => model.before_update(db).await,
            HookPoint::AfterUpdate => model.after_update(db).await,
            HookPoint::BeforeDelete => model.before_delete(db).await,
            HookPoint::AfterDelete => model.after_delete(db).await,
            HookPoint::AfterFind => model.after_find(db).await,
        }
    }
}
