//! Ordered, named callback chains
//!
//! Each operation (create, query, update, delete) runs its own
//! [`CallbackChain`]. The built-in steps are registered under `relmap:*`
//! names; applications insert their own steps relative to them, replace
//! them or remove them. Once a step records an error or skips the rest of
//! the chain, only steps marked [`Callback::always_run`] still execute.

mod associations;
mod create;
mod delete;
mod hooks;
mod query;
mod timestamps;
mod transaction;
mod update;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{OrmError, OrmResult};
use crate::scope::{Operation, Scope};

/// One step of a chain
#[async_trait]
pub trait Callback: Send + Sync {
    async fn call(&self, scope: &mut Scope<'_>) -> OrmResult<()>;

    /// Run even after an earlier step failed or skipped the rest
    fn always_run(&self) -> bool {
        false
    }
}

struct FnCallback<F>(F);

#[async_trait]
impl<F> Callback for FnCallback<F>
where
    F: Fn(&mut Scope<'_>) -> OrmResult<()> + Send + Sync,
{
    async fn call(&self, scope: &mut Scope<'_>) -> OrmResult<()> {
        (self.0)(scope)
    }
}

/// Wrap a synchronous closure as a chain step
pub fn callback_fn<F>(f: F) -> Arc<dyn Callback>
where
    F: Fn(&mut Scope<'_>) -> OrmResult<()> + Send + Sync + 'static,
{
    Arc::new(FnCallback(f))
}

#[derive(Clone)]
struct Entry {
    name: String,
    callback: Arc<dyn Callback>,
}

#[derive(Clone, Default)]
pub struct CallbackChain {
    entries: Vec<Entry>,
}

impl CallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    fn anchor(&self, anchor: &str) -> OrmResult<usize> {
        self.position(anchor)
            .ok_or_else(|| OrmError::Callback(format!("no callback named {} to anchor on", anchor)))
    }

    /// Append a step; a step with the same name is replaced where it stands
    pub fn register(&mut self, name: impl Into<String>, callback: Arc<dyn Callback>) -> &mut Self {
        let name = name.into();
        match self.position(&name) {
            Some(index) => {
                warn!("callback {} registered twice, replacing the earlier one", name);
                self.entries[index].callback = callback;
            }
            None => self.entries.push(Entry { name, callback }),
        }
        self
    }

    pub fn register_first(&mut self, name: impl Into<String>, callback: Arc<dyn Callback>) -> &mut Self {
        let name = name.into();
        self.entries.retain(|e| e.name != name);
        self.entries.insert(0, Entry { name, callback });
        self
    }

    pub fn register_before(
        &mut self,
        anchor: &str,
        name: impl Into<String>,
        callback: Arc<dyn Callback>,
    ) -> OrmResult<&mut Self> {
        let name = name.into();
        self.entries.retain(|e| e.name != name);
        let index = self.anchor(anchor)?;
        self.entries.insert(index, Entry { name, callback });
        Ok(self)
    }

    pub fn register_after(
        &mut self,
        anchor: &str,
        name: impl Into<String>,
        callback: Arc<dyn Callback>,
    ) -> OrmResult<&mut Self> {
        let name = name.into();
        self.entries.retain(|e| e.name != name);
        let index = self.anchor(anchor)?;
        self.entries.insert(index + 1, Entry { name, callback });
        Ok(self)
    }

    pub fn replace(&mut self, name: &str, callback: Arc<dyn Callback>) -> OrmResult<&mut Self> {
        let index = self.anchor(name)?;
        self.entries[index].callback = callback;
        Ok(self)
    }

    /// Remove a step; returns whether it existed
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        before != self.entries.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) async fn run(&self, scope: &mut Scope<'_>) {
        for entry in &self.entries {
            if (scope.has_error() || scope.is_skipped()) && !entry.callback.always_run() {
                continue;
            }
            if let Err(err) = entry.callback.call(scope).await {
                scope.add_error(err);
            }
        }
    }
}

impl fmt::Debug for CallbackChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// The four chains of a [`Db`](crate::Db)
#[derive(Debug, Clone)]
pub struct Callbacks {
    pub create: CallbackChain,
    pub query: CallbackChain,
    pub update: CallbackChain,
    pub delete: CallbackChain,
}

impl Callbacks {
    /// Chains without any step
    pub fn empty() -> Self {
        Self {
            create: CallbackChain::new(),
            query: CallbackChain::new(),
            update: CallbackChain::new(),
            delete: CallbackChain::new(),
        }
    }

    pub fn chain(&self, operation: Operation) -> &CallbackChain {
        match operation {
            Operation::Create => &self.create,
            Operation::Query => &self.query,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }

    pub fn chain_mut(&mut self, operation: Operation) -> &mut CallbackChain {
        match operation {
            Operation::Create => &mut self.create,
            Operation::Query => &mut self.query,
            Operation::Update => &mut self.update,
            Operation::Delete => &mut self.delete,
        }
    }
}

impl Default for Callbacks {
    fn default() -> Self {
        let mut callbacks = Self::empty();
        for step in [
            Builtin::GeneratePrimaryKey,
            Builtin::BeginTransaction,
            Builtin::BeforeCreate,
            Builtin::SaveBeforeAssociations,
            Builtin::UpdateTimeStamp,
            Builtin::Create,
            Builtin::ForceReloadAfterCreate,
            Builtin::SaveAfterAssociations,
            Builtin::AfterCreate,
            Builtin::CommitOrRollbackTransaction,
        ] {
            callbacks.create.register(step.name(), Arc::new(step));
        }
        for step in [
            Builtin::InlinePreload,
            Builtin::Query,
            Builtin::Preload,
            Builtin::AfterQuery,
        ] {
            callbacks.query.register(step.name(), Arc::new(step));
        }
        for step in [
            Builtin::AssignUpdatingAttributes,
            Builtin::PreventGlobalUpdate,
            Builtin::BeginTransaction,
            Builtin::BeforeUpdate,
            Builtin::SaveBeforeAssociations,
            Builtin::UpdateTimeStamp,
            Builtin::Update,
            Builtin::SaveAfterAssociations,
            Builtin::AfterUpdate,
            Builtin::CommitOrRollbackTransaction,
        ] {
            callbacks.update.register(step.name(), Arc::new(step));
        }
        for step in [
            Builtin::PreventGlobalUpdate,
            Builtin::BeginTransaction,
            Builtin::BeforeDelete,
            Builtin::Delete,
            Builtin::AfterDelete,
            Builtin::CommitOrRollbackTransaction,
        ] {
            callbacks.delete.register(step.name(), Arc::new(step));
        }
        callbacks
    }
}

/// Steps shipped with the mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    GeneratePrimaryKey,
    BeginTransaction,
    CommitOrRollbackTransaction,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    SaveBeforeAssociations,
    SaveAfterAssociations,
    UpdateTimeStamp,
    Create,
    ForceReloadAfterCreate,
    AssignUpdatingAttributes,
    PreventGlobalUpdate,
    Update,
    Delete,
    InlinePreload,
    Query,
    Preload,
    AfterQuery,
}

impl Builtin {
    fn name(&self) -> &'static str {
        match self {
            Builtin::GeneratePrimaryKey => "relmap:generate_primary_key",
            Builtin::BeginTransaction => "relmap:begin_transaction",
            Builtin::CommitOrRollbackTransaction => "relmap:commit_or_rollback_transaction",
            Builtin::BeforeCreate => "relmap:before_create",
            Builtin::AfterCreate => "relmap:after_create",
            Builtin::BeforeUpdate => "relmap:before_update",
            Builtin::AfterUpdate => "relmap:after_update",
            Builtin::BeforeDelete => "relmap:before_delete",
            Builtin::AfterDelete => "relmap:after_delete",
            Builtin::SaveBeforeAssociations => "relmap:save_before_associations",
            Builtin::SaveAfterAssociations => "relmap:save_after_associations",
            Builtin::UpdateTimeStamp => "relmap:update_time_stamp",
            Builtin::Create => "relmap:create",
            Builtin::ForceReloadAfterCreate => "relmap:force_reload_after_create",
            Builtin::AssignUpdatingAttributes => "relmap:assign_updating_attributes",
            Builtin::PreventGlobalUpdate => "relmap:prevent_global_update",
            Builtin::Update => "relmap:update",
            Builtin::Delete => "relmap:delete",
            Builtin::InlinePreload => "relmap:inline_preload",
            Builtin::Query => "relmap:query",
            Builtin::Preload => "relmap:preload",
            Builtin::AfterQuery => "relmap:after_query",
        }
    }
}

#[async_trait]
impl Callback for Builtin {
    async fn call(&self, scope: &mut Scope<'_>) -> OrmResult<()> {
        use crate::hooks::HookPoint;

        match self {
            Builtin::GeneratePrimaryKey => create::generate_primary_key(scope),
            Builtin::BeginTransaction => transaction::begin(scope).await,
            Builtin::CommitOrRollbackTransaction => transaction::commit_or_rollback(scope).await,
            Builtin::BeforeCreate => hooks::run(scope, &[HookPoint::BeforeSave, HookPoint::BeforeCreate]).await,
            Builtin::AfterCreate => hooks::run(scope, &[HookPoint::AfterCreate, HookPoint::AfterSave]).await,
            Builtin::BeforeUpdate => hooks::run(scope, &[HookPoint::BeforeSave, HookPoint::BeforeUpdate]).await,
            Builtin::AfterUpdate => hooks::run(scope, &[HookPoint::AfterUpdate, HookPoint::AfterSave]).await,
            Builtin::BeforeDelete => hooks::run(scope, &[HookPoint::BeforeDelete]).await,
            Builtin::AfterDelete => hooks::run(scope, &[HookPoint::AfterDelete]).await,
            Builtin::SaveBeforeAssociations => associations::save_before(scope).await,
            Builtin::SaveAfterAssociations => associations::save_after(scope).await,
            Builtin::UpdateTimeStamp => timestamps::update_time_stamp(scope),
            Builtin::Create => create::create(scope).await,
            Builtin::ForceReloadAfterCreate => create::force_reload_after_create(scope).await,
            Builtin::AssignUpdatingAttributes => update::assign_updating_attributes(scope),
            Builtin::PreventGlobalUpdate => update::prevent_global_update(scope),
            Builtin::Update => update::update(scope).await,
            Builtin::Delete => delete::delete(scope).await,
            Builtin::InlinePreload => crate::preload::inline::prepare(scope),
            Builtin::Query => query::query(scope).await,
            Builtin::Preload => crate::preload::preload(scope).await,
            Builtin::AfterQuery => hooks::after_query(scope).await,
        }
    }

    fn always_run(&self) -> bool {
        matches!(self, Builtin::CommitOrRollbackTransaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn Callback> {
        callback_fn(|_scope| Ok(()))
    }

    #[test]
    fn default_chains_are_ordered() {
        let callbacks = Callbacks::default();
        assert_eq!(
            callbacks.query.names(),
            vec!["relmap:inline_preload", "relmap:query", "relmap:preload", "relmap:after_query"]
        );
        let update = callbacks.update.names();
        let guard = update.iter().position(|n| *n == "relmap:prevent_global_update").unwrap();
        let begin = update.iter().position(|n| *n == "relmap:begin_transaction").unwrap();
        assert!(guard < begin);
        assert_eq!(callbacks.create.names().last(), Some(&"relmap:commit_or_rollback_transaction"));
    }

    #[test]
    fn register_relative_to_anchor() {
        let mut chain = CallbackChain::new();
        chain.register("a", noop()).register("c", noop());
        chain.register_before("c", "b", noop()).unwrap();
        chain.register_after("c", "d", noop()).unwrap();
        chain.register_first("z", noop());
        assert_eq!(chain.names(), vec!["z", "a", "b", "c", "d"]);

        assert!(chain.register_before("missing", "x", noop()).is_err());
        assert!(chain.remove("z"));
        assert!(!chain.remove("z"));
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn registering_a_name_twice_keeps_its_position() {
        let mut chain = CallbackChain::new();
        chain.register("a", noop()).register("b", noop()).register("a", noop());
        assert_eq!(chain.names(), vec!["a", "b"]);
        assert!(chain.replace("b", noop()).is_ok());
        assert!(chain.replace("nope", noop()).is_err());
    }
}
