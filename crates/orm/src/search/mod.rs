//! Accumulated query state
//!
//! A [`Search`] collects conditions, joins, ordering, paging and preload
//! requests. [`Db`](crate::Db) keeps it behind an `Arc` and clones it on
//! write, so a partially built query can be reused as a template.

pub mod condition;
pub(crate) mod render;

use std::fmt;
use std::sync::Arc;

pub use condition::{cond, expr, Arg, Attrs, Condition, Expr, TypedArg};

use crate::db::Db;
use condition::SchemaFn;

/// Narrows the query of one preload level
pub type PreloadScope = Arc<dyn Fn(Db) -> Db + Send + Sync>;

/// A dotted association path to load after the main query
#[derive(Clone)]
pub struct PreloadRequest {
    pub path: String,
    pub scope: Option<PreloadScope>,
}

impl fmt::Debug for PreloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadRequest")
            .field("path", &self.path)
            .field("scoped", &self.scope.is_some())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct Search {
    pub(crate) where_conditions: Vec<Condition>,
    pub(crate) or_conditions: Vec<Condition>,
    pub(crate) not_conditions: Vec<Condition>,
    pub(crate) having_conditions: Vec<Condition>,
    pub(crate) joins: Vec<Expr>,
    pub(crate) selects: Option<Expr>,
    pub(crate) omits: Vec<String>,
    pub(crate) orders: Vec<Expr>,
    pub(crate) group: Option<String>,
    pub(crate) offset: Option<u64>,
    pub(crate) limit: Option<u64>,
    pub(crate) table_name: Option<String>,
    pub(crate) init_attrs: Vec<Attrs>,
    pub(crate) assign_attrs: Vec<Attrs>,
    pub(crate) preload: Vec<PreloadRequest>,
    pub(crate) inline_preload: Vec<String>,
    /// Select expressions appended after the regular columns; read back positionally
    pub(crate) extra_selects: Vec<Expr>,
    pub(crate) raw: Option<Expr>,
    pub(crate) unscoped: bool,
    /// Leave primary keys out of the default select list
    pub(crate) ignore_primary_select: bool,
    pub(crate) model: Option<SchemaFn>,
}

impl Search {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn where_(&mut self, condition: Condition) -> &mut Self {
        self.where_conditions.push(condition);
        self
    }

    pub(crate) fn or(&mut self, condition: Condition) -> &mut Self {
        self.or_conditions.push(condition);
        self
    }

    pub(crate) fn not(&mut self, condition: Condition) -> &mut Self {
        self.not_conditions.push(condition);
        self
    }

    pub(crate) fn having(&mut self, condition: Condition) -> &mut Self {
        self.having_conditions.push(condition);
        self
    }

    pub(crate) fn joins(&mut self, join: Expr) -> &mut Self {
        self.joins.push(join);
        self
    }

    pub(crate) fn select(&mut self, select: Expr) -> &mut Self {
        self.selects = Some(select);
        self
    }

    pub(crate) fn omit(&mut self, columns: &[&str]) -> &mut Self {
        self.omits.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub(crate) fn order(&mut self, order: Expr, reorder: bool) -> &mut Self {
        if reorder {
            self.orders.clear();
        }
        if !order.sql.trim().is_empty() {
            self.orders.push(order);
        }
        self
    }

    pub(crate) fn group(&mut self, group: impl Into<String>) -> &mut Self {
        self.group = Some(group.into());
        self
    }

    /// `None` clears the limit
    pub(crate) fn limit(&mut self, limit: Option<u64>) -> &mut Self {
        self.limit = limit;
        self
    }

    pub(crate) fn offset(&mut self, offset: Option<u64>) -> &mut Self {
        self.offset = offset;
        self
    }

    pub(crate) fn table(&mut self, name: impl Into<String>) -> &mut Self {
        self.table_name = Some(name.into());
        self
    }

    pub(crate) fn attrs(&mut self, attrs: Attrs) -> &mut Self {
        self.init_attrs.push(attrs);
        self
    }

    pub(crate) fn assign(&mut self, attrs: Attrs) -> &mut Self {
        self.assign_attrs.push(attrs);
        self
    }

    pub(crate) fn preload(&mut self, path: impl Into<String>, scope: Option<PreloadScope>) -> &mut Self {
        let path = path.into();
        if let Some(existing) = self.preload.iter_mut().find(|p| p.path == path) {
            if scope.is_some() {
                existing.scope = scope;
            }
        } else {
            self.preload.push(PreloadRequest { path, scope });
        }
        self
    }

    pub(crate) fn inline_preload(&mut self, path: impl Into<String>) -> &mut Self {
        let path = path.into();
        if !self.inline_preload.contains(&path) {
            self.inline_preload.push(path);
        }
        self
    }

    pub(crate) fn raw(&mut self, raw: Expr) -> &mut Self {
        self.raw = Some(raw);
        self
    }

    pub(crate) fn unscoped(&mut self) -> &mut Self {
        self.unscoped = true;
        self
    }

    pub(crate) fn model(&mut self, schema: SchemaFn) -> &mut Self {
        self.model = Some(schema);
        self
    }

    /// Any where, or, or not condition
    pub fn has_conditions(&self) -> bool {
        !self.where_conditions.is_empty() || !self.or_conditions.is_empty() || !self.not_conditions.is_empty()
    }

    pub fn is_omitted(&self, column: &str) -> bool {
        self.omits.iter().any(|c| c == column)
    }

    pub fn preload_requests(&self) -> &[PreloadRequest] {
        &self.preload
    }
}

impl fmt::Debug for Search {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Search")
            .field("where", &self.where_conditions)
            .field("or", &self.or_conditions)
            .field("not", &self.not_conditions)
            .field("joins", &self.joins)
            .field("orders", &self.orders)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("preload", &self.preload)
            .field("inline_preload", &self.inline_preload)
            .field("unscoped", &self.unscoped)
            .finish()
    }
}
