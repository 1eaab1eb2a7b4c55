//! Association preloading
//!
//! Classic preloading runs one extra query per association level after
//! the main query and distributes the results over the loaded records.
//! Inline preloading folds belongs-to associations into the main query
//! with LEFT JOINs. Virtual fields are filled by application loaders.

mod classic;
pub(crate) mod inline;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::db::Db;
use crate::error::{OrmError, OrmResult};
use crate::schema::{Dyn, FieldDescriptor, Schema};
use crate::scope::{Scope, Target};

/// Fills a virtual field of `schema` on a batch of loaded records
#[async_trait]
pub trait VirtualFieldLoader: Send + Sync {
    async fn load(&self, db: &Db, schema: &Arc<Schema>, records: &mut [&mut Dyn]) -> OrmResult<()>;
}

/// Records reached by following `path` from `roots`
fn records_at<'r>(roots: Vec<&'r mut Dyn>, path: &[Arc<FieldDescriptor>]) -> Vec<&'r mut Dyn> {
    let mut level = roots;
    for field in path {
        level = level
            .into_iter()
            .flat_map(|record| field.associated_mut(record))
            .collect();
    }
    level
}

pub(crate) async fn preload(scope: &mut Scope<'_>) -> OrmResult<()> {
    if scope.search.preload.is_empty() {
        return Ok(());
    }
    if matches!(scope.target, Target::Stream(_)) {
        return Err(OrmError::Preload(
            "streamed records cannot be preloaded; use inline preload".to_string(),
        ));
    }
    let requests = scope.search.preload.clone();
    let db = scope.db.session();
    let root = scope.schema.clone();
    let mut loaded = HashSet::new();

    for request in &requests {
        let segments: Vec<&str> = request.path.split('.').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(OrmError::Preload(format!("invalid preload path {:?}", request.path)));
        }

        let mut owner = root.clone();
        let mut path: Vec<Arc<FieldDescriptor>> = Vec::new();
        for (depth, segment) in segments.iter().enumerate() {
            let last = depth + 1 == segments.len();
            let prefix = segments[..=depth].join(".");

            if let Some(field) = owner.find_field(segment).filter(|f| f.is_association()).cloned() {
                let relationship = field.relationship().cloned().ok_or_else(|| {
                    OrmError::Preload(format!("association {} of {} is unresolved", segment, owner.type_name()))
                })?;
                if loaded.insert(prefix) {
                    let narrow = if last { request.scope.clone() } else { None };
                    let mut records = records_at(scope.records_mut(), &path);
                    debug!("preloading {} on {} {} records", segment, records.len(), owner.type_name());
                    classic::load(&db, &owner, &field, &relationship, &mut records, narrow).await?;
                }
                owner = relationship.associated.clone();
                path.push(field);
                continue;
            }

            match owner.find_virtual_field(segment) {
                Some(virtual_field) if last => {
                    if loaded.insert(prefix) {
                        let mut records = records_at(scope.records_mut(), &path);
                        virtual_field.loader.load(&db, &owner, &mut records).await?;
                    }
                }
                Some(_) => {
                    return Err(OrmError::Preload(format!(
                        "virtual field {} of {} must end the preload path",
                        segment,
                        owner.type_name()
                    )))
                }
                None => {
                    return Err(OrmError::Preload(format!(
                        "can't preload field {} for {}",
                        segment,
                        owner.type_name()
                    )))
                }
            }
        }
    }
    Ok(())
}
