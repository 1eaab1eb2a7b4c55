//! Implicit transaction around create, update and delete

use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::ConnHandle;
use crate::error::{OrmError, OrmResult};
use crate::scope::Scope;

/// Swap the scope onto a fresh transaction unless one is already open
pub(super) async fn begin(scope: &mut Scope<'_>) -> OrmResult<()> {
    if scope.db.config().skip_default_transaction || scope.db.in_transaction() {
        return Ok(());
    }
    let tx = scope
        .db
        .connection()
        .begin()
        .await
        .map_err(|err| OrmError::CantStartTransaction(err.to_string()))?;
    debug!("{} {}: transaction started", scope.operation().as_str(), scope.table_name());
    let original = std::mem::replace(&mut scope.db.conn, ConnHandle::Tx(Arc::from(tx)));
    scope.state.original_conn = Some(original);
    Ok(())
}

/// Commit when the chain recorded no error, roll back otherwise
pub(super) async fn commit_or_rollback(scope: &mut Scope<'_>) -> OrmResult<()> {
    let Some(original) = scope.state.original_conn.take() else {
        return Ok(());
    };
    let ConnHandle::Tx(tx) = std::mem::replace(&mut scope.db.conn, original) else {
        return Ok(());
    };
    if scope.has_error() {
        debug!("{} {}: rolling back", scope.operation().as_str(), scope.table_name());
        if let Err(err) = tx.rollback().await {
            warn!("rollback failed: {}", err);
        }
        Ok(())
    } else {
        tx.commit().await
    }
}
