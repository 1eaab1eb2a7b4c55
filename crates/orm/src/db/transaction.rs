//! Explicit transactions
//!
//! [`Db::begin`] returns a handle whose statements all run inside the new
//! transaction; [`Db::commit`] and [`Db::rollback`] end it. The implicit
//! transaction opened by the write chains is skipped on such a handle.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use super::{ConnHandle, Db};
use crate::backends::DatabaseTransaction;
use crate::error::{OrmError, OrmResult};

impl Db {
    /// Open a transaction; nested transactions are not supported
    pub async fn begin(&self) -> OrmResult<Db> {
        let ConnHandle::Pool(conn) = &self.conn else {
            return Err(OrmError::CantStartTransaction("already in a transaction".to_string()));
        };
        debug!("Beginning transaction");
        let tx = conn
            .begin()
            .await
            .map_err(|e| OrmError::CantStartTransaction(e.to_string()))?;
        Ok(Db {
            conn: ConnHandle::Tx(Arc::from(tx)),
            ..self.clone()
        })
    }

    fn transaction_handle(&self) -> OrmResult<&Arc<dyn DatabaseTransaction>> {
        match &self.conn {
            ConnHandle::Tx(tx) => Ok(tx),
            ConnHandle::Pool(_) => Err(OrmError::InvalidTransaction),
        }
    }

    pub async fn commit(&self) -> OrmResult<()> {
        let tx = self.transaction_handle()?;
        debug!("Committing transaction");
        tx.commit().await
    }

    pub async fn rollback(&self) -> OrmResult<()> {
        let tx = self.transaction_handle()?;
        debug!("Rolling back transaction");
        tx.rollback().await
    }

    /// Run `f` inside a transaction
    ///
    /// Commits when `f` succeeds. Rolls back when it fails or panics; the
    /// error is returned and the panic resumed after the rollback.
    pub async fn transaction<F, Fut, R>(&self, f: F) -> OrmResult<R>
    where
        F: FnOnce(Db) -> Fut,
        Fut: Future<Output = OrmResult<R>>,
    {
        let tx = self.begin().await?;
        match AssertUnwindSafe(f(tx.clone())).catch_unwind().await {
            Ok(Ok(value)) => {
                tx.commit().await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("rollback after failed transaction also failed: {}", rollback_err);
                }
                Err(err)
            }
            Err(panic) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("rollback after panic in transaction failed: {}", rollback_err);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}
