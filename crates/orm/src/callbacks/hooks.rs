//! Model hook steps

use crate::error::{OrmError, OrmResult};
use crate::hooks::HookPoint;
use crate::scope::Scope;

pub(super) fn hook_error(point: HookPoint, err: OrmError) -> OrmError {
    match err {
        OrmError::Hook { .. } => err,
        other => OrmError::Hook {
            hook: point.to_string(),
            message: other.to_string(),
        },
    }
}

/// Run `points` in order on every record of the scope
pub(super) async fn run(scope: &mut Scope<'_>, points: &[HookPoint]) -> OrmResult<()> {
    if scope.db.options.update_column {
        return Ok(());
    }
    let Some(hooks) = scope.schema.hooks().cloned() else {
        return Ok(());
    };
    let db = scope.db.clone();
    for point in points {
        for record in scope.records_mut() {
            hooks
                .run(*point, record, &db)
                .await
                .map_err(|err| hook_error(*point, err))?;
        }
    }
    Ok(())
}

pub(super) async fn after_query(scope: &mut Scope<'_>) -> OrmResult<()> {
    run(scope, &[HookPoint::AfterFind]).await
}
