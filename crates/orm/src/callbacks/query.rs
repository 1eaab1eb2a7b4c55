//! Query step: render, fetch and scan into the destination

use crate::error::{OrmError, OrmResult};
use crate::hooks::HookPoint;
use crate::preload::inline;
use crate::scope::{scan_row, Scope, Target};

use super::hooks::hook_error;

pub(super) async fn query(scope: &mut Scope<'_>) -> OrmResult<()> {
    if matches!(scope.target, Target::Table) {
        return Err(OrmError::InvalidSql("query requires a destination".to_string()));
    }
    scope.prepare_query_sql()?;
    let rows = scope.fetch().await?;

    let extras = scope.search.extra_selects.len();
    let schema = scope.schema.clone();
    let slots = std::mem::take(&mut scope.state.inline);
    let db = scope.db.clone();

    match &mut scope.target {
        Target::Table => {}
        Target::One(dest) => {
            let row = rows.first().ok_or(OrmError::RecordNotFound)?;
            let extra = scan_row(&schema, row.as_ref(), extras, &mut **dest)?;
            inline::place(&slots, &mut **dest, &extra)?;
            scope.state.extra_rows.push(extra);
        }
        Target::Many(records) => {
            records.clear();
            for row in &rows {
                let dest = records.push_default();
                let extra = scan_row(&schema, row.as_ref(), extras, &mut *dest)?;
                inline::place(&slots, dest, &extra)?;
                scope.state.extra_rows.push(extra);
            }
        }
        Target::Stream(sink) => {
            if !scope.search.preload.is_empty() {
                return Err(OrmError::Preload(
                    "streamed records cannot be preloaded; use inline preload".to_string(),
                ));
            }
            let hooks = schema.hooks().cloned();
            for row in &rows {
                let mut value = schema.new_value();
                let extra = scan_row(&schema, row.as_ref(), extras, value.as_mut())?;
                inline::place(&slots, value.as_mut(), &extra)?;
                if let Some(hooks) = &hooks {
                    hooks
                        .run(HookPoint::AfterFind, value.as_mut(), &db)
                        .await
                        .map_err(|err| hook_error(HookPoint::AfterFind, err))?;
                }
                sink.accept(value)?;
            }
        }
    }
    scope.state.inline = slots;
    Ok(())
}
