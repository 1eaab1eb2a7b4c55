//! Delete step: soft delete when the table has `deleted_at`

use crate::error::OrmResult;
use crate::scope::Scope;
use crate::search::render::Renderer;
use crate::value::Value;

pub(super) async fn delete(scope: &mut Scope<'_>) -> OrmResult<()> {
    let shared = scope.db.shared();
    let schema = scope.schema.clone();
    let table = scope.quoted_table_name();
    let mut renderer = Renderer::new(shared.dialect.as_ref(), &shared.registry);
    let has = |name: &str| schema.columns().any(|f| f.column() == name);

    let soft = !scope.search.unscoped && has("deleted_at");
    let mut sql = if soft {
        let mut sets = vec![format!(
            "{} = {}",
            renderer.quote("deleted_at"),
            renderer.bind(Value::DateTime(scope.db.now()))
        )];
        if let (Some(user), true) = (&scope.db.options.current_user, has("deleted_by_id")) {
            sets.push(format!("{} = {}", renderer.quote("deleted_by_id"), renderer.bind(user.clone())));
        }
        format!("UPDATE {} SET {}", table, sets.join(", "))
    } else {
        format!("DELETE FROM {}", table)
    };

    let where_sql = renderer.where_sql(&schema, &table, &scope.search, scope.record())?;
    if !where_sql.is_empty() {
        sql.push(' ');
        sql.push_str(&where_sql);
    }
    scope.sql = sql;
    scope.vars = renderer.vars;
    scope.exec().await?;
    Ok(())
}
