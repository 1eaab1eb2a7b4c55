//! SQL rendering of accumulated search state
//!
//! Fragments are written with `?` placeholders. [`Renderer::substitute`]
//! replaces them left to right with the dialect's bind variables while
//! collecting the bound values, so fragments must be rendered in the order
//! they appear in the final statement.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use super::condition::{Arg, Condition};
use super::Search;
use crate::backends::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::schema::{Dyn, FieldDescriptor, Registry, Schema};
use crate::value::Value;

static NUMBER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^\s*\d+\s*$").ok());
static COMPARISON: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i) (=|<>|(>|<)(=?)|LIKE|IS|IN) ").ok());
static IDENTIFIER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

fn matches(pattern: &Lazy<Option<Regex>>, text: &str) -> bool {
    pattern.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
}

pub(crate) fn is_identifier(text: &str) -> bool {
    matches(&IDENTIFIER, text)
}

/// Quote a table name unless it is already an expression
pub(crate) fn quote_table(dialect: &dyn Dialect, table: &str) -> String {
    if table.contains(char::is_whitespace) || table.contains('(') {
        return table.to_string();
    }
    table
        .split('.')
        .map(|part| dialect.quote(part))
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) struct Renderer<'r> {
    dialect: &'r dyn Dialect,
    registry: &'r Registry,
    pub(crate) vars: Vec<Value>,
}

impl<'r> Renderer<'r> {
    pub(crate) fn new(dialect: &'r dyn Dialect, registry: &'r Registry) -> Self {
        Self {
            dialect,
            registry,
            vars: Vec::new(),
        }
    }

    pub(crate) fn quote(&self, identifier: &str) -> String {
        self.dialect.quote(identifier)
    }

    /// Bind `value`, returning its placeholder
    pub(crate) fn bind(&mut self, value: Value) -> String {
        self.vars.push(value);
        self.dialect.bind_placeholder(self.vars.len())
    }

    /// Bind a value of `field`, honoring its assigner's placeholder
    pub(crate) fn bind_field(&mut self, field: &FieldDescriptor, value: Value) -> String {
        self.vars.push(value);
        field.placeholder(self.dialect, self.vars.len())
    }

    pub(crate) fn bind_arg(&mut self, arg: &Arg) -> OrmResult<String> {
        match arg {
            Arg::Value(value) => Ok(self.bind(value.clone())),
            Arg::List(values) if values.is_empty() => Ok("NULL".to_string()),
            Arg::List(values) => Ok(values
                .iter()
                .map(|v| self.bind(v.clone()))
                .collect::<Vec<_>>()
                .join(",")),
            Arg::Expr(expr) => self.substitute(&expr.sql, &expr.args),
            Arg::Typed(typed) => match self.registry.assigner_for(typed.type_id) {
                Some(assigner) => {
                    let value = assigner.to_storage(typed.value.as_ref())?;
                    self.vars.push(value);
                    let position = self.vars.len();
                    Ok(assigner
                        .bind_placeholder(self.dialect, position)
                        .unwrap_or_else(|| self.dialect.bind_placeholder(position)))
                }
                None => Ok(self.bind(typed.fallback.clone())),
            },
        }
    }

    /// Replace each `?` with the next argument; surplus `?` are kept verbatim
    pub(crate) fn substitute(&mut self, sql: &str, args: &[Arg]) -> OrmResult<String> {
        let mut out = String::with_capacity(sql.len() + args.len() * 2);
        let mut args = args.iter();
        for c in sql.chars() {
            if c == '?' {
                if let Some(arg) = args.next() {
                    out.push_str(&self.bind_arg(arg)?);
                    continue;
                }
            }
            out.push(c);
        }
        Ok(out)
    }

    fn column_ref(&self, schema: &Schema, table: &str, key: &str) -> (String, Option<Arc<FieldDescriptor>>) {
        match schema.find_column(key) {
            Some(field) => (format!("{}.{}", table, self.quote(field.column())), Some(field.clone())),
            None if is_identifier(key) => (format!("{}.{}", table, self.quote(key)), None),
            None => (key.to_string(), None),
        }
    }

    fn primary_condition(&mut self, schema: &Schema, table: &str, keys: &[Value], include: bool) -> OrmResult<String> {
        let pk = schema.primary_field().ok_or_else(|| {
            OrmError::InvalidSql(format!("{} has no primary key to select by", schema.table_name()))
        })?;
        let column = format!("{}.{}", table, self.quote(pk.column()));
        match keys {
            [single] => {
                let placeholder = self.bind_field(pk, single.clone());
                let op = if include { "=" } else { "<>" };
                Ok(format!("({} {} {})", column, op, placeholder))
            }
            many => {
                let list = self.bind_arg(&Arg::List(many.to_vec()))?;
                let op = if include { "IN" } else { "NOT IN" };
                Ok(format!("({} {} ({}))", column, op, list))
            }
        }
    }

    /// Render one condition; `include == false` renders its negation
    pub(crate) fn condition(
        &mut self,
        schema: &Schema,
        table: &str,
        condition: &Condition,
        include: bool,
    ) -> OrmResult<String> {
        match condition {
            Condition::Sql { sql, args } => {
                let trimmed = sql.trim();
                if trimmed.is_empty() {
                    return Ok(String::new());
                }
                if args.is_empty() && matches(&NUMBER, trimmed) {
                    let key: i64 = trimmed
                        .parse()
                        .map_err(|_| OrmError::InvalidSql(format!("invalid primary key {}", trimmed)))?;
                    return self.primary_condition(schema, table, &[Value::Int(key)], include);
                }
                let wrapped = if include {
                    format!("({})", trimmed)
                } else if matches(&COMPARISON, trimmed) {
                    format!("NOT ({})", trimmed)
                } else {
                    let (column, _) = self.column_ref(schema, table, trimmed);
                    format!("({} NOT IN (?))", column)
                };
                self.substitute(&wrapped, args)
            }
            Condition::Columns(attrs) => {
                let mut parts = Vec::with_capacity(attrs.len());
                for (key, arg) in attrs {
                    let (column, field) = self.column_ref(schema, table, key);
                    let part = match arg {
                        Arg::Value(Value::Null) => {
                            let op = if include { "IS NULL" } else { "IS NOT NULL" };
                            format!("({} {})", column, op)
                        }
                        Arg::List(_) => {
                            let op = if include { "IN" } else { "NOT IN" };
                            format!("({} {} ({}))", column, op, self.bind_arg(arg)?)
                        }
                        Arg::Expr(_) => {
                            let op = if include { "=" } else { "<>" };
                            format!("({} {} ({}))", column, op, self.bind_arg(arg)?)
                        }
                        Arg::Value(value) => {
                            let op = if include { "=" } else { "<>" };
                            let placeholder = match &field {
                                Some(field) => self.bind_field(field, value.clone()),
                                None => self.bind(value.clone()),
                            };
                            format!("({} {} {})", column, op, placeholder)
                        }
                        Arg::Typed(_) => {
                            let op = if include { "=" } else { "<>" };
                            format!("({} {} {})", column, op, self.bind_arg(arg)?)
                        }
                    };
                    parts.push(part);
                }
                Ok(parts.join(" AND "))
            }
            Condition::Record { value, schema: schema_fn } => {
                let record_schema = schema_fn(self.registry)?;
                let record: &Dyn = value.as_ref();
                let op = if include { "=" } else { "<>" };
                let mut parts = Vec::new();
                for field in record_schema.columns() {
                    if field.is_ignored() || field.is_blank(record) {
                        continue;
                    }
                    let value = field.read(record)?;
                    let placeholder = self.bind_field(field, value);
                    parts.push(format!("({}.{} {} {})", table, self.quote(field.column()), op, placeholder));
                }
                Ok(parts.join(" AND "))
            }
            Condition::PrimaryKeys(keys) => self.primary_condition(schema, table, keys, include),
            Condition::Expr(expr) => {
                let wrapped = if include {
                    format!("({})", expr.sql)
                } else {
                    format!("NOT ({})", expr.sql)
                };
                self.substitute(&wrapped, &expr.args)
            }
        }
    }

    /// `WHERE ...` or an empty string
    ///
    /// Soft-delete filtering and the key of `record` are always applied;
    /// user conditions follow as `(and-group) OR (or-group)`.
    pub(crate) fn where_sql(
        &mut self,
        schema: &Schema,
        table: &str,
        search: &Search,
        record: Option<&Dyn>,
    ) -> OrmResult<String> {
        let mut primary = Vec::new();
        if !search.unscoped && schema.columns().any(|f| f.column() == "deleted_at") {
            primary.push(format!("{}.{} IS NULL", table, self.quote("deleted_at")));
        }
        if let Some(record) = record {
            let keyed = schema.has_primary_key() && schema.primary_fields().all(|f| !f.is_blank(record));
            if keyed {
                for field in schema.primary_fields() {
                    let value = field.read(record)?;
                    let placeholder = self.bind_field(field, value);
                    primary.push(format!("{}.{} = {}", table, self.quote(field.column()), placeholder));
                }
            }
        }

        let mut and_parts = Vec::new();
        for condition in &search.where_conditions {
            let sql = self.condition(schema, table, condition, true)?;
            if !sql.is_empty() {
                and_parts.push(sql);
            }
        }
        let mut or_parts = Vec::new();
        for condition in &search.or_conditions {
            let sql = self.condition(schema, table, condition, true)?;
            if !sql.is_empty() {
                or_parts.push(sql);
            }
        }
        for condition in &search.not_conditions {
            let sql = self.condition(schema, table, condition, false)?;
            if !sql.is_empty() {
                and_parts.push(sql);
            }
        }

        let or_sql = or_parts.join(" OR ");
        let mut combined = and_parts.join(" AND ");
        if combined.is_empty() {
            combined = or_sql;
        } else if !or_sql.is_empty() {
            combined = format!("{} OR {}", combined, or_sql);
        }

        Ok(if !primary.is_empty() {
            let mut sql = format!("WHERE {}", primary.join(" AND "));
            if !combined.is_empty() {
                sql = format!("{} AND ({})", sql, combined);
            }
            sql
        } else if !combined.is_empty() {
            format!("WHERE {}", combined)
        } else {
            String::new()
        })
    }

    /// Select list: explicit selects, else every column in declaration order, then extra selects
    ///
    /// Primary keys are dropped from the default columns when the search asks to ignore them.
    pub(crate) fn select_list(
        &mut self,
        schema: &Schema,
        table: &str,
        search: &Search,
    ) -> OrmResult<String> {
        let mut items = Vec::new();
        match &search.selects {
            Some(select) => items.push(self.substitute(&select.sql, &select.args)?),
            None if schema.fields().is_empty() => items.push(format!("{}.*", table)),
            None => {
                for field in schema.columns() {
                    if field.is_ignored() || (search.ignore_primary_select && field.is_primary_key()) {
                        continue;
                    }
                    items.push(format!("{}.{}", table, self.quote(field.column())));
                }
            }
        }
        for extra in &search.extra_selects {
            items.push(self.substitute(&extra.sql, &extra.args)?);
        }
        if items.is_empty() {
            items.push("1".to_string());
        }
        Ok(items.join(", "))
    }

    pub(crate) fn joins_sql(&mut self, search: &Search) -> OrmResult<String> {
        let mut parts = Vec::with_capacity(search.joins.len());
        for join in &search.joins {
            parts.push(self.substitute(&join.sql, &join.args)?);
        }
        Ok(parts.join(" "))
    }

    pub(crate) fn group_sql(&self, search: &Search) -> String {
        match &search.group {
            Some(group) if !group.trim().is_empty() => format!("GROUP BY {}", group),
            _ => String::new(),
        }
    }

    pub(crate) fn having_sql(&mut self, schema: &Schema, table: &str, search: &Search) -> OrmResult<String> {
        let mut parts = Vec::new();
        for condition in &search.having_conditions {
            let sql = self.condition(schema, table, condition, true)?;
            if !sql.is_empty() {
                parts.push(sql);
            }
        }
        Ok(if parts.is_empty() {
            String::new()
        } else {
            format!("HAVING {}", parts.join(" AND "))
        })
    }

    pub(crate) fn order_sql(&mut self, search: &Search) -> OrmResult<String> {
        let mut parts = Vec::with_capacity(search.orders.len());
        for order in &search.orders {
            if order.args.is_empty() && is_identifier(order.sql.trim()) {
                parts.push(self.quote(order.sql.trim()));
            } else {
                parts.push(self.substitute(&order.sql, &order.args)?);
            }
        }
        Ok(if parts.is_empty() {
            String::new()
        } else {
            format!("ORDER BY {}", parts.join(", "))
        })
    }

    /// Joins, where, group, having, order and paging, in statement order
    pub(crate) fn combined_conditions(
        &mut self,
        schema: &Schema,
        table: &str,
        search: &Search,
        record: Option<&Dyn>,
    ) -> OrmResult<String> {
        let joins = self.joins_sql(search)?;
        let where_sql = self.where_sql(schema, table, search, record)?;
        let group = self.group_sql(search);
        let having = self.having_sql(schema, table, search)?;
        let order = self.order_sql(search)?;
        let mut sql = [joins, where_sql, group, having, order]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        sql.push_str(&self.dialect.render_limit_offset(search.limit, search.offset));
        Ok(sql.trim_start().to_string())
    }

    /// Full SELECT for `search` against `table`
    pub(crate) fn query_sql(
        &mut self,
        schema: &Schema,
        table: &str,
        search: &Search,
        record: Option<&Dyn>,
        query_option: Option<&str>,
    ) -> OrmResult<String> {
        if let Some(raw) = &search.raw {
            return self.substitute(&raw.sql, &raw.args);
        }
        let select = self.select_list(schema, table, search)?;
        let rest = self.combined_conditions(schema, table, search, record)?;
        let mut sql = format!("SELECT {} FROM {}", select, table);
        if !rest.is_empty() {
            sql.push(' ');
            sql.push_str(&rest);
        }
        if let Some(option) = query_option {
            sql.push(' ');
            sql.push_str(option);
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::attrs;
    use crate::backends::{PostgresDialect, SqliteDialect};
    use crate::schema::{Model, SchemaBuilder};
    use crate::search::condition::{cond, expr};
    use chrono::{DateTime, Utc};

    #[derive(Debug, Clone, Default)]
    struct Member {
        id: i64,
        name: String,
        age: i32,
        deleted_at: Option<DateTime<Utc>>,
    }

    impl Model for Member {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field("ID", |m| &m.id, |m| &mut m.id);
            schema.field("Name", |m| &m.name, |m| &mut m.name);
            schema.field("Age", |m| &m.age, |m| &mut m.age);
            schema.field("DeletedAt", |m| &m.deleted_at, |m| &mut m.deleted_at);
        }
    }

    fn render_where(search: &Search, record: Option<&Dyn>) -> (String, Vec<Value>) {
        let registry = Registry::new();
        let schema = registry.get_or_build::<Member>().unwrap();
        let mut renderer = Renderer::new(&PostgresDialect, &registry);
        let sql = renderer.where_sql(&schema, "\"members\"", search, record).unwrap();
        (sql, renderer.vars)
    }

    #[test]
    fn and_conditions_are_conjoined() {
        let mut search = Search::new();
        search.unscoped();
        search.where_(cond("name = ?", args!["a"]));
        search.where_(cond("age > ?", args![3]));
        let (sql, vars) = render_where(&search, None);
        assert_eq!(sql, "WHERE (name = $1) AND (age > $2)");
        assert_eq!(vars, vec![Value::from("a"), Value::Int(3)]);
    }

    #[test]
    fn or_group_is_appended_to_the_and_group() {
        let mut search = Search::new();
        search.unscoped();
        search.where_(cond("name = ?", args!["a"]));
        search.or(cond("name = ?", args!["b"]));
        let (sql, _) = render_where(&search, None);
        assert_eq!(sql, "WHERE (name = $1) OR (name = $2)");

        let mut only_or = Search::new();
        only_or.unscoped();
        only_or.or(cond("age = 1", args![]));
        let (sql, _) = render_where(&only_or, None);
        assert_eq!(sql, "WHERE (age = 1)");
    }

    #[test]
    fn not_conditions_negate_the_operator() {
        let mut search = Search::new();
        search.unscoped();
        search.where_(cond("name = ?", args!["a"]));
        search.not(cond("age > ?", args![3]));
        search.not(attrs! { "Name" => vec!["x", "y"], "age" => Value::Null }.into());
        search.not(cond("name", args![vec!["z"]]));
        let (sql, _) = render_where(&search, None);
        assert_eq!(
            sql,
            "WHERE (name = $1) AND NOT (age > $2) AND (\"members\".\"name\" NOT IN ($3,$4)) AND (\"members\".\"age\" IS NOT NULL) AND (\"members\".\"name\" NOT IN ($5))"
        );
    }

    #[test]
    fn column_maps_render_null_and_lists() {
        let mut search = Search::new();
        search.unscoped();
        search.where_(attrs! { "name" => Option::<String>::None, "age" => vec![1i64, 2], "id" => Vec::<i64>::new() }.into());
        let (sql, vars) = render_where(&search, None);
        assert_eq!(
            sql,
            "WHERE (\"members\".\"age\" IN ($1,$2)) AND (\"members\".\"id\" IN (NULL)) AND (\"members\".\"name\" IS NULL)"
        );
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn soft_delete_and_record_key_come_first() {
        let mut search = Search::new();
        search.where_(cond("name = ?", args!["a"]));
        search.or(cond("age = ?", args![2]));
        let member = Member {
            id: 7,
            ..Default::default()
        };
        let (sql, vars) = render_where(&search, Some(&member as &Dyn));
        assert_eq!(
            sql,
            "WHERE \"members\".\"deleted_at\" IS NULL AND \"members\".\"id\" = $1 AND ((name = $2) OR (age = $3))"
        );
        assert_eq!(vars[0], Value::Int(7));
    }

    #[test]
    fn numeric_strings_and_records_select_by_key() {
        let mut search = Search::new();
        search.unscoped();
        search.where_("10".into());
        search.where_(Condition::record(&Member {
            name: "jin".into(),
            ..Default::default()
        }));
        let (sql, _) = render_where(&search, None);
        assert_eq!(sql, "WHERE (\"members\".\"id\" = $1) AND (\"members\".\"name\" = $2)");
    }

    #[test]
    fn nested_expressions_are_inlined() {
        let mut search = Search::new();
        search.unscoped();
        search.where_(cond(
            "age IN (?)",
            args![expr("SELECT age FROM ages WHERE kind = ?", args!["adult"])],
        ));
        let (sql, vars) = render_where(&search, None);
        assert_eq!(sql, "WHERE (age IN (SELECT age FROM ages WHERE kind = $1))");
        assert_eq!(vars, vec![Value::from("adult")]);
    }

    #[test]
    fn select_statement_orders_clauses() {
        let registry = Registry::new();
        let schema = registry.get_or_build::<Member>().unwrap();
        let mut search = Search::new();
        search.where_(cond("age > ?", args![18]));
        search.order(expr("name", args![]), false);
        search.order(expr("age desc", args![]), false);
        search.limit(Some(10)).offset(Some(20));
        search.extra_selects.push(expr("1 AS marker", args![]));

        let mut renderer = Renderer::new(&SqliteDialect, &registry);
        let sql = renderer
            .query_sql(&schema, "\"members\"", &search, None, Some("FOR UPDATE"))
            .unwrap();
        assert_eq!(
            sql,
            "SELECT \"members\".\"id\", \"members\".\"name\", \"members\".\"age\", \"members\".\"deleted_at\", 1 AS marker \
             FROM \"members\" WHERE \"members\".\"deleted_at\" IS NULL AND ((age > ?)) \
             ORDER BY \"name\", age desc LIMIT 10 OFFSET 20 FOR UPDATE"
        );
    }

    #[test]
    fn table_names_are_quoted_per_segment() {
        assert_eq!(quote_table(&PostgresDialect, "public.users"), "\"public\".\"users\"");
        assert_eq!(quote_table(&PostgresDialect, "users u"), "users u");
    }
}
