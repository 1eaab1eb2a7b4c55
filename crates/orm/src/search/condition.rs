//! Query conditions and their arguments

use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::OrmResult;
use crate::id::Id;
use crate::schema::registry::schema_of;
use crate::schema::{Dyn, Model, Registry, Schema};
use crate::value::Value;

/// SQL fragment with `?` placeholders, inlined wherever it is used as an argument
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub sql: String,
    pub args: Vec<Arg>,
}

/// Build an [`Expr`]
pub fn expr(sql: impl Into<String>, args: Vec<Arg>) -> Expr {
    Expr {
        sql: sql.into(),
        args,
    }
}

/// A value of an application type, converted by the [`Assigner`](crate::schema::Assigner)
/// registered for that type, or bound as `fallback` when none is registered
#[derive(Clone)]
pub struct TypedArg {
    pub(crate) value: Arc<Dyn>,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) fallback: Value,
}

impl fmt::Debug for TypedArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedArg")
            .field("type", &self.type_name)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl PartialEq for TypedArg {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && Arc::ptr_eq(&self.value, &other.value)
    }
}

/// Argument bound to a `?` placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    /// Expands to one placeholder per element, `NULL` when empty
    List(Vec<Value>),
    /// Inlined SQL with its own arguments
    Expr(Expr),
    Typed(TypedArg),
}

impl Arg {
    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Arg::List(values.into_iter().map(Into::into).collect())
    }

    pub fn typed<T: Any + Send + Sync>(value: T, fallback: impl Into<Value>) -> Self {
        Arg::Typed(TypedArg {
            value: Arc::new(value),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            fallback: fallback.into(),
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Arg::Value(Value::Null))
    }
}

macro_rules! arg_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Value(value.into())
                }
            }
        )*
    };
}

arg_from_value!(
    Value,
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    String,
    &str,
    &String,
    Vec<u8>,
    &[u8],
    Uuid,
    DateTime<Utc>,
    NaiveDate,
    NaiveTime,
    JsonValue,
    Id,
);

impl<T: Into<Value>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        Arg::Value(value.into())
    }
}

impl From<Expr> for Arg {
    fn from(value: Expr) -> Self {
        Arg::Expr(value)
    }
}

macro_rules! arg_from_list {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for Arg {
                fn from(values: Vec<$ty>) -> Self {
                    Arg::list(values)
                }
            }
        )*
    };
}

arg_from_list!(Value, i32, i64, u32, u64, String, &str, Uuid);

/// Column (or field name) to argument map; ordered so rendering is deterministic
pub type Attrs = BTreeMap<String, Arg>;

/// Build a `Vec<Arg>` from heterogeneous values
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::search::Arg>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::search::Arg::from($value)),+]
    };
}

/// Build an [`Attrs`] map: `attrs! { "name" => "jinzhu", "age" => 18 }`
#[macro_export]
macro_rules! attrs {
    () => { $crate::search::Attrs::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut attrs = $crate::search::Attrs::new();
        $( attrs.insert(::std::string::String::from($key), $crate::search::Arg::from($value)); )+
        attrs
    }};
}

pub(crate) type SchemaFn = fn(&Registry) -> OrmResult<Arc<Schema>>;

/// One accumulated condition
#[derive(Clone)]
pub enum Condition {
    /// Verbatim SQL with positional arguments; a bare integer selects by primary key
    Sql { sql: String, args: Vec<Arg> },
    /// Equality per column; NULL renders `IS NULL`, lists render `IN`
    Columns(Attrs),
    /// Equality on every non-blank column of a record
    Record { value: Arc<Dyn>, schema: SchemaFn },
    /// Main primary key equal to (or in) the values
    PrimaryKeys(Vec<Value>),
    Expr(Expr),
}

impl Condition {
    pub fn sql(sql: impl Into<String>, args: Vec<Arg>) -> Self {
        Condition::Sql { sql: sql.into(), args }
    }

    pub fn record<M: Model>(record: &M) -> Self {
        Condition::Record {
            value: Arc::new(record.clone()),
            schema: schema_of::<M>,
        }
    }

    pub fn primary_keys<I, V>(keys: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Condition::PrimaryKeys(keys.into_iter().map(Into::into).collect())
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Sql { sql, args } => f.debug_struct("Sql").field("sql", sql).field("args", args).finish(),
            Condition::Columns(attrs) => f.debug_tuple("Columns").field(attrs).finish(),
            Condition::Record { .. } => f.write_str("Record"),
            Condition::PrimaryKeys(keys) => f.debug_tuple("PrimaryKeys").field(keys).finish(),
            Condition::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
        }
    }
}

/// Shorthand for [`Condition::sql`]
pub fn cond(sql: impl Into<String>, args: Vec<Arg>) -> Condition {
    Condition::sql(sql, args)
}

impl From<&str> for Condition {
    fn from(sql: &str) -> Self {
        Condition::sql(sql, Vec::new())
    }
}

impl From<String> for Condition {
    fn from(sql: String) -> Self {
        Condition::sql(sql, Vec::new())
    }
}

impl From<(&str, Vec<Arg>)> for Condition {
    fn from((sql, args): (&str, Vec<Arg>)) -> Self {
        Condition::sql(sql, args)
    }
}

impl From<Attrs> for Condition {
    fn from(attrs: Attrs) -> Self {
        Condition::Columns(attrs)
    }
}

impl From<Expr> for Condition {
    fn from(expr: Expr) -> Self {
        Condition::Expr(expr)
    }
}

impl From<&Id> for Condition {
    fn from(id: &Id) -> Self {
        id.condition()
    }
}

impl From<Id> for Condition {
    fn from(id: Id) -> Self {
        id.condition()
    }
}

impl From<i64> for Condition {
    fn from(key: i64) -> Self {
        Condition::PrimaryKeys(vec![Value::Int(key)])
    }
}

impl From<Vec<i64>> for Condition {
    fn from(keys: Vec<i64>) -> Self {
        Condition::primary_keys(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_build_arguments() {
        let args = args!["jinzhu", 18, vec![1i64, 2], Option::<i64>::None];
        assert_eq!(args[0], Arg::Value(Value::from("jinzhu")));
        assert_eq!(args[1], Arg::Value(Value::Int(18)));
        assert_eq!(args[2], Arg::List(vec![Value::Int(1), Value::Int(2)]));
        assert!(args[3].is_null());

        let attrs = attrs! { "name" => "x", "age" => 3 };
        let keys: Vec<&String> = attrs.keys().collect();
        assert_eq!(keys, vec!["age", "name"]);
    }

    #[test]
    fn bytes_are_a_single_value_not_a_list() {
        assert_eq!(Arg::from(vec![1u8, 2]), Arg::Value(Value::Bytes(vec![1, 2])));
    }
}
