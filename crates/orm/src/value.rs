//! Driver-level values and the scalar column types that map onto them

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{OrmError, OrmResult};

/// A value as exchanged with the database driver
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(JsonValue),
}

/// Storage class of a value, used for type mapping and id templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    UInt,
    Float,
    String,
    Bytes,
    Uuid,
    DateTime,
    Date,
    Time,
    Json,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind(&self) -> Option<ValueKind> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::UInt(_) => ValueKind::UInt,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Uuid(_) => ValueKind::Uuid,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::Date(_) => ValueKind::Date,
            Value::Time(_) => ValueKind::Time,
            Value::Json(_) => ValueKind::Json,
        })
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::UInt(_) => "unsigned integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Json(_) => "json",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            Value::Bool(b) => Some(*b as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Fragment used when hashing key tuples; integers of either signedness
    /// that compare equal produce the same fragment
    pub(crate) fn key_fragment(&self) -> String {
        match self {
            Value::Null => "\u{0}".to_string(),
            Value::Bytes(b) => hex::encode(b),
            other => other.to_string(),
        }
    }

    /// Build a grouping key from a tuple of values
    pub(crate) fn tuple_key(values: &[Value]) -> String {
        values
            .iter()
            .map(Value::key_fragment)
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => UInt,
    u16 => UInt,
    u32 => UInt,
    u64 => UInt,
    f32 => Float,
    f64 => Float,
    String => String,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    DateTime<Utc> => DateTime,
    NaiveDate => Date,
    NaiveTime => Time,
    JsonValue => Json,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::String(value.clone())
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::UInt(value as u64)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// A Rust type stored in a single column
///
/// Implemented for the integer and float primitives, `bool`, `String`,
/// `Vec<u8>`, `Uuid`, the chrono date/time types, `serde_json::Value` and
/// `Option<T>` of any of those.
pub trait ColumnType: Clone + Default + fmt::Debug + Send + Sync + 'static {
    const KIND: ValueKind;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> OrmResult<Self>;

    /// Logical zero, used for blank-ness
    fn is_zero(&self) -> bool;

    /// Whether the column accepts NULL
    fn nullable() -> bool {
        false
    }

    /// Second chance for direct assignment: unwrap one level of indirection
    fn from_indirect(value: Box<dyn std::any::Any + Send + Sync>) -> Result<Self, Box<dyn std::any::Any + Send + Sync>> {
        Err(value)
    }
}

fn mismatch<T>(value: &Value) -> OrmError {
    OrmError::TypeMismatch {
        field: String::new(),
        expected: std::any::type_name::<T>().to_string(),
        found: value.kind_name().to_string(),
    }
}

macro_rules! integer_column {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl ColumnType for $ty {
                const KIND: ValueKind = ValueKind::$kind;

                fn to_value(&self) -> Value {
                    Value::from(*self)
                }

                fn from_value(value: Value) -> OrmResult<Self> {
                    let converted = match &value {
                        Value::Int(i) => <$ty>::try_from(*i).ok(),
                        Value::UInt(u) => <$ty>::try_from(*u).ok(),
                        Value::Bool(b) => Some(*b as $ty),
                        Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    };
                    converted.ok_or_else(|| mismatch::<$ty>(&value))
                }

                fn is_zero(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

integer_column! {
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => UInt,
    u16 => UInt,
    u32 => UInt,
    u64 => UInt,
}

macro_rules! float_column {
    ($($ty:ty),*) => {
        $(
            impl ColumnType for $ty {
                const KIND: ValueKind = ValueKind::Float;

                fn to_value(&self) -> Value {
                    Value::from(*self)
                }

                fn from_value(value: Value) -> OrmResult<Self> {
                    match &value {
                        Value::Float(f) => Ok(*f as $ty),
                        Value::Int(i) => Ok(*i as $ty),
                        Value::UInt(u) => Ok(*u as $ty),
                        Value::String(s) => s.trim().parse().map_err(|_| mismatch::<$ty>(&value)),
                        _ => Err(mismatch::<$ty>(&value)),
                    }
                }

                fn is_zero(&self) -> bool {
                    *self == 0.0
                }
            }
        )*
    };
}

float_column!(f32, f64);

impl ColumnType for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match &value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::UInt(u) => Ok(*u != 0),
            Value::String(s) => match s.as_str() {
                "t" | "true" | "1" => Ok(true),
                "f" | "false" | "0" => Ok(false),
                _ => Err(mismatch::<bool>(&value)),
            },
            _ => Err(mismatch::<bool>(&value)),
        }
    }

    fn is_zero(&self) -> bool {
        !*self
    }
}

impl ColumnType for String {
    const KIND: ValueKind = ValueKind::String;

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::String(s) => Ok(s),
            Value::Bytes(b) => String::from_utf8(b).map_err(|e| OrmError::TypeMismatch {
                field: String::new(),
                expected: "utf-8 string".to_string(),
                found: e.to_string(),
            }),
            Value::Null => Err(mismatch::<String>(&Value::Null)),
            other => Ok(other.to_string()),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl ColumnType for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::String(s) => Ok(s.into_bytes()),
            Value::Uuid(u) => Ok(u.as_bytes().to_vec()),
            other => Err(mismatch::<Vec<u8>>(&other)),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl ColumnType for Uuid {
    const KIND: ValueKind = ValueKind::Uuid;

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match &value {
            Value::Uuid(u) => Ok(*u),
            Value::String(s) => Uuid::parse_str(s).map_err(|_| mismatch::<Uuid>(&value)),
            Value::Bytes(b) => Uuid::from_slice(b).map_err(|_| mismatch::<Uuid>(&value)),
            _ => Err(mismatch::<Uuid>(&value)),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_nil()
    }
}

impl ColumnType for DateTime<Utc> {
    const KIND: ValueKind = ValueKind::DateTime;

    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match &value {
            Value::DateTime(dt) => Ok(*dt),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| mismatch::<DateTime<Utc>>(&value)),
            Value::Int(secs) => DateTime::from_timestamp(*secs, 0).ok_or_else(|| mismatch::<DateTime<Utc>>(&value)),
            _ => Err(mismatch::<DateTime<Utc>>(&value)),
        }
    }

    fn is_zero(&self) -> bool {
        self.timestamp() == 0 && self.timestamp_subsec_nanos() == 0
    }
}

impl ColumnType for NaiveDate {
    const KIND: ValueKind = ValueKind::Date;

    fn to_value(&self) -> Value {
        Value::Date(*self)
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match &value {
            Value::Date(d) => Ok(*d),
            Value::DateTime(dt) => Ok(dt.date_naive()),
            Value::String(s) => s.parse().map_err(|_| mismatch::<NaiveDate>(&value)),
            _ => Err(mismatch::<NaiveDate>(&value)),
        }
    }

    fn is_zero(&self) -> bool {
        *self == NaiveDate::default()
    }
}

impl ColumnType for NaiveTime {
    const KIND: ValueKind = ValueKind::Time;

    fn to_value(&self) -> Value {
        Value::Time(*self)
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match &value {
            Value::Time(t) => Ok(*t),
            Value::String(s) => s.parse().map_err(|_| mismatch::<NaiveTime>(&value)),
            _ => Err(mismatch::<NaiveTime>(&value)),
        }
    }

    fn is_zero(&self) -> bool {
        *self == NaiveTime::default()
    }
}

impl ColumnType for JsonValue {
    const KIND: ValueKind = ValueKind::Json;

    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Json(j) => Ok(j),
            Value::String(s) => Ok(serde_json::from_str(&s)?),
            Value::Bytes(b) => Ok(serde_json::from_slice(&b)?),
            Value::Null => Ok(JsonValue::Null),
            other => Err(mismatch::<JsonValue>(&other)),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_null()
    }
}

impl<T: ColumnType> ColumnType for Option<T> {
    const KIND: ValueKind = T::KIND;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_none()
    }

    fn nullable() -> bool {
        true
    }

    /// A bare `T` is accepted for an `Option<T>` field
    fn from_indirect(value: Box<dyn std::any::Any + Send + Sync>) -> Result<Self, Box<dyn std::any::Any + Send + Sync>> {
        value.downcast::<T>().map(|inner| Some(*inner))
    }
}
