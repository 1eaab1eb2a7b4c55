//! Record identifiers
//!
//! An [`Id`] is the (possibly composite) primary key of a record. Each
//! column's value is an [`IdValue`], which knows its own byte and string
//! encodings, so integer, string, byte-array and binary keys such as UUIDs
//! mix freely in one composite key.
//!
//! Encodings:
//! - bytes: a single part is its raw bytes; a composite key is each part's
//!   bytes prefixed with its length as a big-endian `u32`;
//! - string: parts joined by `,`, with `,` and `\` escaped by `\`.

use std::fmt;

use uuid::Uuid;

use crate::error::{OrmError, OrmResult};
use crate::schema::{Dyn, Schema};
use crate::search::{Arg, Attrs, Condition};
use crate::value::Value;

/// One column value of an identifier
pub trait IdValue: fmt::Debug + Send + Sync {
    fn is_zero(&self) -> bool;

    fn to_bytes(&self) -> Vec<u8>;

    fn to_id_string(&self) -> String;

    fn to_value(&self) -> Value;

    /// Parse a value of the same kind as `self` from its byte encoding
    fn parse_bytes(&self, bytes: &[u8]) -> OrmResult<Box<dyn IdValue>>;

    /// Parse a value of the same kind as `self` from its string encoding
    fn parse_str(&self, text: &str) -> OrmResult<Box<dyn IdValue>>;

    fn box_clone(&self) -> Box<dyn IdValue>;
}

impl Clone for Box<dyn IdValue> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

fn invalid(message: impl Into<String>) -> OrmError {
    OrmError::InvalidId(message.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntId(pub i64);

impl IdValue for IntId {
    fn is_zero(&self) -> bool {
        self.0 == 0
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }

    fn to_id_string(&self) -> String {
        self.0.to_string()
    }

    fn to_value(&self) -> Value {
        Value::Int(self.0)
    }

    fn parse_bytes(&self, bytes: &[u8]) -> OrmResult<Box<dyn IdValue>> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| invalid(format!("integer id needs 8 bytes, got {}", bytes.len())))?;
        Ok(Box::new(IntId(i64::from_be_bytes(raw))))
    }

    fn parse_str(&self, text: &str) -> OrmResult<Box<dyn IdValue>> {
        let value = text
            .parse()
            .map_err(|_| invalid(format!("'{}' is not an integer id", text)))?;
        Ok(Box::new(IntId(value)))
    }

    fn box_clone(&self) -> Box<dyn IdValue> {
        Box::new(*self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UIntId(pub u64);

impl IdValue for UIntId {
    fn is_zero(&self) -> bool {
        self.0 == 0
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }

    fn to_id_string(&self) -> String {
        self.0.to_string()
    }

    fn to_value(&self) -> Value {
        Value::UInt(self.0)
    }

    fn parse_bytes(&self, bytes: &[u8]) -> OrmResult<Box<dyn IdValue>> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| invalid(format!("unsigned id needs 8 bytes, got {}", bytes.len())))?;
        Ok(Box::new(UIntId(u64::from_be_bytes(raw))))
    }

    fn parse_str(&self, text: &str) -> OrmResult<Box<dyn IdValue>> {
        let value = text
            .parse()
            .map_err(|_| invalid(format!("'{}' is not an unsigned id", text)))?;
        Ok(Box::new(UIntId(value)))
    }

    fn box_clone(&self) -> Box<dyn IdValue> {
        Box::new(*self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringId(pub String);

impl IdValue for StringId {
    fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    fn to_id_string(&self) -> String {
        self.0.clone()
    }

    fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }

    fn parse_bytes(&self, bytes: &[u8]) -> OrmResult<Box<dyn IdValue>> {
        let text = std::str::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
        Ok(Box::new(StringId(text.to_string())))
    }

    fn parse_str(&self, text: &str) -> OrmResult<Box<dyn IdValue>> {
        Ok(Box::new(StringId(text.to_string())))
    }

    fn box_clone(&self) -> Box<dyn IdValue> {
        Box::new(self.clone())
    }
}

/// Raw byte-array key; displayed as hex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesId(pub Vec<u8>);

impl IdValue for BytesId {
    fn is_zero(&self) -> bool {
        self.0.is_empty() || self.0.iter().all(|b| *b == 0)
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.0.clone()
    }

    fn to_id_string(&self) -> String {
        hex::encode(&self.0)
    }

    fn to_value(&self) -> Value {
        Value::Bytes(self.0.clone())
    }

    fn parse_bytes(&self, bytes: &[u8]) -> OrmResult<Box<dyn IdValue>> {
        Ok(Box::new(BytesId(bytes.to_vec())))
    }

    fn parse_str(&self, text: &str) -> OrmResult<Box<dyn IdValue>> {
        let bytes = hex::decode(text).map_err(|e| invalid(format!("'{}' is not hex: {}", text, e)))?;
        Ok(Box::new(BytesId(bytes)))
    }

    fn box_clone(&self) -> Box<dyn IdValue> {
        Box::new(self.clone())
    }
}

/// Fixed-layout binary key type usable through [`BinaryId`]
pub trait BinaryKey: Clone + fmt::Debug + Send + Sync + 'static {
    fn to_key_bytes(&self) -> Vec<u8>;
    fn from_key_bytes(bytes: &[u8]) -> OrmResult<Self>;
    fn to_key_string(&self) -> String;
    fn from_key_str(text: &str) -> OrmResult<Self>;
    fn to_key_value(&self) -> Value;
    fn is_zero_key(&self) -> bool;
}

impl BinaryKey for Uuid {
    fn to_key_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_key_bytes(bytes: &[u8]) -> OrmResult<Self> {
        Uuid::from_slice(bytes).map_err(|e| invalid(e.to_string()))
    }

    fn to_key_string(&self) -> String {
        self.to_string()
    }

    fn from_key_str(text: &str) -> OrmResult<Self> {
        Uuid::parse_str(text).map_err(|e| invalid(e.to_string()))
    }

    fn to_key_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn is_zero_key(&self) -> bool {
        self.is_nil()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryId<T>(pub T);

impl<T: BinaryKey> IdValue for BinaryId<T> {
    fn is_zero(&self) -> bool {
        self.0.is_zero_key()
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_key_bytes()
    }

    fn to_id_string(&self) -> String {
        self.0.to_key_string()
    }

    fn to_value(&self) -> Value {
        self.0.to_key_value()
    }

    fn parse_bytes(&self, bytes: &[u8]) -> OrmResult<Box<dyn IdValue>> {
        Ok(Box::new(BinaryId(T::from_key_bytes(bytes)?)))
    }

    fn parse_str(&self, text: &str) -> OrmResult<Box<dyn IdValue>> {
        Ok(Box::new(BinaryId(T::from_key_str(text)?)))
    }

    fn box_clone(&self) -> Box<dyn IdValue> {
        Box::new(self.clone())
    }
}

/// Wrap a storage value in the matching [`IdValue`]
pub fn id_value_from(value: Value) -> OrmResult<Box<dyn IdValue>> {
    Ok(match value {
        Value::Int(i) => Box::new(IntId(i)),
        Value::UInt(u) => Box::new(UIntId(u)),
        Value::String(s) => Box::new(StringId(s)),
        Value::Bytes(b) => Box::new(BytesId(b)),
        Value::Uuid(u) => Box::new(BinaryId(u)),
        other => return Err(invalid(format!("{} values cannot be ids", other.kind_name()))),
    })
}

/// One column of an identifier
#[derive(Debug, Clone)]
pub struct IdPart {
    pub column: String,
    pub value: Box<dyn IdValue>,
}

/// A record identifier over one or more primary key columns
#[derive(Debug, Clone)]
pub struct Id {
    parts: Vec<IdPart>,
}

impl Id {
    pub fn new(parts: Vec<IdPart>) -> OrmResult<Self> {
        if parts.is_empty() {
            return Err(invalid("an id needs at least one part"));
        }
        Ok(Self { parts })
    }

    pub fn single(column: impl Into<String>, value: impl IdValue + 'static) -> Self {
        Self {
            parts: vec![IdPart {
                column: column.into(),
                value: Box::new(value),
            }],
        }
    }

    /// Identifier of `record` from its primary key columns
    pub fn from_record(schema: &Schema, record: &Dyn) -> OrmResult<Self> {
        let parts = schema
            .primary_fields()
            .map(|field| {
                Ok(IdPart {
                    column: field.column().to_string(),
                    value: id_value_from(field.read(record)?)?,
                })
            })
            .collect::<OrmResult<Vec<_>>>()?;
        Self::new(parts)
    }

    pub fn parts(&self) -> &[IdPart] {
        &self.parts
    }

    pub fn is_composite(&self) -> bool {
        self.parts.len() > 1
    }

    /// Zero when any part is zero
    pub fn is_zero(&self) -> bool {
        self.parts.iter().any(|p| p.value.is_zero())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        if let [single] = self.parts.as_slice() {
            return single.value.to_bytes();
        }
        let mut out = Vec::new();
        for part in &self.parts {
            let bytes = part.value.to_bytes();
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&bytes);
        }
        out
    }

    /// Decode bytes produced by [`to_bytes`](Self::to_bytes), using `template` for the part kinds
    pub fn decode(bytes: &[u8], template: &Id) -> OrmResult<Self> {
        if let [single] = template.parts.as_slice() {
            return Ok(Self {
                parts: vec![IdPart {
                    column: single.column.clone(),
                    value: single.value.parse_bytes(bytes)?,
                }],
            });
        }

        let mut parts = Vec::with_capacity(template.parts.len());
        let mut rest = bytes;
        for part in &template.parts {
            if rest.len() < 4 {
                return Err(invalid("truncated composite id"));
            }
            let (len, tail) = rest.split_at(4);
            let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
            if tail.len() < len {
                return Err(invalid("truncated composite id part"));
            }
            let (raw, tail) = tail.split_at(len);
            parts.push(IdPart {
                column: part.column.clone(),
                value: part.value.parse_bytes(raw)?,
            });
            rest = tail;
        }
        if !rest.is_empty() {
            return Err(invalid("trailing bytes after composite id"));
        }
        Ok(Self { parts })
    }

    /// Parse the display form, using `template` for the part kinds
    pub fn parse(text: &str, template: &Id) -> OrmResult<Self> {
        let pieces = split_escaped(text);
        if pieces.len() != template.parts.len() {
            return Err(invalid(format!(
                "expected {} id parts, got {}",
                template.parts.len(),
                pieces.len()
            )));
        }
        let parts = template
            .parts
            .iter()
            .zip(pieces)
            .map(|(part, piece)| {
                Ok(IdPart {
                    column: part.column.clone(),
                    value: part.value.parse_str(&piece)?,
                })
            })
            .collect::<OrmResult<Vec<_>>>()?;
        Ok(Self { parts })
    }

    /// Storage value: the single part's value, or the byte encoding of a composite key
    pub fn to_value(&self) -> Value {
        match self.parts.as_slice() {
            [single] => single.value.to_value(),
            _ => Value::Bytes(self.to_bytes()),
        }
    }

    /// Equality condition on every key column
    pub fn condition(&self) -> Condition {
        let attrs: Attrs = self
            .parts
            .iter()
            .map(|p| (p.column.clone(), Arg::Value(p.value.to_value())))
            .collect();
        Condition::Columns(attrs)
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.parts.len() == other.parts.len()
            && self.parts.iter().zip(&other.parts).all(|(a, b)| {
                a.column == b.column
                    && a.value.to_bytes() == b.value.to_bytes()
                    && a.value.to_value().kind() == b.value.to_value().kind()
            })
    }
}

impl Eq for Id {}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .parts
            .iter()
            .map(|p| escape(&p.value.to_id_string()))
            .collect();
        f.write_str(&rendered.join(","))
    }
}

impl From<Id> for Value {
    fn from(id: Id) -> Self {
        id.to_value()
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == ',' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn split_escaped(text: &str) -> Vec<String> {
    let mut pieces = vec![String::new()];
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let (Some(next), Some(last)) = (chars.next(), pieces.last_mut()) {
                    last.push(next);
                }
            }
            ',' => pieces.push(String::new()),
            other => {
                if let Some(last) = pieces.last_mut() {
                    last.push(other);
                }
            }
        }
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composite() -> Id {
        Id::new(vec![
            IdPart {
                column: "tenant_id".into(),
                value: Box::new(UIntId(7)),
            },
            IdPart {
                column: "code".into(),
                value: Box::new(StringId("a,b\\c".into())),
            },
            IdPart {
                column: "blob".into(),
                value: Box::new(BytesId(vec![0xde, 0xad])),
            },
            IdPart {
                column: "uuid".into(),
                value: Box::new(BinaryId(Uuid::from_u128(42))),
            },
            IdPart {
                column: "seq".into(),
                value: Box::new(IntId(-3)),
            },
        ])
        .unwrap()
    }

    #[test]
    fn composite_ids_survive_bytes_and_strings() {
        let id = composite();

        let decoded = Id::decode(&id.to_bytes(), &id).unwrap();
        assert_eq!(decoded, id);

        let text = id.to_string();
        assert!(text.starts_with("7,a\\,b\\\\c,dead,"));
        let parsed = Id::parse(&text, &id).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn single_part_bytes_are_raw() {
        let id = Id::single("id", IntId(1));
        assert_eq!(id.to_bytes(), 1i64.to_be_bytes().to_vec());
        assert_eq!(id.to_value(), Value::Int(1));
        assert_eq!(Id::decode(&id.to_bytes(), &id).unwrap(), id);
    }

    #[test]
    fn zero_parts_make_the_id_zero() {
        assert!(Id::single("id", IntId(0)).is_zero());
        assert!(Id::single("id", BinaryId(Uuid::nil())).is_zero());
        assert!(!composite().is_zero());
    }

    #[test]
    fn malformed_input_is_rejected() {
        let id = composite();
        assert!(Id::decode(&[0, 0, 0, 9, 1], &id).is_err());
        assert!(Id::parse("1,2", &id).is_err());
        assert!(Id::parse("x", &Id::single("id", IntId(0))).is_err());
    }

    #[test]
    fn condition_matches_every_column() {
        match composite().condition() {
            Condition::Columns(attrs) => {
                let columns: Vec<&str> = attrs.keys().map(String::as_str).collect();
                assert_eq!(columns, vec!["blob", "code", "seq", "tenant_id", "uuid"]);
            }
            _ => panic!("expected a column condition"),
        }
    }
}
