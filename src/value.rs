//! Values flowing into and out of statements
//!
//! Three layers are kept apart:
//!
//! - [`Value`] is what callers hand to the builder chain. It still carries
//!   host-level shapes such as enum constants, raw bytes and structural objects
//!   that have to be mapped onto the declared column type.
//! - [`ColumnValue`] distinguishes an absent value (a no-op) from a present one,
//!   where a present [`Value::Null`] explicitly clears a column.
//! - [`CqlValue`] is the wire-level value after coercion. It can be rendered as
//!   a CQL literal, serialized to its protocol bytes, or converted to JSON.
//!
//! # Example
//!
//! ```
//! use cql_dao::value::{ColumnValue, IntoColumnValue, Value};
//!
//! assert_eq!(None::<i32>.into_column_value(), ColumnValue::Absent);
//! assert_eq!(Some(7).into_column_value(), ColumnValue::Present(Value::Int(7)));
//! assert_eq!("x".into_column_value(), ColumnValue::Present(Value::Text("x".into())));
//! ```

use std::fmt::{self, Write as _};

use uuid::Uuid;

use crate::query_builder::quote_identifier;

/// A caller-supplied value, before coercion to the column type
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit null; clears the column on update
    Null,
    /// boolean
    Boolean(bool),
    /// tinyint
    TinyInt(i8),
    /// smallint
    SmallInt(i16),
    /// int
    Int(i32),
    /// bigint, counter amounts
    BigInt(i64),
    /// float
    Float(f32),
    /// double
    Double(f64),
    /// text, varchar, ascii
    Text(String),
    /// Raw bytes, wrapped as a blob buffer on blob columns
    Bytes(Vec<u8>),
    /// uuid, timeuuid
    Uuid(Uuid),
    /// Milliseconds since the Unix epoch
    Timestamp(i64),
    /// An enum constant, stored by its textual name
    Enum(String),
    /// list<...>
    List(Vec<Value>),
    /// set<...>
    Set(Vec<Value>),
    /// map<..., ...>
    Map(Vec<(Value, Value)>),
    /// A structural composite, mapped field by field onto a user-defined type
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Build an enum value from its constant name
    pub fn enumeration(name: impl fmt::Display) -> Self {
        Value::Enum(name.to_string())
    }

    /// Build a list value
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a set value
    pub fn set<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::Set(items.into_iter().map(Into::into).collect())
    }

    /// Build a map value
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a structural object value for a user-defined type column
    pub fn object<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Check if this is [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or an empty collection; both are stored as null
    pub fn is_null_or_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::List(items) | Value::Set(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }

    /// Short name of the value shape, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::TinyInt(_) => "tinyint",
            Value::SmallInt(_) => "smallint",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::Enum(_) => "enum",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::TinyInt(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// A column assignment that may be absent
///
/// `Absent` leaves the column untouched, `Present(Value::Null)` clears it.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// A value to write
    Present(Value),
    /// Nothing to write
    Absent,
}

impl ColumnValue {
    /// Convert into the present value, if any
    pub fn into_value(self) -> Option<Value> {
        match self {
            ColumnValue::Present(value) => Some(value),
            ColumnValue::Absent => None,
        }
    }
}

/// Conversion into a [`ColumnValue`]
///
/// Plain values are always present; `Option::None` is absent.
pub trait IntoColumnValue {
    /// Perform the conversion
    fn into_column_value(self) -> ColumnValue;
}

impl IntoColumnValue for ColumnValue {
    fn into_column_value(self) -> ColumnValue {
        self
    }
}

macro_rules! impl_into_column_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoColumnValue for $ty {
                fn into_column_value(self) -> ColumnValue {
                    ColumnValue::Present(self.into())
                }
            }

            impl IntoColumnValue for Option<$ty> {
                fn into_column_value(self) -> ColumnValue {
                    match self {
                        Some(value) => ColumnValue::Present(value.into()),
                        None => ColumnValue::Absent,
                    }
                }
            }
        )*
    };
}

impl_into_column_value!(Value, bool, i8, i16, i32, i64, f32, f64, String, Vec<u8>, Uuid);

impl<'a> IntoColumnValue for &'a str {
    fn into_column_value(self) -> ColumnValue {
        ColumnValue::Present(self.into())
    }
}

impl<'a> IntoColumnValue for Option<&'a str> {
    fn into_column_value(self) -> ColumnValue {
        match self {
            Some(value) => ColumnValue::Present(value.into()),
            None => ColumnValue::Absent,
        }
    }
}

/// A wire-level CQL value, after coercion to its column type
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    /// null
    Null,
    /// boolean
    Boolean(bool),
    /// tinyint
    TinyInt(i8),
    /// smallint
    SmallInt(i16),
    /// int
    Int(i32),
    /// bigint
    BigInt(i64),
    /// counter
    Counter(i64),
    /// float
    Float(f32),
    /// double
    Double(f64),
    /// text, varchar, ascii
    Text(String),
    /// blob
    Blob(Vec<u8>),
    /// uuid, timeuuid
    Uuid(Uuid),
    /// timestamp in milliseconds since the Unix epoch
    Timestamp(i64),
    /// list
    List(Vec<CqlValue>),
    /// set
    Set(Vec<CqlValue>),
    /// map
    Map(Vec<(CqlValue, CqlValue)>),
    /// user-defined type value, fields in declared order
    Udt {
        /// The user type name
        type_name: String,
        /// Field values in declared order
        fields: Vec<(String, CqlValue)>,
    },
}

impl CqlValue {
    /// Check if this is [`CqlValue::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }

    /// Render the value as a CQL literal
    pub fn to_cql_literal(&self) -> String {
        let mut out = String::new();
        self.write_literal(&mut out);
        out
    }

    fn write_literal(&self, out: &mut String) {
        match self {
            CqlValue::Null => out.push_str("null"),
            CqlValue::Boolean(v) => out.push_str(if *v { "true" } else { "false" }),
            CqlValue::TinyInt(v) => push_display(out, v),
            CqlValue::SmallInt(v) => push_display(out, v),
            CqlValue::Int(v) => push_display(out, v),
            CqlValue::BigInt(v) | CqlValue::Counter(v) | CqlValue::Timestamp(v) => {
                push_display(out, v)
            }
            CqlValue::Float(v) => push_float(out, f64::from(*v)),
            CqlValue::Double(v) => push_float(out, *v),
            CqlValue::Text(v) => {
                out.push('\'');
                out.push_str(&v.replace('\'', "''"));
                out.push('\'');
            }
            CqlValue::Blob(bytes) => {
                out.push_str("0x");
                out.push_str(&hex(bytes));
            }
            CqlValue::Uuid(v) => push_display(out, v),
            CqlValue::List(items) => write_sequence(out, '[', ']', items),
            CqlValue::Set(items) => write_sequence(out, '{', '}', items),
            CqlValue::Map(entries) => {
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_literal(out);
                    out.push_str(": ");
                    v.write_literal(out);
                }
                out.push('}');
            }
            CqlValue::Udt { fields, .. } => {
                out.push('{');
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&quote_identifier(name));
                    out.push_str(": ");
                    v.write_literal(out);
                }
                out.push('}');
            }
        }
    }

    /// Serialize the value to its protocol bytes, `None` for null
    ///
    /// Single-record reads compare these bytes for the key columns of the
    /// returned row against the bytes that were sent.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        let bytes = match self {
            CqlValue::Null => return None,
            CqlValue::Boolean(v) => vec![u8::from(*v)],
            CqlValue::TinyInt(v) => v.to_be_bytes().to_vec(),
            CqlValue::SmallInt(v) => v.to_be_bytes().to_vec(),
            CqlValue::Int(v) => v.to_be_bytes().to_vec(),
            CqlValue::BigInt(v) | CqlValue::Counter(v) | CqlValue::Timestamp(v) => {
                v.to_be_bytes().to_vec()
            }
            CqlValue::Float(v) => v.to_bits().to_be_bytes().to_vec(),
            CqlValue::Double(v) => v.to_bits().to_be_bytes().to_vec(),
            CqlValue::Text(v) => v.as_bytes().to_vec(),
            CqlValue::Blob(v) => v.clone(),
            CqlValue::Uuid(v) => v.as_bytes().to_vec(),
            CqlValue::List(items) | CqlValue::Set(items) => {
                let mut buf = Vec::new();
                buf.extend_from_slice(&(items.len() as i32).to_be_bytes());
                for item in items {
                    write_element(&mut buf, item);
                }
                buf
            }
            CqlValue::Map(entries) => {
                let mut buf = Vec::new();
                buf.extend_from_slice(&(entries.len() as i32).to_be_bytes());
                for (k, v) in entries {
                    write_element(&mut buf, k);
                    write_element(&mut buf, v);
                }
                buf
            }
            CqlValue::Udt { fields, .. } => {
                let mut buf = Vec::new();
                for (_, v) in fields {
                    write_element(&mut buf, v);
                }
                buf
            }
        };
        Some(bytes)
    }

    /// Convert to a serde_json Value
    pub fn to_json_value(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            CqlValue::Null => Json::Null,
            CqlValue::Boolean(v) => Json::Bool(*v),
            CqlValue::TinyInt(v) => Json::from(*v),
            CqlValue::SmallInt(v) => Json::from(*v),
            CqlValue::Int(v) => Json::from(*v),
            CqlValue::BigInt(v) | CqlValue::Counter(v) | CqlValue::Timestamp(v) => Json::from(*v),
            CqlValue::Float(v) => serde_json::Number::from_f64(f64::from(*v))
                .map(Json::Number)
                .unwrap_or(Json::Null),
            CqlValue::Double(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            CqlValue::Text(v) => Json::String(v.clone()),
            CqlValue::Blob(v) => Json::String(format!("0x{}", hex(v))),
            CqlValue::Uuid(v) => Json::String(v.to_string()),
            CqlValue::List(items) | CqlValue::Set(items) => {
                Json::Array(items.iter().map(CqlValue::to_json_value).collect())
            }
            CqlValue::Map(entries) => {
                if entries.iter().all(|(k, _)| matches!(k, CqlValue::Text(_))) {
                    let object = entries
                        .iter()
                        .filter_map(|(k, v)| match k {
                            CqlValue::Text(key) => Some((key.clone(), v.to_json_value())),
                            _ => None,
                        })
                        .collect();
                    Json::Object(object)
                } else {
                    Json::Array(
                        entries
                            .iter()
                            .map(|(k, v)| Json::Array(vec![k.to_json_value(), v.to_json_value()]))
                            .collect(),
                    )
                }
            }
            CqlValue::Udt { fields, .. } => Json::Object(
                fields
                    .iter()
                    .map(|(name, v)| (name.clone(), v.to_json_value()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for CqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_cql_literal())
    }
}

fn push_display(out: &mut String, value: impl fmt::Display) {
    let _ = write!(out, "{}", value);
}

fn push_float(out: &mut String, value: f64) {
    if value.is_nan() {
        out.push_str("NaN");
    } else if value.is_infinite() {
        out.push_str(if value > 0.0 { "Infinity" } else { "-Infinity" });
    } else {
        push_display(out, value);
    }
}

fn write_sequence(out: &mut String, open: char, close: char, items: &[CqlValue]) {
    out.push(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_literal(out);
    }
    out.push(close);
}

// [int32 length][bytes], length -1 for null
fn write_element(buf: &mut Vec<u8>, value: &CqlValue) {
    match value.to_bytes() {
        Some(bytes) => {
            buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
            buf.extend_from_slice(&bytes);
        }
        None => buf.extend_from_slice(&(-1i32).to_be_bytes()),
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from_conversions() {
        assert_eq!(Value::from(true), Value::Boolean(true));
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from(42i64), Value::BigInt(42));
        assert_eq!(Value::from("x"), Value::Text("x".into()));
        assert_eq!(Value::from(vec![1u8, 2]), Value::Bytes(vec![1, 2]));
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn test_value_null_or_empty() {
        assert!(Value::Null.is_null_or_empty());
        assert!(Value::list(Vec::<i32>::new()).is_null_or_empty());
        assert!(Value::Map(vec![]).is_null_or_empty());
        assert!(!Value::set([1, 2]).is_null_or_empty());
        assert!(!Value::Text(String::new()).is_null_or_empty());
    }

    #[test]
    fn test_into_column_value() {
        assert_eq!(None::<String>.into_column_value(), ColumnValue::Absent);
        assert_eq!(
            Some("a".to_string()).into_column_value(),
            ColumnValue::Present(Value::Text("a".into()))
        );
        assert_eq!(
            Value::Null.into_column_value(),
            ColumnValue::Present(Value::Null)
        );
        assert_eq!(None::<&str>.into_column_value().into_value(), None);
    }

    #[test]
    fn test_text_literal_escaping() {
        let v = CqlValue::Text("it's".into());
        assert_eq!(v.to_cql_literal(), "'it''s'");
    }

    #[test]
    fn test_collection_literals() {
        let list = CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2)]);
        assert_eq!(list.to_cql_literal(), "[1, 2]");

        let set = CqlValue::Set(vec![CqlValue::Text("a".into())]);
        assert_eq!(set.to_cql_literal(), "{'a'}");

        let map = CqlValue::Map(vec![(CqlValue::Text("k".into()), CqlValue::BigInt(3))]);
        assert_eq!(map.to_cql_literal(), "{'k': 3}");

        let udt = CqlValue::Udt {
            type_name: "address".into(),
            fields: vec![
                ("street".into(), CqlValue::Text("Main".into())),
                ("zip".into(), CqlValue::Null),
            ],
        };
        assert_eq!(udt.to_cql_literal(), "{street: 'Main', zip: null}");
    }

    #[test]
    fn test_blob_and_special_float_literals() {
        assert_eq!(CqlValue::Blob(vec![0xca, 0xfe]).to_cql_literal(), "0xcafe");
        assert_eq!(CqlValue::Double(f64::NAN).to_cql_literal(), "NaN");
        assert_eq!(CqlValue::Float(f32::NEG_INFINITY).to_cql_literal(), "-Infinity");
        assert_eq!(CqlValue::Double(1.5).to_cql_literal(), "1.5");
    }

    #[test]
    fn test_scalar_bytes() {
        assert_eq!(CqlValue::Int(42).to_bytes(), Some(vec![0, 0, 0, 42]));
        assert_eq!(CqlValue::Boolean(true).to_bytes(), Some(vec![1]));
        assert_eq!(CqlValue::Text("ab".into()).to_bytes(), Some(b"ab".to_vec()));
        assert_eq!(CqlValue::Null.to_bytes(), None);
    }

    #[test]
    fn test_bytes_distinguish_int_widths() {
        assert_ne!(CqlValue::Int(42).to_bytes(), CqlValue::BigInt(42).to_bytes());
    }

    #[test]
    fn test_collection_bytes() {
        let list = CqlValue::List(vec![CqlValue::SmallInt(1), CqlValue::Null]);
        assert_eq!(
            list.to_bytes(),
            Some(vec![0, 0, 0, 2, 0, 0, 0, 2, 0, 1, 0xff, 0xff, 0xff, 0xff])
        );
    }

    #[test]
    fn test_to_json_value() {
        let map = CqlValue::Map(vec![(CqlValue::Text("a".into()), CqlValue::Int(1))]);
        assert_eq!(map.to_json_value(), serde_json::json!({"a": 1}));

        let map = CqlValue::Map(vec![(CqlValue::Int(1), CqlValue::Boolean(false))]);
        assert_eq!(map.to_json_value(), serde_json::json!([[1, false]]));

        assert_eq!(
            CqlValue::Blob(vec![1]).to_json_value(),
            serde_json::json!("0x01")
        );
        assert_eq!(CqlValue::Double(f64::NAN).to_json_value(), serde_json::Value::Null);
    }
}
