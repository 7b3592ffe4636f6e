//! CQL type mappings
//!
//! [`CqlType`] describes declared column types. [`FromCqlValue`] decodes a
//! wire value into a Rust type, and [`ColumnRef`] pairs a column name with the
//! Rust type it decodes to, so one generic accessor serves every column type.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use std::borrow::Cow;

use uuid::Uuid;

use crate::value::CqlValue;

/// A declared CQL column type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CqlType {
    /// ascii
    Ascii,
    /// bigint
    BigInt,
    /// blob
    Blob,
    /// boolean
    Boolean,
    /// counter
    Counter,
    /// double
    Double,
    /// float
    Float,
    /// int
    Int,
    /// smallint
    SmallInt,
    /// tinyint
    TinyInt,
    /// text
    Text,
    /// varchar
    Varchar,
    /// timestamp
    Timestamp,
    /// uuid
    Uuid,
    /// timeuuid
    TimeUuid,
    /// list<T>
    List(Box<CqlType>),
    /// set<T>
    Set(Box<CqlType>),
    /// map<K, V>
    Map(Box<CqlType>, Box<CqlType>),
    /// A user-defined type, resolved by name through the metadata catalog
    Udt(String),
}

impl CqlType {
    /// list<T>
    pub fn list(element: CqlType) -> Self {
        CqlType::List(Box::new(element))
    }

    /// set<T>
    pub fn set(element: CqlType) -> Self {
        CqlType::Set(Box::new(element))
    }

    /// map<K, V>
    pub fn map(key: CqlType, value: CqlType) -> Self {
        CqlType::Map(Box::new(key), Box::new(value))
    }

    /// user-defined type reference
    pub fn udt(name: impl Into<String>) -> Self {
        CqlType::Udt(name.into())
    }

    /// ascii, text and varchar
    pub fn is_text(&self) -> bool {
        matches!(self, CqlType::Ascii | CqlType::Text | CqlType::Varchar)
    }

    /// list, set and map
    pub fn is_collection(&self) -> bool {
        matches!(self, CqlType::List(_) | CqlType::Set(_) | CqlType::Map(_, _))
    }

    /// Names of every user-defined type referenced by this type
    pub fn referenced_udts(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_udts(&mut names);
        names
    }

    fn collect_udts<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            CqlType::Udt(name) => names.push(name),
            CqlType::List(inner) | CqlType::Set(inner) => inner.collect_udts(names),
            CqlType::Map(k, v) => {
                k.collect_udts(names);
                v.collect_udts(names);
            }
            _ => {}
        }
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlType::Ascii => f.write_str("ascii"),
            CqlType::BigInt => f.write_str("bigint"),
            CqlType::Blob => f.write_str("blob"),
            CqlType::Boolean => f.write_str("boolean"),
            CqlType::Counter => f.write_str("counter"),
            CqlType::Double => f.write_str("double"),
            CqlType::Float => f.write_str("float"),
            CqlType::Int => f.write_str("int"),
            CqlType::SmallInt => f.write_str("smallint"),
            CqlType::TinyInt => f.write_str("tinyint"),
            CqlType::Text => f.write_str("text"),
            CqlType::Varchar => f.write_str("varchar"),
            CqlType::Timestamp => f.write_str("timestamp"),
            CqlType::Uuid => f.write_str("uuid"),
            CqlType::TimeUuid => f.write_str("timeuuid"),
            CqlType::List(inner) => write!(f, "list<{}>", inner),
            CqlType::Set(inner) => write!(f, "set<{}>", inner),
            CqlType::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            CqlType::Udt(name) => write!(f, "frozen<{}>", name),
        }
    }
}

/// Decoding of a non-null wire value into a Rust type
pub trait FromCqlValue: Sized {
    /// Decode the value, describing the mismatch on failure
    fn from_cql(value: &CqlValue) -> Result<Self, String>;
}

fn mismatch<T>(expected: &str, value: &CqlValue) -> Result<T, String> {
    Err(format!("expected {}, found {}", expected, value))
}

impl FromCqlValue for CqlValue {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl FromCqlValue for bool {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        match value {
            CqlValue::Boolean(v) => Ok(*v),
            other => mismatch("boolean", other),
        }
    }
}

impl FromCqlValue for i8 {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        match value {
            CqlValue::TinyInt(v) => Ok(*v),
            other => mismatch("tinyint", other),
        }
    }
}

impl FromCqlValue for i16 {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        match value {
            CqlValue::SmallInt(v) => Ok(*v),
            CqlValue::TinyInt(v) => Ok(i16::from(*v)),
            other => mismatch("smallint", other),
        }
    }
}

impl FromCqlValue for i32 {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        match value {
            CqlValue::Int(v) => Ok(*v),
            CqlValue::SmallInt(v) => Ok(i32::from(*v)),
            CqlValue::TinyInt(v) => Ok(i32::from(*v)),
            other => mismatch("int", other),
        }
    }
}

impl FromCqlValue for i64 {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        match value {
            CqlValue::BigInt(v) | CqlValue::Counter(v) | CqlValue::Timestamp(v) => Ok(*v),
            CqlValue::Int(v) => Ok(i64::from(*v)),
            CqlValue::SmallInt(v) => Ok(i64::from(*v)),
            CqlValue::TinyInt(v) => Ok(i64::from(*v)),
            other => mismatch("bigint", other),
        }
    }
}

impl FromCqlValue for f32 {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        match value {
            CqlValue::Float(v) => Ok(*v),
            other => mismatch("float", other),
        }
    }
}

impl FromCqlValue for f64 {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        match value {
            CqlValue::Double(v) => Ok(*v),
            CqlValue::Float(v) => Ok(f64::from(*v)),
            other => mismatch("double", other),
        }
    }
}

impl FromCqlValue for String {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        match value {
            CqlValue::Text(v) => Ok(v.clone()),
            other => mismatch("text", other),
        }
    }
}

impl FromCqlValue for Vec<u8> {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        match value {
            CqlValue::Blob(v) => Ok(v.clone()),
            other => mismatch("blob", other),
        }
    }
}

impl FromCqlValue for Uuid {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        match value {
            CqlValue::Uuid(v) => Ok(*v),
            other => mismatch("uuid", other),
        }
    }
}

impl FromCqlValue for serde_json::Value {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        Ok(value.to_json_value())
    }
}

fn sequence<'a>(value: &'a CqlValue, expected: &str) -> Result<&'a [CqlValue], String> {
    match value {
        CqlValue::List(items) | CqlValue::Set(items) => Ok(items),
        other => mismatch(expected, other),
    }
}

fn entries<'a>(value: &'a CqlValue) -> Result<&'a [(CqlValue, CqlValue)], String> {
    match value {
        CqlValue::Map(entries) => Ok(entries),
        other => mismatch("map", other),
    }
}

impl<T: FromCqlValue> FromCqlValue for Vec<T> {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        sequence(value, "list")?.iter().map(T::from_cql).collect()
    }
}

impl<T: FromCqlValue + Eq + Hash> FromCqlValue for HashSet<T> {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        sequence(value, "set")?.iter().map(T::from_cql).collect()
    }
}

impl<T: FromCqlValue + Ord> FromCqlValue for BTreeSet<T> {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        sequence(value, "set")?.iter().map(T::from_cql).collect()
    }
}

impl<K: FromCqlValue + Eq + Hash, V: FromCqlValue> FromCqlValue for HashMap<K, V> {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        entries(value)?
            .iter()
            .map(|(k, v)| Ok((K::from_cql(k)?, V::from_cql(v)?)))
            .collect()
    }
}

impl<K: FromCqlValue + Ord, V: FromCqlValue> FromCqlValue for BTreeMap<K, V> {
    fn from_cql(value: &CqlValue) -> Result<Self, String> {
        entries(value)?
            .iter()
            .map(|(k, v)| Ok((K::from_cql(k)?, V::from_cql(v)?)))
            .collect()
    }
}

/// A column name paired with the Rust type its values decode to
///
/// # Example
///
/// ```
/// use cql_dao::types::ColumnRef;
///
/// const NAME: ColumnRef<String> = ColumnRef::new("name");
/// assert_eq!(NAME.name(), "name");
/// ```
pub struct ColumnRef<T> {
    name: Cow<'static, str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ColumnRef<T> {
    /// Create a column reference with a static name
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _marker: PhantomData,
        }
    }

    /// Create a column reference with an owned name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            _marker: PhantomData,
        }
    }

    /// The column name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for ColumnRef<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ColumnRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnRef")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
