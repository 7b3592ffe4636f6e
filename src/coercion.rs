//! Coercion of caller values to declared column types
//!
//! Nulls and empty collections become null. Built-in values pass through,
//! widened losslessly to the declared width; enum constants become their
//! textual name on text columns and raw bytes become blob buffers. Objects are
//! mapped onto user-defined types field by field in declared order, recursing
//! through collections.

use crate::error::{CqlError, Result};
use crate::metadata::TableSchema;
use crate::query_builder::{Clause, Relation};
use crate::types::CqlType;
use crate::value::{CqlValue, Value};

/// Coerce a value for a column of the table
pub fn coerce_column(schema: &TableSchema, column: &str, value: &Value) -> Result<CqlValue> {
    let ty = schema.column_type(column)?;
    coerce(schema, ty, value, column)
}

/// Coerce the value of a where or if clause
///
/// `IN` takes a list of column values, `CONTAINS` an element of the column's
/// collection and `CONTAINS KEY` a key of its map.
pub fn coerce_clause(schema: &TableSchema, clause: &Clause) -> Result<CqlValue> {
    let column = clause.column();
    let ty = schema.column_type(column)?;

    match clause.relation() {
        Relation::In => match clause.value() {
            Value::List(items) | Value::Set(items) => items
                .iter()
                .map(|item| coerce(schema, ty, item, column))
                .collect::<Result<Vec<_>>>()
                .map(CqlValue::List),
            other => Err(mismatch(column, ty, other)),
        },
        Relation::Contains => match ty {
            CqlType::List(element) | CqlType::Set(element) => {
                coerce(schema, element, clause.value(), column)
            }
            CqlType::Map(_, value) => coerce(schema, value, clause.value(), column),
            _ => Err(CqlError::schema(format!(
                "CONTAINS requires a collection, column '{}' is {}",
                column, ty
            ))),
        },
        Relation::ContainsKey => match ty {
            CqlType::Map(key, _) => coerce(schema, key, clause.value(), column),
            _ => Err(CqlError::schema(format!(
                "CONTAINS KEY requires a map, column '{}' is {}",
                column, ty
            ))),
        },
        _ => coerce(schema, ty, clause.value(), column),
    }
}

/// Coerce a value to a declared type; `path` names the value in errors
pub fn coerce(schema: &TableSchema, ty: &CqlType, value: &Value, path: &str) -> Result<CqlValue> {
    if value.is_null_or_empty() {
        return Ok(CqlValue::Null);
    }

    match (ty, value) {
        (CqlType::Udt(name), Value::Object(fields)) => {
            let user_type = schema.user_type(name)?;
            if let Some((unknown, _)) = fields.iter().find(|(f, _)| user_type.field(f).is_none()) {
                return Err(CqlError::schema(format!(
                    "field '{}' of {} is not defined in user type {}",
                    unknown, path, name
                )));
            }

            let mapped = user_type
                .fields()
                .iter()
                .map(|(field, field_type)| {
                    let value = fields
                        .iter()
                        .find(|(f, _)| f == field)
                        .map(|(_, v)| v)
                        .unwrap_or(&Value::Null);
                    let nested = format!("{}.{}", path, field);
                    Ok((field.clone(), coerce(schema, field_type, value, &nested)?))
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(CqlValue::Udt {
                type_name: name.clone(),
                fields: mapped,
            })
        }
        (CqlType::List(element), Value::List(items) | Value::Set(items)) => {
            coerce_items(schema, element, items, path).map(CqlValue::List)
        }
        (CqlType::Set(element), Value::Set(items) | Value::List(items)) => {
            coerce_items(schema, element, items, path).map(CqlValue::Set)
        }
        (CqlType::Map(key_type, value_type), Value::Map(entries)) => entries
            .iter()
            .map(|(k, v)| {
                Ok((
                    coerce(schema, key_type, k, path)?,
                    coerce(schema, value_type, v, path)?,
                ))
            })
            .collect::<Result<Vec<_>>>()
            .map(CqlValue::Map),
        (ty, value) => coerce_builtin(ty, value).ok_or_else(|| mismatch(path, ty, value)),
    }
}

fn coerce_items(
    schema: &TableSchema,
    element: &CqlType,
    items: &[Value],
    path: &str,
) -> Result<Vec<CqlValue>> {
    items
        .iter()
        .map(|item| coerce(schema, element, item, path))
        .collect()
}

fn coerce_builtin(ty: &CqlType, value: &Value) -> Option<CqlValue> {
    let coerced = match (ty, value) {
        (CqlType::Boolean, Value::Boolean(v)) => CqlValue::Boolean(*v),
        (CqlType::TinyInt, Value::TinyInt(v)) => CqlValue::TinyInt(*v),
        (CqlType::SmallInt, Value::SmallInt(v)) => CqlValue::SmallInt(*v),
        (CqlType::SmallInt, Value::TinyInt(v)) => CqlValue::SmallInt(i16::from(*v)),
        (CqlType::Int, Value::Int(v)) => CqlValue::Int(*v),
        (CqlType::Int, Value::SmallInt(v)) => CqlValue::Int(i32::from(*v)),
        (CqlType::Int, Value::TinyInt(v)) => CqlValue::Int(i32::from(*v)),
        (CqlType::BigInt, value) => CqlValue::BigInt(as_i64(value)?),
        (CqlType::Counter, value) => CqlValue::Counter(as_i64(value)?),
        (CqlType::Timestamp, Value::Timestamp(v)) => CqlValue::Timestamp(*v),
        (CqlType::Timestamp, Value::BigInt(v)) => CqlValue::Timestamp(*v),
        (CqlType::Float, Value::Float(v)) => CqlValue::Float(*v),
        (CqlType::Double, Value::Double(v)) => CqlValue::Double(*v),
        (CqlType::Double, Value::Float(v)) => CqlValue::Double(f64::from(*v)),
        (ty, Value::Text(v)) if ty.is_text() => CqlValue::Text(v.clone()),
        (ty, Value::Enum(name)) if ty.is_text() => CqlValue::Text(name.clone()),
        (CqlType::Blob, Value::Bytes(v)) => CqlValue::Blob(v.clone()),
        (CqlType::Uuid | CqlType::TimeUuid, Value::Uuid(v)) => CqlValue::Uuid(*v),
        _ => return None,
    };
    Some(coerced)
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::BigInt(v) => Some(*v),
        Value::Int(v) => Some(i64::from(*v)),
        Value::SmallInt(v) => Some(i64::from(*v)),
        Value::TinyInt(v) => Some(i64::from(*v)),
        _ => None,
    }
}

fn mismatch(path: &str, ty: &CqlType, value: &Value) -> CqlError {
    CqlError::schema(format!(
        "cannot store {} value in '{}' of type {}",
        value.kind(),
        path,
        ty
    ))
}
