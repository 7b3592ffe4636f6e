//! Fetched records and mutation results

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::driver::{ExecutionInfo, Row};
use crate::error::{CqlError, Result};
use crate::types::{ColumnRef, FromCqlValue};
use crate::value::CqlValue;

/// A fetched row
///
/// Values are read through typed accessors; a null cell reads as `None`, a
/// column that was not selected is a [`CqlError::Decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    row: Row,
    info: Arc<ExecutionInfo>,
}

impl Record {
    /// Create a record from a driver row and the diagnostics of its request
    pub fn new(row: Row, info: Arc<ExecutionInfo>) -> Self {
        Self { row, info }
    }

    /// Selected column names
    pub fn columns(&self) -> &[String] {
        self.row.columns()
    }

    /// The underlying row
    pub fn row(&self) -> &Row {
        &self.row
    }

    /// The raw value of a column
    pub fn get_value(&self, column: &str) -> Result<&CqlValue> {
        self.row
            .get(column)
            .ok_or_else(|| CqlError::decode(column, "column was not selected"))
    }

    /// Whether a column is null
    pub fn is_null(&self, column: &str) -> Result<bool> {
        Ok(self.get_value(column)?.is_null())
    }

    /// Decode a column
    ///
    /// ```
    /// use std::sync::Arc;
    /// use cql_dao::driver::{ExecutionInfo, Row};
    /// use cql_dao::record::Record;
    /// use cql_dao::value::CqlValue;
    ///
    /// let row = Row::from_pairs([("name", CqlValue::Text("x".into())), ("age", CqlValue::Null)]);
    /// let record = Record::new(row, Arc::new(ExecutionInfo::default()));
    ///
    /// assert_eq!(record.get::<String>("name").unwrap(), Some("x".to_string()));
    /// assert_eq!(record.get::<i32>("age").unwrap(), None);
    /// ```
    pub fn get<T: FromCqlValue>(&self, column: &str) -> Result<Option<T>> {
        match self.get_value(column)? {
            CqlValue::Null => Ok(None),
            value => T::from_cql(value)
                .map(Some)
                .map_err(|message| CqlError::decode(column, message)),
        }
    }

    /// Decode the column a [`ColumnRef`] names
    pub fn value<T: FromCqlValue>(&self, column: &ColumnRef<T>) -> Result<Option<T>> {
        self.get(column.name())
    }

    /// Writetime of a column in microseconds, if selected with metadata
    pub fn writetime(&self, column: &str) -> Result<Option<i64>> {
        self.get(&format!("writetime({})", column))
    }

    /// Remaining time to live of a column, if selected with metadata and set
    pub fn ttl(&self, column: &str) -> Result<Option<Duration>> {
        let seconds: Option<i32> = self.get(&format!("ttl({})", column))?;
        Ok(seconds.map(|s| Duration::from_secs(u64::from(s.max(0).unsigned_abs()))))
    }

    /// Diagnostics of the request that returned this record
    pub fn execution_info(&self) -> &ExecutionInfo {
        &self.info
    }

    /// Render the record as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.row
                .columns()
                .iter()
                .zip(self.row.values())
                .map(|(name, value)| (name.clone(), value.to_json_value()))
                .collect(),
        )
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (name, value)) in self.row.columns().iter().zip(self.row.values()).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        f.write_str("]")
    }
}

/// The outcome of a mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult {
    applied: bool,
    info: ExecutionInfo,
}

impl MutationResult {
    /// Create a result
    pub fn new(applied: bool, info: ExecutionInfo) -> Self {
        Self { applied, info }
    }

    /// Whether the mutation was applied; unconditional mutations always are
    pub fn was_applied(&self) -> bool {
        self.applied
    }

    /// Diagnostics of the request
    pub fn execution_info(&self) -> &ExecutionInfo {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: ColumnRef<String> = ColumnRef::new("name");

    fn record() -> Record {
        Record::new(
            Row::from_pairs([
                ("id", CqlValue::Int(1)),
                ("name", CqlValue::Text("x".into())),
                ("writetime(name)", CqlValue::BigInt(1_700_000_000_000_000)),
                ("ttl(name)", CqlValue::Int(30)),
                ("email", CqlValue::Null),
            ]),
            Arc::new(ExecutionInfo {
                queried_host: Some("10.0.0.1".into()),
                ..ExecutionInfo::default()
            }),
        )
    }

    #[test]
    fn test_typed_accessors() {
        let record = record();

        assert_eq!(record.get::<i32>("id").unwrap(), Some(1));
        assert_eq!(record.get::<i64>("id").unwrap(), Some(1));
        assert_eq!(record.value(&NAME).unwrap(), Some("x".to_string()));
        assert_eq!(record.get::<String>("email").unwrap(), None);
        assert!(record.is_null("email").unwrap());
    }

    #[test]
    fn test_decode_errors() {
        let record = record();

        assert!(matches!(
            record.get::<String>("missing"),
            Err(CqlError::Decode { .. })
        ));
        assert!(matches!(
            record.get::<bool>("name"),
            Err(CqlError::Decode { column, .. }) if column == "name"
        ));
    }

    #[test]
    fn test_metadata_columns() {
        let record = record();

        assert_eq!(
            record.writetime("name").unwrap(),
            Some(1_700_000_000_000_000)
        );
        assert_eq!(record.ttl("name").unwrap(), Some(Duration::from_secs(30)));
        assert!(record.ttl("id").is_err());
    }

    #[test]
    fn test_execution_info() {
        assert_eq!(
            record().execution_info().queried_host.as_deref(),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn test_to_json_and_display() {
        let record = Record::new(
            Row::from_pairs([("id", CqlValue::Int(1)), ("name", CqlValue::Text("x".into()))]),
            Arc::new(ExecutionInfo::default()),
        );

        assert_eq!(record.to_json(), serde_json::json!({"id": 1, "name": "x"}));
        assert_eq!(record.to_string(), "[id=1, name='x']");
    }
}
