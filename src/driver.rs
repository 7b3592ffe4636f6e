//! The driver contract
//!
//! The wire protocol and cluster topology belong to a driver. This crate only
//! needs a narrow surface from it: preparing and executing statements, paging
//! through results, and looking up schema. Statement work is returned as the
//! driver's own boxed futures, which the [`FutureBridge`](crate::bridge::FutureBridge)
//! moves onto the shared runtime; schema lookups are plain async methods.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::batch::BatchType;
use crate::context::{ConsistencyLevel, RetryPolicy};
use crate::error::DriverError;
use crate::metadata::{TableMetadata, UserType};
use crate::value::CqlValue;

/// A handle to a statement prepared on the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreparedHandle {
    id: Vec<u8>,
    query: Arc<str>,
}

impl PreparedHandle {
    /// Create a handle from the server-assigned id and the statement text
    pub fn new(id: impl Into<Vec<u8>>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: Arc::from(query.into()),
        }
    }

    /// The server-assigned statement id
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// The statement text
    pub fn query(&self) -> &str {
        &self.query
    }
}

/// Per-statement options handed to the driver
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementOptions {
    /// Consistency level
    pub consistency: Option<ConsistencyLevel>,
    /// Serial consistency level for conditional statements
    pub serial_consistency: Option<ConsistencyLevel>,
    /// Request tracing on, off, or driver default
    pub tracing: Option<bool>,
    /// Retry policy
    pub retry_policy: Option<RetryPolicy>,
    /// Rows per page
    pub fetch_size: Option<i32>,
}

/// A statement ready for the driver
#[derive(Debug, Clone, PartialEq)]
pub enum DriverStatement {
    /// A prepared statement with positional values
    Prepared {
        /// The prepared handle
        handle: PreparedHandle,
        /// Values in marker order
        values: Vec<CqlValue>,
        /// Statement options
        options: StatementOptions,
    },
    /// An unprepared statement with inlined literals
    Simple {
        /// The statement text
        query: String,
        /// Statement options
        options: StatementOptions,
    },
    /// A batch of prepared or simple statements
    Batch {
        /// The batch type
        batch_type: BatchType,
        /// Member statements, in order
        statements: Vec<DriverStatement>,
        /// Statement options
        options: StatementOptions,
    },
}

impl DriverStatement {
    /// The statement text, or `None` for a batch
    pub fn query(&self) -> Option<&str> {
        match self {
            DriverStatement::Prepared { handle, .. } => Some(handle.query()),
            DriverStatement::Simple { query, .. } => Some(query),
            DriverStatement::Batch { .. } => None,
        }
    }

    /// The statement options
    pub fn options(&self) -> &StatementOptions {
        match self {
            DriverStatement::Prepared { options, .. }
            | DriverStatement::Simple { options, .. }
            | DriverStatement::Batch { options, .. } => options,
        }
    }

    /// Bound values, empty for simple statements and batches
    pub fn values(&self) -> &[CqlValue] {
        match self {
            DriverStatement::Prepared { values, .. } => values,
            _ => &[],
        }
    }
}

/// A row returned by the driver
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<CqlValue>,
}

impl Row {
    /// Create a row; `values` are in `columns` order
    pub fn new(columns: Arc<[String]>, values: Vec<CqlValue>) -> Self {
        Self { columns, values }
    }

    /// Create a row from name/value pairs
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, CqlValue)>,
        K: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<CqlValue>) =
            pairs.into_iter().map(|(k, v)| (k.into(), v)).unzip();
        Self {
            columns: Arc::from(columns),
            values,
        }
    }

    /// Column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order
    pub fn values(&self) -> &[CqlValue] {
        &self.values
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a value by column name
    pub fn get(&self, column: &str) -> Option<&CqlValue> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index)
    }

    /// Look up a value by position
    pub fn get_index(&self, index: usize) -> Option<&CqlValue> {
        self.values.get(index)
    }
}

/// Diagnostics attached to a result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionInfo {
    /// The coordinator that served the request
    pub queried_host: Option<String>,
    /// The trace session id, when tracing was enabled
    pub trace_id: Option<Uuid>,
    /// Server warnings
    pub warnings: Vec<String>,
}

/// A server-paginated result set
///
/// Rows of the current page are buffered locally. Reading never fetches;
/// [`fetch_more_results`](RawResultSet::fetch_more_results) appends the next
/// page to the buffer.
pub trait RawResultSet: Send + Sync {
    /// The applied flag of a conditional statement, `None` if not conditional
    fn was_applied(&self) -> Option<bool>;

    /// Whether every page has been received
    fn is_fully_fetched(&self) -> bool;

    /// Rows buffered locally
    fn available_without_fetching(&self) -> usize;

    /// Take the next buffered row
    fn next_row(&self) -> Option<Row>;

    /// Request the next page
    fn fetch_more_results(&self) -> BoxFuture<'static, Result<(), DriverError>>;

    /// Diagnostics of the request
    fn execution_info(&self) -> ExecutionInfo {
        ExecutionInfo::default()
    }
}

/// Cluster events that make cached statements and schema stale
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    /// A node came back up
    NodeUp(String),
    /// A node joined the cluster
    NodeAdded(String),
    /// A node left the cluster
    NodeRemoved(String),
    /// A keyspace or table definition changed
    SchemaChanged {
        /// The keyspace
        keyspace: String,
        /// The table, if the change was table-scoped
        table: Option<String>,
    },
}

impl fmt::Display for TopologyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyEvent::NodeUp(host) => write!(f, "node up: {}", host),
            TopologyEvent::NodeAdded(host) => write!(f, "node added: {}", host),
            TopologyEvent::NodeRemoved(host) => write!(f, "node removed: {}", host),
            TopologyEvent::SchemaChanged {
                keyspace,
                table: Some(table),
            } => write!(f, "schema changed: {}.{}", keyspace, table),
            TopologyEvent::SchemaChanged {
                keyspace,
                table: None,
            } => write!(f, "schema changed: {}", keyspace),
        }
    }
}

/// A CQL driver
#[async_trait]
pub trait CqlDriver: Send + Sync + 'static {
    /// Prepare a statement
    fn prepare(&self, query: &str) -> BoxFuture<'static, Result<PreparedHandle, DriverError>>;

    /// Execute a statement, returning its first page
    fn execute(
        &self,
        statement: DriverStatement,
    ) -> BoxFuture<'static, Result<Arc<dyn RawResultSet>, DriverError>>;

    /// Look up a table definition, `None` if the table does not exist
    async fn table_metadata(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<Option<TableMetadata>, DriverError>;

    /// Look up a user type definition, `None` if it does not exist
    async fn user_type(&self, keyspace: &str, name: &str)
        -> Result<Option<UserType>, DriverError>;

    /// Subscribe to topology events, if the driver publishes them
    fn topology_events(&self) -> Option<broadcast::Receiver<TopologyEvent>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup() {
        let row = Row::from_pairs([("id", CqlValue::Int(1)), ("name", CqlValue::Text("a".into()))]);

        assert_eq!(row.len(), 2);
        assert_eq!(row.get("name"), Some(&CqlValue::Text("a".into())));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.get_index(0), Some(&CqlValue::Int(1)));
        assert_eq!(row.columns(), ["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_driver_statement_accessors() {
        let handle = PreparedHandle::new(vec![1, 2], "SELECT * FROM t WHERE id = ?");
        let statement = DriverStatement::Prepared {
            handle,
            values: vec![CqlValue::Int(1)],
            options: StatementOptions::default(),
        };

        assert_eq!(statement.query(), Some("SELECT * FROM t WHERE id = ?"));
        assert_eq!(statement.values(), [CqlValue::Int(1)]);

        let batch = DriverStatement::Batch {
            batch_type: BatchType::Logged,
            statements: vec![statement],
            options: StatementOptions::default(),
        };
        assert_eq!(batch.query(), None);
        assert!(batch.values().is_empty());
    }

    #[test]
    fn test_topology_event_display() {
        let event = TopologyEvent::SchemaChanged {
            keyspace: "shop".into(),
            table: Some("users".into()),
        };
        assert_eq!(event.to_string(), "schema changed: shop.users");
    }
}
