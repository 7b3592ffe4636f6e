//! Immutable query specifications
//!
//! Every query type here is a value: configuration methods take `&self` and
//! return a new query, leaving the original untouched. A query becomes a
//! statement only when it is executed.
//!
//! # Example
//!
//! ```no_run
//! # async fn example(dao: cql_dao::dao::Dao) -> cql_dao::error::Result<()> {
//! use cql_dao::query::{Executable, MutationOptions};
//! use std::time::Duration;
//!
//! let insert = dao.insert().value("id", 42).value("name", "x");
//! let expiring = insert.with_ttl(Duration::from_secs(60)).if_not_exists();
//!
//! expiring.execute_async().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::batch::BatchMutationQuery;
use crate::context::{ConsistencyLevel, ExecutionContext, RetryPolicy};
use crate::error::Result;
use crate::query_builder::Clause;
use crate::session::DbSession;
use crate::statement::Statement;
use crate::value::Value;

mod counter;
mod delete;
mod insert;
mod list_read;
mod single_read;
mod write;

pub use counter::CounterMutationQuery;
pub use delete::DeleteQuery;
pub use insert::InsertQuery;
pub use list_read::{CountQuery, ListReadQuery};
pub use single_read::SingleReadQuery;
pub use write::WriteQuery;

/// How a query selects its rows
#[derive(Debug, Clone, PartialEq)]
pub enum KeySelector {
    /// Equality on key columns, executed as a prepared statement
    Keys(Vec<(String, Value)>),
    /// Arbitrary where clauses, executed with inlined literals
    Where(Vec<Clause>),
}

impl KeySelector {
    /// Equality on the given key columns
    pub fn keys<I, K, V>(keys: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        KeySelector::Keys(
            keys.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Where clauses
    pub fn clauses(clauses: impl IntoIterator<Item = Clause>) -> Self {
        KeySelector::Where(clauses.into_iter().collect())
    }

    /// Whether rows are selected by where clauses
    pub fn is_where(&self) -> bool {
        matches!(self, KeySelector::Where(_))
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            KeySelector::Keys(keys) => keys
                .iter()
                .map(|(k, v)| format!("{}={:?}", k, v))
                .collect::<Vec<_>>()
                .join(", "),
            KeySelector::Where(clauses) => clauses
                .iter()
                .map(|c| format!("{} {} {:?}", c.column(), c.relation(), c.value()))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

/// Value mutations of an update, kept per column and per operation
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Mutations {
    pub(crate) values: BTreeMap<String, Value>,
    pub(crate) set_add: BTreeMap<String, Vec<Value>>,
    pub(crate) set_remove: BTreeMap<String, Vec<Value>>,
    pub(crate) list_append: BTreeMap<String, Vec<Value>>,
    pub(crate) list_prepend: BTreeMap<String, Vec<Value>>,
    pub(crate) list_remove: BTreeMap<String, Vec<Value>>,
    pub(crate) map_put: BTreeMap<String, Vec<(Value, Value)>>,
    pub(crate) map_remove: BTreeMap<String, Vec<Value>>,
}

impl Mutations {
    pub(crate) fn has_collection_ops(&self) -> bool {
        !(self.set_add.is_empty()
            && self.set_remove.is_empty()
            && self.list_append.is_empty()
            && self.list_prepend.is_empty()
            && self.list_remove.is_empty()
            && self.map_put.is_empty()
            && self.map_remove.is_empty())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.values.is_empty() && !self.has_collection_ops()
    }
}

/// Append to a per-column list, skipping duplicates when `distinct`
pub(crate) fn extend_column(
    target: &mut BTreeMap<String, Vec<Value>>,
    column: &str,
    items: Vec<Value>,
    distinct: bool,
) {
    if items.is_empty() {
        return;
    }
    let entry = target.entry(column.to_string()).or_default();
    for item in items {
        if !distinct || !entry.contains(&item) {
            entry.push(item);
        }
    }
}

/// A selected column of a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedColumn {
    pub name: String,
    /// Also select `WRITETIME(name)`
    pub writetime: bool,
    /// Also select `TTL(name)`
    pub ttl: bool,
}

/// Explicit column selection; empty selects every column
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Selection {
    pub(crate) columns: Vec<SelectedColumn>,
}

impl Selection {
    pub(crate) fn with_column(&self, name: &str, writetime: bool, ttl: bool) -> Self {
        let mut columns = self.columns.clone();
        match columns.iter_mut().find(|c| c.name == name) {
            Some(column) => {
                column.writetime |= writetime;
                column.ttl |= ttl;
            }
            None => columns.push(SelectedColumn {
                name: name.to_string(),
                writetime,
                ttl,
            }),
        }
        Self { columns }
    }

    pub(crate) fn is_all(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Options of multi-row reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ReadOptions {
    pub(crate) limit: Option<i32>,
    pub(crate) allow_filtering: bool,
    pub(crate) fetch_size: Option<i32>,
    pub(crate) distinct: bool,
}

/// Execution parameters shared by every query
pub trait QueryOptions: Sized {
    /// The execution context
    fn context(&self) -> &ExecutionContext;

    /// Copy with another execution context
    #[must_use]
    fn with_context(&self, context: ExecutionContext) -> Self;

    /// Copy with a consistency level
    #[must_use]
    fn with_consistency(&self, level: ConsistencyLevel) -> Self {
        self.with_context(self.context().map_spec(|s| s.with_consistency(level)))
    }

    /// Copy with server-side request tracing enabled
    #[must_use]
    fn with_tracking(&self) -> Self {
        self.with_context(self.context().map_spec(|s| s.with_tracing(true)))
    }

    /// Copy with server-side request tracing disabled
    #[must_use]
    fn without_tracking(&self) -> Self {
        self.with_context(self.context().map_spec(|s| s.with_tracing(false)))
    }

    /// Copy with a retry policy
    #[must_use]
    fn with_retry_policy(&self, policy: RetryPolicy) -> Self {
        self.with_context(self.context().map_spec(|s| s.with_retry_policy(policy)))
    }
}

/// Execution parameters of mutations
///
/// Deletes ignore the TTL; counter updates ignore TTL and writetime.
pub trait MutationOptions: QueryOptions {
    /// Copy with a serial consistency level for conditional mutations
    #[must_use]
    fn with_serial_consistency(&self, level: ConsistencyLevel) -> Self {
        self.with_context(self.context().map_spec(|s| s.with_serial_consistency(level)))
    }

    /// Copy with a time to live for written cells
    #[must_use]
    fn with_ttl(&self, ttl: Duration) -> Self {
        self.with_context(self.context().map_spec(|s| s.with_ttl(ttl)))
    }

    /// Copy with an explicit writetime in microseconds since the Unix epoch
    #[must_use]
    fn with_writetime(&self, micros: i64) -> Self {
        self.with_context(self.context().map_spec(|s| s.with_writetime(micros)))
    }
}

/// A query that can be executed
pub trait Executable: QueryOptions + Send + Sync {
    /// The result of the execution
    type Output: Send + 'static;

    /// Execute on the session runtime
    fn execute_async(&self) -> BoxFuture<'static, Result<Self::Output>>;

    /// Execute and wait, bounded by the session's execute timeout
    ///
    /// Must not be called from a runtime worker thread.
    fn execute(&self) -> Result<Self::Output> {
        self.context().session().block_on(self.execute_async())
    }
}

/// A mutation that can take part in a batch
pub trait Mutation: Send + Sync + std::fmt::Debug {
    /// The context the mutation executes in
    fn execution_context(&self) -> &ExecutionContext;

    /// Build the statement of this mutation
    fn build_statement(&self) -> BoxFuture<'static, Result<Statement>>;

    /// Combine with another mutation into a logged batch
    fn combined_with<M>(&self, other: M) -> BatchMutationQuery
    where
        Self: Clone + Sized + 'static,
        M: Mutation + 'static,
    {
        BatchMutationQuery::new(vec![Arc::new(self.clone()), Arc::new(other)])
    }
}

pub(crate) fn session_of(context: &ExecutionContext) -> Arc<DbSession> {
    Arc::clone(context.session())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutations_is_empty() {
        let mut mutations = Mutations::default();
        assert!(mutations.is_empty());

        extend_column(&mut mutations.set_add, "tags", Vec::new(), true);
        assert!(mutations.is_empty());

        extend_column(&mut mutations.set_add, "tags", vec!["a".into(), "a".into()], true);
        assert!(mutations.has_collection_ops());
        assert_eq!(mutations.set_add["tags"], vec![Value::from("a")]);
    }

    #[test]
    fn test_extend_column_keeps_duplicates_for_lists() {
        let mut target = BTreeMap::new();
        extend_column(&mut target, "l", vec![1.into(), 1.into()], false);
        assert_eq!(target["l"].len(), 2);
    }

    #[test]
    fn test_selection_with_column() {
        let selection = Selection::default()
            .with_column("name", false, false)
            .with_column("name", true, false);

        assert_eq!(selection.columns.len(), 1);
        assert!(selection.columns[0].writetime);
        assert!(!selection.columns[0].ttl);
        assert!(Selection::default().is_all());
    }

    #[test]
    fn test_key_selector_describe() {
        let keys = KeySelector::keys([("id", 42)]);
        assert_eq!(keys.describe(), "id=Int(42)");
        assert!(!keys.is_where());

        let clauses = KeySelector::clauses([Clause::gt("age", 18)]);
        assert!(clauses.is_where());
    }
}
