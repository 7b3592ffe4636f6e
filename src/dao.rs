//! Table-bound entry point
//!
//! A [`Dao`] binds a session to one table and hands out query
//! specifications. It is cheap to clone; execution parameters configured on
//! the dao become the defaults of every query it creates.
//!
//! # Example
//!
//! ```no_run
//! # async fn example(session: std::sync::Arc<cql_dao::session::DbSession>) -> cql_dao::error::Result<()> {
//! use cql_dao::dao::Dao;
//! use cql_dao::query::{Executable, QueryOptions};
//! use cql_dao::context::ConsistencyLevel;
//!
//! let users = Dao::new(session, "users").with_consistency(ConsistencyLevel::LocalQuorum);
//!
//! users.insert().value("id", 42).value("name", "x").execute_async().await?;
//! let record = users.read_with_key("id", 42).execute_async().await?;
//! assert!(record.is_some());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::interceptor::QueryInterceptor;
use crate::query::{
    DeleteQuery, InsertQuery, KeySelector, ListReadQuery, MutationOptions, QueryOptions,
    SingleReadQuery, WriteQuery,
};
use crate::query_builder::Clause;
use crate::session::DbSession;
use crate::value::Value;

/// Data access for one table
#[derive(Debug, Clone)]
pub struct Dao {
    ctx: ExecutionContext,
}

impl Dao {
    /// Bind a session to a table of its keyspace
    pub fn new(session: Arc<DbSession>, table: impl Into<String>) -> Self {
        Self {
            ctx: ExecutionContext::new(session, table),
        }
    }

    /// The table name
    pub fn table(&self) -> &str {
        self.ctx.table()
    }

    /// Copy whose queries pass through `interceptor` before their statements
    /// are built
    ///
    /// Interceptors run in registration order.
    #[must_use]
    pub fn with_interceptor(&self, interceptor: Arc<dyn QueryInterceptor>) -> Self {
        Self {
            ctx: self.ctx.with_interceptor(interceptor),
        }
    }

    /// Insert a row
    pub fn insert(&self) -> InsertQuery {
        InsertQuery::new(self.ctx.clone())
    }

    /// Update the row with a single-column key
    pub fn write_with_key(&self, name: impl Into<String>, value: impl Into<Value>) -> WriteQuery {
        self.write_with_keys([(name, value)])
    }

    /// Update the rows a compound key selects
    pub fn write_with_keys<I, K, V>(&self, keys: I) -> WriteQuery
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        WriteQuery::new(self.ctx.clone(), KeySelector::keys(keys))
    }

    /// Update the rows where clauses select
    pub fn write_where(&self, clauses: impl IntoIterator<Item = Clause>) -> WriteQuery {
        WriteQuery::new(self.ctx.clone(), KeySelector::clauses(clauses))
    }

    /// Delete the row with a single-column key
    pub fn delete_with_key(&self, name: impl Into<String>, value: impl Into<Value>) -> DeleteQuery {
        self.delete_with_keys([(name, value)])
    }

    /// Delete the rows a compound or partial key selects
    pub fn delete_with_keys<I, K, V>(&self, keys: I) -> DeleteQuery
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        DeleteQuery::new(self.ctx.clone(), KeySelector::keys(keys))
    }

    /// Delete the rows where clauses select
    pub fn delete_where(&self, clauses: impl IntoIterator<Item = Clause>) -> DeleteQuery {
        DeleteQuery::new(self.ctx.clone(), KeySelector::clauses(clauses))
    }

    /// Read the row with a single-column key
    pub fn read_with_key(&self, name: impl Into<String>, value: impl Into<Value>) -> SingleReadQuery {
        self.read_with_keys([(name, value)])
    }

    /// Read the row a full compound key identifies
    pub fn read_with_keys<I, K, V>(&self, keys: I) -> SingleReadQuery
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let keys = keys
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        SingleReadQuery::new(self.ctx.clone(), keys)
    }

    /// Read every row of a partition
    pub fn read_sequence_with_key(
        &self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> ListReadQuery {
        self.read_sequence_with_keys([(name, value)])
    }

    /// Read every row a partial key selects
    pub fn read_sequence_with_keys<I, K, V>(&self, keys: I) -> ListReadQuery
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        ListReadQuery::new(self.ctx.clone(), KeySelector::keys(keys))
    }

    /// Read every row where clauses select
    pub fn read_where(&self, clauses: impl IntoIterator<Item = Clause>) -> ListReadQuery {
        ListReadQuery::new(self.ctx.clone(), KeySelector::clauses(clauses))
    }

    /// Read every row of the table
    pub fn read_all(&self) -> ListReadQuery {
        ListReadQuery::new(self.ctx.clone(), KeySelector::Keys(Vec::new()))
    }
}

impl QueryOptions for Dao {
    fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    fn with_context(&self, context: ExecutionContext) -> Self {
        Self { ctx: context }
    }
}

impl MutationOptions for Dao {}
