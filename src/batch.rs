//! Batches of mutations
//!
//! A [`BatchMutationQuery`] is an ordered list of mutations sent as one
//! `BEGIN BATCH ... APPLY BATCH` request. The batch type mirrors the CQL
//! variants:
//!
//! - [`BatchType::Logged`]: written to the batch log first, all or nothing
//! - [`BatchType::Unlogged`]: no batch log
//! - [`BatchType::Counter`]: counter updates only
//!
//! When any member is conditional the batch becomes a lightweight
//! transaction, and a single unmet condition fails the whole batch.
//!
//! # Example
//!
//! ```no_run
//! # async fn example(dao: cql_dao::dao::Dao) -> cql_dao::error::Result<()> {
//! use cql_dao::query::{Executable, Mutation};
//!
//! let create = dao.insert().value("id", 1).value("name", "x");
//! let audit = dao.write_with_key("id", 2).value("name", "y");
//!
//! create.combined_with(audit).with_unlogged_batch_type().execute_async().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::context::{ConsistencyLevel, ExecutionContext};
use crate::error::Result;
use crate::execution::ExecutionEngine;
use crate::query::{Executable, Mutation, QueryOptions};
use crate::record::MutationResult;

/// The kind of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BatchType {
    /// Atomic through the batch log
    #[default]
    Logged,
    /// No batch log
    Unlogged,
    /// Counter updates
    Counter,
}

impl BatchType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchType::Logged => "BEGIN BATCH",
            BatchType::Unlogged => "BEGIN UNLOGGED BATCH",
            BatchType::Counter => "BEGIN COUNTER BATCH",
        }
    }
}

impl fmt::Display for BatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered batch of mutations
///
/// Executes in the context of its first member unless reconfigured.
#[derive(Debug, Clone)]
pub struct BatchMutationQuery {
    ctx: ExecutionContext,
    batch_type: BatchType,
    mutations: Vec<Arc<dyn Mutation>>,
}

impl BatchMutationQuery {
    pub(crate) fn new(mutations: Vec<Arc<dyn Mutation>>) -> Self {
        let ctx = mutations[0].execution_context().clone();
        Self {
            ctx,
            batch_type: BatchType::default(),
            mutations,
        }
    }

    /// Copy with another mutation appended
    #[must_use]
    pub fn combined_with<M: Mutation + 'static>(&self, other: M) -> Self {
        let mut batch = self.clone();
        batch.mutations.push(Arc::new(other));
        batch
    }

    /// The batch type
    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    /// Copy as a logged batch
    #[must_use]
    pub fn with_logged_batch_type(&self) -> Self {
        self.with_batch_type(BatchType::Logged)
    }

    /// Copy as an unlogged batch
    #[must_use]
    pub fn with_unlogged_batch_type(&self) -> Self {
        self.with_batch_type(BatchType::Unlogged)
    }

    /// Copy as a counter batch
    #[must_use]
    pub fn with_counter_batch_type(&self) -> Self {
        self.with_batch_type(BatchType::Counter)
    }

    /// Copy with a serial consistency level, used when a member is conditional
    #[must_use]
    pub fn with_serial_consistency(&self, level: ConsistencyLevel) -> Self {
        self.with_context(self.ctx.map_spec(|s| s.with_serial_consistency(level)))
    }

    fn with_batch_type(&self, batch_type: BatchType) -> Self {
        Self {
            batch_type,
            ..self.clone()
        }
    }

    /// Number of mutations
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Check if the batch has no mutations
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

impl QueryOptions for BatchMutationQuery {
    fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    fn with_context(&self, context: ExecutionContext) -> Self {
        Self {
            ctx: context,
            ..self.clone()
        }
    }
}

impl Executable for BatchMutationQuery {
    type Output = MutationResult;

    fn execute_async(&self) -> BoxFuture<'static, Result<MutationResult>> {
        let builds: Vec<_> = self.mutations.iter().map(|m| m.build_statement()).collect();
        let engine = ExecutionEngine::new(Arc::clone(self.ctx.session()));
        let batch_type = self.batch_type;
        let options = self.ctx.spec().statement_options(true);

        async move {
            let mut statements = Vec::with_capacity(builds.len());
            for build in builds {
                statements.push(build.await?);
            }
            tracing::debug!(%batch_type, statements = statements.len(), "executing batch");
            engine.execute_batch(batch_type, &statements, options).await
        }
        .boxed()
    }
}
