use std::collections::BTreeMap;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::{
    extend_column, session_of, Executable, KeySelector, Mutation, MutationOptions, QueryOptions,
};
use crate::context::ExecutionContext;
use crate::error::{CqlError, Result};
use crate::execution::ExecutionEngine;
use crate::interceptor::DeleteData;
use crate::query_builder::Clause;
use crate::record::MutationResult;
use crate::statement::{Statement, StatementBuilder};
use crate::value::Value;

/// A delete of rows, or of map entries when map values are named
#[derive(Debug, Clone)]
pub struct DeleteQuery {
    ctx: ExecutionContext,
    selector: KeySelector,
    map_removals: BTreeMap<String, Vec<Value>>,
    only_if: Vec<Clause>,
    if_exists: bool,
}

impl DeleteQuery {
    pub(crate) fn new(ctx: ExecutionContext, selector: KeySelector) -> Self {
        Self {
            ctx,
            selector,
            map_removals: BTreeMap::new(),
            only_if: Vec::new(),
            if_exists: false,
        }
    }

    /// Copy that deletes only the entry with a key of a map column
    #[must_use]
    pub fn remove_map_value(&self, name: &str, key: impl Into<Value>) -> Self {
        self.remove_map_values(name, [key])
    }

    /// Copy that deletes only the entries with keys of a map column
    #[must_use]
    pub fn remove_map_values<I, K>(&self, name: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Value>,
    {
        let mut query = self.clone();
        let items = keys.into_iter().map(Into::into).collect();
        extend_column(&mut query.map_removals, name, items, true);
        query
    }

    /// Copy that only applies when a condition holds
    ///
    /// Fails when the delete is already conditional on the row existing.
    pub fn only_if(&self, clause: Clause) -> Result<Self> {
        if self.if_exists {
            return Err(CqlError::invalid_state(
                "only if conditions cannot be combined with if exists",
            ));
        }
        let mut query = self.clone();
        query.only_if.push(clause);
        Ok(query)
    }

    /// Copy that only applies when the row exists
    ///
    /// Fails for deletes selected by where clauses or carrying only-if conditions.
    pub fn if_exists(&self) -> Result<Self> {
        if self.selector.is_where() {
            return Err(CqlError::invalid_state(
                "if exists cannot be combined with where conditions",
            ));
        }
        if !self.only_if.is_empty() {
            return Err(CqlError::invalid_state(
                "if exists cannot be combined with only if conditions",
            ));
        }
        Ok(Self {
            if_exists: true,
            ..self.clone()
        })
    }
}

impl QueryOptions for DeleteQuery {
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

impl MutationOptions for DeleteQuery {}

impl Mutation for DeleteQuery {
    fn execution_context(&self) -> &ExecutionContext {
        &self.ctx
    }

    fn build_statement(&self) -> BoxFuture<'static, Result<Statement>> {
        let query = self.clone();
        async move {
            let schema = query.ctx.session().table_schema(query.ctx.table()).await?;
            let data = query
                .ctx
                .interceptors()
                .delete(DeleteData {
                    selector: query.selector.clone(),
                    only_if: query.only_if.clone(),
                    if_exists: query.if_exists,
                })
                .await?;
            StatementBuilder::new(&schema, query.ctx.spec()).delete(
                &data.selector,
                &query.map_removals,
                &data.only_if,
                data.if_exists,
            )
        }
        .boxed()
    }
}

impl Executable for DeleteQuery {
    type Output = MutationResult;

    fn execute_async(&self) -> BoxFuture<'static, Result<MutationResult>> {
        let statement = self.build_statement();
        let engine = ExecutionEngine::new(session_of(&self.ctx));
        async move { engine.execute_mutation(&statement.await?).await }.boxed()
    }
}
