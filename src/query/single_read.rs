use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::{session_of, Executable, QueryOptions, Selection};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::execution::ExecutionEngine;
use crate::interceptor::SingleReadData;
use crate::record::Record;
use crate::statement::StatementBuilder;
use crate::value::Value;

/// A read of the single row a full primary key identifies
///
/// Resolves to `None` when no row exists and fails with
/// [`TooManyResults`](crate::error::CqlError::TooManyResults) when the key
/// matches more than one.
#[derive(Debug, Clone)]
pub struct SingleReadQuery {
    ctx: ExecutionContext,
    keys: Vec<(String, Value)>,
    selection: Selection,
}

impl SingleReadQuery {
    pub(crate) fn new(ctx: ExecutionContext, keys: Vec<(String, Value)>) -> Self {
        Self {
            ctx,
            keys,
            selection: Selection::default(),
        }
    }

    /// Copy that selects a column
    #[must_use]
    pub fn column(&self, name: &str) -> Self {
        Self {
            selection: self.selection.with_column(name, false, false),
            ..self.clone()
        }
    }

    /// Copy that selects several columns
    #[must_use]
    pub fn columns<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut selection = self.selection.clone();
        for name in names {
            selection = selection.with_column(name, false, false);
        }
        Self {
            selection,
            ..self.clone()
        }
    }

    /// Copy that selects a column with its writetime and/or TTL
    #[must_use]
    pub fn column_with_metadata(&self, name: &str, writetime: bool, ttl: bool) -> Self {
        Self {
            selection: self.selection.with_column(name, writetime, ttl),
            ..self.clone()
        }
    }
}

impl QueryOptions for SingleReadQuery {
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

impl Executable for SingleReadQuery {
    type Output = Option<Record>;

    fn execute_async(&self) -> BoxFuture<'static, Result<Option<Record>>> {
        let query = self.clone();
        let engine = ExecutionEngine::new(session_of(&self.ctx));
        async move {
            let schema = query.ctx.session().table_schema(query.ctx.table()).await?;
            let data = query
                .ctx
                .interceptors()
                .single_read(SingleReadData {
                    key: query.keys.clone(),
                    columns: query.selection.columns.clone(),
                })
                .await?;
            let selection = Selection {
                columns: data.columns,
            };
            let read =
                StatementBuilder::new(&schema, query.ctx.spec()).select_single(&data.key, &selection)?;
            engine.read_single(&read).await
        }
        .boxed()
    }
}
