use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::{session_of, Executable, KeySelector, Mutation, QueryOptions};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::execution::ExecutionEngine;
use crate::record::MutationResult;
use crate::statement::{Statement, StatementBuilder};

/// An increment or decrement of a counter column
///
/// Counter updates carry no TTL or writetime and cannot be conditional.
#[derive(Debug, Clone)]
pub struct CounterMutationQuery {
    ctx: ExecutionContext,
    selector: KeySelector,
    column: String,
    diff: i64,
}

impl CounterMutationQuery {
    pub(crate) fn new(
        ctx: ExecutionContext,
        selector: KeySelector,
        column: impl Into<String>,
        diff: i64,
    ) -> Self {
        Self {
            ctx,
            selector,
            column: column.into(),
            diff,
        }
    }

    /// The counter column
    pub fn column(&self) -> &str {
        &self.column
    }

    /// The signed amount added to the counter
    pub fn diff(&self) -> i64 {
        self.diff
    }
}

impl QueryOptions for CounterMutationQuery {
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

impl Mutation for CounterMutationQuery {
    fn execution_context(&self) -> &ExecutionContext {
        &self.ctx
    }

    fn build_statement(&self) -> BoxFuture<'static, Result<Statement>> {
        let query = self.clone();
        async move {
            let schema = query.ctx.session().table_schema(query.ctx.table()).await?;
            StatementBuilder::new(&schema, query.ctx.spec()).counter(
                &query.selector,
                &query.column,
                query.diff,
            )
        }
        .boxed()
    }
}

impl Executable for CounterMutationQuery {
    type Output = MutationResult;

    fn execute_async(&self) -> BoxFuture<'static, Result<MutationResult>> {
        let statement = self.build_statement();
        let engine = ExecutionEngine::new(session_of(&self.ctx));
        async move { engine.execute_mutation(&statement.await?).await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::error::CqlError;
    use crate::metadata::{ColumnMetadata, TableMetadata};
    use crate::replay::ReplayDriver;
    use crate::session::{DbSession, SessionConfig};
    use crate::types::CqlType;
    use crate::value::CqlValue;

    fn context(driver: &ReplayDriver) -> ExecutionContext {
        driver.add_table(TableMetadata::new(
            "shop",
            "page_views",
            [
                ColumnMetadata::partition_key("page", CqlType::Text),
                ColumnMetadata::regular("views", CqlType::Counter),
                ColumnMetadata::regular("title", CqlType::Text),
            ],
        ));
        let session =
            DbSession::connect(Arc::new(driver.clone()), SessionConfig::new("shop")).unwrap();
        ExecutionContext::new(session, "page_views")
    }

    #[tokio::test]
    async fn test_increment() {
        let driver = ReplayDriver::new();
        let ctx = context(&driver);

        let result = CounterMutationQuery::new(ctx, KeySelector::keys([("page", "/")]), "views", 5)
            .execute_async()
            .await
            .unwrap();

        assert!(result.was_applied());
        let statement = driver.last_statement().unwrap();
        assert_eq!(
            statement.query(),
            Some("UPDATE shop.page_views SET views = views + ? WHERE page = ?")
        );
        assert_eq!(
            statement.values(),
            [CqlValue::Counter(5), CqlValue::Text("/".into())]
        );
    }

    #[tokio::test]
    async fn test_non_counter_column() {
        let driver = ReplayDriver::new();
        let ctx = context(&driver);

        let err = CounterMutationQuery::new(ctx, KeySelector::keys([("page", "/")]), "title", 1)
            .execute_async()
            .await
            .unwrap_err();

        assert!(matches!(err, CqlError::SchemaMismatch(_)));
        assert!(driver.transcript().is_empty());
    }
}
