use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::{session_of, Executable, KeySelector, QueryOptions, ReadOptions, Selection};
use crate::context::ExecutionContext;
use crate::error::{CqlError, Result};
use crate::execution::ExecutionEngine;
use crate::interceptor::{Interceptors, ListReadData};
use crate::statement::StatementBuilder;
use crate::stream::RecordStream;

/// A read of every row a partial key or where clauses select
#[derive(Debug, Clone)]
pub struct ListReadQuery {
    ctx: ExecutionContext,
    selector: KeySelector,
    selection: Selection,
    read: ReadOptions,
}

impl ListReadQuery {
    pub(crate) fn new(ctx: ExecutionContext, selector: KeySelector) -> Self {
        Self {
            ctx,
            selector,
            selection: Selection::default(),
            read: ReadOptions::default(),
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

    /// Copy that returns at most `limit` rows
    ///
    /// Fails for a limit that is not positive.
    pub fn with_limit(&self, limit: i32) -> Result<Self> {
        if limit <= 0 {
            return Err(CqlError::invalid_state(format!(
                "limit must be positive, got {}",
                limit
            )));
        }
        let mut query = self.clone();
        query.read.limit = Some(limit);
        Ok(query)
    }

    /// Copy that lets the server filter on non-key columns
    #[must_use]
    pub fn with_allow_filtering(&self) -> Self {
        let mut query = self.clone();
        query.read.allow_filtering = true;
        query
    }

    /// Copy that fetches `size` rows per page
    ///
    /// Fails for a size that is not positive.
    pub fn with_fetch_size(&self, size: i32) -> Result<Self> {
        if size <= 0 {
            return Err(CqlError::invalid_state(format!(
                "fetch size must be positive, got {}",
                size
            )));
        }
        let mut query = self.clone();
        query.read.fetch_size = Some(size);
        Ok(query)
    }

    /// Copy that selects distinct partition keys
    #[must_use]
    pub fn with_distinct(&self) -> Self {
        let mut query = self.clone();
        query.read.distinct = true;
        query
    }

    /// Count the selected rows instead of fetching them
    pub fn count(&self) -> CountQuery {
        CountQuery {
            ctx: self.ctx.clone(),
            selector: self.selector.clone(),
            read: self.read.clone(),
        }
    }
}

impl QueryOptions for ListReadQuery {
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

impl Executable for ListReadQuery {
    type Output = RecordStream;

    fn execute_async(&self) -> BoxFuture<'static, Result<RecordStream>> {
        let query = self.clone();
        let engine = ExecutionEngine::new(session_of(&self.ctx));
        async move {
            let schema = query.ctx.session().table_schema(query.ctx.table()).await?;
            let (selector, selection, read) = intercept(
                query.ctx.interceptors(),
                &query.selector,
                &query.selection,
                &query.read,
            )
            .await?;
            let statement =
                StatementBuilder::new(&schema, query.ctx.spec()).select(&selector, &selection, &read)?;
            engine.read_list(&statement).await
        }
        .boxed()
    }
}

/// Run the list read hooks over a read's request data
async fn intercept(
    interceptors: &Interceptors,
    selector: &KeySelector,
    selection: &Selection,
    read: &ReadOptions,
) -> Result<(KeySelector, Selection, ReadOptions)> {
    let data = interceptors
        .list_read(ListReadData {
            selector: selector.clone(),
            columns: selection.columns.clone(),
            limit: read.limit,
            allow_filtering: read.allow_filtering,
            fetch_size: read.fetch_size,
            distinct: read.distinct,
        })
        .await?;
    let read = ReadOptions {
        limit: data.limit,
        allow_filtering: data.allow_filtering,
        fetch_size: data.fetch_size,
        distinct: data.distinct,
    };
    Ok((
        data.selector,
        Selection {
            columns: data.columns,
        },
        read,
    ))
}

/// A count of the rows a read selects
#[derive(Debug, Clone)]
pub struct CountQuery {
    ctx: ExecutionContext,
    selector: KeySelector,
    read: ReadOptions,
}

impl QueryOptions for CountQuery {
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

impl Executable for CountQuery {
    type Output = i64;

    fn execute_async(&self) -> BoxFuture<'static, Result<i64>> {
        let query = self.clone();
        let engine = ExecutionEngine::new(session_of(&self.ctx));
        async move {
            let schema = query.ctx.session().table_schema(query.ctx.table()).await?;
            let (selector, _, read) = intercept(
                query.ctx.interceptors(),
                &query.selector,
                &Selection::default(),
                &query.read,
            )
            .await?;
            let statement = StatementBuilder::new(&schema, query.ctx.spec()).count(&selector, &read)?;
            engine.read_count(&statement).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures_util::StreamExt;

    use crate::driver::Row;
    use crate::metadata::{ColumnMetadata, TableMetadata};
    use crate::query_builder::Clause;
    use crate::replay::{ReplayDriver, ScriptedResponse};
    use crate::session::{DbSession, SessionConfig};
    use crate::types::CqlType;
    use crate::value::CqlValue;

    fn setup() -> (ReplayDriver, ExecutionContext) {
        let driver = ReplayDriver::new();
        driver.add_table(TableMetadata::new(
            "shop",
            "orders",
            [
                ColumnMetadata::partition_key("customer", CqlType::Int),
                ColumnMetadata::clustering("seq", CqlType::Int),
                ColumnMetadata::regular("total", CqlType::Double),
            ],
        ));
        let session =
            DbSession::connect(Arc::new(driver.clone()), SessionConfig::new("shop")).unwrap();
        (driver, ExecutionContext::new(session, "orders"))
    }

    fn order(seq: i32) -> Row {
        Row::from_pairs([
            ("customer", CqlValue::Int(1)),
            ("seq", CqlValue::Int(seq)),
            ("total", CqlValue::Double(f64::from(seq))),
        ])
    }

    #[tokio::test]
    async fn test_list_read_pages() {
        let (driver, ctx) = setup();
        driver.push_response(ScriptedResponse::paged((1..=5).map(order).collect(), 2));

        let stream = ListReadQuery::new(ctx, KeySelector::keys([("customer", 1)]))
            .with_fetch_size(2)
            .unwrap()
            .execute_async()
            .await
            .unwrap();
        let seqs: Vec<i32> = stream
            .map(|record| record.unwrap().get::<i32>("seq").unwrap().unwrap())
            .collect()
            .await;

        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(driver.fetch_count(), 2);
        let transcript = driver.transcript();
        let first = &transcript[0];
        assert_eq!(
            first.query(),
            Some("SELECT * FROM shop.orders WHERE customer = ?")
        );
        assert_eq!(first.options().fetch_size, Some(2));
    }

    #[tokio::test]
    async fn test_read_options() {
        let (driver, ctx) = setup();

        ListReadQuery::new(ctx, KeySelector::clauses([Clause::gt("total", 10.5)]))
            .column("seq")
            .with_limit(10)
            .unwrap()
            .with_allow_filtering()
            .execute_async()
            .await
            .unwrap();

        assert_eq!(
            driver.last_statement().unwrap().query(),
            Some("SELECT seq FROM shop.orders WHERE total > 10.5 LIMIT 10 ALLOW FILTERING")
        );
    }

    #[tokio::test]
    async fn test_invalid_limit() {
        let (_driver, ctx) = setup();
        let read = ListReadQuery::new(ctx, KeySelector::keys([("customer", 1)]));

        assert!(matches!(read.with_limit(0), Err(CqlError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_invalid_fetch_size() {
        let (driver, ctx) = setup();
        let read = ListReadQuery::new(ctx, KeySelector::keys([("customer", 1)]));

        assert!(matches!(read.with_fetch_size(0), Err(CqlError::InvalidState(_))));
        assert!(matches!(read.with_fetch_size(-1), Err(CqlError::InvalidState(_))));

        read.with_fetch_size(1).unwrap().execute_async().await.unwrap();
        assert_eq!(driver.last_statement().unwrap().options().fetch_size, Some(1));
    }

    #[tokio::test]
    async fn test_count() {
        let (driver, ctx) = setup();
        driver.push_response(ScriptedResponse::rows(vec![Row::from_pairs([(
            "count",
            CqlValue::BigInt(3),
        )])]));

        let count = ListReadQuery::new(ctx, KeySelector::keys([("customer", 1)]))
            .count()
            .execute_async()
            .await
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(
            driver.last_statement().unwrap().query(),
            Some("SELECT count(*) FROM shop.orders WHERE customer = ?")
        );
    }
}
