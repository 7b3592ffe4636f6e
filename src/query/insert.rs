use std::collections::BTreeMap;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::{session_of, Executable, Mutation, MutationOptions, QueryOptions};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::execution::ExecutionEngine;
use crate::interceptor::InsertData;
use crate::record::MutationResult;
use crate::statement::{Statement, StatementBuilder};
use crate::types::ColumnRef;
use crate::value::{IntoColumnValue, Value};

/// An insert of one row
#[derive(Debug, Clone)]
pub struct InsertQuery {
    ctx: ExecutionContext,
    values: BTreeMap<String, Value>,
    if_not_exists: bool,
}

impl InsertQuery {
    pub(crate) fn new(ctx: ExecutionContext) -> Self {
        Self::with_values(ctx, BTreeMap::new())
    }

    pub(crate) fn with_values(ctx: ExecutionContext, values: BTreeMap<String, Value>) -> Self {
        Self {
            ctx,
            values,
            if_not_exists: false,
        }
    }

    /// Copy with a column value; an absent value leaves the query unchanged
    #[must_use]
    pub fn value(&self, name: impl Into<String>, value: impl IntoColumnValue) -> Self {
        match value.into_column_value().into_value() {
            Some(value) => {
                let mut query = self.clone();
                query.values.insert(name.into(), value);
                query
            }
            None => self.clone(),
        }
    }

    /// Copy with several column values
    #[must_use]
    pub fn values<I, K, V>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoColumnValue,
    {
        let mut query = self.clone();
        for (name, value) in values {
            if let Some(value) = value.into_column_value().into_value() {
                query.values.insert(name.into(), value);
            }
        }
        query
    }

    /// Copy with the value of a typed column
    #[must_use]
    pub fn value_of<T: Into<Value>>(&self, column: &ColumnRef<T>, value: T) -> Self {
        self.value(column.name(), value.into())
    }

    /// Copy that only inserts when no row with the key exists
    #[must_use]
    pub fn if_not_exists(&self) -> Self {
        Self {
            if_not_exists: true,
            ..self.clone()
        }
    }
}

impl QueryOptions for InsertQuery {
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

impl MutationOptions for InsertQuery {}

impl Mutation for InsertQuery {
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
                .insert(InsertData {
                    values: query.values.clone(),
                    if_not_exists: query.if_not_exists,
                })
                .await?;
            StatementBuilder::new(&schema, query.ctx.spec()).insert(&data.values, data.if_not_exists)
        }
        .boxed()
    }
}

impl Executable for InsertQuery {
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
    use std::time::Duration;

    use crate::error::{ConditionKind, CqlError};
    use crate::metadata::{ColumnMetadata, TableMetadata};
    use crate::replay::{ReplayDriver, ScriptedResponse};
    use crate::session::{DbSession, SessionConfig};
    use crate::types::CqlType;
    use crate::value::CqlValue;

    const NAME: ColumnRef<String> = ColumnRef::new("name");

    fn setup() -> (ReplayDriver, InsertQuery) {
        let driver = ReplayDriver::new();
        driver.add_table(TableMetadata::new(
            "shop",
            "users",
            [
                ColumnMetadata::partition_key("id", CqlType::Int),
                ColumnMetadata::regular("name", CqlType::Text),
                ColumnMetadata::regular("email", CqlType::Text),
            ],
        ));
        let session =
            DbSession::connect(Arc::new(driver.clone()), SessionConfig::new("shop")).unwrap();
        (driver, InsertQuery::new(ExecutionContext::new(session, "users")))
    }

    #[tokio::test]
    async fn test_absent_values_are_skipped() {
        let (driver, insert) = setup();
        let email: Option<&str> = None;

        insert
            .value("id", 1)
            .value("email", email)
            .value_of(&NAME, "x".to_string())
            .execute_async()
            .await
            .unwrap();

        let statement = driver.last_statement().unwrap();
        assert_eq!(
            statement.query(),
            Some("INSERT INTO shop.users (id, name) VALUES (?, ?)")
        );
        assert_eq!(
            statement.values(),
            [CqlValue::Int(1), CqlValue::Text("x".into())]
        );
    }

    #[tokio::test]
    async fn test_builders_leave_original_untouched() {
        let (driver, insert) = setup();
        let base = insert.value("id", 1);
        let _derived = base
            .value("name", "x")
            .if_not_exists()
            .with_ttl(Duration::from_secs(5));

        base.execute_async().await.unwrap();
        assert_eq!(
            driver.last_statement().unwrap().query(),
            Some("INSERT INTO shop.users (id) VALUES (?)")
        );
    }

    #[tokio::test]
    async fn test_if_not_exists_not_applied() {
        let (driver, insert) = setup();
        let insert = insert.values([("id", 1)]).if_not_exists();

        driver.push_response(ScriptedResponse::applied(false));
        let err = insert.execute_async().await.unwrap_err();
        assert!(matches!(
            err,
            CqlError::ConditionNotMet(ConditionKind::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_unknown_column_fails_before_execution() {
        let (driver, insert) = setup();

        let err = insert.value("nme", "x").execute_async().await.unwrap_err();
        assert!(matches!(err, CqlError::SchemaMismatch(_)));
        assert!(driver.transcript().is_empty());
    }
}
