//! Executing statements
//!
//! The [`ExecutionEngine`] turns built statements into driver statements,
//! preparing them through the session's statement cache, and interprets the
//! results: conditional outcomes, the single-row contract of keyed reads and
//! count results.

use std::sync::Arc;

use crate::batch::BatchType;
use crate::driver::{DriverStatement, RawResultSet, Row, StatementOptions};
use crate::error::{CqlError, Result};
use crate::record::{MutationResult, Record};
use crate::session::DbSession;
use crate::statement::{Conditional, KeyedRead, Statement, StatementKind};
use crate::stream::RecordStream;
use crate::types::FromCqlValue;

/// Fail with [`CqlError::ConditionNotMet`] when a conditional statement was not applied
pub fn check_applied(condition: Conditional, applied: Option<bool>) -> Result<()> {
    match (condition.failure_kind(), applied) {
        (Some(kind), Some(false)) => Err(CqlError::ConditionNotMet(kind)),
        _ => Ok(()),
    }
}

/// Executes statements against a session
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    session: Arc<DbSession>,
}

impl ExecutionEngine {
    /// Create an engine for a session
    pub fn new(session: Arc<DbSession>) -> Self {
        Self { session }
    }

    /// The session
    pub fn session(&self) -> &Arc<DbSession> {
        &self.session
    }

    /// Prepare (through the cache) and bind a statement
    pub async fn to_driver_statement(&self, statement: &Statement) -> Result<DriverStatement> {
        let options = statement.options().clone();
        match statement.kind() {
            StatementKind::Prepared { query, values } => {
                let handle = self.session.prepare(query).await?;
                Ok(DriverStatement::Prepared {
                    handle,
                    values: values.clone(),
                    options,
                })
            }
            StatementKind::Simple { query } => Ok(DriverStatement::Simple {
                query: query.clone(),
                options,
            }),
        }
    }

    /// Execute a statement, returning its first page
    pub async fn execute(&self, statement: &Statement) -> Result<Arc<dyn RawResultSet>> {
        let driver_statement = self.to_driver_statement(statement).await?;
        self.session.execute(driver_statement).await
    }

    /// Execute a mutation and check its condition
    pub async fn execute_mutation(&self, statement: &Statement) -> Result<MutationResult> {
        let result = self.execute(statement).await?;
        check_applied(statement.condition(), result.was_applied())?;
        Ok(MutationResult::new(
            result.was_applied().unwrap_or(true),
            result.execution_info(),
        ))
    }

    /// Execute mutations as one batch
    ///
    /// Any unmet condition fails the whole batch.
    pub async fn execute_batch(
        &self,
        batch_type: BatchType,
        statements: &[Statement],
        mut options: StatementOptions,
    ) -> Result<MutationResult> {
        if statements.is_empty() {
            return Err(CqlError::invalid_state("batch without any statements"));
        }

        let mut members = Vec::with_capacity(statements.len());
        for statement in statements {
            members.push(self.to_driver_statement(statement).await?);
        }

        let condition = statements
            .iter()
            .map(Statement::condition)
            .find(Conditional::is_conditional)
            .unwrap_or(Conditional::Unconditional);
        if !condition.is_conditional() {
            options.serial_consistency = None;
        }

        let result = self
            .session
            .execute(DriverStatement::Batch {
                batch_type,
                statements: members,
                options,
            })
            .await?;
        check_applied(condition, result.was_applied())?;
        Ok(MutationResult::new(
            result.was_applied().unwrap_or(true),
            result.execution_info(),
        ))
    }

    /// Read the single row a full key identifies
    ///
    /// No row reads as `None`; more than one row is [`CqlError::TooManyResults`].
    /// Key columns of the returned row must carry exactly the bytes that were
    /// sent, otherwise the row belongs to another request and
    /// [`CqlError::ProtocolError`] is returned.
    pub async fn read_single(&self, read: &KeyedRead) -> Result<Option<Record>> {
        let result = self.execute(&read.statement).await?;

        let Some(row) = self.next_row(&result).await? else {
            return Ok(None);
        };
        if self.next_row(&result).await?.is_some() {
            return Err(CqlError::TooManyResults(format!(
                "key {} ({})",
                describe_key(read),
                read.statement.query()
            )));
        }

        for (column, sent) in &read.key {
            let received = row.get(column);
            if received.and_then(|v| v.to_bytes()) != sent.to_bytes() {
                tracing::warn!(
                    statement = %read.statement.query(),
                    column = %column,
                    sent = %sent,
                    received = ?received,
                    "returned row does not match the requested key"
                );
                return Err(CqlError::ProtocolError(format!(
                    "key column '{}' of the returned row does not match the requested key {}",
                    column,
                    describe_key(read)
                )));
            }
        }

        Ok(Some(Record::new(row, Arc::new(result.execution_info()))))
    }

    /// Execute a read and stream its rows
    pub async fn read_list(&self, statement: &Statement) -> Result<RecordStream> {
        let result = self.execute(statement).await?;
        Ok(RecordStream::new(result, Arc::clone(&self.session)))
    }

    /// Execute a count and read its result
    pub async fn read_count(&self, statement: &Statement) -> Result<i64> {
        let result = self.execute(statement).await?;
        let row = self
            .next_row(&result)
            .await?
            .ok_or_else(|| CqlError::ProtocolError("count returned no row".into()))?;
        let value = row
            .get("count")
            .or_else(|| row.get_index(0))
            .ok_or_else(|| CqlError::ProtocolError("count returned no value".into()))?;
        i64::from_cql(value).map_err(|message| CqlError::decode("count", message))
    }

    /// The next row, fetching pages until one arrives or the result is exhausted
    async fn next_row(&self, result: &Arc<dyn RawResultSet>) -> Result<Option<Row>> {
        loop {
            if let Some(row) = result.next_row() {
                return Ok(Some(row));
            }
            if result.is_fully_fetched() {
                return Ok(None);
            }
            self.session
                .bridge()
                .bridge(result.fetch_more_results())
                .await?;
        }
    }
}

fn describe_key(read: &KeyedRead) -> String {
    read.key
        .iter()
        .map(|(column, value)| format!("{}={}", column, value))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionSpec;
    use crate::driver::ExecutionInfo;
    use crate::error::{ConditionKind, DriverError};
    use crate::metadata::{ColumnMetadata, TableMetadata};
    use crate::query::Selection;
    use crate::replay::{ReplayDriver, ScriptedResponse};
    use crate::session::SessionConfig;
    use crate::statement::StatementBuilder;
    use crate::types::CqlType;
    use crate::value::{CqlValue, Value};

    fn driver() -> ReplayDriver {
        let driver = ReplayDriver::new();
        driver.add_table(TableMetadata::new(
            "shop",
            "users",
            [
                ColumnMetadata::partition_key("id", CqlType::Int),
                ColumnMetadata::regular("name", CqlType::Text),
            ],
        ));
        driver
    }

    async fn engine(driver: &ReplayDriver) -> ExecutionEngine {
        let session =
            DbSession::connect(Arc::new(driver.clone()), SessionConfig::new("shop")).unwrap();
        ExecutionEngine::new(session)
    }

    async fn keyed_read(engine: &ExecutionEngine, id: i32) -> KeyedRead {
        let schema = engine.session().table_schema("users").await.unwrap();
        let spec = ExecutionSpec::default();
        StatementBuilder::new(&schema, &spec)
            .select_single(&[("id".to_string(), Value::Int(id))], &Selection::default())
            .unwrap()
    }

    fn user(id: i32, name: &str) -> Row {
        Row::from_pairs([
            ("id", CqlValue::Int(id)),
            ("name", CqlValue::Text(name.into())),
        ])
    }

    #[test]
    fn test_check_applied() {
        assert!(check_applied(Conditional::Unconditional, Some(false)).is_ok());
        assert!(check_applied(Conditional::IfNotExists, Some(true)).is_ok());
        assert!(check_applied(Conditional::IfNotExists, None).is_ok());
        assert!(matches!(
            check_applied(Conditional::IfNotExists, Some(false)),
            Err(CqlError::ConditionNotMet(ConditionKind::AlreadyExists))
        ));
        assert!(matches!(
            check_applied(Conditional::OnlyIf, Some(false)),
            Err(CqlError::ConditionNotMet(ConditionKind::ConditionMismatch))
        ));
        assert!(matches!(
            check_applied(Conditional::IfExists, Some(false)),
            Err(CqlError::ConditionNotMet(ConditionKind::ConditionMismatch))
        ));
    }

    #[tokio::test]
    async fn test_read_single_zero_one_two_rows() {
        let driver = driver();
        let engine = engine(&driver).await;
        let read = keyed_read(&engine, 1).await;

        driver.push_response(ScriptedResponse::empty());
        assert!(engine.read_single(&read).await.unwrap().is_none());

        driver.push_response(ScriptedResponse::rows(vec![user(1, "a")]));
        let record = engine.read_single(&read).await.unwrap().unwrap();
        assert_eq!(record.get::<String>("name").unwrap(), Some("a".to_string()));

        driver.push_response(ScriptedResponse::rows(vec![user(1, "a"), user(1, "b")]));
        assert!(matches!(
            engine.read_single(&read).await,
            Err(CqlError::TooManyResults(_))
        ));
    }

    #[tokio::test]
    async fn test_read_single_fetches_past_empty_pages() {
        let driver = driver();
        let engine = engine(&driver).await;
        let read = keyed_read(&engine, 1).await;

        driver.push_response(ScriptedResponse::pages(vec![vec![], vec![], vec![user(1, "a")]]));
        assert!(engine.read_single(&read).await.unwrap().is_some());

        driver.push_response(ScriptedResponse::pages(vec![vec![user(1, "a")], vec![user(1, "b")]]));
        assert!(matches!(
            engine.read_single(&read).await,
            Err(CqlError::TooManyResults(_))
        ));
    }

    #[tokio::test]
    async fn test_read_single_key_mismatch() {
        let driver = driver();
        let engine = engine(&driver).await;
        let read = keyed_read(&engine, 1).await;

        driver.push_response(ScriptedResponse::rows(vec![user(2, "other")]));
        assert!(matches!(
            engine.read_single(&read).await,
            Err(CqlError::ProtocolError(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_mutation_condition() {
        let driver = driver();
        let engine = engine(&driver).await;
        let schema = engine.session().table_schema("users").await.unwrap();
        let spec = ExecutionSpec::default();
        let statement = StatementBuilder::new(&schema, &spec)
            .insert(
                &[("id".to_string(), Value::Int(1))].into_iter().collect(),
                true,
            )
            .unwrap();

        driver.push_response(ScriptedResponse::applied(true).with_info(ExecutionInfo {
            queried_host: Some("10.0.0.2".into()),
            ..ExecutionInfo::default()
        }));
        let result = engine.execute_mutation(&statement).await.unwrap();
        assert!(result.was_applied());
        assert_eq!(
            result.execution_info().queried_host.as_deref(),
            Some("10.0.0.2")
        );

        driver.push_response(ScriptedResponse::applied(false));
        let err = engine.execute_mutation(&statement).await.unwrap_err();
        assert_eq!(err.condition_kind(), Some(ConditionKind::AlreadyExists));
    }

    #[tokio::test]
    async fn test_prepared_statements_are_cached() {
        let driver = driver();
        let engine = engine(&driver).await;
        let read = keyed_read(&engine, 1).await;

        engine.read_single(&read).await.unwrap();
        engine.read_single(&read).await.unwrap();

        assert_eq!(driver.prepare_count(), 1);
        match driver.last_statement().unwrap() {
            DriverStatement::Prepared { handle, values, .. } => {
                assert_eq!(handle.query(), "SELECT * FROM shop.users WHERE id = ?");
                assert_eq!(values, vec![CqlValue::Int(1)]);
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_count() {
        let driver = driver();
        let engine = engine(&driver).await;
        let schema = engine.session().table_schema("users").await.unwrap();
        let spec = ExecutionSpec::default();
        let statement = StatementBuilder::new(&schema, &spec)
            .count(&crate::query::KeySelector::Keys(Vec::new()), &Default::default())
            .unwrap();

        driver.push_response(ScriptedResponse::rows(vec![Row::from_pairs([(
            "count",
            CqlValue::BigInt(7),
        )])]));
        assert_eq!(engine.read_count(&statement).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let driver = driver();
        let engine = engine(&driver).await;
        let read = keyed_read(&engine, 1).await;

        driver.push_response(ScriptedResponse::failure(DriverError::execution(
            "wrapped",
            DriverError::InvalidQuery("unconfigured table users".into()),
        )));
        let err = engine.read_single(&read).await.unwrap_err();

        assert!(matches!(
            err,
            CqlError::TransportFailure(DriverError::InvalidQuery(_))
        ));
        assert!(engine.session().statement_cache().is_empty());
        assert_eq!(engine.session().catalog().cached_tables(), 0);
    }
}
