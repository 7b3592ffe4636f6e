mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cql_dao::interceptor::{DeleteData, InsertData, ListReadData, SingleReadData, UpdateData};
use cql_dao::prelude::*;
use cql_dao::query::KeySelector;
use cql_dao::replay::ScriptedResponse;
use cql_dao::value::CqlValue;
use futures_util::StreamExt;

use common::{user, users, users_dao, users_driver};

/// Reads and writes every user through a fixed sequence number
struct PinnedSeq(i32);

impl PinnedSeq {
    fn pin(&self, key: &mut [(String, Value)]) {
        for (name, value) in key.iter_mut() {
            if name == "seq" {
                *value = Value::Int(self.0);
            }
        }
    }
}

#[async_trait]
impl QueryInterceptor for PinnedSeq {
    async fn on_single_read(&self, mut data: SingleReadData) -> Result<SingleReadData> {
        self.pin(&mut data.key);
        Ok(data)
    }

    async fn on_insert(&self, mut data: InsertData) -> Result<InsertData> {
        data.values.insert("seq".to_string(), Value::Int(self.0));
        Ok(data)
    }
}

/// Refuses unkeyed deletes and unbounded reads
#[derive(Default)]
struct Guard {
    seen: AtomicUsize,
}

#[async_trait]
impl QueryInterceptor for Guard {
    async fn on_list_read(&self, data: ListReadData) -> Result<ListReadData> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        let unkeyed = matches!(&data.selector, KeySelector::Keys(keys) if keys.is_empty());
        if data.limit.is_none() && unkeyed {
            return Err(CqlError::invalid_state("unbounded read refused"));
        }
        Ok(data)
    }

    async fn on_delete(&self, data: DeleteData) -> Result<DeleteData> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        if data.selector.is_where() {
            return Err(CqlError::invalid_state("where delete refused"));
        }
        Ok(data)
    }
}

/// Adds a version condition to every update
struct Versioned;

#[async_trait]
impl QueryInterceptor for Versioned {
    async fn on_update(&self, mut data: UpdateData) -> Result<UpdateData> {
        data.only_if.push(Clause::eq("version", 1));
        Ok(data)
    }
}

#[tokio::test]
async fn test_interceptor_rewrites_key_and_values() {
    let driver = users_driver();
    let dao = users_dao(&driver).with_interceptor(Arc::new(PinnedSeq(9)));

    dao.insert()
        .value("id", 1)
        .value("seq", 1)
        .value("name", "x")
        .execute_async()
        .await
        .unwrap();
    let statement = driver.last_statement().unwrap();
    assert_eq!(
        statement.query(),
        Some("INSERT INTO shop.users (id, name, seq) VALUES (?, ?, ?)")
    );
    assert_eq!(statement.values()[2], CqlValue::Int(9));

    driver.push_response(ScriptedResponse::rows(vec![user(1, 9)]));
    let record = dao
        .read_with_keys([("id", 1), ("seq", 1)])
        .execute_async()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.get::<i32>("seq").unwrap(), Some(9));
    assert_eq!(
        driver.last_statement().unwrap().values(),
        [CqlValue::Int(1), CqlValue::Int(9)]
    );
}

#[tokio::test]
async fn test_interceptor_adds_update_condition() {
    let driver = users_driver();
    let dao = users_dao(&driver).with_interceptor(Arc::new(Versioned));

    driver.push_response(ScriptedResponse::applied(true));
    dao.write_with_keys([("id", 1), ("seq", 1)])
        .value("name", "y")
        .execute_async()
        .await
        .unwrap();

    assert_eq!(
        driver.executed_queries(),
        vec!["UPDATE shop.users SET name = ? WHERE id = ? AND seq = ? IF version = ?"]
    );
}

#[tokio::test]
async fn test_interceptor_vetoes_before_anything_is_sent() {
    let driver = users_driver();
    let guard = Arc::new(Guard::default());
    let dao = users_dao(&driver).with_interceptor(guard.clone());

    let err = dao
        .delete_where([Clause::eq("id", 1)])
        .execute_async()
        .await
        .unwrap_err();
    assert!(matches!(err, CqlError::InvalidState(_)));

    let err = dao.read_all().count().execute_async().await.unwrap_err();
    assert!(matches!(err, CqlError::InvalidState(_)));

    assert_eq!(guard.seen.load(Ordering::SeqCst), 2);
    assert!(driver.transcript().is_empty());
    assert_eq!(driver.prepare_count(), 0);
}

#[tokio::test]
async fn test_vetoed_batch_member_fails_the_batch() {
    let driver = users_driver();
    let dao = users_dao(&driver).with_interceptor(Arc::new(Guard::default()));

    let batch = dao
        .delete_with_keys([("id", 1), ("seq", 1)])
        .combined_with(dao.delete_where([Clause::eq("id", 2)]));
    let err = batch.execute_async().await.unwrap_err();

    assert!(matches!(err, CqlError::InvalidState(_)));
    assert!(driver.transcript().is_empty());
}

#[tokio::test]
async fn test_interceptor_passes_bounded_reads() {
    let driver = users_driver();
    let dao = users_dao(&driver).with_interceptor(Arc::new(Guard::default()));
    driver.push_response(ScriptedResponse::rows(users(3)));

    let records: Vec<_> = dao
        .read_sequence_with_key("id", 1)
        .execute_async()
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(records.len(), 3);
    assert_eq!(
        driver.executed_queries(),
        vec!["SELECT * FROM shop.users WHERE id = ?"]
    );
}
