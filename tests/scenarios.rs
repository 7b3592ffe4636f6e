mod common;

use std::sync::Arc;
use std::time::Duration;

use cql_dao::driver::DriverStatement;
use cql_dao::prelude::*;
use cql_dao::replay::{ReplayDriver, ScriptedResponse};
use cql_dao::stream::SubscriptionState;
use cql_dao::value::CqlValue;

use common::{user, users, users_dao, users_driver, Collector};

#[tokio::test]
async fn test_insert_if_not_exists_twice() {
    let driver = users_driver();
    let dao = users_dao(&driver);
    let insert = dao
        .insert()
        .value("id", 42)
        .value("seq", 1)
        .value("name", "x")
        .if_not_exists();

    driver.push_response(ScriptedResponse::applied(true));
    driver.push_response(ScriptedResponse::applied(false));

    let first = insert.execute_async().await.unwrap();
    assert!(first.was_applied());

    let second = insert.execute_async().await.unwrap_err();
    assert!(matches!(
        second,
        CqlError::ConditionNotMet(ConditionKind::AlreadyExists)
    ));

    assert_eq!(
        driver.executed_queries(),
        vec![
            "INSERT INTO shop.users (id, name, seq) VALUES (?, ?, ?) IF NOT EXISTS",
            "INSERT INTO shop.users (id, name, seq) VALUES (?, ?, ?) IF NOT EXISTS",
        ]
    );
    assert_eq!(driver.prepare_count(), 1);
}

#[tokio::test]
async fn test_only_if_version_mismatch() {
    let driver = users_driver();
    let dao = users_dao(&driver);
    driver.push_response(ScriptedResponse::applied(false));
    let err = dao
        .write_with_keys([("id", 1), ("seq", 1)])
        .value("name", "changed")
        .value("version", 3)
        .only_if(Clause::eq("version", 1))
        .execute_async()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CqlError::ConditionNotMet(ConditionKind::ConditionMismatch)
    ));
    match driver.last_statement().unwrap() {
        DriverStatement::Prepared { handle, values, .. } => {
            assert_eq!(
                handle.query(),
                "UPDATE shop.users SET name = ?, version = ? WHERE id = ? AND seq = ? IF version = ?"
            );
            assert_eq!(values.last(), Some(&CqlValue::Int(1)));
        }
        other => panic!("unexpected statement: {:?}", other),
    }
    assert_eq!(driver.transcript().len(), 1);
    assert!(driver
        .executed_queries()
        .iter()
        .all(|query| query.ends_with("IF version = ?")));
}

#[tokio::test(start_paused = true)]
async fn test_paged_read_with_demand() {
    let driver = users_driver();
    let dao = users_dao(&driver);
    driver.set_fetch_delay(Duration::from_millis(20));
    driver.push_response(ScriptedResponse::paged(users(5), 2));

    let stream = dao
        .read_sequence_with_key("id", 1)
        .with_fetch_size(2)
        .unwrap()
        .execute_async()
        .await
        .unwrap();
    let collector = Arc::new(Collector::default());
    stream.subscribe(collector.clone()).unwrap();

    collector.request(1);
    assert_eq!(collector.seqs(), vec![1]);

    collector.request(1);
    assert_eq!(collector.seqs(), vec![1, 2]);

    collector.request(3);
    assert_eq!(collector.state(), SubscriptionState::FetchingMore);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(collector.seqs(), vec![1, 2, 3, 4, 5]);
    assert_eq!(collector.completed(), 1);
    assert!(collector.errors().is_empty());
    assert_eq!(collector.state(), SubscriptionState::Completed);
    assert_eq!(driver.fetch_count(), 2);
    assert_eq!(driver.max_fetches_in_flight(), 1);
    let transcript = driver.transcript();
    assert_eq!(transcript[0].options().fetch_size, Some(2));
}

fn worker_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime")
}

fn blocking_dao(
    driver: &ReplayDriver,
    runtime: &tokio::runtime::Runtime,
    config: SessionConfig,
) -> Dao {
    let session = DbSession::builder(Arc::new(driver.clone()), config)
        .runtime(runtime.handle().clone())
        .build()
        .expect("session");
    Dao::new(session, "users")
}

#[test]
fn test_blocking_execute_from_plain_thread() {
    let runtime = worker_runtime();
    let driver = users_driver();
    let dao = blocking_dao(&driver, &runtime, SessionConfig::new("shop"));

    driver.push_response(ScriptedResponse::applied(true));
    let result = dao
        .insert()
        .value("id", 7)
        .value("seq", 1)
        .if_not_exists()
        .execute()
        .unwrap();
    assert!(result.was_applied());

    driver.push_response(ScriptedResponse::rows(vec![user(7, 1)]));
    let record = dao.read_with_keys([("id", 7), ("seq", 1)]).execute().unwrap();
    assert_eq!(
        record.unwrap().get::<String>("name").unwrap().as_deref(),
        Some("user-1")
    );
}

#[test]
fn test_blocking_execute_times_out() {
    let runtime = worker_runtime();
    let driver = users_driver();
    let config = SessionConfig::builder("shop")
        .execute_timeout(Duration::from_millis(100))
        .build();
    let dao = blocking_dao(&driver, &runtime, config);

    driver.set_fetch_delay(Duration::from_secs(2));
    driver.push_response(ScriptedResponse::pages(vec![Vec::new(), vec![user(1, 1)]]));

    let err = dao
        .read_with_keys([("id", 1), ("seq", 1)])
        .execute()
        .unwrap_err();
    assert!(matches!(err, CqlError::Timeout(timeout) if timeout == Duration::from_millis(100)));
}
