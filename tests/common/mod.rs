#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cql_dao::dao::Dao;
use cql_dao::driver::Row;
use cql_dao::metadata::{ColumnMetadata, TableMetadata};
use cql_dao::record::Record;
use cql_dao::replay::ReplayDriver;
use cql_dao::session::{DbSession, SessionConfig};
use cql_dao::stream::{Subscriber, Subscription, SubscriptionState};
use cql_dao::types::CqlType;
use cql_dao::value::CqlValue;
use cql_dao::CqlError;

pub fn users_driver() -> ReplayDriver {
    let driver = ReplayDriver::new();
    driver.add_table(TableMetadata::new(
        "shop",
        "users",
        [
            ColumnMetadata::partition_key("id", CqlType::Int),
            ColumnMetadata::clustering("seq", CqlType::Int),
            ColumnMetadata::regular("name", CqlType::Text),
            ColumnMetadata::regular("version", CqlType::Int),
        ],
    ));
    driver
}

/// A session on the runtime of the calling task
pub fn users_dao(driver: &ReplayDriver) -> Dao {
    let session = DbSession::connect(Arc::new(driver.clone()), SessionConfig::new("shop"))
        .expect("session");
    Dao::new(session, "users")
}

pub fn user(id: i32, seq: i32) -> Row {
    Row::from_pairs([
        ("id", CqlValue::Int(id)),
        ("seq", CqlValue::Int(seq)),
        ("name", CqlValue::Text(format!("user-{}", seq))),
    ])
}

pub fn users(n: i32) -> Vec<Row> {
    (1..=n).map(|seq| user(1, seq)).collect()
}

/// Records the signals it receives
#[derive(Default)]
pub struct Collector {
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    seqs: Mutex<Vec<i32>>,
    errors: Mutex<Vec<CqlError>>,
    completed: AtomicUsize,
    subscribed: AtomicUsize,
}

impl Collector {
    pub fn request(&self, n: u64) {
        let subscription = self.subscription.lock().unwrap().clone();
        subscription.expect("subscribed").request(n);
    }

    pub fn cancel(&self) {
        let subscription = self.subscription.lock().unwrap().clone();
        subscription.expect("subscribed").cancel();
    }

    pub fn state(&self) -> SubscriptionState {
        let subscription = self.subscription.lock().unwrap().clone();
        subscription.expect("subscribed").state()
    }

    pub fn seqs(&self) -> Vec<i32> {
        self.seqs.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<CqlError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn subscribed(&self) -> usize {
        self.subscribed.load(Ordering::SeqCst)
    }
}

impl Subscriber<Record> for Collector {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.subscribed.fetch_add(1, Ordering::SeqCst);
        *self.subscription.lock().unwrap() = Some(subscription);
    }

    fn on_next(&self, record: Record) {
        let seq = record.get::<i32>("seq").unwrap().unwrap();
        self.seqs.lock().unwrap().push(seq);
    }

    fn on_error(&self, error: CqlError) {
        self.errors.lock().unwrap().push(error);
    }

    fn on_complete(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Let spawned page fetches run
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
