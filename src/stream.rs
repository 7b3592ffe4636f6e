//! Streaming paged results
//!
//! A [`ResultStream`] wraps a live, server-paginated result set. It can be
//! consumed two ways over the same buffered cursor:
//!
//! - pulled, as a [`futures_util::Stream`] or through
//!   [`next_record`](ResultStream::next_record);
//! - pushed, by [`subscribe`](ResultStream::subscribe)-ing a [`Subscriber`]
//!   that signals demand through its [`Subscription`].
//!
//! A stream has at most one subscriber. Rows are delivered in page order, never
//! more than requested, and at most one page fetch is in flight at a time.
//!
//! # Example
//!
//! ```no_run
//! # async fn example(stream: cql_dao::stream::RecordStream) -> cql_dao::error::Result<()> {
//! use futures_util::StreamExt;
//!
//! let names: Vec<String> = stream
//!     .map_records(|record| Ok(record.get::<String>("name")?.unwrap_or_default()))
//!     .collect::<Vec<_>>()
//!     .await
//!     .into_iter()
//!     .collect::<cql_dao::error::Result<_>>()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream, StreamExt};
use tokio::task::AbortHandle;

use crate::driver::{ExecutionInfo, RawResultSet};
use crate::error::{CqlError, Result};
use crate::record::Record;
use crate::session::DbSession;
use crate::tracing_support::SpanOperation;

/// A stream of fetched records
pub type RecordStream = ResultStream<Record>;

type Mapper<T> = Arc<dyn Fn(Record) -> Result<T> + Send + Sync>;

/// Receives the signals of a [`Subscription`]
///
/// Signals are never concurrent. After `on_error` or `on_complete` no further
/// signal arrives.
pub trait Subscriber<T>: Send + Sync {
    /// Called once, before any other signal
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// The next item
    fn on_next(&self, item: T);

    /// Terminal failure
    fn on_error(&self, error: CqlError);

    /// Terminal completion
    fn on_complete(&self);
}

/// Demand signalling of a subscriber
pub trait Subscription: Send + Sync {
    /// Request `n` more items; `0` is a protocol violation
    fn request(&self, n: u64);

    /// Stop delivery; idempotent
    fn cancel(&self);

    /// Current state
    fn state(&self) -> SubscriptionState;
}

/// Lifecycle of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Waiting for demand
    Idle,
    /// Delivering buffered rows
    Draining,
    /// A page fetch is in flight
    FetchingMore,
    /// All rows delivered
    Completed,
    /// Cancelled by the subscriber
    Cancelled,
    /// Failed with an error
    Failed,
}

impl SubscriptionState {
    /// Whether the state is final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionState::Completed | SubscriptionState::Cancelled | SubscriptionState::Failed
        )
    }
}

/// The rows of a paged result, buffered page by page
pub(crate) struct BufferedCursor {
    result: Arc<dyn RawResultSet>,
    info: Arc<ExecutionInfo>,
    session: Arc<DbSession>,
}

impl BufferedCursor {
    pub(crate) fn new(result: Arc<dyn RawResultSet>, session: Arc<DbSession>) -> Self {
        let info = Arc::new(result.execution_info());
        Self {
            result,
            info,
            session,
        }
    }

    fn next_buffered(&self) -> Option<Record> {
        self.result
            .next_row()
            .map(|row| Record::new(row, Arc::clone(&self.info)))
    }

    fn is_fully_fetched(&self) -> bool {
        self.result.is_fully_fetched()
    }

    fn is_exhausted(&self) -> bool {
        self.result.available_without_fetching() == 0 && self.result.is_fully_fetched()
    }

    /// Fetch the next page
    fn fetch_page(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let session = Arc::clone(&self.session);
        let result = Arc::clone(&self.result);
        let fetch = self.result.fetch_more_results();

        async move {
            let span = session.span(SpanOperation::FetchPage, None);
            match fetch.await.map_err(CqlError::from) {
                Ok(()) => {
                    session.emit_span(&span.succeed(result.available_without_fetching()));
                    Ok(())
                }
                Err(error) => {
                    session.emit_span(&span.fail(&error));
                    Err(error)
                }
            }
        }
    }
}

fn identity(record: Record) -> Result<Record> {
    Ok(record)
}

/// Paged results as a pull stream or a push publisher
pub struct ResultStream<T> {
    cursor: Arc<BufferedCursor>,
    mapper: Mapper<T>,
    subscribed: Arc<AtomicBool>,
    pending: Option<BoxFuture<'static, Result<()>>>,
    done: bool,
}

impl ResultStream<Record> {
    pub(crate) fn new(result: Arc<dyn RawResultSet>, session: Arc<DbSession>) -> Self {
        Self {
            cursor: Arc::new(BufferedCursor::new(result, session)),
            mapper: Arc::new(identity),
            subscribed: Arc::new(AtomicBool::new(false)),
            pending: None,
            done: false,
        }
    }
}

impl<T: Send + 'static> ResultStream<T> {
    /// Map every item
    pub fn map_records<U, F>(self, f: F) -> ResultStream<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        let mapper = self.mapper;
        ResultStream {
            cursor: self.cursor,
            mapper: Arc::new(move |record: Record| -> Result<U> { f(mapper(record)?) }),
            subscribed: self.subscribed,
            pending: self.pending,
            done: self.done,
        }
    }

    /// Diagnostics of the request
    pub fn execution_info(&self) -> &ExecutionInfo {
        &self.cursor.info
    }

    /// Pull the next item, fetching pages as needed
    pub async fn next_record(&mut self) -> Option<Result<T>> {
        self.next().await
    }

    /// Whether another item can be pulled, fetching a page if needed
    pub async fn has_next(&mut self) -> Result<bool> {
        self.ensure_pullable()?;
        loop {
            if let Some(pending) = self.pending.take() {
                pending.await?;
            }
            if self.cursor.result.available_without_fetching() > 0 {
                return Ok(true);
            }
            if self.cursor.is_fully_fetched() {
                return Ok(false);
            }
            self.pending = Some(self.cursor.fetch_page().boxed());
        }
    }

    fn ensure_pullable(&self) -> Result<()> {
        if self.subscribed.load(Ordering::Acquire) {
            Err(CqlError::invalid_state("stream has a subscriber and cannot be pulled"))
        } else {
            Ok(())
        }
    }

    /// Attach the single subscriber
    ///
    /// A second subscriber receives `on_subscribe` with an inert subscription
    /// followed by `on_error(InvalidState)`; the first is unaffected.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) -> Result<()> {
        if self.subscribed.swap(true, Ordering::AcqRel) {
            let error = CqlError::invalid_state("stream already has a subscriber");
            subscriber.on_subscribe(Arc::new(InertSubscription));
            subscriber.on_error(error.clone());
            return Err(error);
        }

        let subscription = RecordSubscription::new(
            Arc::clone(&self.cursor),
            Arc::clone(&self.mapper),
            Arc::clone(&subscriber),
        );
        subscriber.on_subscribe(subscription.clone());
        subscription.drain();
        Ok(())
    }
}

impl<T> Stream for ResultStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if this.subscribed.load(Ordering::Acquire) {
            this.done = true;
            return Poll::Ready(Some(Err(CqlError::invalid_state(
                "stream has a subscriber and cannot be pulled",
            ))));
        }

        loop {
            if let Some(pending) = this.pending.as_mut() {
                match pending.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(())) => this.pending = None,
                    Poll::Ready(Err(error)) => {
                        this.pending = None;
                        this.done = true;
                        return Poll::Ready(Some(Err(error)));
                    }
                }
            }

            if let Some(record) = this.cursor.next_buffered() {
                return Poll::Ready(Some((this.mapper)(record)));
            }
            if this.cursor.is_fully_fetched() {
                this.done = true;
                return Poll::Ready(None);
            }
            this.pending = Some(this.cursor.fetch_page().boxed());
        }
    }
}

impl<T> fmt::Debug for ResultStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("buffered", &self.cursor.result.available_without_fetching())
            .field("fully_fetched", &self.cursor.is_fully_fetched())
            .field("subscribed", &self.subscribed.load(Ordering::Relaxed))
            .field("done", &self.done)
            .finish()
    }
}

struct InertSubscription;

impl Subscription for InertSubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}

    fn state(&self) -> SubscriptionState {
        SubscriptionState::Cancelled
    }
}

const ACTIVE: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;
const FAILED: u8 = 3;

/// Demand-driven delivery of a cursor to one subscriber
///
/// `drain` is serialized by the `wip` counter: whoever moves it from zero
/// drains, everyone else only records that another pass is needed. That makes
/// `request` re-entrant from `on_next` without locking around signals.
struct RecordSubscription<T> {
    me: Weak<Self>,
    cursor: Arc<BufferedCursor>,
    mapper: Mapper<T>,
    subscriber: Mutex<Option<Arc<dyn Subscriber<T>>>>,
    demand: AtomicU64,
    wip: AtomicUsize,
    fetch_in_flight: AtomicBool,
    fetch_task: Mutex<Option<AbortHandle>>,
    terminal: AtomicU8,
    pending_error: Mutex<Option<CqlError>>,
}

impl<T: Send + 'static> RecordSubscription<T> {
    fn new(
        cursor: Arc<BufferedCursor>,
        mapper: Mapper<T>,
        subscriber: Arc<dyn Subscriber<T>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            cursor,
            mapper,
            subscriber: Mutex::new(Some(subscriber)),
            demand: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            fetch_in_flight: AtomicBool::new(false),
            fetch_task: Mutex::new(None),
            terminal: AtomicU8::new(ACTIVE),
            pending_error: Mutex::new(None),
        })
    }

    fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire) != ACTIVE
    }

    fn subscriber(&self) -> Option<Arc<dyn Subscriber<T>>> {
        self.subscriber.lock().ok().and_then(|s| s.clone())
    }

    /// Enter a terminal state, returning the subscriber if this call did
    fn terminate(&self, state: u8) -> Option<Arc<dyn Subscriber<T>>> {
        self.terminal
            .compare_exchange(ACTIVE, state, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        if let Some(task) = self.fetch_task.lock().ok().and_then(|mut t| t.take()) {
            task.abort();
        }
        self.subscriber.lock().ok().and_then(|mut s| s.take())
    }

    fn complete(&self) {
        if let Some(subscriber) = self.terminate(COMPLETED) {
            subscriber.on_complete();
        }
    }

    fn fail(&self, error: CqlError) {
        if let Some(subscriber) = self.terminate(FAILED) {
            subscriber.on_error(error);
        }
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }

        let mut missed = 1;
        loop {
            self.drain_pass();
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn drain_pass(&self) {
        loop {
            if self.is_terminal() {
                return;
            }
            if let Some(error) = self.pending_error.lock().ok().and_then(|mut e| e.take()) {
                self.fail(error);
                return;
            }

            let fetching = self.fetch_in_flight.load(Ordering::Acquire);
            if self.demand.load(Ordering::Acquire) == 0 {
                if !fetching && self.cursor.is_exhausted() {
                    self.complete();
                }
                return;
            }

            match self.cursor.next_buffered() {
                Some(record) => {
                    self.demand.fetch_sub(1, Ordering::AcqRel);
                    match (self.mapper)(record) {
                        Ok(item) => self.deliver(item),
                        Err(error) => {
                            self.fail(error);
                            return;
                        }
                    }
                }
                None if fetching => return,
                None if self.cursor.is_fully_fetched() => {
                    self.complete();
                    return;
                }
                None => {
                    self.start_fetch();
                    return;
                }
            }
        }
    }

    fn deliver(&self, item: T) {
        if self.is_terminal() {
            return;
        }
        if let Some(subscriber) = self.subscriber() {
            subscriber.on_next(item);
        }
    }

    fn start_fetch(&self) {
        if self
            .fetch_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };

        let fetch = self.cursor.fetch_page();
        let task = self.cursor.session.bridge().spawn(async move {
            let outcome = fetch.await;
            if let Err(error) = outcome {
                if let Ok(mut pending) = me.pending_error.lock() {
                    pending.get_or_insert(error);
                }
            }
            me.fetch_in_flight.store(false, Ordering::Release);
            me.drain();
        });

        if let Ok(mut slot) = self.fetch_task.lock() {
            *slot = Some(task.abort_handle());
        }
        if self.is_terminal() {
            task.abort();
        }
    }
}

impl<T: Send + 'static> Subscription for RecordSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            if let Ok(mut pending) = self.pending_error.lock() {
                pending.get_or_insert(CqlError::invalid_state(
                    "request must be positive, got 0",
                ));
            }
        } else {
            let _ = self
                .demand
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                    Some(d.saturating_add(n))
                });
        }
        self.drain();
    }

    fn cancel(&self) {
        self.terminate(CANCELLED);
    }

    fn state(&self) -> SubscriptionState {
        match self.terminal.load(Ordering::Acquire) {
            COMPLETED => SubscriptionState::Completed,
            CANCELLED => SubscriptionState::Cancelled,
            FAILED => SubscriptionState::Failed,
            _ if self.fetch_in_flight.load(Ordering::Acquire) => SubscriptionState::FetchingMore,
            _ if self.wip.load(Ordering::Acquire) > 0 => SubscriptionState::Draining,
            _ => SubscriptionState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::driver::{CqlDriver, DriverStatement, Row};
    use crate::error::DriverError;
    use crate::replay::{ReplayDriver, ScriptedResponse};
    use crate::session::SessionConfig;
    use crate::value::CqlValue;

    #[derive(Default)]
    struct Collector {
        subscription: Mutex<Option<Arc<dyn Subscription>>>,
        items: Mutex<Vec<i32>>,
        errors: Mutex<Vec<CqlError>>,
        completed: AtomicUsize,
        request_on_next: AtomicU64,
        cancel_after: Mutex<Option<usize>>,
    }

    impl Collector {
        fn request(&self, n: u64) {
            let subscription = self.subscription.lock().unwrap().clone();
            subscription.unwrap().request(n);
        }

        fn cancel(&self) {
            let subscription = self.subscription.lock().unwrap().clone();
            subscription.unwrap().cancel();
        }

        fn state(&self) -> SubscriptionState {
            let subscription = self.subscription.lock().unwrap().clone();
            subscription.unwrap().state()
        }

        fn items(&self) -> Vec<i32> {
            self.items.lock().unwrap().clone()
        }
    }

    impl Subscriber<i32> for Collector {
        fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
            *self.subscription.lock().unwrap() = Some(subscription);
        }

        fn on_next(&self, item: i32) {
            let count = {
                let mut items = self.items.lock().unwrap();
                items.push(item);
                items.len()
            };
            if *self.cancel_after.lock().unwrap() == Some(count) {
                self.cancel();
            }
            let more = self.request_on_next.load(Ordering::SeqCst);
            if more > 0 {
                self.request(more);
            }
        }

        fn on_error(&self, error: CqlError) {
            self.errors.lock().unwrap().push(error);
        }

        fn on_complete(&self) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn rows(n: i32) -> Vec<Row> {
        (1..=n)
            .map(|id| Row::from_pairs([("id", CqlValue::Int(id))]))
            .collect()
    }

    async fn stream(driver: &ReplayDriver, response: ScriptedResponse) -> ResultStream<i32> {
        let session =
            DbSession::connect(Arc::new(driver.clone()), SessionConfig::new("shop")).unwrap();
        driver.push_response(response);
        let result = driver
            .execute(DriverStatement::Simple {
                query: "SELECT id FROM shop.t".into(),
                options: Default::default(),
            })
            .await
            .unwrap();
        ResultStream::new(result, session)
            .map_records(|record| Ok(record.get::<i32>("id")?.unwrap_or_default()))
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_pull_all_pages() {
        let driver = ReplayDriver::new();
        let stream = stream(&driver, ScriptedResponse::paged(rows(5), 2)).await;

        let items: Vec<i32> = stream.map(|r| r.unwrap()).collect().await;

        assert_eq!(items, vec![1, 2, 3, 4, 5]);
        assert_eq!(driver.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_has_next_and_next_record() {
        let driver = ReplayDriver::new();
        let mut stream = stream(&driver, ScriptedResponse::pages(vec![vec![], rows(1)])).await;

        assert!(stream.has_next().await.unwrap());
        assert_eq!(stream.next_record().await.unwrap().unwrap(), 1);
        assert!(!stream.has_next().await.unwrap());
        assert!(stream.next_record().await.is_none());
    }

    #[tokio::test]
    async fn test_pull_fetch_failure() {
        let driver = ReplayDriver::new();
        let stream = stream(
            &driver,
            ScriptedResponse::rows(rows(1)).with_fetch_failure(DriverError::RequestTimeout("page".into())),
        )
        .await;

        let items: Vec<Result<i32>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_delivers_no_more_than_requested() {
        let driver = ReplayDriver::new();
        let stream = stream(&driver, ScriptedResponse::paged(rows(5), 5)).await;
        let collector = Arc::new(Collector::default());

        stream.subscribe(collector.clone()).unwrap();
        collector.request(2);

        assert_eq!(collector.items(), vec![1, 2]);
        assert_eq!(collector.state(), SubscriptionState::Idle);

        collector.request(10);
        assert_eq!(collector.items(), vec![1, 2, 3, 4, 5]);
        assert_eq!(collector.completed.load(Ordering::SeqCst), 1);
        assert_eq!(collector.state(), SubscriptionState::Completed);
    }

    #[tokio::test]
    async fn test_reentrant_request_from_on_next() {
        let driver = ReplayDriver::new();
        let stream = stream(&driver, ScriptedResponse::paged(rows(6), 2)).await;
        let collector = Arc::new(Collector::default());
        collector.request_on_next.store(1, Ordering::SeqCst);

        stream.subscribe(collector.clone()).unwrap();
        collector.request(1);
        settle().await;

        assert_eq!(collector.items(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(collector.completed.load(Ordering::SeqCst), 1);
        assert_eq!(driver.max_fetches_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_empty_result_completes_without_demand() {
        let driver = ReplayDriver::new();
        let stream = stream(&driver, ScriptedResponse::empty()).await;
        let collector = Arc::new(Collector::default());

        stream.subscribe(collector.clone()).unwrap();

        assert_eq!(collector.completed.load(Ordering::SeqCst), 1);
        assert!(collector.items().is_empty());
    }

    #[tokio::test]
    async fn test_request_zero_fails() {
        let driver = ReplayDriver::new();
        let stream = stream(&driver, ScriptedResponse::rows(rows(3))).await;
        let collector = Arc::new(Collector::default());

        stream.subscribe(collector.clone()).unwrap();
        collector.request(0);
        collector.request(5);

        let errors = collector.errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], CqlError::InvalidState(_)));
        assert!(collector.items().is_empty());
        assert_eq!(collector.state(), SubscriptionState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_from_on_next_stops_delivery() {
        let driver = ReplayDriver::new();
        let stream = stream(&driver, ScriptedResponse::rows(rows(5))).await;
        let collector = Arc::new(Collector::default());
        *collector.cancel_after.lock().unwrap() = Some(2);

        stream.subscribe(collector.clone()).unwrap();
        collector.request(5);
        collector.cancel();

        assert_eq!(collector.items(), vec![1, 2]);
        assert_eq!(collector.completed.load(Ordering::SeqCst), 0);
        assert_eq!(collector.state(), SubscriptionState::Cancelled);
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_subscription() {
        let driver = ReplayDriver::new();
        let stream = stream(
            &driver,
            ScriptedResponse::rows(rows(1)).with_fetch_failure(DriverError::RequestTimeout("page".into())),
        )
        .await;
        let collector = Arc::new(Collector::default());

        stream.subscribe(collector.clone()).unwrap();
        collector.request(3);
        settle().await;

        assert_eq!(collector.items(), vec![1]);
        assert_eq!(collector.errors.lock().unwrap().len(), 1);
        assert_eq!(collector.state(), SubscriptionState::Failed);
    }

    #[tokio::test]
    async fn test_pull_after_subscribe_fails() {
        let driver = ReplayDriver::new();
        let mut stream = stream(&driver, ScriptedResponse::rows(rows(1))).await;
        stream.subscribe(Arc::new(Collector::default())).unwrap();

        assert!(matches!(
            stream.next_record().await,
            Some(Err(CqlError::InvalidState(_)))
        ));
        assert!(matches!(
            stream.has_next().await,
            Err(CqlError::InvalidState(_))
        ));
    }
}
