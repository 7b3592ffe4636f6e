//! Deterministic replay driver for testing
//!
//! [`ReplayDriver`] is a [`CqlDriver`] that answers from a script instead of a
//! cluster. Table and user type definitions are registered up front, each
//! `execute` call consumes the next [`ScriptedResponse`], and every statement
//! sent is recorded in a transcript so tests can assert on the exact CQL and
//! bound values.
//!
//! Paged responses hand out one page at a time through
//! [`fetch_more_results`](RawResultSet::fetch_more_results). The driver counts
//! fetches and tracks how many are in flight at once.
//!
//! # Example
//!
//! ```
//! use cql_dao::driver::Row;
//! use cql_dao::replay::{ReplayDriver, ScriptedResponse};
//! use cql_dao::value::CqlValue;
//!
//! let driver = ReplayDriver::new();
//! driver.push_response(ScriptedResponse::applied(false));
//! driver.push_response(ScriptedResponse::rows(vec![
//!     Row::from_pairs([("id", CqlValue::Int(1))]),
//! ]));
//!
//! assert_eq!(driver.pending_responses(), 2);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::driver::{
    CqlDriver, DriverStatement, ExecutionInfo, PreparedHandle, RawResultSet, Row, TopologyEvent,
};
use crate::error::DriverError;
use crate::metadata::{TableMetadata, UserType};
use crate::value::CqlValue;

/// A scripted answer to one `execute` call
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// A result set, split into pages
    Rows {
        /// Pages in server order; the first is returned with the response
        pages: Vec<Vec<Row>>,
        /// The applied flag of a conditional statement
        applied: Option<bool>,
        /// Diagnostics attached to the result
        info: ExecutionInfo,
        /// Failure returned by the first page fetch instead of a page
        fetch_failure: Option<DriverError>,
    },
    /// The statement fails
    Failure(DriverError),
}

impl ScriptedResponse {
    /// An empty, fully fetched result
    pub fn empty() -> Self {
        Self::rows(Vec::new())
    }

    /// All rows in a single page
    pub fn rows(rows: Vec<Row>) -> Self {
        ScriptedResponse::Rows {
            pages: vec![rows],
            applied: None,
            info: ExecutionInfo::default(),
            fetch_failure: None,
        }
    }

    /// Rows split into pages of `page_size`
    pub fn paged(rows: Vec<Row>, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let mut pages: Vec<Vec<Row>> = rows.chunks(page_size).map(<[Row]>::to_vec).collect();
        if pages.is_empty() {
            pages.push(Vec::new());
        }
        ScriptedResponse::Rows {
            pages,
            applied: None,
            info: ExecutionInfo::default(),
            fetch_failure: None,
        }
    }

    /// Explicit pages, including empty ones
    pub fn pages(pages: Vec<Vec<Row>>) -> Self {
        ScriptedResponse::Rows {
            pages,
            applied: None,
            info: ExecutionInfo::default(),
            fetch_failure: None,
        }
    }

    /// The `[applied]` row of a conditional statement
    pub fn applied(applied: bool) -> Self {
        ScriptedResponse::Rows {
            pages: vec![vec![Row::from_pairs([(
                "[applied]",
                CqlValue::Boolean(applied),
            )])]],
            applied: Some(applied),
            info: ExecutionInfo::default(),
            fetch_failure: None,
        }
    }

    /// A failing statement
    pub fn failure(error: DriverError) -> Self {
        ScriptedResponse::Failure(error)
    }

    /// Attach diagnostics
    pub fn with_info(mut self, execution_info: ExecutionInfo) -> Self {
        if let ScriptedResponse::Rows { info, .. } = &mut self {
            *info = execution_info;
        }
        self
    }

    /// Make the next page fetch fail
    pub fn with_fetch_failure(mut self, error: DriverError) -> Self {
        if let ScriptedResponse::Rows { fetch_failure, .. } = &mut self {
            *fetch_failure = Some(error);
        }
        self
    }
}

#[derive(Debug, Default)]
struct FetchStats {
    total: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct ReplayState {
    tables: RwLock<HashMap<(String, String), TableMetadata>>,
    user_types: RwLock<HashMap<(String, String), UserType>>,
    responses: Mutex<VecDeque<ScriptedResponse>>,
    prepare_failures: Mutex<VecDeque<DriverError>>,
    transcript: Mutex<Vec<DriverStatement>>,
    prepares: AtomicUsize,
    metadata_lookups: AtomicUsize,
    fetch_delay: Mutex<Duration>,
    fetches: Arc<FetchStats>,
    events: broadcast::Sender<TopologyEvent>,
}

/// A scripted in-memory driver
#[derive(Clone)]
pub struct ReplayDriver {
    state: Arc<ReplayState>,
}

impl Default for ReplayDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayDriver {
    /// Create a driver with no schema and an empty script
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Arc::new(ReplayState {
                tables: RwLock::new(HashMap::new()),
                user_types: RwLock::new(HashMap::new()),
                responses: Mutex::new(VecDeque::new()),
                prepare_failures: Mutex::new(VecDeque::new()),
                transcript: Mutex::new(Vec::new()),
                prepares: AtomicUsize::new(0),
                metadata_lookups: AtomicUsize::new(0),
                fetch_delay: Mutex::new(Duration::ZERO),
                fetches: Arc::new(FetchStats::default()),
                events,
            }),
        }
    }

    /// Register a table definition
    pub fn add_table(&self, table: TableMetadata) {
        if let Ok(mut tables) = self.state.tables.write() {
            tables.insert(
                (table.keyspace().to_string(), table.name().to_string()),
                table,
            );
        }
    }

    /// Register a user type definition
    pub fn add_user_type(&self, user_type: UserType) {
        if let Ok(mut user_types) = self.state.user_types.write() {
            user_types.insert(
                (
                    user_type.keyspace().to_string(),
                    user_type.name().to_string(),
                ),
                user_type,
            );
        }
    }

    /// Queue the answer to the next unanswered `execute`
    ///
    /// Statements executed with nothing queued get an empty result.
    pub fn push_response(&self, response: ScriptedResponse) {
        if let Ok(mut responses) = self.state.responses.lock() {
            responses.push_back(response);
        }
    }

    /// Make the next `prepare` fail
    pub fn fail_next_prepare(&self, error: DriverError) {
        if let Ok(mut failures) = self.state.prepare_failures.lock() {
            failures.push_back(error);
        }
    }

    /// Delay every page fetch
    pub fn set_fetch_delay(&self, delay: Duration) {
        if let Ok(mut fetch_delay) = self.state.fetch_delay.lock() {
            *fetch_delay = delay;
        }
    }

    /// Publish a topology event to every subscribed session
    pub fn publish_event(&self, event: TopologyEvent) {
        let _ = self.state.events.send(event);
    }

    /// Queued responses not yet consumed
    pub fn pending_responses(&self) -> usize {
        self.state.responses.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Every statement executed so far, in order
    pub fn transcript(&self) -> Vec<DriverStatement> {
        self.state
            .transcript
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Statement texts executed so far; batches are listed as `BATCH`
    pub fn executed_queries(&self) -> Vec<String> {
        self.transcript()
            .iter()
            .map(|s| s.query().unwrap_or("BATCH").to_string())
            .collect()
    }

    /// The most recently executed statement
    pub fn last_statement(&self) -> Option<DriverStatement> {
        self.state
            .transcript
            .lock()
            .ok()
            .and_then(|t| t.last().cloned())
    }

    /// Number of `prepare` calls
    pub fn prepare_count(&self) -> usize {
        self.state.prepares.load(Ordering::SeqCst)
    }

    /// Number of table definition lookups
    pub fn metadata_lookups(&self) -> usize {
        self.state.metadata_lookups.load(Ordering::SeqCst)
    }

    /// Number of page fetches started
    pub fn fetch_count(&self) -> usize {
        self.state.fetches.total.load(Ordering::SeqCst)
    }

    /// Highest number of page fetches observed in flight at once
    pub fn max_fetches_in_flight(&self) -> usize {
        self.state.fetches.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> ScriptedResponse {
        self.state
            .responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(ScriptedResponse::empty)
    }
}

#[async_trait]
impl CqlDriver for ReplayDriver {
    fn prepare(&self, query: &str) -> BoxFuture<'static, Result<PreparedHandle, DriverError>> {
        let failure = self
            .state
            .prepare_failures
            .lock()
            .ok()
            .and_then(|mut f| f.pop_front());
        let id = self.state.prepares.fetch_add(1, Ordering::SeqCst) as u64;
        let handle = PreparedHandle::new(id.to_be_bytes().to_vec(), query);

        async move {
            match failure {
                Some(error) => Err(error),
                None => Ok(handle),
            }
        }
        .boxed()
    }

    fn execute(
        &self,
        statement: DriverStatement,
    ) -> BoxFuture<'static, Result<Arc<dyn RawResultSet>, DriverError>> {
        let traced = statement.options().tracing == Some(true);
        if let Ok(mut transcript) = self.state.transcript.lock() {
            transcript.push(statement);
        }
        let response = self.next_response();
        let fetch_delay = self.state.fetch_delay.lock().map(|d| *d).unwrap_or_default();
        let stats = Arc::clone(&self.state.fetches);

        async move {
            match response {
                ScriptedResponse::Failure(error) => Err(error),
                ScriptedResponse::Rows {
                    pages,
                    applied,
                    mut info,
                    fetch_failure,
                } => {
                    if traced && info.trace_id.is_none() {
                        info.trace_id = Some(Uuid::new_v4());
                    }
                    let result: Arc<dyn RawResultSet> = Arc::new(ReplayResultSet::new(
                        pages,
                        applied,
                        info,
                        fetch_failure,
                        fetch_delay,
                        stats,
                    ));
                    Ok(result)
                }
            }
        }
        .boxed()
    }

    async fn table_metadata(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<Option<TableMetadata>, DriverError> {
        self.state.metadata_lookups.fetch_add(1, Ordering::SeqCst);
        let tables = self
            .state
            .tables
            .read()
            .map_err(|e| DriverError::Internal(e.to_string()))?;
        Ok(tables
            .get(&(keyspace.to_string(), table.to_string()))
            .cloned())
    }

    async fn user_type(
        &self,
        keyspace: &str,
        name: &str,
    ) -> Result<Option<UserType>, DriverError> {
        let user_types = self
            .state
            .user_types
            .read()
            .map_err(|e| DriverError::Internal(e.to_string()))?;
        Ok(user_types
            .get(&(keyspace.to_string(), name.to_string()))
            .cloned())
    }

    fn topology_events(&self) -> Option<broadcast::Receiver<TopologyEvent>> {
        Some(self.state.events.subscribe())
    }
}

#[derive(Default)]
struct Pages {
    buffer: VecDeque<Row>,
    remaining: VecDeque<Vec<Row>>,
    fetch_failure: Option<DriverError>,
}

/// A paged result answered from a script
pub struct ReplayResultSet {
    pages: Arc<Mutex<Pages>>,
    applied: Option<bool>,
    info: ExecutionInfo,
    fetch_delay: Duration,
    stats: Arc<FetchStats>,
}

impl ReplayResultSet {
    fn new(
        pages: Vec<Vec<Row>>,
        applied: Option<bool>,
        info: ExecutionInfo,
        fetch_failure: Option<DriverError>,
        fetch_delay: Duration,
        stats: Arc<FetchStats>,
    ) -> Self {
        let mut remaining: VecDeque<Vec<Row>> = pages.into();
        let buffer = remaining.pop_front().unwrap_or_default().into();
        Self {
            pages: Arc::new(Mutex::new(Pages {
                buffer,
                remaining,
                fetch_failure,
            })),
            applied,
            info,
            fetch_delay,
            stats,
        }
    }
}

struct InFlight(Arc<FetchStats>);

impl InFlight {
    fn enter(stats: Arc<FetchStats>) -> Self {
        stats.total.fetch_add(1, Ordering::SeqCst);
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RawResultSet for ReplayResultSet {
    fn was_applied(&self) -> Option<bool> {
        self.applied
    }

    fn is_fully_fetched(&self) -> bool {
        self.pages
            .lock()
            .map(|p| p.remaining.is_empty() && p.fetch_failure.is_none())
            .unwrap_or(true)
    }

    fn available_without_fetching(&self) -> usize {
        self.pages.lock().map(|p| p.buffer.len()).unwrap_or(0)
    }

    fn next_row(&self) -> Option<Row> {
        self.pages.lock().ok()?.buffer.pop_front()
    }

    fn fetch_more_results(&self) -> BoxFuture<'static, Result<(), DriverError>> {
        let pages = Arc::clone(&self.pages);
        let stats = Arc::clone(&self.stats);
        let delay = self.fetch_delay;

        async move {
            let _in_flight = InFlight::enter(stats);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut pages = pages
                .lock()
                .map_err(|e| DriverError::Internal(e.to_string()))?;
            if let Some(error) = pages.fetch_failure.take() {
                return Err(error);
            }
            if let Some(page) = pages.remaining.pop_front() {
                pages.buffer.extend(page);
            }
            Ok(())
        }
        .boxed()
    }

    fn execution_info(&self) -> ExecutionInfo {
        self.info.clone()
    }
}
