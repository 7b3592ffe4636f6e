//! The database session façade
//!
//! A [`DbSession`] wraps a driver with everything statements need: the
//! prepared statement cache, the metadata catalog, the future bridge onto the
//! shared runtime and span emission. Transport failures invalidate the caches,
//! at most once per invalidation window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;

use crate::bridge::FutureBridge;
use crate::cache::{StatementCache, StatementCacheConfig};
use crate::driver::{CqlDriver, DriverStatement, PreparedHandle, RawResultSet, TopologyEvent};
use crate::error::{CqlError, Result};
use crate::metadata::{MetadataCatalog, TableSchema};
use crate::tracing_support::{
    CqlSpan, LogSpanEmitter, SpanEmitter, SpanOperation, TracingConfig,
};

/// Default minimum interval between two failure-triggered cache invalidations
pub const DEFAULT_INVALIDATION_WINDOW: Duration = Duration::from_millis(1000);

/// Default bound of the synchronous `execute()` calls
pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(10);

const NEVER: u64 = u64::MAX;

/// Configuration for a session
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use cql_dao::session::SessionConfig;
///
/// let config = SessionConfig::builder("shop")
///     .execute_timeout(Duration::from_secs(2))
///     .build();
/// assert_eq!(config.keyspace(), "shop");
///
/// let config = SessionConfig::from_json(r#"{"keyspace": "shop", "execute_timeout_ms": 500}"#).unwrap();
/// assert_eq!(config.execute_timeout(), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    keyspace: String,
    statement_cache: StatementCacheConfig,
    invalidation_window: Duration,
    execute_timeout: Duration,
    tracing: TracingConfig,
}

#[derive(Deserialize)]
struct RawSessionConfig {
    keyspace: String,
    #[serde(default)]
    statement_cache: StatementCacheConfig,
    invalidation_window_ms: Option<u64>,
    execute_timeout_ms: Option<u64>,
    #[serde(default)]
    tracing: TracingConfig,
}

impl SessionConfig {
    /// Create a configuration with defaults for a keyspace
    pub fn new(keyspace: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            statement_cache: StatementCacheConfig::default(),
            invalidation_window: DEFAULT_INVALIDATION_WINDOW,
            execute_timeout: DEFAULT_EXECUTE_TIMEOUT,
            tracing: TracingConfig::default(),
        }
    }

    /// Create a builder for configuring the session
    pub fn builder(keyspace: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: Self::new(keyspace),
        }
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawSessionConfig = serde_json::from_str(json)
            .map_err(|e| CqlError::Config(format!("cannot parse session configuration: {}", e)))?;
        if raw.keyspace.is_empty() {
            return Err(CqlError::Config("keyspace must not be empty".into()));
        }

        Ok(Self {
            keyspace: raw.keyspace,
            statement_cache: raw.statement_cache,
            invalidation_window: raw
                .invalidation_window_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_INVALIDATION_WINDOW),
            execute_timeout: raw
                .execute_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_EXECUTE_TIMEOUT),
            tracing: raw.tracing,
        })
    }

    /// The keyspace statements run against
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// The statement cache configuration
    pub fn statement_cache(&self) -> &StatementCacheConfig {
        &self.statement_cache
    }

    /// Minimum interval between failure-triggered invalidations
    pub fn invalidation_window(&self) -> Duration {
        self.invalidation_window
    }

    /// Bound of synchronous executions
    pub fn execute_timeout(&self) -> Duration {
        self.execute_timeout
    }

    /// The tracing configuration
    pub fn tracing(&self) -> &TracingConfig {
        &self.tracing
    }
}

/// Builder for SessionConfig
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the statement cache configuration
    pub fn statement_cache(mut self, config: StatementCacheConfig) -> Self {
        self.config.statement_cache = config;
        self
    }

    /// Set the minimum interval between failure-triggered invalidations
    pub fn invalidation_window(mut self, window: Duration) -> Self {
        self.config.invalidation_window = window;
        self
    }

    /// Set the bound of synchronous executions
    pub fn execute_timeout(mut self, timeout: Duration) -> Self {
        self.config.execute_timeout = timeout;
        self
    }

    /// Set the tracing configuration
    pub fn tracing(mut self, tracing: TracingConfig) -> Self {
        self.config.tracing = tracing;
        self
    }

    /// Build the configuration
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// Builder for a [`DbSession`]
pub struct SessionBuilder {
    driver: Arc<dyn CqlDriver>,
    config: SessionConfig,
    handle: Option<Handle>,
    emitter: Option<Arc<dyn SpanEmitter>>,
}

impl SessionBuilder {
    /// Run driver futures and continuations on this runtime
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Emit spans to this emitter instead of `tracing`
    pub fn span_emitter(mut self, emitter: Arc<dyn SpanEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Build the session
    ///
    /// Without an explicit runtime the runtime of the calling task is used.
    pub fn build(self) -> Result<Arc<DbSession>> {
        let bridge = match self.handle {
            Some(handle) => FutureBridge::new(handle),
            None => FutureBridge::current()?,
        };

        let session = Arc::new(DbSession {
            catalog: MetadataCatalog::new(Arc::clone(&self.driver)),
            statement_cache: StatementCache::new(self.config.statement_cache.clone()),
            driver: self.driver,
            config: self.config,
            bridge,
            epoch: Instant::now(),
            last_invalidation_ms: AtomicU64::new(NEVER),
            emitter: self.emitter.unwrap_or_else(|| Arc::new(LogSpanEmitter)),
        });

        if let Some(mut events) = session.driver.topology_events() {
            let weak: Weak<DbSession> = Arc::downgrade(&session);
            session.bridge.spawn(async move {
                loop {
                    let event = events.recv().await;
                    let Some(session) = weak.upgrade() else { break };
                    match event {
                        Ok(event) => session.handle_topology_event(&event),
                        Err(RecvError::Lagged(missed)) => {
                            tracing::debug!(missed, "topology events lagged");
                            session.invalidate_caches();
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });
        }

        Ok(session)
    }
}

/// A session against one keyspace
pub struct DbSession {
    driver: Arc<dyn CqlDriver>,
    config: SessionConfig,
    statement_cache: StatementCache,
    catalog: MetadataCatalog,
    bridge: FutureBridge,
    epoch: Instant,
    last_invalidation_ms: AtomicU64,
    emitter: Arc<dyn SpanEmitter>,
}

impl DbSession {
    /// Start building a session over a driver
    pub fn builder(driver: Arc<dyn CqlDriver>, config: SessionConfig) -> SessionBuilder {
        SessionBuilder {
            driver,
            config,
            handle: None,
            emitter: None,
        }
    }

    /// Create a session on the runtime of the calling task
    pub fn connect(driver: Arc<dyn CqlDriver>, config: SessionConfig) -> Result<Arc<Self>> {
        Self::builder(driver, config).build()
    }

    /// The keyspace
    pub fn keyspace(&self) -> &str {
        &self.config.keyspace
    }

    /// The session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The prepared statement cache
    pub fn statement_cache(&self) -> &StatementCache {
        &self.statement_cache
    }

    /// The metadata catalog
    pub fn catalog(&self) -> &MetadataCatalog {
        &self.catalog
    }

    /// The future bridge
    pub fn bridge(&self) -> &FutureBridge {
        &self.bridge
    }

    /// Resolve the schema of a table in the session keyspace
    pub async fn table_schema(&self, table: &str) -> Result<Arc<TableSchema>> {
        self.catalog.table_schema(&self.config.keyspace, table).await
    }

    /// Prepare a statement, reusing a cached handle when possible
    pub async fn prepare(&self, query: &str) -> Result<PreparedHandle> {
        if let Some(handle) = self.statement_cache.get(query) {
            return Ok(handle);
        }

        let span = self.span(SpanOperation::Prepare, Some(query));
        match self.bridge.bridge(self.driver.prepare(query)).await {
            Ok(handle) => {
                self.emitter.emit_span(&span.succeed(0));
                self.statement_cache.insert(query, handle.clone());
                Ok(handle)
            }
            Err(error) => {
                self.emitter.emit_span(&span.fail(&error));
                Err(self.on_failure(query, error))
            }
        }
    }

    /// Execute a driver statement
    pub async fn execute(&self, statement: DriverStatement) -> Result<Arc<dyn RawResultSet>> {
        let operation = match statement {
            DriverStatement::Batch { .. } => SpanOperation::Batch,
            _ => SpanOperation::Execute,
        };
        let query = statement.query().unwrap_or("BATCH").to_string();
        let span = self.span(operation, Some(&query));

        match self.bridge.bridge(self.driver.execute(statement)).await {
            Ok(result) => {
                let rows = result.available_without_fetching();
                self.emitter
                    .emit_span(&span.with_applied(result.was_applied()).succeed(rows));
                Ok(result)
            }
            Err(error) => {
                self.emitter.emit_span(&span.fail(&error));
                Err(self.on_failure(&query, error))
            }
        }
    }

    /// Wait for `future` from outside the runtime, bounded by the execute timeout
    pub fn block_on<T, F>(&self, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.bridge
            .block_on_timeout(future, self.config.execute_timeout)
    }

    /// Drop every cached prepared statement and schema
    pub fn invalidate_caches(&self) {
        tracing::debug!(keyspace = %self.config.keyspace, "invalidating statement and metadata caches");
        self.statement_cache.invalidate_all();
        self.catalog.invalidate_all();
    }

    /// Invalidate the caches unless that already happened within the window
    ///
    /// Two callers racing past the check may both invalidate; that only costs
    /// an extra round of re-preparation. Returns whether this call invalidated.
    pub fn invalidate_caches_after_failure(&self) -> bool {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_invalidation_ms.load(Ordering::Relaxed);
        let window = self.config.invalidation_window.as_millis() as u64;

        if last != NEVER && now.saturating_sub(last) < window {
            return false;
        }
        if self
            .last_invalidation_ms
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        self.invalidate_caches();
        true
    }

    /// React to a cluster topology event
    pub fn handle_topology_event(&self, event: &TopologyEvent) {
        tracing::debug!(%event, "topology event");
        self.invalidate_caches();
    }

    pub(crate) fn emit_span(&self, span: &CqlSpan) {
        self.emitter.emit_span(span);
    }

    pub(crate) fn span(&self, operation: SpanOperation, statement: Option<&str>) -> CqlSpan {
        let mut span = CqlSpan::new(operation).with_keyspace(self.config.keyspace.clone());
        span.statement = statement.and_then(|s| self.config.tracing.statement_for_span(s));
        span
    }

    fn on_failure(&self, query: &str, error: CqlError) -> CqlError {
        if error.is_transport_failure() {
            tracing::warn!(
                keyspace = %self.config.keyspace,
                statement = %query,
                error = %error,
                "error occurred executing statement"
            );
            self.invalidate_caches_after_failure();
        }
        error
    }
}

impl std::fmt::Debug for DbSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbSession")
            .field("config", &self.config)
            .field("statement_cache", &self.statement_cache)
            .field("catalog", &self.catalog)
            .finish()
    }
}
