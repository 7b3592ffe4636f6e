//! Structured spans for CQL operations
//!
//! Every prepare, execute, batch and page fetch produces a [`CqlSpan`] that is
//! handed to the session's [`SpanEmitter`]. The default [`LogSpanEmitter`]
//! turns spans into `tracing` events with these fields:
//!
//! - `operation`: "prepare", "exec", "batch" or "fetch"
//! - `db.system`: "cassandra"
//! - `db.keyspace`: the session keyspace
//! - `db.statement`: statement text, truncated, unless disabled
//!
//! # Example
//!
//! ```
//! use cql_dao::tracing_support::{CqlSpan, SpanOperation};
//!
//! let span = CqlSpan::new(SpanOperation::Execute)
//!     .with_keyspace("shop")
//!     .with_statement("SELECT * FROM users")
//!     .succeed(10);
//!
//! assert_eq!(span.rows(), Some(10));
//! assert!(!span.is_error());
//! ```

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::CqlError;

/// What a span measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanOperation {
    /// Preparing a statement
    Prepare,
    /// Executing a single statement
    Execute,
    /// Executing a batch
    Batch,
    /// Fetching the next page of a result
    FetchPage,
}

impl SpanOperation {
    /// The `operation` field value
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanOperation::Prepare => "prepare",
            SpanOperation::Execute => "exec",
            SpanOperation::Batch => "batch",
            SpanOperation::FetchPage => "fetch",
        }
    }
}

impl fmt::Display for SpanOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure category recorded on spans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Statement does not match the table
    Schema,
    /// Conditional statement not applied
    Condition,
    /// Single read matched more than one row
    TooManyResults,
    /// Unexpected response shape
    Protocol,
    /// Blocking wait ran out
    Timeout,
    /// Connection level failure
    Transport,
    /// Misuse or bad configuration
    InvalidState,
    /// Subscription cancelled
    Cancelled,
    /// Column value could not be decoded
    Decode,
    /// Anything else the driver reports
    Unknown,
}

impl ErrorClass {
    /// The `error.class` field value
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Schema => "schema",
            ErrorClass::Condition => "condition",
            ErrorClass::TooManyResults => "too_many_results",
            ErrorClass::Protocol => "protocol",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Transport => "transport",
            ErrorClass::InvalidState => "invalid_state",
            ErrorClass::Cancelled => "cancelled",
            ErrorClass::Decode => "decode",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// Unmet conditions and cancellation are outcomes, not faults
    pub fn is_expected(&self) -> bool {
        matches!(self, ErrorClass::Condition | ErrorClass::Cancelled)
    }
}

impl From<&CqlError> for ErrorClass {
    fn from(error: &CqlError) -> Self {
        match error {
            CqlError::SchemaMismatch(_) => ErrorClass::Schema,
            CqlError::ConditionNotMet(_) => ErrorClass::Condition,
            CqlError::TooManyResults(_) => ErrorClass::TooManyResults,
            CqlError::ProtocolError(_) => ErrorClass::Protocol,
            CqlError::Timeout(_) => ErrorClass::Timeout,
            CqlError::TransportFailure(_) => ErrorClass::Transport,
            CqlError::InvalidState(_) | CqlError::Config(_) => ErrorClass::InvalidState,
            CqlError::Cancelled => ErrorClass::Cancelled,
            CqlError::Decode { .. } => ErrorClass::Decode,
            CqlError::Driver(_) => ErrorClass::Unknown,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What spans may reveal about statements
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Record statement text on spans
    pub include_statement: bool,
    /// Characters of statement text kept before truncating
    pub max_statement_length: usize,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            include_statement: true,
            max_statement_length: 1000,
        }
    }
}

impl TracingConfig {
    /// The statement text as it should appear in a span, if at all
    pub fn statement_for_span(&self, statement: &str) -> Option<String> {
        if !self.include_statement {
            return None;
        }
        let text = match statement.char_indices().nth(self.max_statement_length) {
            Some((cut, _)) => format!("{}...", &statement[..cut]),
            None => statement.to_string(),
        };
        Some(text)
    }
}

/// How a spanned operation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanOutcome {
    /// Succeeded with this many rows available
    Rows(usize),
    /// Failed
    Failed { class: ErrorClass, message: String },
}

/// One timed CQL operation
///
/// A span starts its clock on creation; [`succeed`](CqlSpan::succeed) and
/// [`fail`](CqlSpan::fail) stop it.
#[derive(Debug, Clone)]
pub struct CqlSpan {
    pub operation: SpanOperation,
    pub keyspace: Option<String>,
    /// Statement text as allowed by [`TracingConfig`]
    pub statement: Option<String>,
    /// `[applied]` of a conditional statement
    pub applied: Option<bool>,
    /// Set once the span is finished
    pub elapsed: Option<Duration>,
    pub outcome: Option<SpanOutcome>,
    started: Instant,
}

impl CqlSpan {
    /// Start timing `operation`
    pub fn new(operation: SpanOperation) -> Self {
        Self {
            operation,
            keyspace: None,
            statement: None,
            applied: None,
            elapsed: None,
            outcome: None,
            started: Instant::now(),
        }
    }

    /// Record the keyspace
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Record the statement text
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    /// Record the `[applied]` flag, if the statement was conditional
    pub fn with_applied(mut self, applied: Option<bool>) -> Self {
        self.applied = applied;
        self
    }

    /// Stop the clock with a success
    pub fn succeed(self, rows: usize) -> Self {
        self.finish(SpanOutcome::Rows(rows))
    }

    /// Stop the clock with a failure
    pub fn fail(self, error: &CqlError) -> Self {
        self.finish(SpanOutcome::Failed {
            class: ErrorClass::from(error),
            message: error.to_string(),
        })
    }

    fn finish(mut self, outcome: SpanOutcome) -> Self {
        self.elapsed = Some(self.started.elapsed());
        self.outcome = Some(outcome);
        self
    }

    /// Rows of a successful operation
    pub fn rows(&self) -> Option<usize> {
        match self.outcome {
            Some(SpanOutcome::Rows(rows)) => Some(rows),
            _ => None,
        }
    }

    /// Failure category of a failed operation
    pub fn error_class(&self) -> Option<ErrorClass> {
        match self.outcome {
            Some(SpanOutcome::Failed { class, .. }) => Some(class),
            _ => None,
        }
    }

    /// Whether the operation failed
    pub fn is_error(&self) -> bool {
        self.error_class().is_some()
    }
}

impl fmt::Display for CqlSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op={}", self.operation)?;
        if let Some(keyspace) = &self.keyspace {
            write!(f, " keyspace={}", keyspace)?;
        }
        if let Some(elapsed) = self.elapsed {
            write!(f, " duration={:?}", elapsed)?;
        }
        match &self.outcome {
            Some(SpanOutcome::Rows(rows)) => write!(f, " rows={}", rows)?,
            Some(SpanOutcome::Failed { class, .. }) => write!(f, " error={}", class)?,
            None => {}
        }
        if let Some(applied) = self.applied {
            write!(f, " applied={}", applied)?;
        }
        Ok(())
    }
}

/// Sink for finished spans
pub trait SpanEmitter: Send + Sync {
    /// Called once per finished span
    fn emit_span(&self, span: &CqlSpan);
}

/// Drops every span
#[derive(Debug, Clone, Default)]
pub struct NoopSpanEmitter;

impl SpanEmitter for NoopSpanEmitter {
    fn emit_span(&self, _span: &CqlSpan) {}
}

/// Forwards spans to `tracing`: faults at warn, everything else at debug
#[derive(Debug, Clone, Default)]
pub struct LogSpanEmitter;

impl SpanEmitter for LogSpanEmitter {
    fn emit_span(&self, span: &CqlSpan) {
        let duration_us = span.elapsed.map(|d| d.as_micros() as u64);
        match &span.outcome {
            Some(SpanOutcome::Failed { class, message }) if !class.is_expected() => {
                tracing::warn!(
                    operation = span.operation.as_str(),
                    db.system = "cassandra",
                    db.keyspace = span.keyspace.as_deref(),
                    db.statement = span.statement.as_deref(),
                    error.class = class.as_str(),
                    error.message = message.as_str(),
                    duration_us,
                    "cql operation failed"
                )
            }
            _ => tracing::debug!(
                operation = span.operation.as_str(),
                db.system = "cassandra",
                db.keyspace = span.keyspace.as_deref(),
                db.statement = span.statement.as_deref(),
                rows = span.rows(),
                applied = span.applied,
                error.class = span.error_class().map(|c| c.as_str()),
                duration_us,
                "cql operation"
            ),
        }
    }
}

/// Keeps every span in memory, for assertions
#[derive(Debug, Default)]
pub struct TestSpanEmitter {
    spans: Mutex<Vec<CqlSpan>>,
}

impl TestSpanEmitter {
    /// An emitter holding no spans
    pub fn new() -> Self {
        Self::default()
    }

    /// Every span emitted so far, oldest first
    pub fn get_spans(&self) -> Vec<CqlSpan> {
        self.spans.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Spans of one operation
    pub fn spans_for(&self, operation: SpanOperation) -> Vec<CqlSpan> {
        self.get_spans()
            .into_iter()
            .filter(|s| s.operation == operation)
            .collect()
    }

    /// Forget every span
    pub fn clear(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }

    /// Number of spans held
    pub fn len(&self) -> usize {
        self.spans.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether no span is held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SpanEmitter for TestSpanEmitter {
    fn emit_span(&self, span: &CqlSpan) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.push(span.clone());
        }
    }
}
