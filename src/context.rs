//! Execution parameters threaded through every query
//!
//! An [`ExecutionSpec`] holds the ambient parameters of a statement
//! (consistency, TTL, writetime, tracing, retry policy). An
//! [`ExecutionContext`] binds a spec and the registered interceptors to a
//! session and a table. Both are immutable: every `with_*` call returns a new
//! value.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::StatementOptions;
use crate::interceptor::{Interceptors, QueryInterceptor};
use crate::session::DbSession;

/// Consistency levels understood by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyLevel {
    /// ANY
    Any,
    /// ONE
    One,
    /// TWO
    Two,
    /// THREE
    Three,
    /// QUORUM
    Quorum,
    /// ALL
    All,
    /// LOCAL_QUORUM
    LocalQuorum,
    /// EACH_QUORUM
    EachQuorum,
    /// SERIAL
    Serial,
    /// LOCAL_SERIAL
    LocalSerial,
    /// LOCAL_ONE
    LocalOne,
}

impl ConsistencyLevel {
    /// Protocol code of the level
    pub fn code(&self) -> u16 {
        match self {
            ConsistencyLevel::Any => 0x0000,
            ConsistencyLevel::One => 0x0001,
            ConsistencyLevel::Two => 0x0002,
            ConsistencyLevel::Three => 0x0003,
            ConsistencyLevel::Quorum => 0x0004,
            ConsistencyLevel::All => 0x0005,
            ConsistencyLevel::LocalQuorum => 0x0006,
            ConsistencyLevel::EachQuorum => 0x0007,
            ConsistencyLevel::Serial => 0x0008,
            ConsistencyLevel::LocalSerial => 0x0009,
            ConsistencyLevel::LocalOne => 0x000A,
        }
    }

    /// SERIAL and LOCAL_SERIAL
    pub fn is_serial(&self) -> bool {
        matches!(self, ConsistencyLevel::Serial | ConsistencyLevel::LocalSerial)
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsistencyLevel::Any => "ANY",
            ConsistencyLevel::One => "ONE",
            ConsistencyLevel::Two => "TWO",
            ConsistencyLevel::Three => "THREE",
            ConsistencyLevel::Quorum => "QUORUM",
            ConsistencyLevel::All => "ALL",
            ConsistencyLevel::LocalQuorum => "LOCAL_QUORUM",
            ConsistencyLevel::EachQuorum => "EACH_QUORUM",
            ConsistencyLevel::Serial => "SERIAL",
            ConsistencyLevel::LocalSerial => "LOCAL_SERIAL",
            ConsistencyLevel::LocalOne => "LOCAL_ONE",
        };
        f.write_str(name)
    }
}

/// Retry policy requested from the driver for a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// The driver's default policy
    Default,
    /// Never retry, surface every failure
    Fallthrough,
    /// Retry at a lower consistency level when replicas are missing
    DowngradingConsistency,
}

/// Ambient execution parameters of a statement
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use cql_dao::context::{ConsistencyLevel, ExecutionSpec};
///
/// let base = ExecutionSpec::default();
/// let spec = base.with_consistency(ConsistencyLevel::Quorum).with_ttl(Duration::from_secs(60));
///
/// assert_eq!(base.consistency(), None);
/// assert_eq!(spec.consistency(), Some(ConsistencyLevel::Quorum));
/// assert_eq!(spec.ttl(), Some(Duration::from_secs(60)));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionSpec {
    consistency: Option<ConsistencyLevel>,
    serial_consistency: Option<ConsistencyLevel>,
    ttl: Option<Duration>,
    writetime_micros: Option<i64>,
    tracing: Option<bool>,
    retry_policy: Option<RetryPolicy>,
}

impl ExecutionSpec {
    /// Copy with a consistency level
    #[must_use]
    pub fn with_consistency(&self, level: ConsistencyLevel) -> Self {
        Self {
            consistency: Some(level),
            ..self.clone()
        }
    }

    /// Copy with a serial consistency level for conditional mutations
    #[must_use]
    pub fn with_serial_consistency(&self, level: ConsistencyLevel) -> Self {
        Self {
            serial_consistency: Some(level),
            ..self.clone()
        }
    }

    /// Copy with a time to live for written cells
    #[must_use]
    pub fn with_ttl(&self, ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..self.clone()
        }
    }

    /// Copy with an explicit writetime in microseconds since the Unix epoch
    #[must_use]
    pub fn with_writetime(&self, micros: i64) -> Self {
        Self {
            writetime_micros: Some(micros),
            ..self.clone()
        }
    }

    /// Copy with request tracing switched on or off
    #[must_use]
    pub fn with_tracing(&self, enabled: bool) -> Self {
        Self {
            tracing: Some(enabled),
            ..self.clone()
        }
    }

    /// Copy with a retry policy
    #[must_use]
    pub fn with_retry_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            retry_policy: Some(policy),
            ..self.clone()
        }
    }

    /// The consistency level, if set
    pub fn consistency(&self) -> Option<ConsistencyLevel> {
        self.consistency
    }

    /// The serial consistency level, if set
    pub fn serial_consistency(&self) -> Option<ConsistencyLevel> {
        self.serial_consistency
    }

    /// The time to live, if set
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// TTL in whole seconds as bound to `USING TTL`
    pub fn ttl_seconds(&self) -> Option<i32> {
        self.ttl
            .map(|ttl| i32::try_from(ttl.as_secs()).unwrap_or(i32::MAX))
    }

    /// The writetime, if set
    pub fn writetime_micros(&self) -> Option<i64> {
        self.writetime_micros
    }

    /// Tracing tri-state: on, off, or driver default
    pub fn tracing(&self) -> Option<bool> {
        self.tracing
    }

    /// The retry policy, if set
    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry_policy
    }

    /// Driver options for a statement built under this spec
    pub fn statement_options(&self, conditional: bool) -> StatementOptions {
        StatementOptions {
            consistency: self.consistency,
            serial_consistency: if conditional {
                self.serial_consistency
            } else {
                None
            },
            tracing: self.tracing,
            retry_policy: self.retry_policy,
            fetch_size: None,
        }
    }
}

/// A session, a table and the execution parameters for statements against it
#[derive(Clone)]
pub struct ExecutionContext {
    session: Arc<DbSession>,
    table: Arc<str>,
    spec: ExecutionSpec,
    interceptors: Interceptors,
}

impl ExecutionContext {
    /// Create a context with default execution parameters
    pub fn new(session: Arc<DbSession>, table: impl Into<String>) -> Self {
        Self {
            session,
            table: Arc::from(table.into()),
            spec: ExecutionSpec::default(),
            interceptors: Interceptors::default(),
        }
    }

    /// The session
    pub fn session(&self) -> &Arc<DbSession> {
        &self.session
    }

    /// The table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The execution parameters
    pub fn spec(&self) -> &ExecutionSpec {
        &self.spec
    }

    /// The registered interceptors, in registration order
    pub fn interceptors(&self) -> &Interceptors {
        &self.interceptors
    }

    /// Copy with other execution parameters
    #[must_use]
    pub fn with_spec(&self, spec: ExecutionSpec) -> Self {
        Self {
            spec,
            ..self.clone()
        }
    }

    /// Copy with `interceptor` run after those already registered
    #[must_use]
    pub fn with_interceptor(&self, interceptor: Arc<dyn QueryInterceptor>) -> Self {
        Self {
            interceptors: self.interceptors.with(interceptor),
            ..self.clone()
        }
    }

    /// Copy with the parameters transformed by `f`
    #[must_use]
    pub fn map_spec(&self, f: impl FnOnce(&ExecutionSpec) -> ExecutionSpec) -> Self {
        self.with_spec(f(&self.spec))
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("keyspace", &self.session.keyspace())
            .field("table", &self.table)
            .field("spec", &self.spec)
            .field("interceptors", &self.interceptors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency_codes() {
        assert_eq!(ConsistencyLevel::Any.code(), 0);
        assert_eq!(ConsistencyLevel::LocalQuorum.code(), 6);
        assert_eq!(ConsistencyLevel::LocalOne.code(), 10);
        assert!(ConsistencyLevel::LocalSerial.is_serial());
        assert!(!ConsistencyLevel::Quorum.is_serial());
    }

    #[test]
    fn test_consistency_serde() {
        let level: ConsistencyLevel = serde_json::from_str("\"LOCAL_QUORUM\"").unwrap();
        assert_eq!(level, ConsistencyLevel::LocalQuorum);
        assert_eq!(level.to_string(), "LOCAL_QUORUM");
    }

    #[test]
    fn test_spec_is_immutable() {
        let base = ExecutionSpec::default().with_tracing(true);
        let derived = base.with_writetime(1_000);

        assert_eq!(base.writetime_micros(), None);
        assert_eq!(derived.writetime_micros(), Some(1_000));
        assert_eq!(derived.tracing(), Some(true));
    }

    #[test]
    fn test_ttl_seconds_saturates() {
        let spec = ExecutionSpec::default().with_ttl(Duration::from_secs(u64::MAX));
        assert_eq!(spec.ttl_seconds(), Some(i32::MAX));
    }

    #[test]
    fn test_statement_options_serial_only_when_conditional() {
        let spec = ExecutionSpec::default()
            .with_consistency(ConsistencyLevel::One)
            .with_serial_consistency(ConsistencyLevel::LocalSerial);

        let plain = spec.statement_options(false);
        assert_eq!(plain.consistency, Some(ConsistencyLevel::One));
        assert_eq!(plain.serial_consistency, None);

        let conditional = spec.statement_options(true);
        assert_eq!(conditional.serial_consistency, Some(ConsistencyLevel::LocalSerial));
    }

    struct PassThrough;

    impl QueryInterceptor for PassThrough {}

    #[tokio::test]
    async fn test_interceptors_survive_spec_changes() {
        let driver = crate::replay::ReplayDriver::new();
        let session =
            DbSession::connect(Arc::new(driver), crate::session::SessionConfig::new("shop"))
                .unwrap();
        let base = ExecutionContext::new(session, "users");
        let intercepted = base.with_interceptor(Arc::new(PassThrough));
        let derived = intercepted.map_spec(|spec| spec.with_consistency(ConsistencyLevel::All));

        assert!(base.interceptors().is_empty());
        assert_eq!(intercepted.interceptors().len(), 1);
        assert_eq!(derived.interceptors().len(), 1);
        assert_eq!(derived.spec().consistency(), Some(ConsistencyLevel::All));
        assert_eq!(derived.table(), "users");
    }
}
