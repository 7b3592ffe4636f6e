//! Error types for CQL data access
//!
//! Every failure surfaced by this crate is a [`CqlError`]. Failures raised by
//! the driver arrive as [`DriverError`] and are unwrapped to their root cause
//! before being classified, so callers never see nested execution wrappers.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = CqlError> = std::result::Result<T, E>;

/// Which kind of lightweight-transaction condition was not met
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// An `IF NOT EXISTS` insert found an existing row
    AlreadyExists,
    /// An `IF ...` or `IF EXISTS` condition did not hold
    ConditionMismatch,
}

impl ConditionKind {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::AlreadyExists => "record already exists",
            ConditionKind::ConditionMismatch => "if condition does not match",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by a [`CqlDriver`](crate::driver::CqlDriver)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The server rejected the statement (syntax, unknown column, stale prepared id)
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// The driver hit an unexpected internal condition
    #[error("driver internal error: {0}")]
    Internal(String),
    /// No coordinator could be reached
    #[error("no host available: {0}")]
    NoHostAvailable(String),
    /// The coordinator timed out waiting for replicas
    #[error("request timed out: {0}")]
    RequestTimeout(String),
    /// Wrapper added by an execution layer around the real failure
    #[error("execution failed: {message}")]
    Execution {
        /// Wrapper message
        message: String,
        /// The wrapped failure
        #[source]
        cause: Box<DriverError>,
    },
    /// Any other driver failure
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Wrap a failure the way an execution layer does
    pub fn execution(message: impl Into<String>, cause: DriverError) -> Self {
        DriverError::Execution {
            message: message.into(),
            cause: Box::new(cause),
        }
    }

    /// Strip every [`DriverError::Execution`] wrapper
    pub fn root_cause(self) -> DriverError {
        let mut current = self;
        while let DriverError::Execution { cause, .. } = current {
            current = *cause;
        }
        current
    }

    /// Whether this failure should invalidate cached statements and metadata
    pub fn invalidates_caches(&self) -> bool {
        matches!(
            self,
            DriverError::InvalidQuery(_) | DriverError::Internal(_)
        )
    }
}

/// Errors surfaced by the data-access layer
#[derive(Debug, Clone, Error)]
pub enum CqlError {
    /// A table, column or user type field is unknown, or a value does not fit its column
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A conditional mutation was not applied
    #[error("condition not met: {0}")]
    ConditionNotMet(ConditionKind),

    /// A single-record read matched more than one row
    #[error("more than one record exists for {0}")]
    TooManyResults(String),

    /// A returned row does not belong to the requested key
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A synchronous wait exceeded its bound
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The statement was rejected or the driver failed internally
    #[error("transport failure: {0}")]
    TransportFailure(#[source] DriverError),

    /// An API contract was violated (invalid builder combination, double subscribe)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The operation was cancelled before it completed
    #[error("operation cancelled")]
    Cancelled,

    /// A column value could not be decoded into the requested type
    #[error("cannot decode column '{column}': {message}")]
    Decode {
        /// The column name
        column: String,
        /// What went wrong
        message: String,
    },

    /// Session configuration could not be parsed or is inconsistent
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Any other driver failure
    #[error("driver error: {0}")]
    Driver(#[source] DriverError),
}

impl CqlError {
    /// Create a schema mismatch error
    pub fn schema(message: impl Into<String>) -> Self {
        CqlError::SchemaMismatch(message.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        CqlError::InvalidState(message.into())
    }

    /// Create a decode error for a column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        CqlError::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// The condition kind when this is [`CqlError::ConditionNotMet`]
    pub fn condition_kind(&self) -> Option<ConditionKind> {
        match self {
            CqlError::ConditionNotMet(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Whether this failure came from the transport layer
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, CqlError::TransportFailure(_))
    }
}

impl From<DriverError> for CqlError {
    fn from(error: DriverError) -> Self {
        let root = error.root_cause();
        if root.invalidates_caches() {
            CqlError::TransportFailure(root)
        } else {
            CqlError::Driver(root)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_strips_wrappers() {
        let inner = DriverError::InvalidQuery("unconfigured table".into());
        let wrapped = DriverError::execution(
            "outer",
            DriverError::execution("inner", inner.clone()),
        );

        assert_eq!(wrapped.root_cause(), inner);
    }

    #[test]
    fn test_root_cause_of_plain_error() {
        let error = DriverError::Other("boom".into());
        assert_eq!(error.clone().root_cause(), error);
    }

    #[test]
    fn test_from_driver_error_classification() {
        let err: CqlError = DriverError::execution(
            "wrapped",
            DriverError::Internal("codec".into()),
        )
        .into();
        assert!(err.is_transport_failure());

        let err: CqlError = DriverError::NoHostAvailable("all down".into()).into();
        assert!(matches!(err, CqlError::Driver(DriverError::NoHostAvailable(_))));
    }

    #[test]
    fn test_condition_kind() {
        let err = CqlError::ConditionNotMet(ConditionKind::AlreadyExists);
        assert_eq!(err.condition_kind(), Some(ConditionKind::AlreadyExists));
        assert_eq!(err.to_string(), "condition not met: record already exists");

        assert_eq!(CqlError::Cancelled.condition_kind(), None);
    }

    #[test]
    fn test_error_display() {
        let err = CqlError::schema("column 'nme' is not defined in table users");
        assert_eq!(
            err.to_string(),
            "schema mismatch: column 'nme' is not defined in table users"
        );

        let err = CqlError::decode("age", "expected int");
        assert_eq!(err.to_string(), "cannot decode column 'age': expected int");
    }
}
