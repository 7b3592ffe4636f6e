//! # CQL data access
//!
//! This crate turns typed mutation and read requests into prepared CQL
//! statements, executes them asynchronously through a [`CqlDriver`], and
//! exposes results as mutation outcomes, optional single records, counts, or
//! backpressure-aware record streams.
//!
//! The wire protocol is not implemented here: a driver supplies statement
//! preparation, execution, paging and schema lookup through the narrow
//! [`CqlDriver`] contract. [`replay::ReplayDriver`] is a scripted driver for
//! tests.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn example(driver: std::sync::Arc<dyn cql_dao::CqlDriver>) -> cql_dao::Result<()> {
//! use cql_dao::prelude::*;
//!
//! let session = DbSession::connect(driver, SessionConfig::new("shop"))?;
//! let users = Dao::new(session, "users");
//!
//! users
//!     .insert()
//!     .value("id", 42)
//!     .value("name", "x")
//!     .if_not_exists()
//!     .execute_async()
//!     .await?;
//!
//! users
//!     .write_with_key("id", 42)
//!     .value("name", "y")
//!     .only_if(Clause::eq("name", "x"))
//!     .execute_async()
//!     .await?;
//!
//! if let Some(user) = users.read_with_key("id", 42).execute_async().await? {
//!     println!("{}", user);
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod bridge;
pub mod cache;
pub mod coercion;
pub mod context;
pub mod dao;
pub mod driver;
pub mod error;
pub mod execution;
pub mod interceptor;
pub mod metadata;
pub mod query;
pub mod query_builder;
pub mod record;
pub mod replay;
pub mod session;
pub mod statement;
pub mod stream;
pub mod tracing_support;
pub mod types;
pub mod value;

// Re-exports
pub use driver::CqlDriver;
pub use error::{CqlError, Result};
pub use session::{DbSession, SessionConfig};

/// Everything needed to build and execute queries
pub mod prelude {
    pub use crate::batch::{BatchMutationQuery, BatchType};
    pub use crate::context::{ConsistencyLevel, RetryPolicy};
    pub use crate::dao::Dao;
    pub use crate::error::{ConditionKind, CqlError, Result};
    pub use crate::interceptor::QueryInterceptor;
    pub use crate::query::{Executable, Mutation, MutationOptions, QueryOptions};
    pub use crate::query_builder::Clause;
    pub use crate::record::{MutationResult, Record};
    pub use crate::session::{DbSession, SessionConfig};
    pub use crate::stream::{RecordStream, Subscriber, Subscription};
    pub use crate::types::ColumnRef;
    pub use crate::value::{ColumnValue, Value};
}
