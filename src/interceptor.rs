//! Request interceptors
//!
//! A [`QueryInterceptor`] sees the request data of every query built from a
//! [`Dao`](crate::dao::Dao) it is registered on, before the statement is
//! built. It can pass the data on unchanged, return a rewritten copy, or fail
//! to veto the query; a vetoed query sends nothing to the driver.
//!
//! Interceptors run in registration order, each receiving the output of the
//! previous one. Counter updates are not intercepted.
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use cql_dao::error::{CqlError, Result};
//! use cql_dao::interceptor::{DeleteData, QueryInterceptor};
//!
//! /// Refuses deletes selected by where clauses
//! struct KeyedDeletesOnly;
//!
//! #[async_trait]
//! impl QueryInterceptor for KeyedDeletesOnly {
//!     async fn on_delete(&self, data: DeleteData) -> Result<DeleteData> {
//!         if data.selector.is_where() {
//!             return Err(CqlError::invalid_state("where deletes are not supported"));
//!         }
//!         Ok(data)
//!     }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::query::{KeySelector, SelectedColumn};
use crate::query_builder::Clause;
use crate::value::Value;

/// Request data of a single-row read
#[derive(Debug, Clone, PartialEq)]
pub struct SingleReadData {
    /// Full primary key
    pub key: Vec<(String, Value)>,
    /// Selected columns; empty selects every column
    pub columns: Vec<SelectedColumn>,
}

/// Request data of a multi-row read or count
#[derive(Debug, Clone, PartialEq)]
pub struct ListReadData {
    pub selector: KeySelector,
    /// Selected columns; ignored by counts
    pub columns: Vec<SelectedColumn>,
    pub limit: Option<i32>,
    pub allow_filtering: bool,
    pub fetch_size: Option<i32>,
    pub distinct: bool,
}

/// Request data of an insert
#[derive(Debug, Clone, PartialEq)]
pub struct InsertData {
    pub values: BTreeMap<String, Value>,
    pub if_not_exists: bool,
}

/// Request data of an update
///
/// Collection operations are not part of the data and pass through as built.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateData {
    pub selector: KeySelector,
    pub values: BTreeMap<String, Value>,
    pub only_if: Vec<Clause>,
}

/// Request data of a delete
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteData {
    pub selector: KeySelector,
    pub only_if: Vec<Clause>,
    pub if_exists: bool,
}

/// Hooks on the request side of queries
///
/// Every hook defaults to passing its data through.
#[async_trait]
pub trait QueryInterceptor: Send + Sync {
    async fn on_single_read(&self, data: SingleReadData) -> Result<SingleReadData> {
        Ok(data)
    }

    async fn on_list_read(&self, data: ListReadData) -> Result<ListReadData> {
        Ok(data)
    }

    async fn on_insert(&self, data: InsertData) -> Result<InsertData> {
        Ok(data)
    }

    async fn on_update(&self, data: UpdateData) -> Result<UpdateData> {
        Ok(data)
    }

    async fn on_delete(&self, data: DeleteData) -> Result<DeleteData> {
        Ok(data)
    }
}

/// An immutable, ordered chain of interceptors
#[derive(Clone)]
pub struct Interceptors {
    chain: Arc<[Arc<dyn QueryInterceptor>]>,
}

impl Default for Interceptors {
    fn default() -> Self {
        Self {
            chain: Arc::from(Vec::new()),
        }
    }
}

impl Interceptors {
    /// Copy with `interceptor` appended
    #[must_use]
    pub fn with(&self, interceptor: Arc<dyn QueryInterceptor>) -> Self {
        let chain: Vec<_> = self
            .chain
            .iter()
            .cloned()
            .chain(std::iter::once(interceptor))
            .collect();
        Self {
            chain: chain.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub(crate) async fn single_read(&self, mut data: SingleReadData) -> Result<SingleReadData> {
        for interceptor in self.chain.iter() {
            data = interceptor.on_single_read(data).await?;
        }
        Ok(data)
    }

    pub(crate) async fn list_read(&self, mut data: ListReadData) -> Result<ListReadData> {
        for interceptor in self.chain.iter() {
            data = interceptor.on_list_read(data).await?;
        }
        Ok(data)
    }

    pub(crate) async fn insert(&self, mut data: InsertData) -> Result<InsertData> {
        for interceptor in self.chain.iter() {
            data = interceptor.on_insert(data).await?;
        }
        Ok(data)
    }

    pub(crate) async fn update(&self, mut data: UpdateData) -> Result<UpdateData> {
        for interceptor in self.chain.iter() {
            data = interceptor.on_update(data).await?;
        }
        Ok(data)
    }

    pub(crate) async fn delete(&self, mut data: DeleteData) -> Result<DeleteData> {
        for interceptor in self.chain.iter() {
            data = interceptor.on_delete(data).await?;
        }
        Ok(data)
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("len", &self.chain.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CqlError;

    struct Rename(&'static str, &'static str);

    #[async_trait]
    impl QueryInterceptor for Rename {
        async fn on_insert(&self, mut data: InsertData) -> Result<InsertData> {
            if let Some(value) = data.values.remove(self.0) {
                data.values.insert(self.1.to_string(), value);
            }
            Ok(data)
        }
    }

    struct Refuse;

    #[async_trait]
    impl QueryInterceptor for Refuse {
        async fn on_insert(&self, _data: InsertData) -> Result<InsertData> {
            Err(CqlError::invalid_state("refused"))
        }
    }

    fn insert_data() -> InsertData {
        InsertData {
            values: BTreeMap::from([("a".to_string(), Value::Int(1))]),
            if_not_exists: false,
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let base = Interceptors::default();
        let chain = base
            .with(Arc::new(Rename("a", "b")))
            .with(Arc::new(Rename("b", "c")));

        assert!(base.is_empty());
        assert_eq!(chain.len(), 2);

        let data = chain.insert(insert_data()).await.unwrap();
        assert_eq!(data.values.keys().map(String::as_str).collect::<Vec<_>>(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_failure_stops_the_chain() {
        let chain = Interceptors::default()
            .with(Arc::new(Refuse))
            .with(Arc::new(Rename("a", "b")));

        assert!(matches!(
            chain.insert(insert_data()).await,
            Err(CqlError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_default_hooks_pass_through() {
        let chain = Interceptors::default().with(Arc::new(Refuse));
        let data = DeleteData {
            selector: KeySelector::keys([("id", 1)]),
            only_if: Vec::new(),
            if_exists: true,
        };

        assert_eq!(chain.delete(data.clone()).await.unwrap(), data);
    }
}
