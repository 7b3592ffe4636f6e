use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::counter::CounterMutationQuery;
use super::insert::InsertQuery;
use super::{
    extend_column, session_of, Executable, KeySelector, Mutation, MutationOptions, Mutations,
    QueryOptions,
};
use crate::context::ExecutionContext;
use crate::error::{CqlError, Result};
use crate::execution::ExecutionEngine;
use crate::interceptor::UpdateData;
use crate::query_builder::Clause;
use crate::record::MutationResult;
use crate::statement::{Statement, StatementBuilder};
use crate::types::ColumnRef;
use crate::value::{IntoColumnValue, Value};

/// An update of the rows a key or where clauses select
///
/// Writing [`Value::Null`] clears a column; an absent value leaves it alone.
#[derive(Debug, Clone)]
pub struct WriteQuery {
    ctx: ExecutionContext,
    selector: KeySelector,
    mutations: Mutations,
    only_if: Vec<Clause>,
}

impl WriteQuery {
    pub(crate) fn new(ctx: ExecutionContext, selector: KeySelector) -> Self {
        Self {
            ctx,
            selector,
            mutations: Mutations::default(),
            only_if: Vec::new(),
        }
    }

    fn with_mutations(&self, f: impl FnOnce(&mut Mutations)) -> Self {
        let mut query = self.clone();
        f(&mut query.mutations);
        query
    }

    /// Copy with a column value
    #[must_use]
    pub fn value(&self, name: impl Into<String>, value: impl IntoColumnValue) -> Self {
        match value.into_column_value().into_value() {
            Some(value) => self.with_mutations(|m| {
                m.values.insert(name.into(), value);
            }),
            None => self.clone(),
        }
    }

    /// Copy with the value of a typed column
    #[must_use]
    pub fn value_of<T: Into<Value>>(&self, column: &ColumnRef<T>, value: T) -> Self {
        self.value(column.name(), value.into())
    }

    /// Copy that adds an element to a set column
    #[must_use]
    pub fn add_set_value(&self, name: &str, value: impl Into<Value>) -> Self {
        self.add_set_values(name, [value])
    }

    /// Copy that adds elements to a set column
    #[must_use]
    pub fn add_set_values<I, V>(&self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items = values.into_iter().map(Into::into).collect();
        self.with_mutations(|m| extend_column(&mut m.set_add, name, items, true))
    }

    /// Copy that removes an element from a set column
    #[must_use]
    pub fn remove_set_value(&self, name: &str, value: impl Into<Value>) -> Self {
        self.remove_set_values(name, [value])
    }

    /// Copy that removes elements from a set column
    #[must_use]
    pub fn remove_set_values<I, V>(&self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items = values.into_iter().map(Into::into).collect();
        self.with_mutations(|m| extend_column(&mut m.set_remove, name, items, true))
    }

    /// Copy that appends an element to a list column
    #[must_use]
    pub fn append_list_value(&self, name: &str, value: impl Into<Value>) -> Self {
        self.append_list_values(name, [value])
    }

    /// Copy that appends elements to a list column
    #[must_use]
    pub fn append_list_values<I, V>(&self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items = values.into_iter().map(Into::into).collect();
        self.with_mutations(|m| extend_column(&mut m.list_append, name, items, false))
    }

    /// Copy that prepends an element to a list column
    #[must_use]
    pub fn prepend_list_value(&self, name: &str, value: impl Into<Value>) -> Self {
        self.prepend_list_values(name, [value])
    }

    /// Copy that prepends elements to a list column, keeping their order
    #[must_use]
    pub fn prepend_list_values<I, V>(&self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.with_mutations(|m| {
            if items.is_empty() {
                return;
            }
            let entry = m.list_prepend.entry(name.to_string()).or_default();
            entry.splice(0..0, items);
        })
    }

    /// Copy that removes every occurrence of an element from a list column
    #[must_use]
    pub fn remove_list_value(&self, name: &str, value: impl Into<Value>) -> Self {
        self.remove_list_values(name, [value])
    }

    /// Copy that removes every occurrence of elements from a list column
    #[must_use]
    pub fn remove_list_values<I, V>(&self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items = values.into_iter().map(Into::into).collect();
        self.with_mutations(|m| extend_column(&mut m.list_remove, name, items, true))
    }

    /// Copy that puts an entry into a map column
    #[must_use]
    pub fn put_map_value(&self, name: &str, key: impl Into<Value>, value: impl Into<Value>) -> Self {
        self.put_map_values(name, [(key, value)])
    }

    /// Copy that puts entries into a map column
    #[must_use]
    pub fn put_map_values<I, K, V>(&self, name: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        let entries: Vec<(Value, Value)> = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.with_mutations(|m| {
            if entries.is_empty() {
                return;
            }
            let target = m.map_put.entry(name.to_string()).or_default();
            for (key, value) in entries {
                match target.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => entry.1 = value,
                    None => target.push((key, value)),
                }
            }
        })
    }

    /// Copy that removes the entry with a key from a map column
    #[must_use]
    pub fn remove_map_value(&self, name: &str, key: impl Into<Value>) -> Self {
        self.remove_map_values(name, [key])
    }

    /// Copy that removes the entries with keys from a map column
    #[must_use]
    pub fn remove_map_values<I, K>(&self, name: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Value>,
    {
        let items = keys.into_iter().map(Into::into).collect();
        self.with_mutations(|m| extend_column(&mut m.map_remove, name, items, true))
    }

    /// Copy that only applies when a condition holds
    #[must_use]
    pub fn only_if(&self, clause: Clause) -> Self {
        let mut query = self.clone();
        query.only_if.push(clause);
        query
    }

    /// Convert into an insert of the key and values that only applies when no row exists
    ///
    /// Fails when the query selects rows by where clauses, carries only-if
    /// conditions, or mutates collections.
    pub fn if_not_exists(&self) -> Result<InsertQuery> {
        let KeySelector::Keys(keys) = &self.selector else {
            return Err(CqlError::invalid_state(
                "if not exists cannot be combined with where conditions",
            ));
        };
        if !self.only_if.is_empty() {
            return Err(CqlError::invalid_state(
                "if not exists cannot be combined with only if conditions",
            ));
        }
        if self.mutations.has_collection_ops() {
            return Err(CqlError::invalid_state(
                "if not exists cannot be combined with collection mutations",
            ));
        }

        let mut values = self.mutations.values.clone();
        for (column, value) in keys {
            values.insert(column.clone(), value.clone());
        }
        Ok(InsertQuery::with_values(self.ctx.clone(), values).if_not_exists())
    }

    /// Convert into a counter increment by one
    pub fn incr(&self, name: &str) -> Result<CounterMutationQuery> {
        self.incr_by(name, 1)
    }

    /// Convert into a counter decrement by one
    pub fn decr(&self, name: &str) -> Result<CounterMutationQuery> {
        self.incr_by(name, -1)
    }

    /// Convert into a counter decrement
    pub fn decr_by(&self, name: &str, amount: i64) -> Result<CounterMutationQuery> {
        let diff = amount
            .checked_neg()
            .ok_or_else(|| CqlError::invalid_state(format!("counter decrement {} out of range", amount)))?;
        self.incr_by(name, diff)
    }

    /// Convert into a counter update by a signed amount
    ///
    /// Fails when values or only-if conditions were supplied.
    pub fn incr_by(&self, name: &str, diff: i64) -> Result<CounterMutationQuery> {
        if !self.mutations.is_empty() {
            return Err(CqlError::invalid_state(
                "counter updates cannot be combined with value mutations",
            ));
        }
        if !self.only_if.is_empty() {
            return Err(CqlError::invalid_state(
                "counter updates cannot be combined with only if conditions",
            ));
        }
        Ok(CounterMutationQuery::new(
            self.ctx.clone(),
            self.selector.clone(),
            name,
            diff,
        ))
    }
}

impl QueryOptions for WriteQuery {
    fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    fn with_context(&self, context: ExecutionContext) -> Self {
        Self {
            ctx: context,
            ..self.clone()
        }
    }
}

impl MutationOptions for WriteQuery {}

impl Mutation for WriteQuery {
    fn execution_context(&self) -> &ExecutionContext {
        &self.ctx
    }

    fn build_statement(&self) -> BoxFuture<'static, Result<Statement>> {
        let query = self.clone();
        async move {
            let schema = query.ctx.session().table_schema(query.ctx.table()).await?;
            let data = query
                .ctx
                .interceptors()
                .update(UpdateData {
                    selector: query.selector.clone(),
                    values: query.mutations.values.clone(),
                    only_if: query.only_if.clone(),
                })
                .await?;
            let mutations = Mutations {
                values: data.values,
                ..query.mutations.clone()
            };
            StatementBuilder::new(&schema, query.ctx.spec()).update(
                &data.selector,
                &mutations,
                &data.only_if,
            )
        }
        .boxed()
    }
}

impl Executable for WriteQuery {
    type Output = MutationResult;

    fn execute_async(&self) -> BoxFuture<'static, Result<MutationResult>> {
        let statement = self.build_statement();
        let engine = ExecutionEngine::new(session_of(&self.ctx));
        async move { engine.execute_mutation(&statement.await?).await }.boxed()
    }
}
