//! Building CQL statements from query specifications
//!
//! [`StatementBuilder`] is pure: given a resolved [`TableSchema`] and the
//! execution parameters, it turns query data into a [`Statement`] without any
//! network access. Key-based queries become prepared statements whose values
//! are bound in marker order; where-clause queries become unprepared
//! statements with inlined literals.

use std::collections::BTreeMap;

use crate::coercion::{coerce, coerce_clause, coerce_column};
use crate::context::ExecutionSpec;
use crate::driver::StatementOptions;
use crate::error::{ConditionKind, CqlError, Result};
use crate::metadata::TableSchema;
use crate::query::{KeySelector, Mutations, ReadOptions, Selection};
use crate::query_builder::{BindMode, Clause, CqlQueryBuilder};
use crate::types::CqlType;
use crate::value::{CqlValue, Value};

/// The lightweight-transaction condition of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conditional {
    /// No condition
    Unconditional,
    /// `IF NOT EXISTS`
    IfNotExists,
    /// `IF column = value ...`
    OnlyIf,
    /// `IF EXISTS`
    IfExists,
}

impl Conditional {
    /// Whether the statement carries a condition
    pub fn is_conditional(&self) -> bool {
        !matches!(self, Conditional::Unconditional)
    }

    /// The failure reported when the condition is not applied
    pub fn failure_kind(&self) -> Option<ConditionKind> {
        match self {
            Conditional::Unconditional => None,
            Conditional::IfNotExists => Some(ConditionKind::AlreadyExists),
            Conditional::OnlyIf | Conditional::IfExists => Some(ConditionKind::ConditionMismatch),
        }
    }
}

/// How a statement is sent
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// Prepared once, bound with values in marker order
    Prepared {
        /// Statement text with `?` markers
        query: String,
        /// Values in marker order
        values: Vec<CqlValue>,
    },
    /// Sent as text with inlined literals
    Simple {
        /// Statement text
        query: String,
    },
}

/// A built statement
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    kind: StatementKind,
    options: StatementOptions,
    condition: Conditional,
}

impl Statement {
    fn from_builder(qb: CqlQueryBuilder, options: StatementOptions, condition: Conditional) -> Self {
        let mode = qb.mode();
        let (query, values) = qb.finish();
        let kind = match mode {
            BindMode::Markers => StatementKind::Prepared { query, values },
            BindMode::Literals => StatementKind::Simple { query },
        };
        Self {
            kind,
            options,
            condition,
        }
    }

    /// How the statement is sent
    pub fn kind(&self) -> &StatementKind {
        &self.kind
    }

    /// The statement text
    pub fn query(&self) -> &str {
        match &self.kind {
            StatementKind::Prepared { query, .. } | StatementKind::Simple { query } => query,
        }
    }

    /// Bound values; empty for simple statements
    pub fn values(&self) -> &[CqlValue] {
        match &self.kind {
            StatementKind::Prepared { values, .. } => values,
            StatementKind::Simple { .. } => &[],
        }
    }

    /// Whether the statement is prepared
    pub fn is_prepared(&self) -> bool {
        matches!(self.kind, StatementKind::Prepared { .. })
    }

    /// Driver options
    pub fn options(&self) -> &StatementOptions {
        &self.options
    }

    /// The lightweight-transaction condition
    pub fn condition(&self) -> Conditional {
        self.condition
    }
}

/// A single-row read together with the key values it was sent with
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRead {
    /// The select statement
    pub statement: Statement,
    /// Key columns and the coerced values bound for them
    pub key: Vec<(String, CqlValue)>,
}

/// Turns query data into statements for one table
pub struct StatementBuilder<'a> {
    schema: &'a TableSchema,
    spec: &'a ExecutionSpec,
}

impl<'a> StatementBuilder<'a> {
    /// Create a builder for a table schema and execution parameters
    pub fn new(schema: &'a TableSchema, spec: &'a ExecutionSpec) -> Self {
        Self { schema, spec }
    }

    fn begin(&self, selector: Option<&KeySelector>) -> CqlQueryBuilder {
        match selector {
            Some(KeySelector::Where(_)) => CqlQueryBuilder::literal(),
            _ => CqlQueryBuilder::prepared(),
        }
    }

    fn push_table(&self, qb: &mut CqlQueryBuilder) {
        let table = self.schema.table();
        qb.push_table(Some(table.keyspace()), table.name());
    }

    fn push_where(&self, qb: &mut CqlQueryBuilder, selector: &KeySelector) -> Result<Vec<(String, CqlValue)>> {
        let mut key = Vec::new();
        match selector {
            KeySelector::Keys(keys) => {
                for (i, (column, value)) in keys.iter().enumerate() {
                    qb.push_cql(if i == 0 { " WHERE " } else { " AND " });
                    let coerced = coerce_column(self.schema, column, value)?;
                    qb.push_identifier(column);
                    qb.push_cql(" = ");
                    qb.push_bind_param(coerced.clone());
                    key.push((column.clone(), coerced));
                }
            }
            KeySelector::Where(clauses) => self.push_clauses(qb, " WHERE ", clauses)?,
        }
        Ok(key)
    }

    fn push_clauses(&self, qb: &mut CqlQueryBuilder, keyword: &str, clauses: &[Clause]) -> Result<()> {
        for (i, clause) in clauses.iter().enumerate() {
            qb.push_cql(if i == 0 { keyword } else { " AND " });
            let value = coerce_clause(self.schema, clause)?;
            clause.render(qb, value);
        }
        Ok(())
    }

    /// Push `USING TTL ? AND TIMESTAMP ?` for whichever of the two is set
    fn push_using(&self, qb: &mut CqlQueryBuilder, with_ttl: bool) {
        let ttl = if with_ttl { self.spec.ttl_seconds() } else { None };
        let writetime = self.spec.writetime_micros();

        let mut keyword = " USING ";
        if let Some(ttl) = ttl {
            qb.push_cql(keyword);
            qb.push_cql("TTL ");
            qb.push_bind_param(CqlValue::Int(ttl));
            keyword = " AND ";
        }
        if let Some(writetime) = writetime {
            qb.push_cql(keyword);
            qb.push_cql("TIMESTAMP ");
            qb.push_bind_param(CqlValue::BigInt(writetime));
        }
    }

    /// `INSERT INTO ks.t (a, b) VALUES (?, ?) [IF NOT EXISTS] [USING TTL ? AND TIMESTAMP ?]`
    pub fn insert(&self, values: &BTreeMap<String, Value>, if_not_exists: bool) -> Result<Statement> {
        if values.is_empty() {
            return Err(CqlError::invalid_state("insert without any values"));
        }

        let mut qb = CqlQueryBuilder::prepared();
        qb.push_cql("INSERT INTO ");
        self.push_table(&mut qb);
        qb.push_cql(" (");
        for (i, column) in values.keys().enumerate() {
            if i > 0 {
                qb.push_cql(", ");
            }
            qb.push_identifier(column);
        }
        qb.push_cql(") VALUES (");
        for (i, (column, value)) in values.iter().enumerate() {
            if i > 0 {
                qb.push_cql(", ");
            }
            qb.push_bind_param(coerce_column(self.schema, column, value)?);
        }
        qb.push_cql(")");

        if if_not_exists {
            qb.push_cql(" IF NOT EXISTS");
        }
        self.push_using(&mut qb, true);

        let condition = if if_not_exists {
            Conditional::IfNotExists
        } else {
            Conditional::Unconditional
        };
        Ok(Statement::from_builder(
            qb,
            self.spec.statement_options(if_not_exists),
            condition,
        ))
    }

    /// `UPDATE ks.t [USING ...] SET ... WHERE ... [IF ...]`
    ///
    /// The grammar places `USING` before `SET`, so TTL and writetime are the
    /// first values bound.
    pub fn update(
        &self,
        selector: &KeySelector,
        mutations: &Mutations,
        only_if: &[Clause],
    ) -> Result<Statement> {
        if mutations.is_empty() {
            return Err(CqlError::invalid_state("update without any values to write"));
        }

        let mut qb = self.begin(Some(selector));
        qb.push_cql("UPDATE ");
        self.push_table(&mut qb);
        self.push_using(&mut qb, true);
        qb.push_cql(" SET ");

        let mut first = true;
        let mut separator = |qb: &mut CqlQueryBuilder| {
            if !first {
                qb.push_cql(", ");
            }
            first = false;
        };

        for (column, value) in &mutations.values {
            separator(&mut qb);
            qb.push_identifier(column);
            qb.push_cql(" = ");
            qb.push_bind_param(coerce_column(self.schema, column, value)?);
        }
        for (column, items) in &mutations.set_add {
            separator(&mut qb);
            self.push_collection_op(&mut qb, column, "+", Value::Set(items.clone()), false)?;
        }
        for (column, items) in &mutations.set_remove {
            separator(&mut qb);
            self.push_collection_op(&mut qb, column, "-", Value::Set(items.clone()), false)?;
        }
        for (column, items) in &mutations.list_append {
            separator(&mut qb);
            self.push_collection_op(&mut qb, column, "+", Value::List(items.clone()), false)?;
        }
        for (column, items) in &mutations.list_prepend {
            separator(&mut qb);
            self.push_collection_op(&mut qb, column, "+", Value::List(items.clone()), true)?;
        }
        for (column, items) in &mutations.list_remove {
            separator(&mut qb);
            self.push_collection_op(&mut qb, column, "-", Value::List(items.clone()), false)?;
        }
        for (column, entries) in &mutations.map_put {
            separator(&mut qb);
            self.push_collection_op(&mut qb, column, "+", Value::Map(entries.clone()), false)?;
        }
        for (column, keys) in &mutations.map_remove {
            separator(&mut qb);
            let key_type = self.map_key_type(column)?;
            let value = coerce(self.schema, &CqlType::set(key_type), &Value::Set(keys.clone()), column)?;
            qb.push_identifier(column);
            qb.push_cql(" = ");
            qb.push_identifier(column);
            qb.push_cql(" - ");
            qb.push_bind_param(value);
        }

        self.push_where(&mut qb, selector)?;
        self.push_clauses(&mut qb, " IF ", only_if)?;

        let conditional = !only_if.is_empty();
        let condition = if conditional {
            Conditional::OnlyIf
        } else {
            Conditional::Unconditional
        };
        Ok(Statement::from_builder(
            qb,
            self.spec.statement_options(conditional),
            condition,
        ))
    }

    fn push_collection_op(
        &self,
        qb: &mut CqlQueryBuilder,
        column: &str,
        operator: &str,
        value: Value,
        prepend: bool,
    ) -> Result<()> {
        let value = coerce_column(self.schema, column, &value)?;
        qb.push_identifier(column);
        qb.push_cql(" = ");
        if prepend {
            qb.push_bind_param(value);
            qb.push_cql(" ");
            qb.push_cql(operator);
            qb.push_cql(" ");
            qb.push_identifier(column);
        } else {
            qb.push_identifier(column);
            qb.push_cql(" ");
            qb.push_cql(operator);
            qb.push_cql(" ");
            qb.push_bind_param(value);
        }
        Ok(())
    }

    fn map_key_type(&self, column: &str) -> Result<CqlType> {
        match self.schema.column_type(column)? {
            CqlType::Map(key, _) => Ok((**key).clone()),
            other => Err(CqlError::schema(format!(
                "column '{}' of type {} is not a map",
                column, other
            ))),
        }
    }

    /// `UPDATE ks.t SET c = c + ? WHERE ...`
    ///
    /// A negative diff is written as a positive amount subtracted.
    pub fn counter(&self, selector: &KeySelector, column: &str, diff: i64) -> Result<Statement> {
        let column_type = self.schema.column_type(column)?;
        if *column_type != CqlType::Counter {
            return Err(CqlError::schema(format!(
                "column '{}' of type {} is not a counter",
                column, column_type
            )));
        }

        let (operator, amount) = if diff >= 0 {
            ("+", diff)
        } else {
            let amount = i64::try_from(diff.unsigned_abs())
                .map_err(|_| CqlError::invalid_state(format!("counter diff {} out of range", diff)))?;
            ("-", amount)
        };

        let mut qb = self.begin(Some(selector));
        qb.push_cql("UPDATE ");
        self.push_table(&mut qb);
        qb.push_cql(" SET ");
        qb.push_identifier(column);
        qb.push_cql(" = ");
        qb.push_identifier(column);
        qb.push_cql(" ");
        qb.push_cql(operator);
        qb.push_cql(" ");
        qb.push_bind_param(CqlValue::Counter(amount));
        self.push_where(&mut qb, selector)?;

        Ok(Statement::from_builder(
            qb,
            self.spec.statement_options(false),
            Conditional::Unconditional,
        ))
    }

    /// `DELETE [m[?], ...] FROM ks.t [USING TIMESTAMP ?] WHERE ... [IF EXISTS | IF ...]`
    pub fn delete(
        &self,
        selector: &KeySelector,
        map_removals: &BTreeMap<String, Vec<Value>>,
        only_if: &[Clause],
        if_exists: bool,
    ) -> Result<Statement> {
        let mut qb = self.begin(Some(selector));
        qb.push_cql("DELETE");

        let mut first = true;
        for (column, keys) in map_removals {
            let key_type = self.map_key_type(column)?;
            for key in keys {
                qb.push_cql(if first { " " } else { ", " });
                first = false;
                let path = format!("{}[key]", column);
                let key = coerce(self.schema, &key_type, key, &path)?;
                qb.push_identifier(column);
                qb.push_cql("[");
                qb.push_bind_param(key);
                qb.push_cql("]");
            }
        }

        qb.push_cql(" FROM ");
        self.push_table(&mut qb);
        self.push_using(&mut qb, false);
        self.push_where(&mut qb, selector)?;

        let condition = if if_exists {
            qb.push_cql(" IF EXISTS");
            Conditional::IfExists
        } else if !only_if.is_empty() {
            self.push_clauses(&mut qb, " IF ", only_if)?;
            Conditional::OnlyIf
        } else {
            Conditional::Unconditional
        };

        Ok(Statement::from_builder(
            qb,
            self.spec.statement_options(condition.is_conditional()),
            condition,
        ))
    }

    fn push_selection(&self, qb: &mut CqlQueryBuilder, selection: &Selection) -> Result<()> {
        if selection.is_all() {
            qb.push_cql("*");
            return Ok(());
        }

        for (i, column) in selection.columns.iter().enumerate() {
            self.schema.column(&column.name)?;
            if i > 0 {
                qb.push_cql(", ");
            }
            qb.push_identifier(&column.name);
            if column.writetime {
                qb.push_cql(", writetime(");
                qb.push_identifier(&column.name);
                qb.push_cql(")");
            }
            if column.ttl {
                qb.push_cql(", ttl(");
                qb.push_identifier(&column.name);
                qb.push_cql(")");
            }
        }
        Ok(())
    }

    fn push_read_tail(&self, qb: &mut CqlQueryBuilder, read: &ReadOptions) {
        if let Some(limit) = read.limit {
            qb.push_cql(" LIMIT ");
            qb.push_bind_param(CqlValue::Int(limit));
        }
        if read.allow_filtering {
            qb.push_cql(" ALLOW FILTERING");
        }
    }

    fn read_options(&self, read: &ReadOptions) -> StatementOptions {
        StatementOptions {
            fetch_size: read.fetch_size,
            ..self.spec.statement_options(false)
        }
    }

    /// Select a single row by its full key
    ///
    /// Key columns are added to an explicit selection so the returned row can
    /// be checked against the key that was sent.
    pub fn select_single(&self, keys: &[(String, Value)], selection: &Selection) -> Result<KeyedRead> {
        let mut selection = selection.clone();
        if !selection.is_all() {
            for (column, _) in keys {
                if !selection.columns.iter().any(|c| &c.name == column) {
                    selection = selection.with_column(column, false, false);
                }
            }
        }

        let selector = KeySelector::Keys(keys.to_vec());
        let mut qb = CqlQueryBuilder::prepared();
        qb.push_cql("SELECT ");
        self.push_selection(&mut qb, &selection)?;
        qb.push_cql(" FROM ");
        self.push_table(&mut qb);
        let key = self.push_where(&mut qb, &selector)?;

        Ok(KeyedRead {
            statement: Statement::from_builder(
                qb,
                self.spec.statement_options(false),
                Conditional::Unconditional,
            ),
            key,
        })
    }

    /// `SELECT [DISTINCT] cols FROM ks.t [WHERE ...] [LIMIT ?] [ALLOW FILTERING]`
    pub fn select(
        &self,
        selector: &KeySelector,
        selection: &Selection,
        read: &ReadOptions,
    ) -> Result<Statement> {
        let mut qb = self.begin(Some(selector));
        qb.push_cql("SELECT ");
        if read.distinct {
            qb.push_cql("DISTINCT ");
        }
        self.push_selection(&mut qb, selection)?;
        qb.push_cql(" FROM ");
        self.push_table(&mut qb);
        self.push_where(&mut qb, selector)?;
        self.push_read_tail(&mut qb, read);

        Ok(Statement::from_builder(
            qb,
            self.read_options(read),
            Conditional::Unconditional,
        ))
    }

    /// `SELECT count(*) FROM ks.t [WHERE ...] [LIMIT ?] [ALLOW FILTERING]`
    pub fn count(&self, selector: &KeySelector, read: &ReadOptions) -> Result<Statement> {
        let mut qb = self.begin(Some(selector));
        qb.push_cql("SELECT count(*) FROM ");
        self.push_table(&mut qb);
        self.push_where(&mut qb, selector)?;
        self.push_read_tail(&mut qb, read);

        Ok(Statement::from_builder(
            qb,
            self.read_options(read),
            Conditional::Unconditional,
        ))
    }
}
