//! The CQL statement text builder
//!
//! [`CqlQueryBuilder`] assembles statement text and collects bound values in
//! exactly the order their markers are emitted. In [`BindMode::Literals`] the
//! same calls inline the values instead, which is how where-clause statements
//! are built for unprepared execution.

use std::borrow::Cow;

use crate::value::CqlValue;

mod clause;

pub use clause::{Clause, Relation};

const RESERVED: &[&str] = &[
    "add", "allow", "alter", "and", "apply", "asc", "authorize", "batch", "begin", "by",
    "columnfamily", "create", "delete", "desc", "describe", "drop", "entries", "execute", "from",
    "full", "grant", "if", "in", "index", "infinity", "insert", "into", "is", "keyspace", "limit",
    "modify", "nan", "norecursive", "not", "null", "of", "on", "or", "order", "primary", "rename",
    "replace", "revoke", "schema", "select", "set", "table", "to", "token", "truncate", "unlogged",
    "update", "use", "using", "view", "where", "with",
];

/// Quote an identifier unless it is a plain lowercase, non-reserved name
pub fn quote_identifier(name: &str) -> Cow<'_, str> {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !RESERVED.contains(&name);

    if plain {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// How values pushed through [`CqlQueryBuilder::push_bind_param`] are emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// Emit `?` and collect the value for positional binding
    Markers,
    /// Inline the value as a CQL literal
    Literals,
}

/// Constructs CQL statements
#[derive(Debug)]
pub struct CqlQueryBuilder {
    cql: String,
    binds: Vec<CqlValue>,
    mode: BindMode,
}

impl CqlQueryBuilder {
    /// Construct a builder emitting bind markers
    pub fn prepared() -> Self {
        Self::with_mode(BindMode::Markers)
    }

    /// Construct a builder inlining literals
    pub fn literal() -> Self {
        Self::with_mode(BindMode::Literals)
    }

    /// Construct a builder with the given bind mode
    pub fn with_mode(mode: BindMode) -> Self {
        Self {
            cql: String::new(),
            binds: Vec::new(),
            mode,
        }
    }

    /// The bind mode
    pub fn mode(&self) -> BindMode {
        self.mode
    }

    /// Get the current CQL string
    pub fn cql(&self) -> &str {
        &self.cql
    }

    /// Values collected so far, in marker order
    pub fn binds(&self) -> &[CqlValue] {
        &self.binds
    }

    /// Append raw CQL
    pub fn push_cql(&mut self, cql: &str) {
        self.cql.push_str(cql);
    }

    /// Append an identifier, quoted when required
    pub fn push_identifier(&mut self, identifier: &str) {
        let quoted = quote_identifier(identifier);
        self.cql.push_str(&quoted);
    }

    /// Append an optionally keyspace-qualified table name
    pub fn push_table(&mut self, keyspace: Option<&str>, table: &str) {
        if let Some(keyspace) = keyspace {
            self.push_identifier(keyspace);
            self.push_cql(".");
        }
        self.push_identifier(table);
    }

    /// Append a value as a marker or a literal, depending on the bind mode
    pub fn push_bind_param(&mut self, value: CqlValue) {
        match self.mode {
            BindMode::Markers => {
                self.cql.push('?');
                self.binds.push(value);
            }
            BindMode::Literals => self.push_literal(&value),
        }
    }

    /// Append a value as a literal regardless of the bind mode
    pub fn push_literal(&mut self, value: &CqlValue) {
        self.cql.push_str(&value.to_cql_literal());
    }

    /// Finish the statement, returning the text and its bound values
    pub fn finish(self) -> (String, Vec<CqlValue>) {
        (self.cql, self.binds)
    }
}
