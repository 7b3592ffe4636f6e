use std::fmt;

use super::CqlQueryBuilder;
use crate::value::{CqlValue, Value};

/// The relation between a column and a value in a where or if clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `=`
    Eq,
    /// `!=`, only valid in if clauses
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `IN`
    In,
    /// `CONTAINS`
    Contains,
    /// `CONTAINS KEY`
    ContainsKey,
}

impl Relation {
    /// Get the CQL operator
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Eq => "=",
            Relation::NotEq => "!=",
            Relation::Lt => "<",
            Relation::Lte => "<=",
            Relation::Gt => ">",
            Relation::Gte => ">=",
            Relation::In => "IN",
            Relation::Contains => "CONTAINS",
            Relation::ContainsKey => "CONTAINS KEY",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `column relation value` predicate
///
/// # Example
///
/// ```
/// use cql_dao::query_builder::{Clause, Relation};
///
/// let clause = Clause::gt("age", 18);
/// assert_eq!(clause.column(), "age");
/// assert_eq!(clause.relation(), Relation::Gt);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    column: String,
    relation: Relation,
    value: Value,
}

impl Clause {
    /// Create a clause
    pub fn new(column: impl Into<String>, relation: Relation, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            relation,
            value: value.into(),
        }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Relation::Eq, value)
    }

    /// `column != value`
    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Relation::NotEq, value)
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Relation::Lt, value)
    }

    /// `column <= value`
    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Relation::Lte, value)
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Relation::Gt, value)
    }

    /// `column >= value`
    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Relation::Gte, value)
    }

    /// `column IN (values...)`
    pub fn in_values<I, T>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::new(column, Relation::In, Value::list(values))
    }

    /// `column CONTAINS value`
    pub fn contains(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Relation::Contains, value)
    }

    /// `column CONTAINS KEY value`
    pub fn contains_key(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Relation::ContainsKey, value)
    }

    /// The column name
    pub fn column(&self) -> &str {
        &self.column
    }

    /// The relation
    pub fn relation(&self) -> Relation {
        self.relation
    }

    /// The uncoerced value
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Render the clause with an already coerced value
    pub(crate) fn render(&self, qb: &mut CqlQueryBuilder, value: CqlValue) {
        qb.push_identifier(&self.column);
        qb.push_cql(" ");
        qb.push_cql(self.relation.as_str());
        qb.push_cql(" ");

        match (self.relation, value) {
            (Relation::In, CqlValue::List(items)) if qb.mode() == super::BindMode::Literals => {
                qb.push_cql("(");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        qb.push_cql(", ");
                    }
                    qb.push_literal(item);
                }
                qb.push_cql(")");
            }
            (_, value) => qb.push_bind_param(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_marker() {
        let mut qb = CqlQueryBuilder::prepared();
        Clause::eq("id", 1).render(&mut qb, CqlValue::Int(1));

        let (cql, binds) = qb.finish();
        assert_eq!(cql, "id = ?");
        assert_eq!(binds, vec![CqlValue::Int(1)]);
    }

    #[test]
    fn test_render_in_literal() {
        let mut qb = CqlQueryBuilder::literal();
        let clause = Clause::in_values("id", [1, 2]);
        clause.render(
            &mut qb,
            CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2)]),
        );
        assert_eq!(qb.cql(), "id IN (1, 2)");
    }

    #[test]
    fn test_render_contains_key() {
        let mut qb = CqlQueryBuilder::literal();
        Clause::contains_key("tags", "a").render(&mut qb, CqlValue::Text("a".into()));
        assert_eq!(qb.cql(), "tags CONTAINS KEY 'a'");
    }
}
