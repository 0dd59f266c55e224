//! Opaque fetch predicates delegated to SQLite.

use rusqlite::types::Value;

/// A SQL boolean expression evaluated by the store over `records` rows.
///
/// The expression may reference the `kind`, `record_id` and `payload`
/// columns. Entity fields live inside the JSON `payload` column and are
/// addressed with SQLite's JSON operators, for example
/// `payload ->> 'id' = ?`.
///
/// Expressions are never parsed here; SQLite accepts or rejects them at
/// statement preparation time.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    expr: String,
    params: Vec<Value>,
}

impl Predicate {
    /// Builds a predicate with no bind values.
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            params: Vec::new(),
        }
    }

    /// Builds a predicate with positional bind values for its `?` placeholders.
    ///
    /// Values bind in order after the record kind, which the store always
    /// binds first.
    pub fn with_params(expr: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            expr: expr.into(),
            params,
        }
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}
