//! Ordered parameter storage for one compilation.

use crate::value::SqlValue;
use serde_json::Value;
use tokio_postgres::types::ToSql;

/// Parameters bound to `$1..$n`, in placeholder order.
///
/// A fresh list is created for every compilation, so numbering always starts at 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamList {
    params: Vec<SqlValue>,
}

impl ParamList {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Add a parameter and return its 1-based index.
    pub fn push(&mut self, value: SqlValue) -> usize {
        self.params.push(value);
        self.params.len()
    }

    /// Bind a JSON value and return its `$n` placeholder.
    pub fn placeholder(&mut self, value: &Value) -> String {
        format!("${}", self.push(SqlValue::from_json(value)))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn as_slice(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn into_vec(self) -> Vec<SqlValue> {
        self.params
    }
}

/// Parameter refs compatible with `tokio-postgres`.
pub fn as_refs(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}
