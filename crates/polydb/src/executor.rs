//! The provider seam.
//!
//! Builders produce a [`Statement`]; an [`Executor`] runs it and hands back
//! decoded rows. The direct-postgres backend lives in [`crate::postgres`];
//! other providers plug in by implementing these traits.

use crate::compiler::{self, COUNT_COLUMN, CompiledQuery, CountSource};
use crate::error::DbError;
use crate::query::Query;
use crate::row::Row;
use crate::rpc::{self, RpcCall};
use crate::value::SqlValue;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Cancels an in-flight round trip when triggered.
pub type AbortSignal = tokio_util::sync::CancellationToken;

/// What to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(Query),
    Rpc(RpcCall),
    /// Raw SQL with `$n` placeholders.
    Raw { sql: String, params: Vec<Value> },
}

impl Statement {
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Query(q) => q.operation.kind(),
            Statement::Rpc(_) => "rpc",
            Statement::Raw { .. } => "raw",
        }
    }

    /// Compile to SQL for SQL-speaking backends.
    pub fn compile(&self) -> Result<CompiledQuery, DbError> {
        match self {
            Statement::Query(query) => compiler::compile(query),
            Statement::Rpc(call) => rpc::compile_rpc(call),
            Statement::Raw { sql, params } => Ok(CompiledQuery {
                sql: sql.clone(),
                params: params.iter().map(SqlValue::from_json).collect(),
                count: None,
            }),
        }
    }
}

/// Decoded result of one round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub rows: Vec<Row>,
    pub count: Option<i64>,
}

impl RowSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows, count: None }
    }

    /// Pull the count column out of `rows` according to `source`.
    pub fn with_count_source(mut rows: Vec<Row>, source: Option<CountSource>) -> Self {
        match source {
            None => Self::new(rows),
            Some(CountSource::Head) => {
                let count = rows
                    .first()
                    .and_then(|r| r.get(COUNT_COLUMN))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                Self {
                    rows: Vec::new(),
                    count: Some(count),
                }
            }
            Some(CountSource::Window) => {
                let mut count = None;
                for row in &mut rows {
                    if let Some(v) = row.shift_remove(COUNT_COLUMN) {
                        count = count.or_else(|| v.as_i64());
                    }
                }
                Self {
                    rows,
                    count: Some(count.unwrap_or(0)),
                }
            }
        }
    }
}

/// Runs statements against a backend.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute one statement. When `signal` fires first the round trip is
    /// abandoned with a canceled error.
    async fn run(&self, statement: &Statement, signal: Option<&AbortSignal>) -> Result<RowSet, DbError>;

    /// Start a transaction. Executors that are already inside one start a nested scope.
    async fn begin(&self) -> Result<Arc<dyn Transaction>, DbError>;

    /// Release backend resources.
    async fn shutdown(&self) {}
}

/// An open transaction. Every statement run through it uses the same connection.
#[async_trait]
pub trait Transaction: Executor {
    async fn commit(&self) -> Result<(), DbError>;
    async fn rollback(&self) -> Result<(), DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Vec<Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn window_count_is_stripped() {
        let set = RowSet::with_count_source(
            rows(vec![
                json!({"id": 1, "__polydb_count": 7}),
                json!({"id": 2, "__polydb_count": 7}),
            ]),
            Some(CountSource::Window),
        );
        assert_eq!(set.count, Some(7));
        assert_eq!(set.rows, rows(vec![json!({"id": 1}), json!({"id": 2})]));
    }

    #[test]
    fn head_count_has_no_rows() {
        let set = RowSet::with_count_source(
            rows(vec![json!({"__polydb_count": 3})]),
            Some(CountSource::Head),
        );
        assert!(set.rows.is_empty());
        assert_eq!(set.count, Some(3));
    }

    #[test]
    fn raw_statement_binds_as_is() {
        let compiled = Statement::Raw {
            sql: "select $1::int + $2::int".into(),
            params: vec![json!(1), json!(2)],
        }
        .compile()
        .unwrap();
        assert_eq!(compiled.params.len(), 2);
        assert!(compiled.count.is_none());
    }
}
