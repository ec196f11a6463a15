//! Stored-procedure calls.
//!
//! Functions are called with named arguments:
//!
//! ```ignore
//! let result = client
//!     .rpc("next_invoice_number", json!({"org_id": org}))
//!     .single()
//!     .await;
//! // SELECT * FROM "next_invoice_number"("org_id" => $1)
//! ```
//!
//! A function that returns a scalar comes back as a one-column result set. When
//! every row has exactly one column, rows are unwrapped to their values unless
//! [`RpcBuilder::keep_rows`] is set.

use crate::builder::exactly_one;
use crate::compiler::{CompiledQuery, ParamList};
use crate::error::{DbError, DbResult};
use crate::executor::{AbortSignal, Executor, Statement};
use crate::ident::{quote_ident, table_ref};
use crate::row::Row;
use serde_json::{Map, Value};
use std::sync::Arc;

/// A stored-procedure invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub function: String,
    pub args: Map<String, Value>,
    pub schema: Option<String>,
}

impl RpcCall {
    pub fn new(function: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            function: function.into(),
            args,
            schema: None,
        }
    }

    /// Function name with the schema applied when it is not already qualified.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) if !self.function.contains('.') => format!("{schema}.{}", self.function),
            _ => self.function.clone(),
        }
    }
}

/// `SELECT * FROM fn("a" => $1, ...)`.
pub fn compile_rpc(call: &RpcCall) -> Result<CompiledQuery, DbError> {
    if call.function.trim().is_empty() {
        return Err(DbError::build("rpc() needs a function name"));
    }
    let function = table_ref(&call.qualified_name())?;
    let mut params = ParamList::new();
    let args: Vec<String> = call
        .args
        .iter()
        .map(|(name, value)| format!("{} => {}", quote_ident(name), params.placeholder(value)))
        .collect();
    let sql = format!("SELECT * FROM {function}({})", args.join(", "));
    Ok(CompiledQuery::new(sql, params))
}

/// Unwrap single-column rows to their values.
pub fn unwrap_scalars(rows: Vec<Row>, keep_rows: bool) -> Vec<Value> {
    let scalar = !keep_rows && !rows.is_empty() && rows.iter().all(|r| r.len() == 1);
    rows.into_iter()
        .map(|row| {
            if scalar {
                row.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null)
            } else {
                Value::Object(row)
            }
        })
        .collect()
}

/// Fluent stored-procedure call.
#[must_use = "an rpc does nothing until a terminal method is awaited"]
pub struct RpcBuilder {
    executor: Arc<dyn Executor>,
    call: RpcCall,
    keep_rows: bool,
    signal: Option<AbortSignal>,
    error: Option<DbError>,
}

impl RpcBuilder {
    pub(crate) fn new(executor: Arc<dyn Executor>, function: &str, args: Value, schema: Option<String>) -> Self {
        let (args, error) = match args {
            Value::Object(map) => (map, None),
            Value::Null => (Map::new(), None),
            other => (
                Map::new(),
                Some(DbError::build(format!(
                    "rpc() arguments must be an object, got {other}"
                ))),
            ),
        };
        let mut call = RpcCall::new(function, args);
        call.schema = schema;
        Self {
            executor,
            call,
            keep_rows: false,
            signal: None,
            error,
        }
    }

    /// Return every row as an object even when it has a single column.
    pub fn keep_rows(mut self) -> Self {
        self.keep_rows = true;
        self
    }

    pub fn abort_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn call(&self) -> &RpcCall {
        &self.call
    }

    pub fn compile(&self) -> Result<CompiledQuery, DbError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => compile_rpc(&self.call),
        }
    }

    async fn run(self) -> Result<Vec<Value>, DbError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let keep_rows = self.keep_rows;
        let set = self
            .executor
            .run(&Statement::Rpc(self.call), self.signal.as_ref())
            .await?;
        Ok(unwrap_scalars(set.rows, keep_rows))
    }

    /// All returned values.
    pub async fn execute(self) -> DbResult<Vec<Value>> {
        DbResult::from_result(self.run().await)
    }

    /// Exactly one value; zero or several is an error.
    pub async fn single(self) -> DbResult<Value> {
        match self.run().await {
            Ok(values) => exactly_one(values, false),
            Err(e) => DbResult::err(e),
        }
    }

    /// At most one value; zero yields empty data.
    pub async fn maybe_single(self) -> DbResult<Value> {
        match self.run().await {
            Ok(values) => exactly_one(values, true),
            Err(e) => DbResult::err(e),
        }
    }
}
