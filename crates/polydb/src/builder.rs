//! Fluent table query builder.
//!
//! ```ignore
//! let users = client
//!     .from("users")
//!     .select("id, name")
//!     .eq("status", "active")
//!     .order("created_at", OrderOptions::desc())
//!     .limit(10)
//!     .execute()
//!     .await;
//! ```
//!
//! Nothing is compiled or sent until a terminal method (`execute`, `single`,
//! `maybe_single`) is awaited. Filter errors are deferred to that point so the
//! chain stays infallible.

use crate::compiler::{self, CompiledQuery};
use crate::condition::{Condition, Op, parse_or_filter};
use crate::error::{DbError, DbResult};
use crate::executor::{AbortSignal, Executor, RowSet, Statement};
use crate::query::{Operation, Order, OrderOptions, Payload, Query, SelectOptions, UpsertOptions};
use crate::row::Row;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[must_use = "a query does nothing until a terminal method is awaited"]
pub struct QueryBuilder {
    executor: Arc<dyn Executor>,
    query: Query,
    signal: Option<AbortSignal>,
    error: Option<DbError>,
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("query", &self.query)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl QueryBuilder {
    pub(crate) fn new(executor: Arc<dyn Executor>, table: &str) -> Self {
        let error = table
            .trim()
            .is_empty()
            .then(|| DbError::build("from() needs a table name"));
        Self {
            executor,
            query: Query::new(table.trim()),
            signal: None,
            error,
        }
    }

    /// Keep the first error; later steps still run so the chain type-checks.
    fn fail(mut self, error: DbError) -> Self {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self
    }

    fn push(mut self, condition: Condition) -> Self {
        self.query.conditions.push(condition);
        self
    }

    fn push_result(self, condition: Result<Condition, DbError>) -> Self {
        match condition {
            Ok(c) => self.push(c),
            Err(e) => self.fail(e),
        }
    }

    // ==================== Operations ====================

    /// Choose columns. After a mutation this sets the RETURNING list instead.
    pub fn select(self, columns: &str) -> Self {
        self.select_with(columns, SelectOptions::default())
    }

    pub fn select_with(mut self, columns: &str, options: SelectOptions) -> Self {
        let columns = columns.trim();
        self.query.columns = if columns.is_empty() { "*".to_string() } else { columns.to_string() };
        if matches!(self.query.operation, Operation::Select(_)) {
            self.query.operation = Operation::Select(options);
        } else if options != SelectOptions::default() {
            return self.fail(DbError::build("count options only apply to select queries"));
        }
        self
    }

    /// Insert one object or an array of objects.
    pub fn insert<T: Serialize>(mut self, rows: T) -> Self {
        match payload_rows(rows) {
            Ok(rows) => {
                self.query.operation = Operation::Insert(rows);
                self
            }
            Err(e) => self.fail(e),
        }
    }

    pub fn update<T: Serialize>(mut self, values: T) -> Self {
        match payload_rows(values) {
            Ok(mut rows) if rows.len() == 1 => {
                self.query.operation = Operation::Update(rows.remove(0));
                self
            }
            Ok(_) => self.fail(DbError::build("update() takes a single object")),
            Err(e) => self.fail(e),
        }
    }

    /// Insert, resolving conflicts on `options.on_conflict`.
    pub fn upsert<T: Serialize>(mut self, rows: T, options: UpsertOptions) -> Self {
        match payload_rows(rows) {
            Ok(rows) => {
                self.query.operation = Operation::Upsert { rows, options };
                self
            }
            Err(e) => self.fail(e),
        }
    }

    pub fn delete(mut self) -> Self {
        self.query.operation = Operation::Delete;
        self
    }

    // ==================== Filters ====================

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(Condition::simple(column, Op::Eq, value.into()))
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(Condition::simple(column, Op::Neq, value.into()))
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(Condition::simple(column, Op::Gt, value.into()))
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(Condition::simple(column, Op::Gte, value.into()))
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(Condition::simple(column, Op::Lt, value.into()))
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(Condition::simple(column, Op::Lte, value.into()))
    }

    pub fn like(self, column: &str, pattern: impl Into<Value>) -> Self {
        self.push(Condition::simple(column, Op::Like, pattern.into()))
    }

    pub fn ilike(self, column: &str, pattern: impl Into<Value>) -> Self {
        self.push(Condition::simple(column, Op::Ilike, pattern.into()))
    }

    /// `IS NULL` / `IS TRUE` / `IS FALSE`.
    pub fn is(self, column: &str, value: impl Into<Value>) -> Self {
        let condition = Op::is(&value.into()).map(|op| Condition::no_value(column, op));
        self.push_result(condition)
    }

    /// `IN (...)`. An empty list matches no rows.
    pub fn in_list<I>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.push(Condition::in_list(
            column,
            values.into_iter().map(Into::into).collect(),
        ))
    }

    /// `column @> value` for arrays, ranges and JSONB.
    pub fn contains(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(Condition::simple(column, Op::Contains, value.into()))
    }

    /// `column <@ value`.
    pub fn contained_by(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(Condition::simple(column, Op::ContainedBy, value.into()))
    }

    /// Negated filter, e.g. `.not("status", "eq", "archived")`.
    pub fn not(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        let condition = Condition::from_operator(column, operator, value.into()).map(Condition::negate);
        self.push_result(condition)
    }

    /// OR group from a compact filter string, e.g. `"role.eq.admin,role.eq.owner"`.
    pub fn or(self, filters: &str) -> Self {
        let condition = parse_or_filter(filters).map(Condition::OrGroup);
        self.push_result(condition)
    }

    /// Filter by operator name (`eq`, `neq`, `gt`, `in`, `is`, `cs`, ...).
    pub fn filter(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        let condition = Condition::from_operator(column, operator, value.into());
        self.push_result(condition)
    }

    /// Literal SQL predicate with at most one `?` bound to `value`.
    ///
    /// The fragment is inserted verbatim; never build it from user input.
    pub fn filter_raw(self, sql: &str, value: Option<Value>) -> Self {
        self.push(Condition::raw(sql, value))
    }

    /// `eq` on every key of an object.
    pub fn match_all(mut self, values: Value) -> Self {
        match values {
            Value::Object(map) => {
                for (column, value) in map {
                    self = self.push(Condition::simple(column, Op::Eq, value));
                }
                self
            }
            other => self.fail(DbError::build(format!("match_all() expects an object, got {other}"))),
        }
    }

    // ==================== Modifiers ====================

    pub fn order(mut self, column: &str, options: OrderOptions) -> Self {
        self.query.order.push(Order {
            column: column.to_string(),
            ascending: options.ascending,
            nulls_first: options.nulls_first,
        });
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.query.limit = Some(n);
        self
    }

    /// Inclusive row range, zero-based: `range(0, 9)` is the first ten rows.
    pub fn range(mut self, from: u64, to: u64) -> Self {
        if to < from {
            return self.fail(DbError::build(format!("range({from}, {to}) ends before it starts")));
        }
        self.query.offset = Some(from);
        self.query.limit = Some(to - from + 1);
        self
    }

    pub fn abort_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Permit `update()`/`delete()` with no filters.
    pub fn allow_unfiltered(mut self) -> Self {
        self.query.allow_unfiltered = true;
        self
    }

    // ==================== Inspection ====================

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// SQL and parameters this builder would run.
    pub fn compile(&self) -> Result<CompiledQuery, DbError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => compiler::compile(&self.query),
        }
    }

    // ==================== Terminals ====================

    async fn run(self) -> Result<RowSet, DbError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let paged_count = matches!(&self.query.operation, Operation::Select(o) if o.count.is_some() && !o.head)
            && self.query.offset.is_some_and(|o| o > 0);
        let statement = Statement::Query(self.query);
        let mut set = self.executor.run(&statement, self.signal.as_ref()).await?;

        // A page past the end has no rows to carry the window count.
        if paged_count && set.rows.is_empty() {
            if let Statement::Query(mut query) = statement {
                query.operation = Operation::Select(SelectOptions::exact_count().head());
                query.order.clear();
                query.limit = None;
                query.offset = None;
                let head = self
                    .executor
                    .run(&Statement::Query(query), self.signal.as_ref())
                    .await?;
                set.count = head.count;
            }
        }
        Ok(set)
    }

    /// All rows, with `count` set when it was requested.
    pub async fn execute(self) -> DbResult<Vec<Row>> {
        match self.run().await {
            Ok(set) => DbResult::ok(set.rows).with_count(set.count),
            Err(e) => DbResult::err(e),
        }
    }

    /// Exactly one row; zero or several is an error.
    pub async fn single(self) -> DbResult<Row> {
        match self.run().await {
            Ok(set) => exactly_one(set.rows, false).with_count(set.count),
            Err(e) => DbResult::err(e),
        }
    }

    /// At most one row; zero yields empty data.
    pub async fn maybe_single(self) -> DbResult<Row> {
        match self.run().await {
            Ok(set) => exactly_one(set.rows, true).with_count(set.count),
            Err(e) => DbResult::err(e),
        }
    }
}

/// Collapse a result list to one item.
pub(crate) fn exactly_one<T>(items: Vec<T>, optional: bool) -> DbResult<T> {
    let n = items.len();
    let mut items = items.into_iter();
    match (items.next(), n) {
        (None, _) if optional => DbResult::empty(),
        (None, _) => DbResult::err(DbError::no_rows()),
        (Some(item), 1) => DbResult::ok(item),
        (Some(_), n) => DbResult::err(DbError::multiple_rows(n)),
    }
}

fn payload_rows<T: Serialize>(rows: T) -> Result<Vec<Payload>, DbError> {
    let value = serde_json::to_value(rows)
        .map_err(|e| DbError::build(format!("Payload is not serializable: {e}")))?;
    match value {
        Value::Object(map) => Ok(vec![map]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(DbError::build(format!("Payload rows must be objects, got {other}"))),
            })
            .collect(),
        other => Err(DbError::build(format!("Payload must be an object or array, got {other}"))),
    }
}
