//! SQL compilation.
//!
//! [`compile`] is a pure function from a [`Query`] to SQL text plus the ordered
//! parameters for its `$1..$n` placeholders. It performs no I/O and always numbers
//! placeholders from 1.
//!
//! ```ignore
//! let q = client.from("users").update(json!({"status": "active"})).eq("id", "u1");
//! let compiled = q.compile()?;
//! assert_eq!(
//!     compiled.sql,
//!     r#"UPDATE "users" SET "status" = $1 WHERE "id" = $2 RETURNING *"#
//! );
//! ```

mod delete;
mod insert;
mod params;
mod select;
mod update;
mod where_clause;

pub use params::{ParamList, as_refs};

use crate::error::DbError;
use crate::query::{Operation, Query};
use crate::value::SqlValue;

/// Name of the column carrying the total match count.
pub const COUNT_COLUMN: &str = "__polydb_count";

/// Where the row count comes from, when one was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountSource {
    /// Every row has a [`COUNT_COLUMN`] added by a window function.
    Window,
    /// A single row holding only [`COUNT_COLUMN`]; no data rows.
    Head,
}

/// A parameterized statement ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub count: Option<CountSource>,
}

impl CompiledQuery {
    pub fn new(sql: String, params: ParamList) -> Self {
        Self {
            sql,
            params: params.into_vec(),
            count: None,
        }
    }

    pub(crate) fn with_count(mut self, source: CountSource) -> Self {
        self.count = Some(source);
        self
    }
}

/// Compile a query into SQL and parameters.
pub fn compile(query: &Query) -> Result<CompiledQuery, DbError> {
    match &query.operation {
        Operation::Select(options) => select::compile_select(query, options),
        Operation::Insert(rows) => insert::compile_insert(&query.table, rows, None, &query.columns),
        Operation::Upsert { rows, options } => {
            insert::compile_insert(&query.table, rows, Some(options), &query.columns)
        }
        Operation::Update(row) => update::compile_update(query, row),
        Operation::Delete => delete::compile_delete(query),
    }
}

fn require_filters(query: &Query) -> Result<(), DbError> {
    if query.conditions.is_empty() && !query.allow_unfiltered {
        return Err(DbError::build(format!(
            "{} on '{}' has no filters",
            query.operation.kind(),
            query.table
        ))
        .hint("add a filter or call allow_unfiltered()"));
    }
    Ok(())
}
