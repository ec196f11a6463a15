//! SELECT compilation.

use super::params::ParamList;
use super::where_clause::build_where;
use super::{COUNT_COLUMN, CompiledQuery, CountSource};
use crate::error::DbError;
use crate::ident::{column_ref, quote_ident, select_list, table_ref};
use crate::query::{CountMode, Order, Query, SelectOptions};
use std::fmt::Write;

pub(crate) fn compile_select(query: &Query, options: &SelectOptions) -> Result<CompiledQuery, DbError> {
    let mut params = ParamList::new();
    let table = table_ref(&query.table)?;
    let where_sql = build_where(&query.conditions, &mut params)?;

    if options.head {
        let sql = format!(
            "SELECT COUNT(*) AS {} FROM {table}{where_sql}",
            quote_ident(COUNT_COLUMN)
        );
        return Ok(CompiledQuery::new(sql, params).with_count(CountSource::Head));
    }

    let mut sql = format!("SELECT {}", select_list(&query.columns)?);
    let count = match options.count {
        Some(CountMode::Exact) => {
            // The window runs before LIMIT/OFFSET, so every row carries the full match count.
            let _ = write!(sql, ", COUNT(*) OVER() AS {}", quote_ident(COUNT_COLUMN));
            Some(CountSource::Window)
        }
        None => None,
    };
    let _ = write!(sql, " FROM {table}{where_sql}");
    sql.push_str(&order_by(&query.order)?);
    if let Some(limit) = query.limit {
        let _ = write!(sql, " LIMIT {limit}");
    }
    if let Some(offset) = query.offset {
        let _ = write!(sql, " OFFSET {offset}");
    }

    let compiled = CompiledQuery::new(sql, params);
    Ok(match count {
        Some(source) => compiled.with_count(source),
        None => compiled,
    })
}

fn order_by(order: &[Order]) -> Result<String, DbError> {
    if order.is_empty() {
        return Ok(String::new());
    }
    let mut terms = Vec::with_capacity(order.len());
    for o in order {
        let mut term = format!(
            "{} {}",
            column_ref(&o.column)?,
            if o.ascending { "ASC" } else { "DESC" }
        );
        match o.nulls_first {
            Some(true) => term.push_str(" NULLS FIRST"),
            Some(false) => term.push_str(" NULLS LAST"),
            None => {}
        }
        terms.push(term);
    }
    Ok(format!(" ORDER BY {}", terms.join(", ")))
}
