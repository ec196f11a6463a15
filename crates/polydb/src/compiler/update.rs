//! UPDATE compilation.

use super::CompiledQuery;
use super::params::ParamList;
use super::where_clause::build_where;
use crate::error::DbError;
use crate::ident::{quote_ident, select_list, table_ref};
use crate::query::{Payload, Query};

pub(crate) fn compile_update(query: &Query, row: &Payload) -> Result<CompiledQuery, DbError> {
    if row.is_empty() {
        return Err(DbError::build("update: SET clause cannot be empty"));
    }
    super::require_filters(query)?;

    let mut params = ParamList::new();
    let table = table_ref(&query.table)?;

    // SET binds first: WHERE placeholders continue the same numbering.
    let set_parts: Vec<String> = row
        .iter()
        .map(|(col, value)| format!("{} = {}", quote_ident(col), params.placeholder(value)))
        .collect();
    let where_sql = build_where(&query.conditions, &mut params)?;

    let sql = format!(
        "UPDATE {table} SET {}{where_sql} RETURNING {}",
        set_parts.join(", "),
        select_list(&query.columns)?
    );
    Ok(CompiledQuery::new(sql, params))
}
