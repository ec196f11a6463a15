//! DELETE compilation.

use super::CompiledQuery;
use super::params::ParamList;
use super::where_clause::build_where;
use crate::error::DbError;
use crate::ident::{select_list, table_ref};
use crate::query::Query;

pub(crate) fn compile_delete(query: &Query) -> Result<CompiledQuery, DbError> {
    super::require_filters(query)?;

    let mut params = ParamList::new();
    let table = table_ref(&query.table)?;
    let where_sql = build_where(&query.conditions, &mut params)?;
    let sql = format!(
        "DELETE FROM {table}{where_sql} RETURNING {}",
        select_list(&query.columns)?
    );
    Ok(CompiledQuery::new(sql, params))
}
