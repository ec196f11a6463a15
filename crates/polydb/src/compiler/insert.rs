//! INSERT and UPSERT compilation.

use super::CompiledQuery;
use super::params::ParamList;
use crate::error::DbError;
use crate::ident::{quote_ident, select_list, table_ref};
use crate::query::{Payload, UpsertOptions};

pub(crate) fn compile_insert(
    table: &str,
    rows: &[Payload],
    upsert: Option<&UpsertOptions>,
    returning: &str,
) -> Result<CompiledQuery, DbError> {
    let mut params = ParamList::new();
    let table = table_ref(table)?;
    let first = rows
        .first()
        .ok_or_else(|| DbError::build("insert requires at least one row"))?;

    // The first row defines the column shape.
    let columns: Vec<&String> = first.keys().collect();

    let mut sql = if columns.is_empty() {
        if rows.len() > 1 {
            return Err(DbError::build("cannot insert multiple rows without columns"));
        }
        format!("INSERT INTO {table} DEFAULT VALUES")
    } else {
        let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            let values: Vec<String> = columns
                .iter()
                .map(|col| match row.get(col.as_str()) {
                    Some(value) => params.placeholder(value),
                    None => "DEFAULT".to_string(),
                })
                .collect();
            tuples.push(format!("({})", values.join(", ")));
        }
        format!(
            "INSERT INTO {table} ({}) VALUES {}",
            column_list.join(", "),
            tuples.join(", ")
        )
    };

    if let Some(options) = upsert {
        sql.push_str(&on_conflict(&columns, options)?);
    }

    sql.push_str(" RETURNING ");
    sql.push_str(&select_list(returning)?);
    Ok(CompiledQuery::new(sql, params))
}

fn on_conflict(columns: &[&String], options: &UpsertOptions) -> Result<String, DbError> {
    let target = if options.on_conflict.is_empty() {
        if !options.ignore_duplicates {
            return Err(DbError::build("upsert requires at least one conflict column"));
        }
        String::new()
    } else {
        let cols: Vec<String> = options.on_conflict.iter().map(|c| quote_ident(c)).collect();
        format!(" ({})", cols.join(", "))
    };

    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !options.on_conflict.iter().any(|k| k == **c))
        .map(|c| {
            let q = quote_ident(c);
            format!("{q} = EXCLUDED.{q}")
        })
        .collect();

    if options.ignore_duplicates || updates.is_empty() {
        Ok(format!(" ON CONFLICT{target} DO NOTHING"))
    } else {
        Ok(format!(" ON CONFLICT{target} DO UPDATE SET {}", updates.join(", ")))
    }
}
