//! WHERE clause rendering.

use super::params::ParamList;
use crate::condition::{Condition, Op, OrTerm};
use crate::error::DbError;
use crate::ident::column_ref;
use serde_json::Value;

/// Render ` WHERE ...` (or an empty string) and bind values into `params`.
pub(crate) fn build_where(conditions: &[Condition], params: &mut ParamList) -> Result<String, DbError> {
    if conditions.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(conditions.len());
    for condition in conditions {
        parts.push(render_condition(condition, params)?);
    }
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

fn render_condition(condition: &Condition, params: &mut ParamList) -> Result<String, DbError> {
    match condition {
        Condition::OrGroup(terms) => render_or_group(terms, params),
        Condition::Raw { sql, value } => render_raw(sql, value.as_ref(), params),
        Condition::Simple {
            column,
            op,
            values,
            negated,
        } => render_predicate(column, *op, values, *negated, params),
    }
}

fn render_or_group(terms: &[OrTerm], params: &mut ParamList) -> Result<String, DbError> {
    if terms.is_empty() {
        return Err(DbError::build("or() group cannot be empty"));
    }
    let mut parts = Vec::with_capacity(terms.len());
    for term in terms {
        let values = match (&term.value, term.op) {
            (_, op) if !op.takes_value() => Vec::new(),
            (Some(Value::Array(items)), Op::In) => items.clone(),
            (Some(v), _) => vec![v.clone()],
            (None, op) => {
                return Err(DbError::build(format!(
                    "or() term on '{}' needs a value for '{}'",
                    term.column,
                    op.as_sql()
                )));
            }
        };
        parts.push(render_predicate(&term.column, term.op, &values, term.negated, params)?);
    }
    Ok(format!("({})", parts.join(" OR ")))
}

fn render_raw(sql: &str, value: Option<&Value>, params: &mut ParamList) -> Result<String, DbError> {
    let Some(value) = value else {
        return Ok(sql.to_string());
    };
    match sql.matches('?').count() {
        0 => Ok(format!("{sql} {}", params.placeholder(value))),
        1 => Ok(sql.replacen('?', &params.placeholder(value), 1)),
        _ => Err(DbError::build(format!(
            "Raw filter '{sql}' has more than one '?' placeholder"
        ))),
    }
}

fn render_predicate(
    column: &str,
    op: Op,
    values: &[Value],
    negated: bool,
    params: &mut ParamList,
) -> Result<String, DbError> {
    let col = column_ref(column)?;

    let sql = if !op.takes_value() {
        format!("{col} {}", op.as_sql())
    } else if op == Op::In {
        if values.is_empty() {
            // Empty IN list matches nothing; its negation matches everything.
            return Ok(if negated { "1=1" } else { "1=0" }.to_string());
        }
        let placeholders: Vec<String> = values.iter().map(|v| params.placeholder(v)).collect();
        format!("{col} IN ({})", placeholders.join(", "))
    } else {
        let value = values.first().ok_or_else(|| {
            DbError::build(format!("Filter on '{column}' needs a value for '{}'", op.as_sql()))
        })?;
        format!("{col} {} {}", op.as_sql(), params.placeholder(value))
    };

    if negated {
        Ok(format!("NOT ({sql})"))
    } else {
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::parse_or_filter;
    use serde_json::json;

    fn render(conditions: Vec<Condition>) -> (String, usize) {
        let mut params = ParamList::new();
        let sql = build_where(&conditions, &mut params).unwrap();
        (sql, params.len())
    }

    #[test]
    fn no_conditions() {
        assert_eq!(render(vec![]), (String::new(), 0));
    }

    #[test]
    fn or_group_binds_in_position() {
        let (sql, n) = render(vec![
            Condition::simple("org_id", Op::Eq, json!(7)),
            Condition::OrGroup(parse_or_filter("a.eq.1,b.is.null").unwrap()),
            Condition::simple("kind", Op::Eq, json!("x")),
        ]);
        assert_eq!(
            sql,
            r#" WHERE "org_id" = $1 AND ("a" = $2 OR "b" IS NULL) AND "kind" = $3"#
        );
        assert_eq!(n, 3);
    }

    #[test]
    fn raw_fragments() {
        let (sql, n) = render(vec![
            Condition::raw("\"id\"::text = ?", Some(json!("5"))),
            Condition::raw("\"doc\"->>'k' =", Some(json!("v"))),
            Condition::raw("archived_at IS NULL", None),
        ]);
        assert_eq!(
            sql,
            r#" WHERE "id"::text = $1 AND "doc"->>'k' = $2 AND archived_at IS NULL"#
        );
        assert_eq!(n, 2);
    }

    #[test]
    fn empty_in_is_false_without_placeholders() {
        let (sql, n) = render(vec![Condition::in_list("id", vec![])]);
        assert_eq!(sql, " WHERE 1=0");
        assert_eq!(n, 0);

        let (sql, _) = render(vec![Condition::in_list("id", vec![]).negate()]);
        assert_eq!(sql, " WHERE 1=1");
    }

    #[test]
    fn negation_wraps_predicate() {
        let (sql, n) = render(vec![
            Condition::simple("status", Op::Eq, json!("gone")).negate(),
            Condition::in_list("id", vec![json!(1), json!(2)]).negate(),
            Condition::no_value("flag", Op::IsTrue).negate(),
        ]);
        assert_eq!(
            sql,
            r#" WHERE NOT ("status" = $1) AND NOT ("id" IN ($2, $3)) AND NOT ("flag" IS TRUE)"#
        );
        assert_eq!(n, 3);
    }

    #[test]
    fn raw_rejects_multiple_placeholders() {
        let mut params = ParamList::new();
        let err = build_where(&[Condition::raw("a = ? OR b = ?", Some(json!(1)))], &mut params)
            .unwrap_err();
        assert_eq!(err.code(), Some(crate::error::codes::BUILD));
    }
}
