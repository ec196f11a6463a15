//! Filter predicates accumulated by the query builder.
//!
//! Conditions hold values, never placeholders: `$n` numbers are assigned by the compiler
//! when the full statement is known, so an or-group parsed early cannot disturb the
//! numbering of conditions added after it.

use crate::error::DbError;
use crate::ident::split_top_level;
use serde_json::Value;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    In,
    IsNull,
    IsNotNull,
    IsTrue,
    IsFalse,
    /// `@>`
    Contains,
    /// `<@`
    ContainedBy,
}

impl Op {
    /// SQL spelling.
    pub fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Neq => "<>",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Like => "LIKE",
            Op::Ilike => "ILIKE",
            Op::In => "IN",
            Op::IsNull => "IS NULL",
            Op::IsNotNull => "IS NOT NULL",
            Op::IsTrue => "IS TRUE",
            Op::IsFalse => "IS FALSE",
            Op::Contains => "@>",
            Op::ContainedBy => "<@",
        }
    }

    /// Operators that take no bound value.
    pub fn takes_value(self) -> bool {
        !matches!(self, Op::IsNull | Op::IsNotNull | Op::IsTrue | Op::IsFalse)
    }

    /// Parse a filter operator name (`eq`, `neq`, `gt`, ..., `cs`, `cd`).
    pub fn parse(name: &str) -> Result<Self, DbError> {
        Ok(match name {
            "eq" => Op::Eq,
            "neq" => Op::Neq,
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "like" => Op::Like,
            "ilike" => Op::Ilike,
            "in" => Op::In,
            "cs" | "contains" => Op::Contains,
            "cd" | "containedBy" | "contained_by" => Op::ContainedBy,
            other => return Err(DbError::build(format!("Unknown filter operator '{other}'"))),
        })
    }

    /// Resolve an `is` comparison against `null` / `true` / `false`.
    pub fn is(value: &Value) -> Result<Self, DbError> {
        match value {
            Value::Null => Ok(Op::IsNull),
            Value::Bool(true) => Ok(Op::IsTrue),
            Value::Bool(false) => Ok(Op::IsFalse),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "null" => Ok(Op::IsNull),
                "true" => Ok(Op::IsTrue),
                "false" => Ok(Op::IsFalse),
                _ => Err(DbError::build(format!("'is' expects null, true or false, got '{s}'"))),
            },
            other => Err(DbError::build(format!("'is' expects null, true or false, got {other}"))),
        }
    }
}

/// A single predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column op value(s)`, optionally wrapped in `NOT (...)`.
    Simple {
        column: String,
        op: Op,
        values: Vec<Value>,
        negated: bool,
    },
    /// Literal SQL fragment with at most one bound value. A `?` in the fragment marks
    /// the placeholder; without one the placeholder is appended.
    Raw { sql: String, value: Option<Value> },
    /// Terms combined with `OR`, nested in the outer `AND` chain.
    OrGroup(Vec<OrTerm>),
}

/// One `{column, op, value}` term of an or-group.
#[derive(Debug, Clone, PartialEq)]
pub struct OrTerm {
    pub column: String,
    pub op: Op,
    /// `None` for no-value operators. `IN` carries a JSON array.
    pub value: Option<Value>,
    pub negated: bool,
}

impl Condition {
    pub fn simple(column: impl Into<String>, op: Op, value: Value) -> Self {
        let values = if op.takes_value() { vec![value] } else { Vec::new() };
        Condition::Simple {
            column: column.into(),
            op,
            values,
            negated: false,
        }
    }

    pub fn in_list(column: impl Into<String>, values: Vec<Value>) -> Self {
        Condition::Simple {
            column: column.into(),
            op: Op::In,
            values,
            negated: false,
        }
    }

    pub fn no_value(column: impl Into<String>, op: Op) -> Self {
        Condition::Simple {
            column: column.into(),
            op,
            values: Vec::new(),
            negated: false,
        }
    }

    pub fn raw(sql: impl Into<String>, value: Option<Value>) -> Self {
        Condition::Raw {
            sql: sql.into(),
            value,
        }
    }

    /// Build a condition from a filter operator name, as used by `filter()` and `not()`.
    pub fn from_operator(column: &str, operator: &str, value: Value) -> Result<Self, DbError> {
        if operator == "is" {
            return Ok(Condition::no_value(column, Op::is(&value)?));
        }
        match Op::parse(operator)? {
            Op::In => Ok(Condition::in_list(column, in_values(value)?)),
            op => Ok(Condition::simple(column, op, value)),
        }
    }

    /// Wrap in `NOT (...)`. `IS NULL` and friends flip to their complement instead.
    pub fn negate(self) -> Self {
        match self {
            Condition::Simple {
                column,
                op,
                values,
                negated,
            } => match (op, negated) {
                (Op::IsNull, false) => Condition::no_value(column, Op::IsNotNull),
                (Op::IsNotNull, false) => Condition::no_value(column, Op::IsNull),
                _ => Condition::Simple {
                    column,
                    op,
                    values,
                    negated: !negated,
                },
            },
            other => other,
        }
    }
}

/// Accept `[a, b]` or a compact `(a,b)` string.
fn in_values(value: Value) -> Result<Vec<Value>, DbError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::String(s) => Ok(parse_list(&s)),
        other => Err(DbError::build(format!("'in' expects a list, got {other}"))),
    }
}

fn parse_list(s: &str) -> Vec<Value> {
    let inner = s.trim().trim_start_matches('(').trim_end_matches(')');
    if inner.trim().is_empty() {
        return Vec::new();
    }
    split_top_level(inner)
        .into_iter()
        .map(|item| Value::String(unquote(item)))
        .collect()
}

/// Strip one pair of surrounding double quotes and undo `\"` / `\\` escapes.
fn unquote(s: &str) -> String {
    let s = s.trim();
    let Some(inner) = s
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return s.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

/// Parse a compact or-filter such as `"status.eq.active,deleted_at.is.null"`.
///
/// Each term is `column.[not.]op.value`; `in` takes a parenthesized list. Values stay
/// as text and are bound at compile time.
pub fn parse_or_filter(filters: &str) -> Result<Vec<OrTerm>, DbError> {
    let mut terms = Vec::new();
    for raw in split_top_level(filters) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        terms.push(parse_or_term(raw)?);
    }
    if terms.is_empty() {
        return Err(DbError::build(format!("Empty or() filter '{filters}'")));
    }
    Ok(terms)
}

fn parse_or_term(raw: &str) -> Result<OrTerm, DbError> {
    let malformed = || DbError::build(format!("Malformed or() term '{raw}'"));

    let (column, rest) = raw.split_once('.').ok_or_else(malformed)?;
    let (negated, rest) = match rest.strip_prefix("not.") {
        Some(rest) => (true, rest),
        None => (false, rest),
    };
    let (operator, value) = rest.split_once('.').ok_or_else(malformed)?;
    if column.trim().is_empty() {
        return Err(malformed());
    }

    let (op, value) = match operator {
        "is" => (Op::is(&Value::String(value.to_string()))?, None),
        "in" => (Op::In, Some(Value::Array(parse_list(value)))),
        other => (Op::parse(other)?, Some(Value::String(unquote(value)))),
    };
    Ok(OrTerm {
        column: column.trim().to_string(),
        op,
        value,
        negated,
    })
}
