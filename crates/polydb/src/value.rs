//! Bound parameter values.
//!
//! Payloads arrive as `serde_json::Value`. Before binding, each value is classified:
//!
//! - `null` and scalars pass through unchanged,
//! - an array whose elements are all scalars becomes a native Postgres array,
//! - any other object or array is serialized to JSON text.
//!
//! Parameters are sent in text format and typed by the server from the statement
//! context, so the same `SqlValue::Number` binds to `int4`, `int8`, `numeric` or `text`
//! columns alike.

use bytes::BytesMut;
use serde_json::Value;
use std::error::Error;
use std::fmt::Write;
use tokio_postgres::types::{Format, IsNull, ToSql, Type};

/// A single bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    /// Native array of scalars (`text[]`, `int[]`, ...).
    Array(Vec<SqlValue>),
    /// JSON document for `json` / `jsonb` columns.
    Json(Value),
}

impl SqlValue {
    /// Classify a JSON value according to the binding rule.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => SqlValue::Number(n.clone()),
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(items) if items.iter().all(is_scalar) => {
                SqlValue::Array(items.iter().map(SqlValue::from_json).collect())
            }
            other => SqlValue::Json(other.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Text representation sent to the server; `None` for SQL NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Number(n) => Some(n.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Array(items) => Some(array_literal(items)),
            SqlValue::Json(v) => Some(v.to_string()),
        }
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        SqlValue::from_json(&value)
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Render a Postgres array literal: `{"a","b",NULL}`.
fn array_literal(items: &[SqlValue]) -> String {
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match item {
            SqlValue::Null => out.push_str("NULL"),
            SqlValue::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            SqlValue::Number(n) => {
                let _ = write!(out, "{n}");
            }
            SqlValue::Text(s) => push_quoted_element(&mut out, s),
            SqlValue::Array(_) | SqlValue::Json(_) => {
                if let Some(text) = item.to_text() {
                    push_quoted_element(&mut out, &text);
                }
            }
        }
    }
    out.push('}');
    out
}

fn push_quoted_element(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

impl ToSql for SqlValue {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self.to_text() {
            Some(text) => {
                out.extend_from_slice(text.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    tokio_postgres::types::to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_pass_through() {
        assert_eq!(SqlValue::from_json(&json!(null)), SqlValue::Null);
        assert_eq!(SqlValue::from_json(&json!("x")), SqlValue::Text("x".into()));
        assert_eq!(SqlValue::from_json(&json!(true)).to_text().as_deref(), Some("true"));
        assert_eq!(SqlValue::from_json(&json!(42)).to_text().as_deref(), Some("42"));
    }

    #[test]
    fn primitive_array_is_native_and_object_array_is_json() {
        let tags = SqlValue::from_json(&json!(["x", "y"]));
        let meta = SqlValue::from_json(&json!([{"x": 1}]));

        assert!(matches!(tags, SqlValue::Array(_)));
        assert_eq!(tags.to_text().as_deref(), Some(r#"{"x","y"}"#));

        assert!(matches!(meta, SqlValue::Json(_)));
        assert_eq!(meta.to_text().as_deref(), Some(r#"[{"x":1}]"#));
        assert_ne!(tags.to_text(), meta.to_text());
    }

    #[test]
    fn objects_become_json_text() {
        let v = SqlValue::from_json(&json!({"a": [1, 2]}));
        assert_eq!(v.to_text().as_deref(), Some(r#"{"a":[1,2]}"#));
    }

    #[test]
    fn array_literal_escapes_and_nulls() {
        let v = SqlValue::from_json(&json!(["a\"b", "c\\d", null, 3, false]));
        assert_eq!(
            v.to_text().as_deref(),
            Some(r#"{"a\"b","c\\d",NULL,3,false}"#)
        );
    }

    #[test]
    fn empty_array_is_native() {
        let v = SqlValue::from_json(&json!([]));
        assert_eq!(v.to_text().as_deref(), Some("{}"));
    }
}
