//! Identifier rendering for tables, columns and select lists.
//!
//! Column references come in three shapes, each rendered differently:
//!
//! - plain: `status` / `users.status` → `"status"` / `"users"."status"`
//! - cast: `created_at::text` → `"created_at"::text`
//! - JSON path: `doc->>key`, `doc->a->>b` → `"doc"->>'key'`, `"doc"->'a'->>'b'`
//!
//! A cast applied to a JSON path is parenthesized, since `::` binds tighter than `->>`.

use crate::error::DbError;

/// Quote a single identifier part, escaping `"` as `""`.
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Render a possibly schema-qualified table name.
pub fn table_ref(table: &str) -> Result<String, DbError> {
    dotted(table.trim())
}

fn dotted(name: &str) -> Result<String, DbError> {
    if name.is_empty() {
        return Err(DbError::build("Identifier cannot be empty"));
    }
    if name.contains('\0') {
        return Err(DbError::build("Identifier cannot contain NUL character"));
    }
    let mut parts = Vec::new();
    for seg in name.split('.') {
        let seg = seg.trim();
        if seg.is_empty() {
            return Err(DbError::build(format!("Invalid identifier '{name}'")));
        }
        parts.push(quote_ident(seg.trim_matches('"')));
    }
    Ok(parts.join("."))
}

/// A parsed column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    /// `*`
    Star,
    Plain(String),
    Cast { column: Box<ColumnRef>, ty: String },
    JsonPath { column: String, steps: Vec<JsonStep> },
}

/// One `->` / `->>` hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonStep {
    /// `true` for `->>` (text extraction).
    pub as_text: bool,
    pub key: String,
}

impl ColumnRef {
    /// Parse a column reference.
    pub fn parse(input: &str) -> Result<Self, DbError> {
        let input = input.trim();
        if input == "*" {
            return Ok(ColumnRef::Star);
        }
        if let Some((base, ty)) = input.split_once("::") {
            let ty = ty.trim();
            if !valid_cast_type(ty) {
                return Err(DbError::build(format!("Invalid cast type in '{input}'")));
            }
            return Ok(ColumnRef::Cast {
                column: Box::new(ColumnRef::parse(base)?),
                ty: ty.to_string(),
            });
        }
        if input.contains("->") {
            let mut pieces = input.split("->");
            let column = pieces.next().unwrap_or_default().trim().to_string();
            if column.is_empty() {
                return Err(DbError::build(format!("Invalid JSON path '{input}'")));
            }
            let mut steps = Vec::new();
            for piece in pieces {
                let (as_text, key) = match piece.strip_prefix('>') {
                    Some(rest) => (true, rest.trim()),
                    None => (false, piece.trim()),
                };
                if key.is_empty() {
                    return Err(DbError::build(format!("Invalid JSON path '{input}'")));
                }
                steps.push(JsonStep {
                    as_text,
                    key: key.trim_matches('\'').to_string(),
                });
            }
            return Ok(ColumnRef::JsonPath { column, steps });
        }
        if input.is_empty() {
            return Err(DbError::build("Column name cannot be empty"));
        }
        Ok(ColumnRef::Plain(input.to_string()))
    }

    /// Render as SQL.
    pub fn to_sql(&self) -> Result<String, DbError> {
        match self {
            ColumnRef::Star => Ok("*".to_string()),
            ColumnRef::Plain(name) => dotted(name),
            ColumnRef::Cast { column, ty } => match column.as_ref() {
                ColumnRef::JsonPath { .. } => Ok(format!("({})::{}", column.to_sql()?, ty)),
                _ => Ok(format!("{}::{}", column.to_sql()?, ty)),
            },
            ColumnRef::JsonPath { column, steps } => {
                let mut out = dotted(column)?;
                for step in steps {
                    out.push_str(if step.as_text { "->>" } else { "->" });
                    if !step.key.is_empty() && step.key.chars().all(|c| c.is_ascii_digit()) {
                        out.push_str(&step.key);
                    } else {
                        out.push('\'');
                        out.push_str(&step.key.replace('\'', "''"));
                        out.push('\'');
                    }
                }
                Ok(out)
            }
        }
    }

    /// Output column name when selected without an alias.
    fn default_alias(&self) -> Option<&str> {
        match self {
            ColumnRef::JsonPath { steps, .. } => steps.last().map(|s| s.key.as_str()),
            ColumnRef::Cast { column, .. } => column.default_alias(),
            _ => None,
        }
    }
}

const MULTI_WORD_TYPES: &[&str] = &[
    "double precision",
    "character varying",
    "bit varying",
    "timestamp with time zone",
    "timestamp without time zone",
    "time with time zone",
    "time without time zone",
];

/// `name`, `schema.name`, `name(p[, s])`, optional `[]` suffixes.
fn valid_cast_type(ty: &str) -> bool {
    let mut ty = ty.trim();
    while let Some(rest) = ty.strip_suffix("[]") {
        ty = rest.trim_end();
    }
    let (name, modifiers) = match ty.split_once('(') {
        Some((name, rest)) => match rest.strip_suffix(')') {
            Some(m) => (name.trim(), Some(m)),
            None => return false,
        },
        None => (ty, None),
    };
    let name_ok = if name.contains(' ') {
        MULTI_WORD_TYPES.contains(&name.to_ascii_lowercase().as_str())
    } else {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    };
    let modifiers_ok = modifiers.is_none_or(|m| {
        !m.trim().is_empty() && m.chars().all(|c| c.is_ascii_digit() || c == ',' || c == ' ')
    });
    name_ok && modifiers_ok
}

/// Render a column reference used in a filter or ORDER BY.
pub fn column_ref(column: &str) -> Result<String, DbError> {
    ColumnRef::parse(column)?.to_sql()
}

/// Render a comma-separated select list.
///
/// Items may use `alias:column`. Items containing parentheses are passed through
/// verbatim (`count(*)`, `lower(name) as n`).
pub fn select_list(columns: &str) -> Result<String, DbError> {
    let columns = columns.trim();
    if columns.is_empty() || columns == "*" {
        return Ok("*".to_string());
    }
    let mut out = Vec::new();
    for item in split_top_level(columns) {
        let item = item.trim();
        if item.is_empty() {
            return Err(DbError::build(format!("Empty item in select list '{columns}'")));
        }
        if item.contains('(') {
            out.push(item.to_string());
            continue;
        }
        let (alias, column) = split_alias(item);
        let parsed = ColumnRef::parse(column)?;
        let sql = parsed.to_sql()?;
        match alias.or_else(|| parsed.default_alias()) {
            Some(alias) => out.push(format!("{sql} AS {}", quote_ident(alias.trim()))),
            None => out.push(sql),
        }
    }
    Ok(out.join(", "))
}

/// Split `alias:column` on the first `:` that is not part of `::`.
fn split_alias(item: &str) -> (Option<&str>, &str) {
    let bytes = item.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b':' {
            continue;
        }
        let next_is_colon = bytes.get(i + 1) == Some(&b':');
        let prev_is_colon = i > 0 && bytes[i - 1] == b':';
        if !next_is_colon && !prev_is_colon {
            return (Some(&item[..i]), &item[i + 1..]);
        }
    }
    (None, item)
}

/// Split on commas outside parentheses and quotes.
pub(crate) fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_dotted() {
        assert_eq!(column_ref("status").unwrap(), r#""status""#);
        assert_eq!(column_ref("users.status").unwrap(), r#""users"."status""#);
        assert_eq!(table_ref("public.users").unwrap(), r#""public"."users""#);
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }

    #[test]
    fn cast_column() {
        assert_eq!(column_ref("id::text").unwrap(), r#""id"::text"#);
        assert_eq!(column_ref("price::numeric(10, 2)").unwrap(), r#""price"::numeric(10, 2)"#);
        assert_eq!(column_ref("tags::text[]").unwrap(), r#""tags"::text[]"#);
        assert_eq!(
            column_ref("at::timestamp with time zone").unwrap(),
            r#""at"::timestamp with time zone"#
        );
        assert!(column_ref("id::text; drop").is_err());
        assert!(column_ref("id::text or true").is_err());
        assert!(column_ref("id::text) or (true").is_err());
    }

    #[test]
    fn json_path_columns() {
        assert_eq!(column_ref("doc->>key").unwrap(), r#""doc"->>'key'"#);
        assert_eq!(column_ref("doc->a->>b").unwrap(), r#""doc"->'a'->>'b'"#);
        assert_eq!(column_ref("doc->0").unwrap(), r#""doc"->0"#);
        assert_eq!(column_ref("doc->>it's").unwrap(), r#""doc"->>'it''s'"#);
    }

    #[test]
    fn cast_of_json_path_is_parenthesized() {
        assert_eq!(column_ref("doc->>n::int").unwrap(), r#"("doc"->>'n')::int"#);
    }

    #[test]
    fn select_list_forms() {
        assert_eq!(select_list("").unwrap(), "*");
        assert_eq!(select_list("id, name").unwrap(), r#""id", "name""#);
        assert_eq!(select_list("uid:id").unwrap(), r#""id" AS "uid""#);
        assert_eq!(
            select_list("meta->>color").unwrap(),
            r#""meta"->>'color' AS "color""#
        );
        assert_eq!(select_list("id, count(*)").unwrap(), r#""id", count(*)"#);
        assert_eq!(select_list("n:id::text").unwrap(), r#""id"::text AS "n""#);
    }

    #[test]
    fn empty_items_rejected() {
        assert!(select_list("id,,name").is_err());
        assert!(table_ref("").is_err());
        assert!(table_ref("a..b").is_err());
    }
}
