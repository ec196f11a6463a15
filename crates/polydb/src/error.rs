//! Error types and the normalized result envelope.
//!
//! Every terminal operation returns a [`DbResult`] instead of propagating a Rust error,
//! so callers can branch on [`DbError::code`] regardless of which provider executed
//! the statement.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known values for [`DbError::code`].
pub mod codes {
    /// `single()` matched zero rows.
    pub const NO_ROWS: &str = "PGRST116";
    /// `single()` / `maybe_single()` matched more than one row.
    pub const MULTIPLE_ROWS: &str = "PGRST116";
    /// The builder could not produce a valid statement.
    pub const BUILD: &str = "POLYDB_BUILD";
    /// Invalid or missing configuration.
    pub const CONFIG: &str = "POLYDB_CONFIG";
    /// The runtime cannot hold persistent sockets.
    pub const SOCKETS_UNAVAILABLE: &str = "POLYDB_SOCKETS_UNAVAILABLE";
    /// A column value could not be decoded.
    pub const DECODE: &str = "POLYDB_DECODE";
    /// Could not establish a connection (SQLSTATE 08001).
    pub const CONNECTION: &str = "08001";
    /// Statement canceled by timeout or abort signal (SQLSTATE 57014).
    pub const QUERY_CANCELED: &str = "57014";
    /// Transaction handle used after it finished (SQLSTATE 25000).
    pub const INVALID_TRANSACTION_STATE: &str = "25000";
    /// Commit attempted after a statement in the transaction failed (SQLSTATE 25P02).
    pub const IN_FAILED_TRANSACTION: &str = "25P02";
    /// Operation not supported by the active provider (SQLSTATE 0A000).
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";
    /// unique_violation
    pub const UNIQUE_VIOLATION: &str = "23505";
    /// foreign_key_violation
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    /// check_violation
    pub const CHECK_VIOLATION: &str = "23514";
}

/// Normalized database error, independent of the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct DbError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl DbError {
    /// Create an error without a code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
            hint: None,
        }
    }

    /// Create an error with a code.
    pub fn with_code(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.to_string()),
            ..Self::new(message)
        }
    }

    /// Attach details.
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Attach a hint.
    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::with_code(codes::BUILD, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_code(codes::CONFIG, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::with_code(codes::CONNECTION, message)
    }

    pub fn decode(column: &str, message: impl Into<String>) -> Self {
        Self::with_code(
            codes::DECODE,
            format!("Decode error on column '{column}': {}", message.into()),
        )
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::with_code(codes::QUERY_CANCELED, message)
    }

    pub fn no_rows() -> Self {
        Self::with_code(codes::NO_ROWS, "JSON object requested, multiple (or no) rows returned")
            .details("The result contains 0 rows")
    }

    pub fn multiple_rows(got: usize) -> Self {
        Self::with_code(
            codes::MULTIPLE_ROWS,
            "JSON object requested, multiple (or no) rows returned",
        )
        .details(format!("The result contains {got} rows"))
    }

    /// The code, if any.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(codes::UNIQUE_VIOLATION)
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        self.code() == Some(codes::FOREIGN_KEY_VIOLATION)
    }

    pub fn is_check_violation(&self) -> bool {
        self.code() == Some(codes::CHECK_VIOLATION)
    }

    /// `single()` found no row.
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(codes::NO_ROWS)
            && self.details.as_deref() == Some("The result contains 0 rows")
    }

    /// Check if the statement was canceled (timeout or abort signal).
    pub fn is_canceled(&self) -> bool {
        self.code() == Some(codes::QUERY_CANCELED)
    }
}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::debug!(target: "polydb.sql", error = %err, "driver error");
        if let Some(db_err) = err.as_db_error() {
            let mut out = DbError::with_code(db_err.code().code(), db_err.message());
            out.details = match (db_err.detail(), db_err.constraint()) {
                (Some(detail), _) => Some(detail.to_string()),
                (None, Some(constraint)) => Some(format!("constraint: {constraint}")),
                (None, None) => None,
            };
            out.hint = db_err.hint().map(str::to_string);
            return out;
        }
        if err.is_closed() {
            return DbError::connection(format!("Connection closed: {err}"));
        }
        match err.code() {
            Some(state) => DbError::with_code(state.code(), err.to_string()),
            None => DbError::new(err.to_string()),
        }
    }
}

impl From<deadpool_postgres::PoolError> for DbError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::warn!(target: "polydb.pool", error = %err, "pool checkout failed");
        match err {
            deadpool_postgres::PoolError::Backend(e) => e.into(),
            other => DbError::connection(format!("Pool error: {other}")),
        }
    }
}

/// Normalized result envelope: `data` and `error` are never both set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[must_use]
pub struct DbResult<T> {
    pub data: Option<T>,
    pub error: Option<DbError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

impl<T> DbResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            count: None,
        }
    }

    /// Successful execution that produced no value (e.g. `maybe_single()` on zero rows).
    pub fn empty() -> Self {
        Self {
            data: None,
            error: None,
            count: None,
        }
    }

    pub fn err(error: DbError) -> Self {
        Self {
            data: None,
            error: Some(error),
            count: None,
        }
    }

    pub fn from_result(result: Result<T, DbError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(error) => Self::err(error),
        }
    }

    pub fn with_count(mut self, count: Option<i64>) -> Self {
        self.count = count;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into a `Result`, treating an empty success as `None`.
    pub fn into_result(self) -> Result<Option<T>, DbError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DbResult<U> {
        DbResult {
            data: self.data.map(f),
            error: self.error,
            count: self.count,
        }
    }
}
