//! # polydb
//!
//! Provider-agnostic database access for Postgres-backed services.
//!
//! ## Features
//!
//! - **Fluent queries**: `from(table).select(..).eq(..).order(..).limit(..)`
//! - **Stored procedures**: named-argument `rpc()` with scalar unwrapping
//! - **Uniform results**: every terminal returns a [`DbResult`] envelope, never panics
//! - **Pooled, lazy connections**: one pool per process, created on first use
//! - **Transactions**: closure-scoped, one connection, savepoints when nested
//! - **Safe defaults**: UPDATE/DELETE require a filter, every value is parameterized
//!
//! ## Example
//!
//! ```ignore
//! use polydb::{DbClient, DbConfig, OrderOptions, RuntimeCapabilities};
//! use serde_json::json;
//!
//! let db = DbClient::connect(DbConfig::from_env()?, RuntimeCapabilities::server())?;
//!
//! // SELECT
//! let active = db
//!     .from("users")
//!     .select("id, name")
//!     .eq("status", "active")
//!     .order("created_at", OrderOptions::desc())
//!     .limit(10)
//!     .execute()
//!     .await;
//!
//! // INSERT ... RETURNING
//! let created = db
//!     .from("users")
//!     .insert(json!({"id": "u1", "tags": ["a", "b"]}))
//!     .select("id")
//!     .single()
//!     .await;
//!
//! // Stored procedure
//! let next = db
//!     .rpc("next_invoice_number", json!({"org_id": 7}))
//!     .single()
//!     .await;
//! ```

pub mod builder;
pub mod client;
pub mod compiler;
pub mod condition;
pub mod config;
pub mod error;
pub mod executor;
pub mod ident;
pub mod pool;
pub mod postgres;
pub mod query;
pub mod row;
pub mod rpc;
pub mod value;

#[cfg(test)]
mod testing;

pub use builder::QueryBuilder;
pub use client::{DbClient, global, install};
pub use compiler::{CompiledQuery, compile};
pub use condition::{Condition, Op};
pub use config::{DbConfig, Provider, RuntimeCapabilities, SslMode};
pub use error::{DbError, DbResult, codes};
pub use executor::{AbortSignal, Executor, RowSet, Statement, Transaction};
pub use pool::PoolManager;
pub use postgres::{PgExecutor, PgTransaction};
pub use query::{OrderOptions, SelectOptions, UpsertOptions};
pub use row::{Row, from_row};
pub use rpc::RpcBuilder;
pub use value::SqlValue;
