//! Direct-postgres backend.
//!
//! Each statement outside a transaction borrows a pooled connection for one
//! round trip. A transaction pins a single connection until commit or
//! rollback; nested transactions become savepoints on that connection.

use crate::compiler::as_refs;
use crate::error::{DbError, codes};
use crate::executor::{AbortSignal, Executor, RowSet, Statement, Transaction};
use crate::ident::quote_ident;
use crate::pool::PoolManager;
use crate::row::decode_row;
use async_trait::async_trait;
use deadpool_postgres::Object;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// SQL longer than this is truncated in logs.
const MAX_LOGGED_SQL: usize = 200;

static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_savepoint_name() -> String {
    let n = SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("polydb_sp_{n}")
}

fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// Executor backed by the shared pool.
#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: Arc<PoolManager>,
    statement_timeout: Option<Duration>,
}

impl PgExecutor {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        let statement_timeout = pool.config().statement_timeout;
        Self {
            pool,
            statement_timeout,
        }
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }
}

impl PgExecutor {
    /// Borrow a connection, giving up on the statement timeout or the abort signal.
    async fn checkout(&self, signal: Option<&AbortSignal>) -> Result<Object, DbError> {
        match race(self.pool.get(), signal, self.statement_timeout).await {
            Ok(conn) => conn,
            Err(interrupt) => {
                tracing::warn!(target: "polydb.pool", ?interrupt, "connection checkout interrupted");
                Err(interrupt.into_error("connection checkout"))
            }
        }
    }
}

#[async_trait]
impl Executor for PgExecutor {
    async fn run(&self, statement: &Statement, signal: Option<&AbortSignal>) -> Result<RowSet, DbError> {
        if signal.is_some_and(|s| s.is_cancelled()) {
            return Err(DbError::canceled("statement aborted before it was sent"));
        }
        let started = Instant::now();
        let conn = self.checkout(signal).await?;
        let remaining = self.statement_timeout.map(|d| d.saturating_sub(started.elapsed()));
        let result = round_trip(&conn, &self.pool, statement, signal, remaining, "pool").await;
        if result.as_ref().is_err_and(DbError::is_canceled) {
            // The canceled statement may still be running on it.
            detach(conn);
        }
        result
    }

    async fn begin(&self) -> Result<Arc<dyn Transaction>, DbError> {
        let conn = self.checkout(None).await?;
        conn.batch_execute("BEGIN").await?;
        tracing::debug!(target: "polydb.sql", "transaction started");
        Ok(Arc::new(PgTransaction {
            shared: Arc::new(TxConnection {
                conn: Mutex::new(Some(conn)),
                pool: self.pool.clone(),
                statement_timeout: self.statement_timeout,
                failed: AtomicBool::new(false),
            }),
            savepoint: None,
            finished: AtomicBool::new(false),
        }))
    }

    async fn shutdown(&self) {
        self.pool.close();
    }
}

/// Compile, send, decode.
async fn round_trip(
    client: &tokio_postgres::Client,
    pool: &PoolManager,
    statement: &Statement,
    signal: Option<&AbortSignal>,
    timeout: Option<Duration>,
    scope: &'static str,
) -> Result<RowSet, DbError> {
    let compiled = statement.compile()?;
    let kind = statement.kind();
    let params = as_refs(&compiled.params);
    tracing::debug!(
        target: "polydb.sql",
        kind,
        scope,
        param_count = params.len(),
        sql = %truncate_sql_bytes(&compiled.sql, MAX_LOGGED_SQL),
        "executing"
    );

    let started = Instant::now();
    let rows = guarded(
        client.query(compiled.sql.as_str(), &params),
        client,
        pool,
        signal,
        timeout,
    )
    .await
    .inspect_err(|e| {
        tracing::debug!(target: "polydb.sql", kind, code = ?e.code(), error = %e, "statement failed");
    })?;

    let decoded = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(
        target: "polydb.sql",
        kind,
        rows = decoded.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "completed"
    );
    Ok(RowSet::with_count_source(decoded, compiled.count))
}

/// Why a raced future was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    TimedOut(Duration),
    Aborted,
}

impl Interrupt {
    fn into_error(self, what: &str) -> DbError {
        match self {
            Interrupt::TimedOut(d) => {
                DbError::canceled(format!("{what} timed out after {} ms", d.as_millis()))
            }
            Interrupt::Aborted => DbError::canceled(format!("{what} aborted by signal")),
        }
    }
}

/// Race `future` against the timeout and the abort signal.
async fn race<F: Future>(
    future: F,
    signal: Option<&AbortSignal>,
    timeout: Option<Duration>,
) -> Result<F::Output, Interrupt> {
    let deadline = async move {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    let aborted = async move {
        match signal {
            Some(s) => s.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        output = future => Ok(output),
        _ = deadline => Err(Interrupt::TimedOut(timeout.unwrap_or_default())),
        _ = aborted => Err(Interrupt::Aborted),
    }
}

/// Run a query under [`race`]. The losing query is canceled server-side so the
/// connection is not left busy.
async fn guarded<T, F>(
    future: F,
    client: &tokio_postgres::Client,
    pool: &PoolManager,
    signal: Option<&AbortSignal>,
    timeout: Option<Duration>,
) -> Result<T, DbError>
where
    F: Future<Output = Result<T, tokio_postgres::Error>>,
{
    if signal.is_some_and(|s| s.is_cancelled()) {
        return Err(DbError::canceled("statement aborted before it was sent"));
    }

    match race(future, signal, timeout).await {
        Ok(result) => result.map_err(DbError::from),
        Err(interrupt) => {
            pool.cancel(client.cancel_token());
            tracing::warn!(target: "polydb.sql", ?interrupt, "statement interrupted");
            Err(interrupt.into_error("statement"))
        }
    }
}

/// Connection pinned by a transaction. Shared with its savepoint scopes.
struct TxConnection {
    conn: Mutex<Option<Object>>,
    pool: Arc<PoolManager>,
    statement_timeout: Option<Duration>,
    /// A statement failed on the server; only a rollback can continue.
    failed: AtomicBool,
}

impl Drop for TxConnection {
    fn drop(&mut self) {
        // Still holding the connection means neither COMMIT nor ROLLBACK ran.
        if let Some(conn) = self.conn.get_mut().take() {
            tracing::warn!(
                target: "polydb.pool",
                "transaction dropped while open; discarding its connection"
            );
            detach(conn);
        }
    }
}

/// Close a connection instead of returning it to the pool.
fn detach(conn: Object) {
    drop(Object::take(conn));
}

/// Client-side failures never reach the server and leave the transaction usable.
fn aborts_transaction(error: &DbError) -> bool {
    !matches!(error.code(), Some(codes::BUILD | codes::DECODE))
}

fn failed_transaction_error() -> DbError {
    DbError::with_code(
        codes::IN_FAILED_TRANSACTION,
        "a statement in this transaction failed; it was rolled back instead of committed",
    )
    .hint("propagate statement errors out of the transaction callback")
}

fn finished_error() -> DbError {
    DbError::with_code(
        codes::INVALID_TRANSACTION_STATE,
        "transaction has already been committed or rolled back",
    )
}

/// A transaction, or a savepoint scope inside one.
pub struct PgTransaction {
    shared: Arc<TxConnection>,
    savepoint: Option<String>,
    finished: AtomicBool,
}

impl std::fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransaction")
            .field("savepoint", &self.savepoint)
            .field("finished", &self.finished.load(Ordering::Acquire))
            .finish()
    }
}

impl PgTransaction {
    async fn batch(&self, sql: &str) -> Result<(), DbError> {
        let guard = self.shared.conn.lock().await;
        let conn = guard.as_ref().ok_or_else(finished_error)?;
        if let Err(e) = conn.batch_execute(sql).await {
            self.shared.failed.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    /// End the outer transaction with `sql`. The connection goes back to the
    /// pool on success and is discarded on failure.
    async fn finish(&self, sql: &str) -> Result<(), DbError> {
        let conn = self
            .shared
            .conn
            .lock()
            .await
            .take()
            .ok_or_else(finished_error)?;
        match conn.batch_execute(sql).await {
            Ok(()) => {
                tracing::debug!(target: "polydb.sql", statement = sql, "transaction finished");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(target: "polydb.sql", statement = sql, error = %e, "transaction end failed");
                detach(conn);
                Err(e.into())
            }
        }
    }
}

impl PgTransaction {
    /// Roll back this scope. Rolling back to a savepoint clears an earlier failure.
    async fn undo(&self) -> Result<(), DbError> {
        match &self.savepoint {
            Some(name) => {
                let name = quote_ident(name);
                self.batch(&format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"))
                    .await?;
                self.shared.failed.store(false, Ordering::Release);
                Ok(())
            }
            None => self.finish("ROLLBACK").await,
        }
    }
}

#[async_trait]
impl Executor for PgTransaction {
    async fn run(&self, statement: &Statement, signal: Option<&AbortSignal>) -> Result<RowSet, DbError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(finished_error());
        }
        if signal.is_some_and(|s| s.is_cancelled()) {
            return Err(DbError::canceled("statement aborted before it was sent"));
        }
        let guard = self.shared.conn.lock().await;
        let conn = guard.as_ref().ok_or_else(finished_error)?;
        round_trip(
            conn,
            &self.shared.pool,
            statement,
            signal,
            self.shared.statement_timeout,
            "transaction",
        )
        .await
        .inspect_err(|e| {
            if aborts_transaction(e) {
                self.shared.failed.store(true, Ordering::Release);
            }
        })
    }

    async fn begin(&self) -> Result<Arc<dyn Transaction>, DbError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(finished_error());
        }
        let name = next_savepoint_name();
        self.batch(&format!("SAVEPOINT {}", quote_ident(&name))).await?;
        tracing::debug!(target: "polydb.sql", savepoint = %name, "savepoint created");
        Ok(Arc::new(PgTransaction {
            shared: self.shared.clone(),
            savepoint: Some(name),
            finished: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(&self) -> Result<(), DbError> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(finished_error());
        }
        if self.shared.failed.load(Ordering::Acquire) {
            tracing::warn!(
                target: "polydb.sql",
                savepoint = ?self.savepoint,
                "commit requested after a failed statement; rolling back"
            );
            self.undo().await?;
            return Err(failed_transaction_error());
        }
        match &self.savepoint {
            Some(name) => self.batch(&format!("RELEASE SAVEPOINT {}", quote_ident(name))).await,
            None => self.finish("COMMIT").await,
        }
    }

    async fn rollback(&self) -> Result<(), DbError> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(finished_error());
        }
        self.undo().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let sql = "SELECT 'é'";
        assert_eq!(truncate_sql_bytes(sql, 9), "SELECT '");
        assert_eq!(truncate_sql_bytes(sql, 100), sql);
    }

    #[test]
    fn savepoint_names_are_unique() {
        let a = next_savepoint_name();
        let b = next_savepoint_name();
        assert_ne!(a, b);
        assert!(a.starts_with("polydb_sp_"));
    }

    #[tokio::test]
    async fn race_stops_at_the_deadline() {
        let outcome = race(
            std::future::pending::<()>(),
            None,
            Some(Duration::from_millis(20)),
        )
        .await;
        assert_eq!(outcome, Err(Interrupt::TimedOut(Duration::from_millis(20))));

        let done = race(async { 7 }, None, Some(Duration::from_secs(5))).await;
        assert_eq!(done, Ok(7));
    }

    #[tokio::test]
    async fn race_stops_when_signal_fires_mid_flight() {
        let signal = AbortSignal::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let outcome = race(std::future::pending::<()>(), Some(&signal), None).await;
        assert_eq!(outcome, Err(Interrupt::Aborted));
        assert!(Interrupt::Aborted.into_error("statement").is_canceled());
    }

    #[test]
    fn only_server_errors_abort_a_transaction() {
        assert!(!aborts_transaction(&DbError::build("bad column")));
        assert!(!aborts_transaction(&DbError::decode("c", "bad bytes")));
        assert!(aborts_transaction(&DbError::with_code(codes::UNIQUE_VIOLATION, "dup")));
        assert!(aborts_transaction(&DbError::canceled("timed out")));
        assert_eq!(failed_transaction_error().code(), Some(codes::IN_FAILED_TRANSACTION));
    }

    #[tokio::test]
    async fn abort_before_send_short_circuits() {
        let signal = AbortSignal::new();
        signal.cancel();
        let pool = PoolManager::new(
            crate::config::DbConfig::postgres("postgres://localhost/app"),
            crate::config::RuntimeCapabilities::server(),
        )
        .unwrap();
        let executor = PgExecutor::new(Arc::new(pool));
        let err = executor
            .run(
                &Statement::Raw {
                    sql: "select 1".into(),
                    params: vec![],
                },
                Some(&signal),
            )
            .await
            .unwrap_err();
        assert!(err.is_canceled());
        assert!(!executor.pool().is_initialized());
    }
}
