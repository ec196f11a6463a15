//! In-memory executor for unit tests.

use crate::error::DbError;
use crate::executor::{AbortSignal, Executor, RowSet, Statement, Transaction};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Shared {
    statements: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Result<RowSet, DbError>>>,
}

/// Records compiled SQL and replays queued responses (empty row sets by default).
/// Transactions write `BEGIN`/`COMMIT`/`ROLLBACK` and savepoint markers to the same log.
pub(crate) struct MockExecutor {
    shared: Arc<Shared>,
    depth: usize,
}

impl MockExecutor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::default(),
            depth: 0,
        })
    }

    pub(crate) fn respond(&self, response: Result<RowSet, DbError>) {
        self.shared.responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.shared.statements.lock().unwrap().clone()
    }

    fn log(&self, line: impl Into<String>) {
        self.shared.statements.lock().unwrap().push(line.into());
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn run(&self, statement: &Statement, signal: Option<&AbortSignal>) -> Result<RowSet, DbError> {
        if signal.is_some_and(|s| s.is_cancelled()) {
            return Err(DbError::canceled("statement aborted by signal"));
        }
        let compiled = statement.compile()?;
        self.log(compiled.sql);
        self.shared
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RowSet::default()))
    }

    async fn begin(&self) -> Result<Arc<dyn Transaction>, DbError> {
        let depth = self.depth + 1;
        self.log(if depth == 1 { "BEGIN".to_string() } else { format!("SAVEPOINT {depth}") });
        Ok(Arc::new(MockExecutor {
            shared: self.shared.clone(),
            depth,
        }))
    }
}

#[async_trait]
impl Transaction for MockExecutor {
    async fn commit(&self) -> Result<(), DbError> {
        self.log(if self.depth == 1 { "COMMIT".to_string() } else { format!("RELEASE {}", self.depth) });
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DbError> {
        self.log(if self.depth == 1 { "ROLLBACK".to_string() } else { format!("ROLLBACK TO {}", self.depth) });
        Ok(())
    }
}
