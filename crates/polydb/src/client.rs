//! Application-facing entry point.

use crate::builder::QueryBuilder;
use crate::config::{DbConfig, Provider, RuntimeCapabilities};
use crate::error::{DbError, DbResult, codes};
use crate::executor::{Executor, Statement};
use crate::pool::PoolManager;
use crate::postgres::PgExecutor;
use crate::row::Row;
use crate::rpc::RpcBuilder;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<DbClient> = OnceLock::new();

/// Database client. Cheap to clone; clones share the same backend.
///
/// ```ignore
/// let db = DbClient::connect(DbConfig::from_env()?, RuntimeCapabilities::server())?;
///
/// let user = db.from("users").select("*").eq("id", id).single().await;
/// let n = db.rpc("next_invoice_number", json!({"org_id": org})).single().await;
/// ```
#[derive(Clone)]
pub struct DbClient {
    executor: Arc<dyn Executor>,
    schema: Option<String>,
}

impl std::fmt::Debug for DbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbClient")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl DbClient {
    /// Build a client for the configured provider. No connection is opened until
    /// the first statement runs.
    pub fn connect(config: DbConfig, capabilities: RuntimeCapabilities) -> Result<Self, DbError> {
        config.validate()?;
        match config.provider {
            Provider::DirectPostgres => {
                let schema = config.schema.clone();
                let pool = PoolManager::new(config, capabilities)?;
                let executor = PgExecutor::new(Arc::new(pool));
                Ok(Self::with_executor(Arc::new(executor)).schema(schema))
            }
            Provider::HostedApi => Err(DbError::with_code(
                codes::FEATURE_NOT_SUPPORTED,
                "the hosted-api provider has no built-in backend",
            )
            .hint("construct its executor and pass it to DbClient::with_executor")),
        }
    }

    /// [`DbClient::connect`] with [`DbConfig::from_env`].
    pub fn from_env(capabilities: RuntimeCapabilities) -> Result<Self, DbError> {
        Self::connect(DbConfig::from_env()?, capabilities)
    }

    /// Use a custom backend.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            schema: None,
        }
    }

    /// Schema for unqualified `rpc` names.
    pub fn schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema;
        self
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Start a query on `table` (optionally `schema.table`).
    pub fn from(&self, table: &str) -> QueryBuilder {
        QueryBuilder::new(self.executor.clone(), table)
    }

    /// Call a stored procedure with named arguments given as a JSON object.
    pub fn rpc(&self, function: &str, args: Value) -> RpcBuilder {
        RpcBuilder::new(self.executor.clone(), function, args, self.schema.clone())
    }

    /// Run literal SQL with `$n` placeholders bound to `params`.
    pub async fn raw(&self, sql: &str, params: Vec<Value>) -> DbResult<Vec<Row>> {
        let statement = Statement::Raw {
            sql: sql.to_string(),
            params,
        };
        match self.executor.run(&statement, None).await {
            Ok(set) => DbResult::ok(set.rows),
            Err(e) => DbResult::err(e),
        }
    }

    /// Run `f` inside a transaction.
    ///
    /// Every statement issued through the client handed to `f` runs on one
    /// connection. `Ok` commits, `Err` rolls back. Calling `transaction` on that
    /// client again opens a savepoint.
    ///
    /// ```ignore
    /// let result = db
    ///     .transaction(|tx| async move {
    ///         tx.from("accounts").update(json!({"balance": 90})).eq("id", 1).execute().await.into_result()?;
    ///         tx.from("accounts").update(json!({"balance": 110})).eq("id", 2).execute().await.into_result()?;
    ///         Ok(())
    ///     })
    ///     .await;
    /// ```
    pub async fn transaction<F, Fut, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(DbClient) -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        let tx = match self.executor.begin().await {
            Ok(tx) => tx,
            Err(e) => return DbResult::err(e),
        };
        let scoped = DbClient {
            executor: tx.clone(),
            schema: self.schema.clone(),
        };

        match f(scoped).await {
            Ok(value) => match tx.commit().await {
                Ok(()) => DbResult::ok(value),
                Err(e) => DbResult::err(e),
            },
            Err(error) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        target: "polydb.sql",
                        error = %rollback_err,
                        "rollback failed"
                    );
                    let details = format!("rollback failed: {}", rollback_err.message);
                    return DbResult::err(error.details(details));
                }
                DbResult::err(error)
            }
        }
    }

    /// Release backend resources.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
    }
}

/// Install the process-wide client. Fails if one is already installed.
pub fn install(client: DbClient) -> Result<&'static DbClient, DbError> {
    GLOBAL
        .set(client)
        .map_err(|_| DbError::config("a global DbClient is already installed"))?;
    global()
}

/// The process-wide client set by [`install`].
pub fn global() -> Result<&'static DbClient, DbError> {
    GLOBAL
        .get()
        .ok_or_else(|| DbError::config("no global DbClient installed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockExecutor;
    use serde_json::json;

    #[test]
    fn hosted_api_requires_an_executor() {
        let config = DbConfig {
            provider: Provider::HostedApi,
            ..DbConfig::default()
        };
        let err = DbClient::connect(config, RuntimeCapabilities::edge()).unwrap_err();
        assert_eq!(err.code(), Some(codes::FEATURE_NOT_SUPPORTED));
    }

    #[test]
    fn direct_postgres_fails_fast_on_edge() {
        let err = DbClient::connect(
            DbConfig::postgres("postgres://localhost/app"),
            RuntimeCapabilities::edge(),
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(codes::SOCKETS_UNAVAILABLE));
    }

    #[test]
    fn rpc_uses_client_schema() {
        let client = DbClient::with_executor(MockExecutor::new()).schema(Some("api".into()));
        let compiled = client.rpc("ping", Value::Null).compile().unwrap();
        assert_eq!(compiled.sql, r#"SELECT * FROM "api"."ping"()"#);
    }

    #[tokio::test]
    async fn commits_on_ok() {
        let mock = MockExecutor::new();
        let client = DbClient::with_executor(mock.clone());
        let result = client
            .transaction(|tx| async move {
                tx.from("a").insert(json!({"id": 1})).execute().await.into_result()?;
                Ok(7)
            })
            .await;
        assert_eq!(result.data, Some(7));
        assert_eq!(
            mock.statements(),
            vec![
                "BEGIN",
                r#"INSERT INTO "a" ("id") VALUES ($1) RETURNING *"#,
                "COMMIT"
            ]
        );
    }

    #[tokio::test]
    async fn rolls_back_on_err() {
        let mock = MockExecutor::new();
        let client = DbClient::with_executor(mock.clone());
        let result: DbResult<()> = client
            .transaction(|tx| async move {
                tx.from("a").delete().eq("id", 1).execute().await.into_result()?;
                Err(DbError::new("business rule failed"))
            })
            .await;
        assert_eq!(result.error.unwrap().message, "business rule failed");
        assert_eq!(mock.statements().last().map(String::as_str), Some("ROLLBACK"));
        assert!(!mock.statements().contains(&"COMMIT".to_string()));
    }

    #[tokio::test]
    async fn nested_transaction_uses_savepoint() {
        let mock = MockExecutor::new();
        let client = DbClient::with_executor(mock.clone());
        let result = client
            .transaction(|tx| async move {
                let inner: DbResult<()> = tx
                    .transaction(|sp| async move {
                        sp.raw("select 1", vec![]).await.into_result()?;
                        Err(DbError::new("inner failure"))
                    })
                    .await;
                assert!(inner.error.is_some());
                Ok(())
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(
            mock.statements(),
            vec!["BEGIN", "SAVEPOINT 2", "select 1", "ROLLBACK TO 2", "COMMIT"]
        );
    }

    #[tokio::test]
    async fn raw_binds_params() {
        let mock = MockExecutor::new();
        let client = DbClient::with_executor(mock.clone());
        let result = client.raw("select $1::int", vec![json!(1)]).await;
        assert!(result.is_ok());
        assert_eq!(mock.statements(), vec!["select $1::int"]);
    }

    #[test]
    fn global_install_once() {
        let client = DbClient::with_executor(MockExecutor::new());
        install(client.clone()).unwrap();
        assert!(global().is_ok());
        assert!(install(client).is_err());
    }
}
