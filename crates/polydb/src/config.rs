//! Provider selection and connection configuration.

use crate::error::DbError;
use serde::Deserialize;
use std::time::Duration;

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Which backend executes statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// Backend-as-a-service HTTP API, supplied as an external [`Executor`](crate::Executor).
    HostedApi,
    /// Pooled connections straight to Postgres.
    #[default]
    DirectPostgres,
}

impl Provider {
    pub fn parse(s: &str) -> Result<Self, DbError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hosted-api" | "hosted" | "supabase" => Ok(Provider::HostedApi),
            "direct-postgres" | "postgres" | "pg" => Ok(Provider::DirectPostgres),
            other => Err(DbError::config(format!("Unknown DB_PROVIDER '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Enabled,
    #[default]
    Disabled,
}

impl SslMode {
    pub fn parse(s: &str) -> Result<Self, DbError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enabled" | "true" | "1" | "require" | "on" => Ok(SslMode::Enabled),
            "disabled" | "false" | "0" | "disable" | "off" => Ok(SslMode::Disabled),
            other => Err(DbError::config(format!("Unknown DB_SSL value '{other}'"))),
        }
    }
}

/// Database layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub provider: Provider,
    pub database_url: Option<String>,
    pub max_connections: usize,
    pub ssl_mode: SslMode,
    /// Per-round-trip timeout; expired statements are canceled server-side.
    #[serde(with = "opt_millis")]
    pub statement_timeout: Option<Duration>,
    /// Schema used to qualify unqualified `rpc` names.
    pub schema: Option<String>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            ssl_mode: SslMode::default(),
            statement_timeout: None,
            schema: None,
        }
    }
}

impl DbConfig {
    /// Direct-postgres configuration for a connection string.
    pub fn postgres(database_url: impl Into<String>) -> Self {
        Self {
            database_url: Some(database_url.into()),
            ..Self::default()
        }
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Read `DB_PROVIDER`, `DATABASE_URL`, `DB_POOL_MAX`, `DB_SSL`,
    /// `DB_STATEMENT_TIMEOUT_MS` and `DB_SCHEMA`.
    pub fn from_env() -> Result<Self, DbError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`DbConfig::from_env`], reading keys through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DbError> {
        let mut config = DbConfig::default();
        if let Some(provider) = lookup("DB_PROVIDER") {
            config.provider = Provider::parse(&provider)?;
        }
        config.database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());
        if let Some(max) = lookup("DB_POOL_MAX") {
            config.max_connections = max
                .trim()
                .parse()
                .map_err(|_| DbError::config(format!("DB_POOL_MAX must be an integer, got '{max}'")))?;
        }
        if let Some(ssl) = lookup("DB_SSL") {
            config.ssl_mode = SslMode::parse(&ssl)?;
        }
        if let Some(ms) = lookup("DB_STATEMENT_TIMEOUT_MS") {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                DbError::config(format!("DB_STATEMENT_TIMEOUT_MS must be an integer, got '{ms}'"))
            })?;
            config.statement_timeout = Some(Duration::from_millis(ms));
        }
        config.schema = lookup("DB_SCHEMA").filter(|s| !s.trim().is_empty());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DbError> {
        if self.max_connections == 0 {
            return Err(DbError::config("max_connections must be at least 1"));
        }
        if self.provider == Provider::DirectPostgres && self.database_url.is_none() {
            return Err(DbError::config("DATABASE_URL is required for the direct-postgres provider"));
        }
        Ok(())
    }
}

/// What the host runtime allows. Decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeCapabilities {
    /// Whether long-lived TCP sockets (and therefore a pool) are allowed.
    pub persistent_sockets: bool,
}

impl RuntimeCapabilities {
    /// Long-running server process.
    pub const fn server() -> Self {
        Self {
            persistent_sockets: true,
        }
    }

    /// Edge/isolate runtime without persistent sockets.
    pub const fn edge() -> Self {
        Self {
            persistent_sockets: false,
        }
    }
}

impl Default for RuntimeCapabilities {
    fn default() -> Self {
        Self::server()
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
