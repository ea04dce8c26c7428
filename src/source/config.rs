//! Source connection descriptors

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{RowSource, SourceError, SourceResult};

/// Where to extract from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Embedded DuckDB database file (in-memory when `path` is absent)
    Duckdb {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// PostgreSQL server
    Postgres(PostgresConfig),
}

/// PostgreSQL connection descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    pub dbname: String,
    /// Network timeout for establishing the connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_connect_timeout() -> u64 {
    5
}

impl PostgresConfig {
    pub fn new(user: impl Into<String>, dbname: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: user.into(),
            password: None,
            dbname: dbname.into(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Key/value connection string understood by `tokio-postgres`
    pub fn connection_string(&self) -> String {
        let quote = |v: &str| format!("'{}'", v.replace('\\', "\\\\").replace('\'', "\\'"));
        let mut parts = vec![
            format!("host={}", quote(&self.host)),
            format!("port={}", self.port),
            format!("user={}", quote(&self.user)),
            format!("dbname={}", quote(&self.dbname)),
            format!("connect_timeout={}", self.connect_timeout_secs),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("password={}", quote(password)));
        }
        parts.join(" ")
    }

    /// `user@host:port/dbname`, safe for logs
    pub fn target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

impl SourceConfig {
    pub fn validate(&self) -> SourceResult<()> {
        match self {
            SourceConfig::Duckdb { .. } => Ok(()),
            SourceConfig::Postgres(pg) => {
                if pg.user.is_empty() || pg.dbname.is_empty() {
                    return Err(SourceError::InvalidConfig(
                        "postgres source needs both user and dbname".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Connection target for log lines
    pub fn target(&self) -> String {
        match self {
            SourceConfig::Duckdb { path: Some(path) } => path.display().to_string(),
            SourceConfig::Duckdb { path: None } => ":memory:".to_string(),
            SourceConfig::Postgres(pg) => pg.target(),
        }
    }
}

/// Connect to the configured source
///
/// Fails with [`SourceError::Unavailable`] when the connection cannot be
/// established, and with [`SourceError::InvalidConfig`] when the crate was
/// built without support for the requested kind.
pub fn open_source(config: &SourceConfig) -> SourceResult<Box<dyn RowSource>> {
    config.validate()?;
    match config {
        #[cfg(feature = "duckdb-source")]
        SourceConfig::Duckdb { path } => {
            let source = match path {
                Some(path) => super::duckdb::DuckDbSource::open(path)?,
                None => super::duckdb::DuckDbSource::memory()?,
            };
            Ok(Box::new(source))
        }
        #[cfg(not(feature = "duckdb-source"))]
        SourceConfig::Duckdb { .. } => Err(SourceError::InvalidConfig(
            "built without the duckdb-source feature".to_string(),
        )),
        #[cfg(feature = "postgres-source")]
        SourceConfig::Postgres(pg) => Ok(Box::new(super::postgres::PostgresSource::connect(pg)?)),
        #[cfg(not(feature = "postgres-source"))]
        SourceConfig::Postgres(_) => Err(SourceError::InvalidConfig(
            "built without the postgres-source feature".to_string(),
        )),
    }
}
