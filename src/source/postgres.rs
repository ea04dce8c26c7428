//! PostgreSQL row source
//!
//! Rows are rendered server-side with `row_to_json`, so every column type the
//! server knows how to serialise comes through without client-side mapping.
//! The async client runs on a private current-thread runtime.

use serde_json::Value;
use tokio::runtime::Runtime;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, warn};

use crate::document::Document;

use super::{PostgresConfig, RowSource, SourceError, SourceResult, TableDescriptor};

const LIST_TABLES_SQL: &str = "SELECT schemaname::text, tablename::text \
     FROM pg_catalog.pg_tables \
     WHERE schemaname NOT IN ('pg_catalog', 'information_schema') \
     ORDER BY tablename, schemaname";

/// Row source over a PostgreSQL database
pub struct PostgresSource {
    runtime: Runtime,
    client: Option<Client>,
    target: String,
}

impl PostgresSource {
    /// Connect to the server described by `config`
    pub fn connect(config: &PostgresConfig) -> SourceResult<Self> {
        let target = config.target();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SourceError::unavailable(&target, e))?;

        let connection_string = config.connection_string();
        let client = runtime.block_on(async {
            let (client, connection) = tokio_postgres::connect(&connection_string, NoTls)
                .await
                .map_err(|e| SourceError::unavailable(&target, e))?;

            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, "PostgreSQL connection error");
                }
            });
            Ok::<_, SourceError>(client)
        })?;

        info!(target_db = %target, "Connected to PostgreSQL source");
        Ok(Self {
            runtime,
            client: Some(client),
            target,
        })
    }

    fn client(&self) -> SourceResult<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| SourceError::unavailable(&self.target, "connection is closed"))
    }
}

impl RowSource for PostgresSource {
    fn target(&self) -> String {
        self.target.clone()
    }

    fn list_tables(&self) -> SourceResult<Vec<TableDescriptor>> {
        let client = self.client()?;
        let rows = self
            .runtime
            .block_on(client.query(LIST_TABLES_SQL, &[]))
            .map_err(|e| SourceError::unavailable(&self.target, e))?;

        let tables: Vec<TableDescriptor> = rows
            .iter()
            .map(|row| TableDescriptor::in_schema(row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect();
        debug!(tables = tables.len(), "Listed PostgreSQL tables");
        Ok(tables)
    }

    fn extract(&self, table: &TableDescriptor) -> SourceResult<Vec<Document>> {
        let client = self.client()?;
        let sql = format!("SELECT row_to_json(t)::text FROM {} t", table.quoted());
        let rows = self
            .runtime
            .block_on(client.query(sql.as_str(), &[]))
            .map_err(|e| SourceError::extraction(&table.name, e))?;

        rows.iter()
            .map(|row| {
                let text: String = row
                    .try_get(0)
                    .map_err(|e| SourceError::extraction(&table.name, e))?;
                match serde_json::from_str::<Value>(&text) {
                    Ok(Value::Object(record)) => Ok(record),
                    Ok(other) => Err(SourceError::extraction(
                        &table.name,
                        format!("row is not a record: {other}"),
                    )),
                    Err(e) => Err(SourceError::extraction(&table.name, e)),
                }
            })
            .collect()
    }

    fn close(&mut self) -> SourceResult<()> {
        if self.client.take().is_some() {
            debug!(target_db = %self.target, "Closed PostgreSQL source");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_server_is_unavailable() {
        let config = PostgresConfig::new("postgres", "dvdrental")
            .with_host("127.0.0.1")
            .with_port(1);
        let err = PostgresSource::connect(&config).err().unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("postgres@127.0.0.1:1/dvdrental"));
    }
}
