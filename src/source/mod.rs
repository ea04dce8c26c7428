//! Row sources: the relational origin of a migration
//!
//! A [`RowSource`] lists its user tables and extracts each one as a sequence
//! of self-contained JSON records, one per row, with null columns omitted. No
//! joins happen at this stage.
//!
//! [`extract_all`] walks every table, logging and skipping the ones that fail
//! (an unreachable source is the only fatal condition). [`SourceGuard`] makes
//! sure the connection is released on every exit path.

pub mod config;
mod error;

#[cfg(feature = "duckdb-source")]
pub mod duckdb;
#[cfg(feature = "postgres-source")]
pub mod postgres;

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::document::{Document, strip_nulls};
use crate::store::RecordBatch;

pub use config::{PostgresConfig, SourceConfig, open_source};
pub use error::{SourceError, SourceResult};

/// Schemas whose tables load under their bare name
const DEFAULT_SCHEMAS: [&str; 2] = ["main", "public"];

/// A table of the source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Schema the table lives in, when the source has schemas
    pub schema: Option<String>,
    /// Table name; becomes the collection name
    pub name: String,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn in_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Collection the table loads into
    ///
    /// Tables of the default schema (`main` for DuckDB, `public` for
    /// PostgreSQL) keep their bare name; others are qualified as
    /// `schema.table` so same-named tables never share a collection.
    pub fn collection_name(&self) -> String {
        match self.schema.as_deref() {
            None => self.name.clone(),
            Some(schema) if DEFAULT_SCHEMAS.contains(&schema) => self.name.clone(),
            Some(schema) => format!("{schema}.{}", self.name),
        }
    }

    /// Quoted, schema-qualified identifier for SQL
    pub fn quoted(&self) -> String {
        let quote = |ident: &str| format!("\"{}\"", ident.replace('"', "\"\""));
        match &self.schema {
            Some(schema) => format!("{}.{}", quote(schema), quote(&self.name)),
            None => quote(&self.name),
        }
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Read-only access to a relational source
pub trait RowSource {
    /// Connection target for log lines (no credentials)
    fn target(&self) -> String;

    /// User tables, excluding system and catalog tables, in a stable order
    fn list_tables(&self) -> SourceResult<Vec<TableDescriptor>>;

    /// Every row of a table as a record
    fn extract(&self, table: &TableDescriptor) -> SourceResult<Vec<Document>>;

    /// Release the connection; calling it again is a no-op
    fn close(&mut self) -> SourceResult<()>;
}

/// Rows of one extracted table
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTable {
    pub table: TableDescriptor,
    pub rows: Vec<Document>,
}

impl ExtractedTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Records ready for a bulk insert into the table's collection
    pub fn into_batch(self) -> RecordBatch {
        RecordBatch::new(
            self.table.collection_name(),
            self.rows.into_iter().map(Value::Object).collect(),
        )
    }
}

/// Result of [`extract_all`]
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub tables: Vec<ExtractedTable>,
    /// Per-table failures, in listing order
    pub failures: Vec<SourceError>,
    pub duration: Duration,
}

impl Extraction {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(ExtractedTable::row_count).sum()
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.tables
            .into_iter()
            .map(ExtractedTable::into_batch)
            .collect()
    }
}

/// Extract every table, skipping the ones that fail
///
/// Only a failure to list tables is returned as an error.
pub fn extract_all(source: &dyn RowSource) -> SourceResult<Extraction> {
    let start = Instant::now();
    let tables = source.list_tables()?;
    info!(target_db = %source.target(), tables = tables.len(), "Listed source tables");

    let mut extraction = Extraction::default();
    for table in tables {
        match source.extract(&table) {
            Ok(rows) => {
                let rows: Vec<Document> = rows.into_iter().map(strip_nulls).collect();
                debug!(table = %table, rows = rows.len(), "Extracted table");
                extraction.tables.push(ExtractedTable { table, rows });
            }
            Err(e) => {
                warn!(table = %table, error = %e, "Extraction failed, skipping table");
                extraction.failures.push(e);
            }
        }
    }

    extraction.duration = start.elapsed();
    info!(
        extracted = extraction.tables.len(),
        failed = extraction.failures.len(),
        rows = extraction.total_rows(),
        duration_ms = extraction.duration.as_millis() as u64,
        "Extraction finished"
    );
    Ok(extraction)
}

/// Closes the wrapped source when dropped
pub struct SourceGuard<'a> {
    source: &'a mut dyn RowSource,
    closed: bool,
}

impl<'a> SourceGuard<'a> {
    pub fn new(source: &'a mut dyn RowSource) -> Self {
        Self {
            source,
            closed: false,
        }
    }

    pub fn source(&self) -> &dyn RowSource {
        &*self.source
    }

    /// Close now and report the outcome
    pub fn close(mut self) -> SourceResult<()> {
        self.closed = true;
        self.source.close()
    }
}

impl Drop for SourceGuard<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.source.close() {
            warn!(target_db = %self.source.target(), error = %e, "Failed to close source");
        }
    }
}

/// Row source over in-memory tables
///
/// Tables can be marked as failing, and the whole source as unreachable,
/// to exercise error paths.
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: Vec<(TableDescriptor, Result<Vec<Value>, String>)>,
    unavailable: Option<String>,
    close_calls: usize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table; rows are JSON values and may contain null columns
    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Value>) -> Self {
        self.tables.push((TableDescriptor::new(name), Ok(rows)));
        self
    }

    /// Add a table whose extraction fails
    pub fn with_failing_table(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
        self.tables
            .push((TableDescriptor::new(name), Err(reason.into())));
        self
    }

    /// Make every listing fail as if the server were down
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.unavailable = Some(reason.into());
        self
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls > 0
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls
    }
}

impl RowSource for MemorySource {
    fn target(&self) -> String {
        "memory".to_string()
    }

    fn list_tables(&self) -> SourceResult<Vec<TableDescriptor>> {
        if let Some(reason) = &self.unavailable {
            return Err(SourceError::unavailable(self.target(), reason));
        }
        Ok(self.tables.iter().map(|(t, _)| t.clone()).collect())
    }

    fn extract(&self, table: &TableDescriptor) -> SourceResult<Vec<Document>> {
        let (_, rows) = self
            .tables
            .iter()
            .find(|(t, _)| t == table)
            .ok_or_else(|| SourceError::extraction(&table.name, "no such table"))?;
        let rows = rows
            .as_ref()
            .map_err(|reason| SourceError::extraction(&table.name, reason))?;

        rows.iter()
            .enumerate()
            .map(|(i, row)| match row {
                Value::Object(map) => Ok(map.clone()),
                other => Err(SourceError::extraction(
                    &table.name,
                    format!("row {i} is not a record: {other}"),
                )),
            })
            .collect()
    }

    fn close(&mut self) -> SourceResult<()> {
        self.close_calls += 1;
        Ok(())
    }
}
