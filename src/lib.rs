//! docstore-migrate - Relational to document store migration
//!
//! Provides:
//! - Row sources that extract every table as JSON records (DuckDB, PostgreSQL)
//! - A document sink with per-table bulk loading, updates and deletes
//! - An aggregation pipeline engine (`$match`, `$group`, `$lookup`, `$unwind`, ...)
//!   used to rebuild relational views on the loaded collections
//! - Views bound to a base collection, re-evaluated on every read
//! - A migration driver running extract, load, read, mutate and delete phases

pub mod aggregation;
#[cfg(feature = "config")]
pub mod config;
pub mod document;
pub mod migrate;
pub mod source;
pub mod store;
pub mod view;

// Re-export commonly used types
pub use aggregation::{Cursor, Pipeline, PipelineError, Stage};
pub use document::{Document, Filter};
pub use migrate::{
    MigrateError, MigrationConfig, MigrationDriver, MigrationPlan, MigrationReport, Phase,
};
pub use source::{RowSource, SourceConfig, SourceError, TableDescriptor, open_source};
pub use store::{DocumentSink, MemoryStore, StoreError, Update};
pub use view::{ViewDefinition, ViewRegistry};

#[cfg(feature = "config")]
pub use config::{AppConfig, ConfigError};
#[cfg(feature = "duckdb-source")]
pub use source::duckdb::DuckDbSource;
#[cfg(feature = "postgres-source")]
pub use source::postgres::PostgresSource;
