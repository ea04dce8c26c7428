//! Document sink: the destination store
//!
//! A [`DocumentSink`] organises schema-less documents into named collections
//! inside a namespace. [`DocumentSink::reset_namespace`] drops and recreates
//! the namespace, which makes a migration re-runnable. Batches are loaded with
//! one bulk insert each; a structurally invalid record fails its batch without
//! rolling back what was already inserted.
//!
//! [`MemoryStore`] is the in-process implementation.

mod error;
mod load;
mod memory;
mod update;

use std::time::Instant;

use serde_json::Value;
use tracing::{info, warn};

use crate::aggregation::{Cursor, Pipeline};
use crate::document::{Document, Filter};

pub use error::{StoreError, StoreResult};
pub use load::{LoadStats, RecordBatch};
pub use memory::MemoryStore;
pub use update::{Update, UpdateOutcome};

/// Capability set of the destination store
pub trait DocumentSink {
    /// Drop any namespace of this name, create it empty and make it active
    fn reset_namespace(&mut self, name: &str) -> StoreResult<()>;

    /// Active namespace, if one has been reset
    fn namespace(&self) -> Option<&str>;

    /// Collection names of the active namespace, sorted
    fn collection_names(&self) -> StoreResult<Vec<String>>;

    /// View names of the active namespace, sorted
    fn view_names(&self) -> StoreResult<Vec<String>>;

    /// Number of documents in a collection
    fn count(&self, collection: &str) -> StoreResult<usize>;

    /// Insert all records in one batch, creating the collection if needed
    ///
    /// Returns the number of inserted documents. A record that is not a
    /// mapping fails the batch with [`StoreError::Load`]; records before it
    /// remain inserted.
    fn bulk_insert(&mut self, collection: &str, records: Vec<Value>) -> StoreResult<usize>;

    /// Insert one document, returning its `_id`
    fn insert_one(&mut self, collection: &str, document: Document) -> StoreResult<Value>;

    /// Documents matching a filter, in insertion order
    fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>>;

    /// Update the first matching document
    fn update_one(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateOutcome>;

    /// Update every matching document
    fn update_many(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateOutcome>;

    /// Delete every matching document, returning the number removed
    fn delete_many(&mut self, collection: &str, filter: &Filter) -> StoreResult<usize>;

    /// Register a view; fails with [`StoreError::ViewAlreadyExists`] when the
    /// name is taken
    fn create_view(&mut self, name: &str, base: &str, pipeline: Pipeline) -> StoreResult<()>;

    fn drop_view(&mut self, name: &str) -> StoreResult<()>;

    /// Run a pipeline against a collection or view; evaluated on first poll
    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> StoreResult<Cursor<'_>>;

    /// Bulk insert each batch, continuing past failed ones
    fn load_all(&mut self, batches: Vec<RecordBatch>) -> LoadStats {
        let start = Instant::now();
        let mut stats = LoadStats::new();

        for RecordBatch {
            collection,
            records,
        } in batches
        {
            let rows = records.len();
            match self.bulk_insert(&collection, records) {
                Ok(inserted) => {
                    info!(collection = %collection, documents = inserted, "Collection loaded");
                    stats.record_success(inserted);
                }
                Err(e) => {
                    warn!(
                        collection = %collection,
                        rows,
                        error = %e,
                        "Collection load failed, continuing with next table"
                    );
                    stats.record_failure(e);
                }
            }
        }

        stats.duration = start.elapsed();
        info!(
            loaded = stats.collections_loaded,
            failed = stats.collections_failed,
            documents = stats.documents_inserted,
            duration_ms = stats.duration.as_millis() as u64,
            "Load finished"
        );
        stats
    }
}
