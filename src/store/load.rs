//! Batch loading statistics

use std::time::Duration;

use serde_json::Value;

use super::error::StoreError;

/// Failures kept per load; further ones are only counted
const MAX_LOAD_FAILURES: usize = 100;

/// Records destined for one collection
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordBatch {
    pub collection: String,
    pub records: Vec<Value>,
}

impl RecordBatch {
    pub fn new(collection: impl Into<String>, records: Vec<Value>) -> Self {
        Self {
            collection: collection.into(),
            records,
        }
    }
}

/// Tally of a [`load_all`](super::DocumentSink::load_all) call
#[derive(Debug, Clone, Default)]
pub struct LoadStats {
    /// Collections whose batch inserted completely
    pub collections_loaded: usize,
    /// Collections whose batch failed (possibly after a partial insert)
    pub collections_failed: usize,
    /// Documents inserted, including those of partially failed batches
    pub documents_inserted: usize,
    /// First failures, in load order
    pub failures: Vec<StoreError>,
    pub duration: Duration,
}

impl LoadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, inserted: usize) {
        self.collections_loaded += 1;
        self.documents_inserted += inserted;
    }

    pub fn record_failure(&mut self, error: StoreError) {
        self.collections_failed += 1;
        if let StoreError::Load { inserted, .. } = &error {
            self.documents_inserted += inserted;
        }
        if self.failures.len() < MAX_LOAD_FAILURES {
            self.failures.push(error);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.collections_failed == 0
    }

    /// Documents per second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.documents_inserted as f64 / secs
        }
    }
}
