//! Views: named pipelines bound to a base collection
//!
//! A view stores only its definition. Every read re-runs the bound pipeline
//! against the current state of the base collection; results are never cached.
//! Creating a view under a name that is already taken fails with
//! [`StoreError::ViewAlreadyExists`] and leaves the existing definition as it
//! was. Replacing a view means dropping it first.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::aggregation::Pipeline;
use crate::store::{StoreError, StoreResult};

/// A saved query over a base collection (or another view)
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDefinition {
    pub name: String,
    pub base: String,
    pub pipeline: Pipeline,
    pub created_at: DateTime<Utc>,
}

impl ViewDefinition {
    pub fn new(name: impl Into<String>, base: impl Into<String>, pipeline: Pipeline) -> Self {
        Self {
            name: name.into(),
            base: base.into(),
            pipeline,
            created_at: Utc::now(),
        }
    }
}

/// View definitions of one namespace
#[derive(Debug, Clone, Default)]
pub struct ViewRegistry {
    views: BTreeMap<String, ViewDefinition>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view; an existing name is never overwritten
    pub fn create(
        &mut self,
        name: &str,
        base: &str,
        pipeline: Pipeline,
    ) -> StoreResult<&ViewDefinition> {
        if self.views.contains_key(name) {
            return Err(StoreError::ViewAlreadyExists(name.to_string()));
        }

        info!(
            view = name,
            base,
            pipeline = %pipeline.describe(),
            "Creating view"
        );
        let definition = ViewDefinition::new(name, base, pipeline);
        Ok(self.views.entry(name.to_string()).or_insert(definition))
    }

    /// Remove a view, returning its definition
    pub fn drop_view(&mut self, name: &str) -> StoreResult<ViewDefinition> {
        self.views
            .remove(name)
            .ok_or_else(|| StoreError::ViewNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ViewDefinition> {
        self.views.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.views.contains_key(name)
    }

    /// View names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.views.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
