//! In-process document store

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregation::{self, CollectionResolver, Cursor, Pipeline};
use crate::document::{Document, Filter};
use crate::view::{ViewDefinition, ViewRegistry};

use super::error::{StoreError, StoreResult};
use super::update::{Update, UpdateOutcome};
use super::DocumentSink;

static NAME_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").ok());

fn is_valid_namespace(name: &str) -> bool {
    NAME_PATTERN.as_ref().is_some_and(|re| re.is_match(name))
}

fn is_valid_collection(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('$') && !name.contains('\0')
}

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Document>,
    /// Insertion sequence, the input of deterministic ids
    next_seq: u64,
}

impl Collection {
    fn push(&mut self, namespace: &str, collection: &str, mut doc: Document) -> Value {
        let seq = self.next_seq;
        self.next_seq += 1;

        let id = doc
            .entry("_id")
            .or_insert_with(|| {
                let key = format!("{namespace}.{collection}:{seq}");
                Value::String(Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string())
            })
            .clone();
        self.documents.push(doc);
        id
    }
}

#[derive(Debug, Default)]
struct Namespace {
    collections: BTreeMap<String, Collection>,
    views: ViewRegistry,
}

impl CollectionResolver for Namespace {
    fn collection(&self, name: &str) -> Option<&[Document]> {
        self.collections.get(name).map(|c| c.documents.as_slice())
    }

    fn view(&self, name: &str) -> Option<&ViewDefinition> {
        self.views.get(name)
    }
}

/// Document store held in memory
///
/// Holds any number of namespaces; operations act on the one most recently
/// reset.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: BTreeMap<String, Namespace>,
    active: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all namespaces held
    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces.keys().cloned().collect()
    }

    /// Drop a namespace entirely
    pub fn drop_namespace(&mut self, name: &str) -> bool {
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
        self.namespaces.remove(name).is_some()
    }

    /// Snapshot of a collection's documents in insertion order
    pub fn documents(&self, collection: &str) -> StoreResult<Vec<Document>> {
        Ok(self.active_collection(collection)?.documents.clone())
    }

    fn active(&self) -> StoreResult<&Namespace> {
        let name = self
            .active
            .as_deref()
            .ok_or(StoreError::NamespaceNotSelected)?;
        self.namespaces
            .get(name)
            .ok_or(StoreError::NamespaceNotSelected)
    }

    fn active_mut(&mut self) -> StoreResult<(&str, &mut Namespace)> {
        let name = self
            .active
            .as_deref()
            .ok_or(StoreError::NamespaceNotSelected)?;
        let namespace = self
            .namespaces
            .get_mut(name)
            .ok_or(StoreError::NamespaceNotSelected)?;
        Ok((name, namespace))
    }

    fn active_collection(&self, collection: &str) -> StoreResult<&Collection> {
        self.active()?
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
    }

    fn active_collection_mut(&mut self, collection: &str) -> StoreResult<&mut Collection> {
        let (_, namespace) = self.active_mut()?;
        namespace
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
    }

    fn update(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        limit: Option<usize>,
    ) -> StoreResult<UpdateOutcome> {
        update.validate()?;
        let coll = self.active_collection_mut(collection)?;

        let mut outcome = UpdateOutcome::default();
        for doc in coll.documents.iter_mut().filter(|d| filter.matches(d)) {
            if limit.is_some_and(|n| outcome.matched >= n) {
                break;
            }
            outcome.matched += 1;
            if update.apply(doc)? {
                outcome.modified += 1;
            }
        }

        debug!(
            collection,
            matched = outcome.matched,
            modified = outcome.modified,
            "Update applied"
        );
        Ok(outcome)
    }
}

impl DocumentSink for MemoryStore {
    fn reset_namespace(&mut self, name: &str) -> StoreResult<()> {
        if !is_valid_namespace(name) {
            return Err(StoreError::InvalidNamespace(name.to_string()));
        }

        if let Some(old) = self.namespaces.remove(name) {
            info!(
                namespace = name,
                collections = old.collections.len(),
                views = old.views.len(),
                "Dropped existing namespace"
            );
        }
        self.namespaces
            .insert(name.to_string(), Namespace::default());
        self.active = Some(name.to_string());
        Ok(())
    }

    fn namespace(&self) -> Option<&str> {
        self.active.as_deref()
    }

    fn collection_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.active()?.collections.keys().cloned().collect())
    }

    fn view_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.active()?.views.names())
    }

    fn count(&self, collection: &str) -> StoreResult<usize> {
        Ok(self.active_collection(collection)?.documents.len())
    }

    fn bulk_insert(&mut self, collection: &str, records: Vec<Value>) -> StoreResult<usize> {
        if !is_valid_collection(collection) {
            return Err(StoreError::InvalidCollection(collection.to_string()));
        }
        let (namespace, ns) = self.active_mut()?;
        if ns.views.contains(collection) {
            return Err(StoreError::InvalidCollection(collection.to_string()));
        }

        let coll = ns.collections.entry(collection.to_string()).or_default();
        let mut inserted = 0;
        for (index, record) in records.into_iter().enumerate() {
            let doc = match record {
                Value::Object(doc) => doc,
                record => {
                    warn!(
                        namespace,
                        collection,
                        index,
                        inserted,
                        "Invalid record stopped bulk insert; inserted documents are kept"
                    );
                    return Err(StoreError::Load {
                        collection: collection.to_string(),
                        index,
                        inserted,
                        reason: format!("record is not a mapping: {record}"),
                    });
                }
            };
            coll.push(namespace, collection, doc);
            inserted += 1;
        }

        debug!(namespace, collection, inserted, "Bulk insert complete");
        Ok(inserted)
    }

    fn insert_one(&mut self, collection: &str, document: Document) -> StoreResult<Value> {
        if !is_valid_collection(collection) {
            return Err(StoreError::InvalidCollection(collection.to_string()));
        }
        let (namespace, ns) = self.active_mut()?;
        if ns.views.contains(collection) {
            return Err(StoreError::InvalidCollection(collection.to_string()));
        }
        let coll = ns.collections.entry(collection.to_string()).or_default();
        Ok(coll.push(namespace, collection, document))
    }

    fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        Ok(self
            .active_collection(collection)?
            .documents
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    fn update_one(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateOutcome> {
        self.update(collection, filter, update, Some(1))
    }

    fn update_many(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateOutcome> {
        self.update(collection, filter, update, None)
    }

    fn delete_many(&mut self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        let coll = self.active_collection_mut(collection)?;
        let before = coll.documents.len();
        coll.documents.retain(|d| !filter.matches(d));
        let deleted = before - coll.documents.len();
        debug!(collection, deleted, "Delete applied");
        Ok(deleted)
    }

    fn create_view(&mut self, name: &str, base: &str, pipeline: Pipeline) -> StoreResult<()> {
        if !is_valid_collection(name) {
            return Err(StoreError::InvalidCollection(name.to_string()));
        }
        let (_, ns) = self.active_mut()?;
        if ns.collections.contains_key(name) {
            return Err(StoreError::ViewAlreadyExists(name.to_string()));
        }
        ns.views.create(name, base, pipeline)?;
        Ok(())
    }

    fn drop_view(&mut self, name: &str) -> StoreResult<()> {
        let (_, ns) = self.active_mut()?;
        ns.views.drop_view(name)?;
        Ok(())
    }

    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> StoreResult<Cursor<'_>> {
        let namespace = self.active()?;
        Ok(aggregation::run(namespace, collection, pipeline))
    }
}
