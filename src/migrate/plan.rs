//! Declarative description of what a run does after loading
//!
//! A [`MigrationPlan`] lists the read pipelines, the views to register, the
//! mutations and the cascading deletes. Plans are plain data, so they can be
//! checked against synthetic collections without a real source.

use serde_json::Value;

use crate::aggregation::Pipeline;
use crate::document::{Document, Filter};
use crate::store::Update;

/// A named read pipeline, run for observation only
#[derive(Debug, Clone, PartialEq)]
pub struct ReadQuery {
    pub name: String,
    pub collection: String,
    pub pipeline: Pipeline,
}

impl ReadQuery {
    pub fn new(name: impl Into<String>, collection: impl Into<String>, pipeline: Pipeline) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            pipeline,
        }
    }
}

/// A view to register during the reading phase
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSpec {
    pub name: String,
    pub base: String,
    pub pipeline: Pipeline,
}

impl ViewSpec {
    pub fn new(name: impl Into<String>, base: impl Into<String>, pipeline: Pipeline) -> Self {
        Self {
            name: name.into(),
            base: base.into(),
            pipeline,
        }
    }
}

/// What a mutation writes
#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    /// Give every document a fresh random token, one update per document
    RegenerateSecret {
        /// Field identifying the document
        key_field: String,
        /// Field receiving the token
        secret_field: String,
    },
    /// Insert one document
    Insert(Document),
    /// Apply one update to every matching document
    UpdateMany { filter: Filter, update: Update },
}

/// One independent write of the mutating phase
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub name: String,
    pub collection: String,
    pub kind: MutationKind,
    /// Field set to the current UTC time on every written document
    pub touch: Option<String>,
}

impl Mutation {
    pub fn regenerate_secret(
        name: impl Into<String>,
        collection: impl Into<String>,
        key_field: impl Into<String>,
        secret_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            kind: MutationKind::RegenerateSecret {
                key_field: key_field.into(),
                secret_field: secret_field.into(),
            },
            touch: None,
        }
    }

    /// Insert a record; non-object values insert an empty document
    pub fn insert(name: impl Into<String>, collection: impl Into<String>, record: Value) -> Self {
        let document = match record {
            Value::Object(map) => map,
            _ => Document::new(),
        };
        Self {
            name: name.into(),
            collection: collection.into(),
            kind: MutationKind::Insert(document),
            touch: None,
        }
    }

    pub fn update_many(
        name: impl Into<String>,
        collection: impl Into<String>,
        filter: Filter,
        update: Update,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            kind: MutationKind::UpdateMany { filter, update },
            touch: None,
        }
    }

    /// Stamp the current time into `field` on every write
    pub fn touching(mut self, field: impl Into<String>) -> Self {
        self.touch = Some(field.into());
        self
    }
}

/// A collection whose documents reference a parent by key
///
/// Dependents are deleted before their parent, deepest level first.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependent {
    pub collection: String,
    /// Field holding the parent's key
    pub foreign_key: String,
    /// Own key, referenced by nested dependents
    pub key: Option<String>,
    pub dependents: Vec<Dependent>,
}

impl Dependent {
    pub fn new(collection: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            foreign_key: foreign_key.into(),
            key: None,
            dependents: Vec::new(),
        }
    }

    /// Set the key nested dependents refer to and add one of them
    pub fn with_dependent(mut self, key: impl Into<String>, dependent: Dependent) -> Self {
        self.key = Some(key.into());
        self.dependents.push(dependent);
        self
    }

    /// Number of levels below and including this one
    pub fn depth(&self) -> usize {
        1 + self.dependents.iter().map(Dependent::depth).max().unwrap_or(0)
    }
}

/// A parent of the anchor, deleted after the anchor itself
#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    pub collection: String,
    /// Key field in the owner collection
    pub key: String,
    /// Field of the selected anchor document holding that key
    pub local_field: String,
}

impl Owner {
    pub fn new(
        collection: impl Into<String>,
        key: impl Into<String>,
        local_field: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            local_field: local_field.into(),
        }
    }
}

/// Two-phase cascading delete
///
/// `selector` runs against `anchor` and yields the targets. For each target
/// the dependents are deleted from the leaves up, then the anchor document,
/// then its owners. `sweep` finally deletes owner-level documents that match
/// the business predicate directly, catching the ones no anchor referenced.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeDelete {
    pub name: String,
    pub anchor: String,
    pub selector: Pipeline,
    /// Key field of the anchor collection
    pub anchor_key: String,
    pub dependents: Vec<Dependent>,
    pub owners: Vec<Owner>,
    /// Final sweep as `(collection, filter)`
    pub sweep: Option<(String, Filter)>,
}

impl CascadeDelete {
    pub fn new(
        name: impl Into<String>,
        anchor: impl Into<String>,
        anchor_key: impl Into<String>,
        selector: Pipeline,
    ) -> Self {
        Self {
            name: name.into(),
            anchor: anchor.into(),
            selector,
            anchor_key: anchor_key.into(),
            dependents: Vec::new(),
            owners: Vec::new(),
            sweep: None,
        }
    }

    pub fn with_dependent(mut self, dependent: Dependent) -> Self {
        self.dependents.push(dependent);
        self
    }

    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.owners.push(owner);
        self
    }

    pub fn with_sweep(mut self, collection: impl Into<String>, filter: Filter) -> Self {
        self.sweep = Some((collection.into(), filter));
        self
    }

    /// Collections in deletion order for one target, children first
    pub fn deletion_order(&self) -> Vec<&str> {
        fn walk<'a>(dependent: &'a Dependent, out: &mut Vec<&'a str>) {
            for child in &dependent.dependents {
                walk(child, out);
            }
            out.push(&dependent.collection);
        }

        let mut order = Vec::new();
        for dependent in &self.dependents {
            walk(dependent, &mut order);
        }
        order.push(&self.anchor);
        order.extend(self.owners.iter().map(|o| o.collection.as_str()));
        order
    }
}

/// Everything a run does after loading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    pub reads: Vec<ReadQuery>,
    pub views: Vec<ViewSpec>,
    pub mutations: Vec<Mutation>,
    pub cascades: Vec<CascadeDelete>,
}

impl MigrationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read(
        mut self,
        name: impl Into<String>,
        collection: impl Into<String>,
        pipeline: Pipeline,
    ) -> Self {
        self.reads.push(ReadQuery::new(name, collection, pipeline));
        self
    }

    pub fn with_view(
        mut self,
        name: impl Into<String>,
        base: impl Into<String>,
        pipeline: Pipeline,
    ) -> Self {
        self.views.push(ViewSpec::new(name, base, pipeline));
        self
    }

    pub fn with_mutation(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn with_cascade(mut self, cascade: CascadeDelete) -> Self {
        self.cascades.push(cascade);
        self
    }

    /// Append extra reads, e.g. from a configuration file
    pub fn extend_reads(&mut self, reads: impl IntoIterator<Item = ReadQuery>) {
        self.reads.extend(reads);
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
            && self.views.is_empty()
            && self.mutations.is_empty()
            && self.cascades.is_empty()
    }
}
