//! Pipeline evaluation
//!
//! The engine never mutates a collection. It copies the base documents (or the
//! output of a view) and threads them through each stage in order. Evaluation
//! is deferred until the returned [`Cursor`] is first polled and happens at
//! most once per cursor; a new cursor re-reads the current collection state.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde_json::Value;
use tracing::debug;

use crate::document::{
    Document, canonical_key, compare_values, get_path, remove_path, root_field, set_path,
};
use crate::view::ViewDefinition;

use super::error::{PipelineError, PipelineResult};
use super::expr::{AccumulatorState, Expression};
use super::stage::{
    GroupSpec, LookupSpec, Pipeline, Projection, SortDirection, SortKey, Stage, UnwindSpec,
};

/// Maximum nesting of views over views
pub const MAX_VIEW_DEPTH: usize = 16;

/// Read access to collections and views by name
pub trait CollectionResolver {
    /// Documents of a stored collection
    fn collection(&self, name: &str) -> Option<&[Document]>;

    /// Definition of a view
    fn view(&self, name: &str) -> Option<&ViewDefinition>;
}

/// Lazily evaluated pipeline result
///
/// Yields `Err` once (and then ends) if evaluation fails.
pub struct Cursor<'a> {
    state: CursorState<'a>,
}

enum CursorState<'a> {
    Pending {
        resolver: &'a dyn CollectionResolver,
        collection: String,
        pipeline: Pipeline,
    },
    Ready(std::vec::IntoIter<Document>),
    Done,
}

impl<'a> Cursor<'a> {
    pub fn new(
        resolver: &'a dyn CollectionResolver,
        collection: impl Into<String>,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            state: CursorState::Pending {
                resolver,
                collection: collection.into(),
                pipeline,
            },
        }
    }

    /// Whether the pipeline has been evaluated yet
    pub fn is_evaluated(&self) -> bool {
        !matches!(self.state, CursorState::Pending { .. })
    }

    /// Drain the cursor, stopping at the first error
    pub fn collect_documents(self) -> PipelineResult<Vec<Document>> {
        self.collect()
    }
}

impl Iterator for Cursor<'_> {
    type Item = PipelineResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.state, CursorState::Done) {
                CursorState::Pending {
                    resolver,
                    collection,
                    pipeline,
                } => match evaluate(resolver, &collection, &pipeline) {
                    Ok(docs) => self.state = CursorState::Ready(docs.into_iter()),
                    Err(e) => return Some(Err(e)),
                },
                CursorState::Ready(mut docs) => {
                    let next = docs.next();
                    if next.is_some() {
                        self.state = CursorState::Ready(docs);
                    }
                    return next.map(Ok);
                }
                CursorState::Done => return None,
            }
        }
    }
}

/// Run a pipeline lazily against a collection or view
pub fn run<'a>(
    resolver: &'a dyn CollectionResolver,
    collection: &str,
    pipeline: &Pipeline,
) -> Cursor<'a> {
    Cursor::new(resolver, collection, pipeline.clone())
}

/// Evaluate a pipeline eagerly
pub fn evaluate(
    resolver: &dyn CollectionResolver,
    collection: &str,
    pipeline: &Pipeline,
) -> PipelineResult<Vec<Document>> {
    let input = load(resolver, collection, None, 0)?;
    apply(resolver, collection, pipeline.stages(), input, 0)
}

/// Documents of a collection, or the evaluated output of a view
fn load(
    resolver: &dyn CollectionResolver,
    name: &str,
    stage: Option<usize>,
    depth: usize,
) -> PipelineResult<Vec<Document>> {
    if let Some(docs) = resolver.collection(name) {
        return Ok(docs.to_vec());
    }

    if let Some(view) = resolver.view(name) {
        if depth >= MAX_VIEW_DEPTH {
            return Err(PipelineError::ViewDepthExceeded {
                view: name.to_string(),
                max_depth: MAX_VIEW_DEPTH,
            });
        }
        let base = load(resolver, &view.base, stage, depth + 1)?;
        return apply(resolver, &view.base, view.pipeline.stages(), base, depth + 1);
    }

    Err(PipelineError::UnknownCollection {
        collection: name.to_string(),
        stage,
    })
}

fn apply(
    resolver: &dyn CollectionResolver,
    collection: &str,
    stages: &[Stage],
    mut docs: Vec<Document>,
    depth: usize,
) -> PipelineResult<Vec<Document>> {
    for (index, stage) in stages.iter().enumerate() {
        let input = docs.len();
        let ctx = StageContext {
            resolver,
            collection,
            index,
            stage,
            depth,
        };
        docs = ctx.run(docs)?;
        debug!(
            collection,
            index,
            stage = stage.name(),
            input,
            output = docs.len(),
            "Stage evaluated"
        );
    }
    Ok(docs)
}

struct StageContext<'a> {
    resolver: &'a dyn CollectionResolver,
    collection: &'a str,
    index: usize,
    stage: &'a Stage,
    depth: usize,
}

impl StageContext<'_> {
    fn run(&self, docs: Vec<Document>) -> PipelineResult<Vec<Document>> {
        match self.stage {
            Stage::Match(filter) => {
                self.require(&docs, filter.required_paths())?;
                Ok(docs.into_iter().filter(|d| filter.matches(d)).collect())
            }
            Stage::Group(spec) => self.group(spec, docs),
            Stage::Sort(keys) => self.sort(keys, docs),
            Stage::Limit(n) => {
                let mut docs = docs;
                docs.truncate(*n);
                Ok(docs)
            }
            Stage::Lookup(spec) => self.lookup(spec, docs),
            Stage::Unwind(spec) => self.unwind(spec, docs),
            Stage::AddFields(fields) => self.add_fields(fields, docs),
            Stage::Project(fields) => self.project(fields, docs),
            Stage::Count(name) => {
                if docs.is_empty() {
                    return Ok(docs);
                }
                let mut out = Document::new();
                out.insert(name.clone(), Value::from(docs.len()));
                Ok(vec![out])
            }
        }
    }

    fn missing(&self, collection: &str, path: &str) -> PipelineError {
        PipelineError::MissingField {
            index: self.index,
            stage: self.stage.name().to_string(),
            collection: collection.to_string(),
            path: path.to_string(),
        }
    }

    fn failed(&self, message: String) -> PipelineError {
        PipelineError::StageFailed {
            index: self.index,
            stage: self.stage.name().to_string(),
            collection: self.collection.to_string(),
            message,
        }
    }

    /// Every path must be rooted in at least one document of a non-empty input
    fn require<'p>(
        &self,
        docs: &[Document],
        paths: impl IntoIterator<Item = &'p str>,
    ) -> PipelineResult<()> {
        self.require_in(self.collection, docs, paths)
    }

    fn require_in<'p>(
        &self,
        collection: &str,
        docs: &[Document],
        paths: impl IntoIterator<Item = &'p str>,
    ) -> PipelineResult<()> {
        if docs.is_empty() {
            return Ok(());
        }
        for path in paths {
            let root = root_field(path);
            if !docs.iter().any(|d| d.contains_key(root)) {
                return Err(self.missing(collection, path));
            }
        }
        Ok(())
    }

    fn group(&self, spec: &GroupSpec, docs: Vec<Document>) -> PipelineResult<Vec<Document>> {
        self.require(&docs, spec.key.field_paths())?;
        for (_, acc) in &spec.accumulators {
            if let Some(expr) = acc.expression() {
                self.require(&docs, expr.field_paths())?;
            }
        }

        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(Value, Vec<AccumulatorState>)> = Vec::new();

        for doc in &docs {
            let key = spec
                .key
                .evaluate(doc)
                .map_err(|m| self.failed(m))?
                .unwrap_or(Value::Null);

            let slot = match slots.entry(canonical_key(&key)) {
                Entry::Occupied(entry) => *entry.get(),
                Entry::Vacant(entry) => {
                    let states = spec.accumulators.iter().map(|(_, a)| a.start()).collect();
                    groups.push((key, states));
                    *entry.insert(groups.len() - 1)
                }
            };

            for ((_, acc), state) in spec.accumulators.iter().zip(groups[slot].1.iter_mut()) {
                state.update(acc, doc).map_err(|m| self.failed(m))?;
            }
        }

        Ok(groups
            .into_iter()
            .map(|(key, states)| {
                let mut out = Document::new();
                out.insert("_id".to_string(), key);
                for ((name, _), state) in spec.accumulators.iter().zip(states) {
                    out.insert(name.clone(), state.finish());
                }
                out
            })
            .collect())
    }

    fn sort(&self, keys: &[SortKey], docs: Vec<Document>) -> PipelineResult<Vec<Document>> {
        self.require(&docs, keys.iter().map(|k| k.path.as_str()))?;

        let mut keyed: Vec<(Vec<Option<Value>>, Document)> = docs
            .into_iter()
            .map(|d| (keys.iter().map(|k| get_path(&d, &k.path)).collect(), d))
            .collect();

        // stable: ties keep input order
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, key) in keys.iter().enumerate() {
                let ord = compare_values(a[i].as_ref(), b[i].as_ref());
                let ord = match key.direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        Ok(keyed.into_iter().map(|(_, d)| d).collect())
    }

    fn lookup(&self, spec: &LookupSpec, docs: Vec<Document>) -> PipelineResult<Vec<Document>> {
        self.require(&docs, [spec.local_field.as_str()])?;

        let foreign = load(self.resolver, &spec.from, Some(self.index), self.depth)?;
        self.require_in(&spec.from, &foreign, [spec.foreign_field.as_str()])?;

        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, foreign_doc) in foreign.iter().enumerate() {
            let Some(value) = get_path(foreign_doc, &spec.foreign_field) else {
                continue;
            };
            for key in join_keys(&value) {
                let positions = index.entry(key).or_default();
                if positions.last() != Some(&position) {
                    positions.push(position);
                }
            }
        }

        Ok(docs
            .into_iter()
            .map(|mut doc| {
                let mut matched: Vec<usize> = get_path(&doc, &spec.local_field)
                    .map(|local| join_keys(&local))
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|key| index.get(key))
                    .flatten()
                    .copied()
                    .collect();
                matched.sort_unstable();
                matched.dedup();

                let joined = matched
                    .into_iter()
                    .map(|p| Value::Object(foreign[p].clone()))
                    .collect();
                set_path(&mut doc, &spec.as_field, Value::Array(joined));
                doc
            })
            .collect())
    }

    fn unwind(&self, spec: &UnwindSpec, docs: Vec<Document>) -> PipelineResult<Vec<Document>> {
        self.require(&docs, [spec.path.as_str()])?;

        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            match get_path(&doc, &spec.path) {
                Some(Value::Array(items)) if !items.is_empty() => {
                    for item in items {
                        let mut copy = doc.clone();
                        set_path(&mut copy, &spec.path, item);
                        out.push(copy);
                    }
                }
                Some(Value::Array(_)) | Some(Value::Null) | None => {
                    if spec.preserve_missing {
                        let mut kept = doc;
                        set_path(&mut kept, &spec.path, Value::Null);
                        out.push(kept);
                    }
                }
                Some(_) => out.push(doc),
            }
        }
        Ok(out)
    }

    fn add_fields(
        &self,
        fields: &[(String, Expression)],
        docs: Vec<Document>,
    ) -> PipelineResult<Vec<Document>> {
        self.require(&docs, fields.iter().flat_map(|(_, e)| e.field_paths()))?;

        docs.into_iter()
            .map(|mut doc| {
                let computed = fields
                    .iter()
                    .map(|(name, expr)| expr.evaluate(&doc).map(|v| (name, v)))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|m| self.failed(m))?;
                for (name, value) in computed {
                    if let Some(value) = value {
                        set_path(&mut doc, name, value);
                    }
                }
                Ok(doc)
            })
            .collect()
    }

    fn project(
        &self,
        fields: &[(String, Projection)],
        docs: Vec<Document>,
    ) -> PipelineResult<Vec<Document>> {
        let read_paths = fields.iter().flat_map(|(name, p)| match p {
            Projection::Include if name != "_id" => vec![name.as_str()],
            Projection::Computed(expr) => expr.field_paths(),
            _ => Vec::new(),
        });
        self.require(&docs, read_paths)?;

        let inclusion = fields
            .iter()
            .any(|(_, p)| !matches!(p, Projection::Exclude));
        if !inclusion {
            return Ok(docs
                .into_iter()
                .map(|mut doc| {
                    for (name, _) in fields {
                        remove_path(&mut doc, name);
                    }
                    doc
                })
                .collect());
        }

        let mentions_id = fields.iter().any(|(name, _)| name == "_id");
        docs.iter()
            .map(|doc| {
                let mut out = Document::new();
                if !mentions_id {
                    if let Some(id) = doc.get("_id") {
                        out.insert("_id".to_string(), id.clone());
                    }
                }
                for (name, projection) in fields {
                    let value = match projection {
                        Projection::Exclude => None,
                        Projection::Include => get_path(doc, name),
                        Projection::Computed(expr) => {
                            expr.evaluate(doc).map_err(|m| self.failed(m))?
                        }
                    };
                    if let Some(value) = value {
                        set_path(&mut out, name, value);
                    }
                }
                Ok(out)
            })
            .collect()
    }
}

/// Hash keys a value joins on: each element of an array, nothing for null
fn join_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(canonical_key)
            .collect(),
        scalar => vec![canonical_key(scalar)],
    }
}
