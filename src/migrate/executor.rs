//! Migration driver running the phase state machine

use std::fmt;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{Dispatch, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::aggregation::Pipeline;
use crate::document::filter::FilterError;
use crate::document::{Document, Filter};
use crate::source::{Extraction, RowSource, SourceError, SourceGuard, extract_all};
use crate::store::{DocumentSink, StoreError, Update};

use super::config::{MigrationConfig, Phase};
use super::error::{MigrateError, MigrateResult};
use super::plan::{CascadeDelete, Dependent, MigrationPlan, Mutation, MutationKind};

/// Errors kept per phase; further ones are only counted
const MAX_PHASE_ERRORS: usize = 100;

/// Drives `Extracting -> Loading -> Reading -> Mutating -> Deleting -> Done`
///
/// Recoverable failures are logged and tallied per phase. A fatal failure
/// (unreachable source, namespace reset) skips the remaining work phases,
/// but `Done` always runs and releases the source.
#[derive(Debug, Clone)]
pub struct MigrationDriver {
    config: MigrationConfig,
    plan: MigrationPlan,
    dispatch: Option<Dispatch>,
}

impl MigrationDriver {
    /// Create a new driver
    pub fn new(config: MigrationConfig, plan: MigrationPlan) -> MigrateResult<Self> {
        config.validate().map_err(MigrateError::Config)?;
        Ok(Self {
            config,
            plan,
            dispatch: None,
        })
    }

    /// Log through `dispatch` instead of the process-wide default
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }

    /// Run every configured phase once
    pub fn run(&self, source: &mut dyn RowSource, sink: &mut dyn DocumentSink) -> MigrationReport {
        match &self.dispatch {
            Some(dispatch) => {
                tracing::dispatcher::with_default(dispatch, || self.execute(source, sink))
            }
            None => self.execute(source, sink),
        }
    }

    fn execute(&self, source: &mut dyn RowSource, sink: &mut dyn DocumentSink) -> MigrationReport {
        let mut report = MigrationReport::new(Uuid::new_v4().to_string());
        let _span = info_span!(
            "migration_run",
            run_id = %report.run_id,
            namespace = %self.config.namespace
        )
        .entered();

        let start = Instant::now();
        let phases = self.config.effective_phases();
        info!(
            run_id = %report.run_id,
            phases = ?phases.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Starting migration"
        );
        if self.config.verbose {
            eprintln!("Migration run: {}", report.run_id);
        }

        let guard = SourceGuard::new(source);
        let mut extraction: Option<Extraction> = None;

        for phase in phases.into_iter().filter(|p| *p != Phase::Done) {
            if report.fatal.is_some() {
                debug!(phase = phase.name(), "Skipping phase after fatal error");
                report.phases.push(PhaseSummary::skipped(phase));
                continue;
            }

            let _phase_span = info_span!("migration_phase", phase = phase.name()).entered();
            info!(phase = phase.name(), "Starting phase");
            if self.config.verbose {
                eprintln!("Running phase {}...", phase.name());
            }

            let phase_start = Instant::now();
            let mut summary = PhaseSummary::new(phase);
            let outcome = match phase {
                Phase::Extracting => self
                    .extract(guard.source(), &mut summary, &mut report)
                    .map(|e| extraction = Some(e)),
                Phase::Loading => self.load(
                    sink,
                    extraction.take().unwrap_or_default(),
                    &mut summary,
                    &mut report,
                ),
                Phase::Reading => {
                    self.read(sink, &mut summary);
                    Ok(())
                }
                Phase::Mutating => {
                    self.mutate(sink, &report.run_id, &mut summary);
                    Ok(())
                }
                Phase::Deleting => {
                    self.delete(sink, &mut summary);
                    Ok(())
                }
                Phase::Done => Ok(()),
            };
            summary.duration_ms = phase_start.elapsed().as_millis() as u64;

            if let Err(e) = outcome {
                error!(phase = phase.name(), error = %e, "Phase failed, skipping to cleanup");
                summary.add_error(e.to_string());
                report.fatal = Some(e);
            }
            info!(
                phase = phase.name(),
                succeeded = summary.succeeded,
                failed = summary.failed,
                duration_ms = summary.duration_ms,
                "Phase finished"
            );
            if self.config.verbose {
                eprintln!(
                    "Phase {} finished: {} ok, {} failed ({}ms)",
                    phase.name(),
                    summary.succeeded,
                    summary.failed,
                    summary.duration_ms
                );
            }
            report.phases.push(summary);
        }

        report.phases.push(self.finish(guard));
        report.duration_ms = start.elapsed().as_millis() as u64;
        report.status = if report.fatal.is_some() {
            RunStatus::Failed
        } else if report.total_failures() > 0 {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };

        info!(
            run_id = %report.run_id,
            status = %report.status,
            failures = report.total_failures(),
            duration_ms = report.duration_ms,
            "Migration finished"
        );
        report
    }

    fn extract(
        &self,
        source: &dyn RowSource,
        summary: &mut PhaseSummary,
        report: &mut MigrationReport,
    ) -> MigrateResult<Extraction> {
        let extraction = extract_all(source)
            .map_err(|e| MigrateError::from_source("list_tables", source.target(), e))?;

        for table in &extraction.tables {
            info!(table = %table.table, rows = table.row_count(), "Table extracted");
            summary.add_success();
        }
        for failure in &extraction.failures {
            let table = match failure {
                SourceError::Extraction { table, .. } => table.clone(),
                _ => source.target(),
            };
            summary.add_error(MigrateError::from_source("extract", table, failure.clone()).to_string());
        }

        report.tables_extracted = extraction.tables.len();
        report.rows_extracted = extraction.total_rows();
        Ok(extraction)
    }

    fn load(
        &self,
        sink: &mut dyn DocumentSink,
        extraction: Extraction,
        summary: &mut PhaseSummary,
        report: &mut MigrationReport,
    ) -> MigrateResult<()> {
        let namespace = &self.config.namespace;
        sink.reset_namespace(namespace)
            .map_err(|e| MigrateError::namespace("reset_namespace", namespace.as_str(), e))?;
        info!(namespace = %namespace, "Namespace reset");

        let stats = sink.load_all(extraction.into_batches());
        for _ in 0..stats.collections_loaded {
            summary.add_success();
        }
        for failure in stats.failures {
            let collection = failure.target().unwrap_or(namespace.as_str()).to_string();
            summary.add_error(MigrateError::load("bulk_insert", collection, failure).to_string());
        }
        report.documents_loaded = stats.documents_inserted;
        Ok(())
    }

    fn read(&self, sink: &mut dyn DocumentSink, summary: &mut PhaseSummary) {
        for query in &self.plan.reads {
            match self.observe(&*sink, &query.name, &query.collection, &query.pipeline) {
                Ok(_) => summary.add_success(),
                Err(e) => {
                    warn!(pipeline = %query.name, error = %e, "Read pipeline failed, continuing");
                    summary.add_error(e.to_string());
                }
            }
        }

        for view in &self.plan.views {
            let created = sink
                .create_view(&view.name, &view.base, view.pipeline.clone())
                .map_err(|e| MigrateError::view("create_view", view.name.as_str(), e))
                .and_then(|()| {
                    info!(view = %view.name, base = %view.base, "View created");
                    self.observe(&*sink, &view.name, &view.name, &Pipeline::new())
                });
            match created {
                Ok(_) => summary.add_success(),
                Err(e) => {
                    warn!(view = %view.name, error = %e, "View creation failed, continuing");
                    summary.add_error(e.to_string());
                }
            }
        }
    }

    /// Run a pipeline and log its result count and a bounded sample
    fn observe(
        &self,
        sink: &dyn DocumentSink,
        name: &str,
        collection: &str,
        pipeline: &Pipeline,
    ) -> MigrateResult<usize> {
        let start = Instant::now();
        info!(
            pipeline = name,
            collection,
            stages = %pipeline.describe(),
            "Running read pipeline"
        );

        let cursor = sink
            .aggregate(collection, pipeline)
            .map_err(|e| MigrateError::pipeline(name, collection, e))?;

        let mut results = 0;
        for document in cursor {
            let document =
                document.map_err(|e| MigrateError::pipeline(name, collection, StoreError::from(e)))?;
            if results < self.config.sample_size {
                info!(pipeline = name, document = %serde_json::Value::Object(document), "Result");
            }
            results += 1;
        }

        info!(
            pipeline = name,
            results,
            duration_ms = start.elapsed().as_millis() as u64,
            "Read pipeline finished"
        );
        Ok(results)
    }

    fn mutate(&self, sink: &mut dyn DocumentSink, run_id: &str, summary: &mut PhaseSummary) {
        for mutation in &self.plan.mutations {
            self.apply_mutation(sink, mutation, run_id, summary);
        }
    }

    fn apply_mutation(
        &self,
        sink: &mut dyn DocumentSink,
        mutation: &Mutation,
        run_id: &str,
        summary: &mut PhaseSummary,
    ) {
        let name = mutation.name.as_str();
        let collection = mutation.collection.as_str();
        let stamp = |doc: &mut Document| {
            if let Some(field) = &mutation.touch {
                doc.insert(field.clone(), Value::String(Utc::now().to_rfc3339()));
            }
        };
        let fail = |summary: &mut PhaseSummary, e: StoreError| {
            let e = MigrateError::mutation(name, collection, e);
            warn!(mutation = name, error = %e, "Mutation failed, continuing");
            summary.add_error(e.to_string());
        };

        match &mutation.kind {
            MutationKind::RegenerateSecret {
                key_field,
                secret_field,
            } => {
                let documents = match sink.find(collection, &Filter::All) {
                    Ok(documents) => documents,
                    Err(e) => return fail(summary, e),
                };
                for document in documents {
                    let Some(key) = key_of(&document, key_field) else {
                        fail(
                            summary,
                            StoreError::InvalidUpdate(format!("document has no '{key_field}'")),
                        );
                        continue;
                    };
                    let mut update = Update::new()
                        .set(secret_field.clone(), fresh_token(run_id, collection, &key));
                    if let Some(field) = &mutation.touch {
                        update = update.set(field.clone(), Utc::now().to_rfc3339());
                    }
                    match sink.update_one(collection, &Filter::eq(key_field.clone(), key.clone()), &update) {
                        Ok(outcome) => {
                            info!(mutation = name, key = %key, modified = outcome.modified, "Secret regenerated");
                            summary.add_success();
                        }
                        Err(e) => fail(summary, e),
                    }
                }
            }
            MutationKind::Insert(document) => {
                let mut document = document.clone();
                stamp(&mut document);
                match sink.insert_one(collection, document) {
                    Ok(id) => {
                        info!(mutation = name, collection, id = %id, "Document inserted");
                        summary.add_success();
                    }
                    Err(e) => fail(summary, e),
                }
            }
            MutationKind::UpdateMany { filter, update } => {
                let update = match &mutation.touch {
                    Some(field) => update.clone().set(field.clone(), Utc::now().to_rfc3339()),
                    None => update.clone(),
                };
                match sink.update_many(collection, filter, &update) {
                    Ok(outcome) => {
                        info!(
                            mutation = name,
                            collection,
                            matched = outcome.matched,
                            modified = outcome.modified,
                            "Documents updated"
                        );
                        summary.add_success();
                    }
                    Err(e) => fail(summary, e),
                }
            }
        }
    }

    fn delete(&self, sink: &mut dyn DocumentSink, summary: &mut PhaseSummary) {
        for cascade in &self.plan.cascades {
            self.cascade(sink, cascade, summary);
        }
    }

    fn cascade(&self, sink: &mut dyn DocumentSink, cascade: &CascadeDelete, summary: &mut PhaseSummary) {
        let name = cascade.name.as_str();
        info!(
            cascade = name,
            anchor = %cascade.anchor,
            order = ?cascade.deletion_order(),
            "Selecting deletion targets"
        );

        let targets = sink
            .aggregate(&cascade.anchor, &cascade.selector)
            .and_then(|cursor| cursor.collect_documents().map_err(StoreError::from));
        match targets {
            Ok(targets) => {
                info!(cascade = name, targets = targets.len(), "Deletion targets selected");
                for target in &targets {
                    match self.delete_target(sink, cascade, target) {
                        Ok(removed) => {
                            debug!(cascade = name, removed, "Target deleted");
                            summary.add_success();
                        }
                        Err(e) => {
                            warn!(cascade = name, error = %e, "Deletion failed, continuing");
                            summary.add_error(e.to_string());
                        }
                    }
                }
            }
            Err(e) => {
                let e = MigrateError::deletion(name, cascade.anchor.as_str(), e);
                warn!(cascade = name, error = %e, "Target selection failed, continuing with sweep");
                summary.add_error(e.to_string());
            }
        }

        if let Some((collection, filter)) = &cascade.sweep {
            match sink.delete_many(collection, filter) {
                Ok(removed) => {
                    info!(cascade = name, collection = %collection, removed, "Sweep finished");
                    summary.add_success();
                }
                Err(e) => {
                    let e = MigrateError::deletion(name, collection.as_str(), e);
                    warn!(cascade = name, error = %e, "Sweep failed");
                    summary.add_error(e.to_string());
                }
            }
        }
    }

    /// Delete one target: dependents leaves first, then the anchor, then owners
    fn delete_target(
        &self,
        sink: &mut dyn DocumentSink,
        cascade: &CascadeDelete,
        target: &Document,
    ) -> MigrateResult<usize> {
        let name = cascade.name.as_str();
        let key = key_of(target, &cascade.anchor_key)
            .ok_or_else(|| missing_key(name, &cascade.anchor, &cascade.anchor_key))?;

        let mut removed = delete_dependents(sink, name, &cascade.dependents, &key)?;
        removed += sink
            .delete_many(&cascade.anchor, &Filter::eq(cascade.anchor_key.clone(), key.clone()))
            .map_err(|e| MigrateError::deletion(name, cascade.anchor.as_str(), e))?;

        for owner in &cascade.owners {
            let Some(owner_key) = key_of(target, &owner.local_field) else {
                continue;
            };
            removed += sink
                .delete_many(&owner.collection, &Filter::eq(owner.key.clone(), owner_key))
                .map_err(|e| MigrateError::deletion(name, owner.collection.as_str(), e))?;
        }

        info!(cascade = name, key = %key, removed, "Deleted {} {}", cascade.anchor_key, key);
        Ok(removed)
    }

    fn finish(&self, guard: SourceGuard<'_>) -> PhaseSummary {
        let _span = info_span!("migration_phase", phase = Phase::Done.name()).entered();
        let start = Instant::now();
        let mut summary = PhaseSummary::new(Phase::Done);
        match guard.close() {
            Ok(()) => {
                info!("Source connection released");
                summary.add_success();
            }
            Err(e) => {
                warn!(error = %e, "Failed to release source connection");
                summary.add_error(e.to_string());
            }
        }
        summary.duration_ms = start.elapsed().as_millis() as u64;
        summary
    }
}

/// Non-null key value of a document
fn key_of(document: &Document, field: &str) -> Option<Value> {
    document.get(field).filter(|v| !v.is_null()).cloned()
}

fn missing_key(operation: &str, collection: &str, field: &str) -> MigrateError {
    MigrateError::deletion(
        operation,
        collection,
        StoreError::Filter(FilterError(format!("selected document has no '{field}'"))),
    )
}

/// Delete the documents referencing `parent_key`, their own dependents first
fn delete_dependents(
    sink: &mut dyn DocumentSink,
    operation: &str,
    dependents: &[Dependent],
    parent_key: &Value,
) -> MigrateResult<usize> {
    let mut removed = 0;
    for dependent in dependents {
        let filter = Filter::eq(dependent.foreign_key.clone(), parent_key.clone());
        let fail = |e| MigrateError::deletion(operation, dependent.collection.as_str(), e);

        if let Some(key_field) = &dependent.key {
            let children = sink.find(&dependent.collection, &filter).map_err(fail)?;
            for child in &children {
                if let Some(child_key) = key_of(child, key_field) {
                    removed += delete_dependents(sink, operation, &dependent.dependents, &child_key)?;
                }
            }
        }
        removed += sink.delete_many(&dependent.collection, &filter).map_err(fail)?;
    }
    Ok(removed)
}

/// Fresh random hex token for a secret field
fn fresh_token(run_id: &str, collection: &str, key: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(collection.as_bytes());
    hasher.update(key.to_string().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every phase ran without failures
    Completed,
    /// Every phase ran; some items failed
    CompletedWithErrors,
    /// A fatal error skipped the remaining phases
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithErrors => write!(f, "completed with errors"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Success and failure counts of one phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub succeeded: usize,
    pub failed: usize,
    /// First failures, in order
    pub errors: Vec<String>,
    /// Not run because of an earlier fatal error
    pub skipped: bool,
    pub duration_ms: u64,
}

impl PhaseSummary {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            succeeded: 0,
            failed: 0,
            errors: Vec::new(),
            skipped: false,
            duration_ms: 0,
        }
    }

    pub fn skipped(phase: Phase) -> Self {
        Self {
            skipped: true,
            ..Self::new(phase)
        }
    }

    pub fn add_success(&mut self) {
        self.succeeded += 1;
    }

    /// Count a failure, keeping the first 100 messages
    pub fn add_error(&mut self, error: String) {
        self.failed += 1;
        if self.errors.len() < MAX_PHASE_ERRORS {
            self.errors.push(error);
        }
    }
}

/// Report from a migration run
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub run_id: String,
    pub status: RunStatus,
    /// Phases in execution order, ending with `Done`
    pub phases: Vec<PhaseSummary>,
    pub tables_extracted: usize,
    pub rows_extracted: usize,
    pub documents_loaded: usize,
    /// Error that ended the run early
    pub fatal: Option<MigrateError>,
    pub duration_ms: u64,
}

impl MigrationReport {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            status: RunStatus::Completed,
            phases: Vec::new(),
            tables_extracted: 0,
            rows_extracted: 0,
            documents_loaded: 0,
            fatal: None,
            duration_ms: 0,
        }
    }

    /// Whether the run got through every configured phase
    pub fn is_success(&self) -> bool {
        self.status != RunStatus::Failed
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseSummary> {
        self.phases.iter().find(|s| s.phase == phase)
    }

    pub fn total_failures(&self) -> usize {
        self.phases.iter().map(|s| s.failed).sum()
    }

    /// Get formatted duration
    pub fn duration_formatted(&self) -> String {
        let secs = self.duration_ms / 1000;
        let mins = secs / 60;
        let remaining_secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, remaining_secs)
        } else {
            format!("{}s", secs)
        }
    }

    /// Print summary to stderr
    pub fn print_summary(&self) {
        eprintln!();
        eprintln!("Migration {} - {}", self.run_id, self.status);
        eprintln!("Duration: {}", self.duration_formatted());
        eprintln!(
            "Tables extracted: {} ({} rows), documents loaded: {}",
            self.tables_extracted, self.rows_extracted, self.documents_loaded
        );

        for summary in &self.phases {
            if summary.skipped {
                eprintln!("  - {}: skipped", summary.phase);
                continue;
            }
            eprintln!(
                "  - {}: {} ok, {} failed ({}ms)",
                summary.phase, summary.succeeded, summary.failed, summary.duration_ms
            );
            for error in &summary.errors {
                eprintln!("      {}", error);
            }
        }

        if let Some(fatal) = &self.fatal {
            eprintln!();
            eprintln!("{}", fatal.user_message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn source() -> MemorySource {
        MemorySource::new()
            .with_table("staff", vec![
                json!({"staff_id": 1, "first_name": "Mike", "password": "8cb2237d0679ca88db6464eac60da96345513964"}),
                json!({"staff_id": 2, "first_name": "Jon", "password": "8cb2237d0679ca88db6464eac60da96345513964"}),
            ])
            .with_table("store", vec![json!({"store_id": 1, "manager_staff_id": 1})])
    }

    #[test]
    fn test_report_formatting() {
        let mut report = MigrationReport::new("test-123".to_string());
        report.duration_ms = 65000;
        assert!(report.is_success());
        assert_eq!(report.duration_formatted(), "1m 5s");
        report.duration_ms = 4200;
        assert_eq!(report.duration_formatted(), "4s");
    }

    #[test]
    fn test_phase_summary_caps_errors() {
        let mut summary = PhaseSummary::new(Phase::Reading);
        for i in 0..150 {
            summary.add_error(format!("error {i}"));
        }
        assert_eq!(summary.failed, 150);
        assert_eq!(summary.errors.len(), 100);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = MigrationConfig::new().with_phases(vec![Phase::Loading]);
        let err = MigrationDriver::new(config, MigrationPlan::new()).unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[test]
    fn test_regenerate_secret_touches_every_document() {
        let plan = MigrationPlan::new().with_mutation(
            Mutation::regenerate_secret("regenerate_staff_passwords", "staff", "staff_id", "password")
                .touching("last_update"),
        );
        let driver = MigrationDriver::new(MigrationConfig::new(), plan).unwrap();
        let mut source = source();
        let mut store = MemoryStore::new();

        let report = driver.run(&mut source, &mut store);
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.phase(Phase::Mutating).unwrap().succeeded, 2);

        let staff = store.find("staff", &Filter::All).unwrap();
        assert_ne!(staff[0]["password"], staff[1]["password"]);
        assert!(staff.iter().all(|s| s["password"].as_str().map(str::len) == Some(64)));
        assert!(staff.iter().all(|s| s.contains_key("last_update")));
    }

    #[test]
    fn test_failed_mutation_does_not_block_next() {
        let plan = MigrationPlan::new()
            .with_mutation(Mutation::update_many(
                "touch_missing",
                "nope",
                Filter::All,
                Update::new().set("x", 1),
            ))
            .with_mutation(Mutation::insert("create_store", "store", json!({"store_id": 69})));
        let driver = MigrationDriver::new(MigrationConfig::new(), plan).unwrap();
        let mut source = source();
        let mut store = MemoryStore::new();

        let report = driver.run(&mut source, &mut store);
        assert_eq!(report.status, RunStatus::CompletedWithErrors);
        let mutating = report.phase(Phase::Mutating).unwrap();
        assert_eq!((mutating.succeeded, mutating.failed), (1, 1));
        assert!(mutating.errors[0].contains("touch_missing"));
        assert_eq!(store.count("store").unwrap(), 2);
    }

    #[test]
    fn test_unavailable_source_skips_to_done() {
        let driver = MigrationDriver::new(MigrationConfig::new(), MigrationPlan::new()).unwrap();
        let mut source = MemorySource::new().unavailable("connection refused");
        let mut store = MemoryStore::new();

        let report = driver.run(&mut source, &mut store);
        assert_eq!(report.status, RunStatus::Failed);
        assert!(matches!(report.fatal, Some(MigrateError::SourceUnavailable { .. })));
        assert!(report.phase(Phase::Loading).unwrap().skipped);
        assert!(report.phase(Phase::Deleting).unwrap().skipped);
        assert_eq!(report.phases.last().map(|s| s.phase), Some(Phase::Done));
        assert_eq!(source.close_calls(), 1);
    }

    #[test]
    fn test_invalid_namespace_is_fatal() {
        let config = MigrationConfig::new().with_namespace("bad name!");
        let driver = MigrationDriver::new(config, MigrationPlan::new()).unwrap();
        let mut source = source();
        let mut store = MemoryStore::new();

        let report = driver.run(&mut source, &mut store);
        assert!(matches!(report.fatal, Some(MigrateError::Namespace { .. })));
        assert!(report.phase(Phase::Reading).unwrap().skipped);
        assert!(source.is_closed());
    }

    #[test]
    fn test_injected_dispatch() {
        let dispatch = Dispatch::new(tracing::subscriber::NoSubscriber::default());
        let driver = MigrationDriver::new(
            MigrationConfig::new().with_phases(vec![Phase::Extracting, Phase::Loading]),
            MigrationPlan::new(),
        )
        .unwrap()
        .with_dispatch(dispatch);
        let mut source = source();
        let mut store = MemoryStore::new();

        let report = driver.run(&mut source, &mut store);
        assert!(report.is_success());
        assert_eq!(report.documents_loaded, 3);
        assert_eq!(
            report.phases.iter().map(|s| s.phase).collect::<Vec<_>>(),
            vec![Phase::Extracting, Phase::Loading, Phase::Done]
        );
    }
}
