//! `run` command

use std::path::PathBuf;

use docstore_migrate::config::AppConfig;
use docstore_migrate::migrate::{MigrationDriver, Phase};
use docstore_migrate::source::open_source;
use docstore_migrate::store::{DocumentSink, MemoryStore};
use tracing::{Dispatch, warn};

use crate::error::CliError;

/// Arguments of `docstore-migrate run`
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub config: PathBuf,
    pub namespace: Option<String>,
    pub phases: Vec<Phase>,
    pub sample_size: Option<usize>,
    pub verbose: bool,
}

/// Handle the run command
pub fn handle_run(args: &RunArgs, dispatch: Dispatch) -> Result<(), CliError> {
    let app = AppConfig::load(&args.config)?;

    let mut config = app.migration_config();
    if let Some(namespace) = &args.namespace {
        config = config.with_namespace(namespace.clone());
    }
    if !args.phases.is_empty() {
        config = config.with_phases(args.phases.clone());
    }
    if let Some(sample_size) = args.sample_size {
        if sample_size == 0 {
            return Err(CliError::InvalidArgument(
                "--sample-size must be at least 1".to_string(),
            ));
        }
        config = config.with_sample_size(sample_size);
    }
    if args.verbose {
        config = config.with_verbose(true);
    }

    let plan = app.plan()?;
    let driver = MigrationDriver::new(config, plan)?.with_dispatch(dispatch);

    let mut source = open_source(&app.source)?;
    let mut store = MemoryStore::new();
    warn!(
        namespace = %driver.config().namespace,
        "Destination is an in-memory store; migrated documents are discarded on exit"
    );
    let report = driver.run(source.as_mut(), &mut store);

    report.print_summary();
    print_collections(&store);

    if report.is_success() {
        eprintln!("\nMigration completed successfully");
        Ok(())
    } else {
        Err(CliError::MigrationFailed)
    }
}

fn print_collections(store: &MemoryStore) {
    let Some(namespace) = store.namespace() else {
        return;
    };
    let Ok(collections) = store.collection_names() else {
        return;
    };

    eprintln!("\n{}", namespace_header(namespace));
    for name in collections {
        let count = store.count(&name).unwrap_or(0);
        eprintln!("  {:<24} {:>8}", name, count);
    }
    if let Ok(views) = store.view_names() {
        for name in views {
            eprintln!("  {:<24} {:>8}", name, "(view)");
        }
    }
}

/// Heading of the end-of-run collection listing
fn namespace_header(namespace: &str) -> String {
    format!("Namespace '{namespace}' (in memory, discarded on exit):")
}
