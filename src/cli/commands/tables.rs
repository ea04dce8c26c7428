//! `tables` command

use std::path::Path;

use docstore_migrate::config::AppConfig;
use docstore_migrate::source::{SourceGuard, open_source};

use crate::error::CliError;

/// Print the tables the configured source would extract
pub fn handle_tables(config_path: &Path) -> Result<(), CliError> {
    let config = AppConfig::load(config_path)?;
    let mut source = open_source(&config.source)?;
    let guard = SourceGuard::new(source.as_mut());

    let tables = guard.source().list_tables()?;
    eprintln!(
        "{} table(s) in {}:",
        tables.len(),
        guard.source().target()
    );
    for table in &tables {
        println!("{table}");
    }

    guard.close()?;
    Ok(())
}
