//! CLI error type

use docstore_migrate::config::ConfigError;
use docstore_migrate::migrate::MigrateError;
use docstore_migrate::source::SourceError;
use thiserror::Error;

/// Errors surfaced by CLI commands
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Migrate(#[from] MigrateError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The run ended early; the summary has the details
    #[error("Migration failed")]
    MigrationFailed,
}

impl CliError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            CliError::Config(e) => e.user_message(),
            CliError::Source(e) => e.user_message(),
            CliError::Migrate(e) => e.user_message(),
            CliError::InvalidArgument(_) | CliError::MigrationFailed => self.to_string(),
        }
    }
}
