//! docstore-migrate command line

mod commands;
mod error;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docstore_migrate::migrate::Phase;

use commands::run::{RunArgs, handle_run};
use commands::tables::handle_tables;
use error::CliError;

#[derive(Parser)]
#[command(
    name = "docstore-migrate",
    version,
    about = "Migrate a relational database into a document store"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Also write log lines to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration described by a configuration file
    Run {
        /// Path to the TOML configuration
        #[arg(short, long, default_value = "docstore-migrate.toml")]
        config: PathBuf,

        /// Destination namespace (overrides [sink].namespace)
        #[arg(long)]
        namespace: Option<String>,

        /// Comma-separated phases to run (extracting,loading,reading,mutating,deleting)
        #[arg(long, value_delimiter = ',')]
        phases: Vec<Phase>,

        /// Documents to log per read
        #[arg(long)]
        sample_size: Option<usize>,

        /// Print phase progress to stderr
        #[arg(short, long)]
        verbose: bool,
    },
    /// List the tables the configured source would extract
    Tables {
        /// Path to the TOML configuration
        #[arg(short, long, default_value = "docstore-migrate.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let dispatch = logging::dispatch(&cli.log_level, cli.log_file.as_deref())?;

    tracing::dispatcher::with_default(&dispatch, || execute(cli.command, dispatch.clone()))
        .map_err(|e| anyhow::anyhow!(e.user_message()))
}

fn execute(command: Commands, dispatch: tracing::Dispatch) -> Result<(), CliError> {
    match command {
        Commands::Run {
            config,
            namespace,
            phases,
            sample_size,
            verbose,
        } => handle_run(
            &RunArgs {
                config,
                namespace,
                phases,
                sample_size,
                verbose,
            },
            dispatch,
        ),
        Commands::Tables { config } => handle_tables(&config),
    }
}
