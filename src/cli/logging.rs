use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Build the logger handed to the migration driver.
///
/// Uses the `RUST_LOG` env var if set, otherwise falls back to the provided level.
/// With a log file, every line goes both to stdout and to the file.
pub fn dispatch(log_level: &str, log_file: Option<&Path>) -> Result<Dispatch> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    let dispatch = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            Dispatch::new(
                builder
                    .with_ansi(false)
                    .with_writer(std::io::stdout.and(Mutex::new(file)))
                    .finish(),
            )
        }
        None => Dispatch::new(builder.finish()),
    };
    Ok(dispatch)
}
