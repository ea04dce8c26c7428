//! TOML run configuration
//!
//! ```toml
//! [source]
//! kind = "postgres"
//! user = "postgres"
//! password = "${PGPASSWORD}"
//! dbname = "dvdrental"
//!
//! [sink]
//! namespace = "dvdrental"
//!
//! [run]
//! sample_size = 10
//! short_film_minutes = 60
//! phases = ["extracting", "loading", "reading"]
//!
//! [[queries]]
//! name = "films"
//! collection = "film"
//! pipeline = '[{"$count": "film"}]'
//! ```
//!
//! `${VAR}` references are replaced from the environment before parsing.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregation::Pipeline;
use crate::migrate::{
    DEFAULT_NAMESPACE, DEFAULT_SAMPLE_SIZE, DEFAULT_SHORT_FILM_MINUTES, MigrationConfig,
    MigrationPlan, Phase, ReadQuery,
};
use crate::source::SourceConfig;

static ENV_VAR_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok());

/// Errors raised while loading a configuration file
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Missing environment variable(s): {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    /// A `[[queries]]` pipeline does not parse
    #[error("Query '{name}' is invalid: {reason}")]
    InvalidQuery { name: String, reason: String },
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::Io { path, .. } => format!(
                "{self}\n\nHint: Pass the configuration with --config; {} does not exist or is unreadable.",
                path.display()
            ),
            ConfigError::MissingEnv(_) => {
                format!("{self}\n\nHint: Export the variables or remove the ${{...}} references.")
            }
            ConfigError::InvalidQuery { .. } => format!(
                "{self}\n\nHint: `pipeline` must be a JSON array of stage objects, e.g. '[{{\"$count\": \"n\"}}]'."
            ),
            ConfigError::Parse(_) => self.to_string(),
        }
    }
}

/// Destination settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

/// Run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Films shorter than this are deleted in the deleting phase
    #[serde(default = "default_short_film_minutes")]
    pub short_film_minutes: i64,
    /// Phases to run (empty = all)
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            short_film_minutes: default_short_film_minutes(),
            phases: Vec::new(),
            verbose: false,
        }
    }
}

/// An extra read pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    pub name: String,
    pub collection: String,
    /// JSON array of stages
    pub pipeline: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_sample_size() -> usize {
    DEFAULT_SAMPLE_SIZE
}

fn default_short_film_minutes() -> i64 {
    DEFAULT_SHORT_FILM_MINUTES
}

/// Application configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub queries: Vec<QueryConfig>,
}

impl AppConfig {
    /// Read and parse a configuration file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration text (after env var substitution)
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let substituted = substitute_env_vars(text)?;
        toml::from_str(&substituted).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Driver settings from `[sink]` and `[run]`
    pub fn migration_config(&self) -> MigrationConfig {
        MigrationConfig::new()
            .with_namespace(self.sink.namespace.clone())
            .with_phases(self.run.phases.clone())
            .with_sample_size(self.run.sample_size)
            .with_verbose(self.run.verbose)
    }

    /// `[[queries]]` as read pipelines
    pub fn read_queries(&self) -> ConfigResult<Vec<ReadQuery>> {
        self.queries
            .iter()
            .map(|q| {
                let pipeline = Pipeline::parse_str(&q.pipeline).map_err(|e| ConfigError::InvalidQuery {
                    name: q.name.clone(),
                    reason: e.to_string(),
                })?;
                Ok(ReadQuery::new(q.name.clone(), q.collection.clone(), pipeline))
            })
            .collect()
    }

    /// Built-in dvdrental plan extended with `[[queries]]`
    pub fn plan(&self) -> ConfigResult<MigrationPlan> {
        let mut plan = MigrationPlan::dvdrental(self.run.short_film_minutes).map_err(|e| {
            ConfigError::InvalidQuery {
                name: "dvdrental".to_string(),
                reason: e.to_string(),
            }
        })?;
        plan.extend_reads(self.read_queries()?);
        Ok(plan)
    }
}

/// Substitute `${VAR_NAME}` patterns with environment variable values
pub fn substitute_env_vars(input: &str) -> ConfigResult<String> {
    let Some(re) = ENV_VAR_RE.as_ref() else {
        return Ok(input.to_string());
    };

    let mut result = input.to_string();
    let mut missing = Vec::new();
    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => result = result.replace(&cap[0], &val),
            Err(_) => missing.push(var_name.to_string()),
        }
    }

    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(ConfigError::MissingEnv(missing));
    }
    Ok(result)
}
