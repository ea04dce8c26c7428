//! Error types for migration runs
//!
//! Every kind carries the operation that failed, the target it was working
//! on (table, collection, view or pipeline name) and the original cause.

use thiserror::Error;

use crate::source::SourceError;
use crate::store::StoreError;

/// Errors raised while driving a migration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MigrateError {
    /// The source could not be reached; the run cannot get past extraction
    #[error("{operation}: source {target} unavailable: {source}")]
    SourceUnavailable {
        operation: String,
        target: String,
        #[source]
        source: SourceError,
    },

    /// One table could not be extracted
    #[error("{operation}: table '{target}' skipped: {source}")]
    Extraction {
        operation: String,
        target: String,
        #[source]
        source: SourceError,
    },

    /// One batch could not be loaded (possibly partially)
    #[error("{operation}: collection '{target}' not fully loaded: {source}")]
    Load {
        operation: String,
        target: String,
        #[source]
        source: StoreError,
    },

    /// A read pipeline failed
    #[error("{operation}: pipeline on '{target}' failed: {source}")]
    Pipeline {
        operation: String,
        target: String,
        #[source]
        source: StoreError,
    },

    /// A view of that name is already registered
    #[error("{operation}: view '{target}' already exists")]
    ViewAlreadyExists { operation: String, target: String },

    /// One mutation failed
    #[error("{operation}: mutation of '{target}' failed: {source}")]
    Mutation {
        operation: String,
        target: String,
        #[source]
        source: StoreError,
    },

    /// One cascading delete failed
    #[error("{operation}: deletion in '{target}' failed: {source}")]
    Deletion {
        operation: String,
        target: String,
        #[source]
        source: StoreError,
    },

    /// The destination namespace could not be reset
    #[error("{operation}: namespace '{target}' could not be reset: {source}")]
    Namespace {
        operation: String,
        target: String,
        #[source]
        source: StoreError,
    },

    /// Invalid run configuration
    #[error("Invalid migration configuration: {0}")]
    Config(String),
}

/// Result type for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

impl MigrateError {
    /// Classify a source error raised by `operation`
    pub fn from_source(
        operation: impl Into<String>,
        target: impl Into<String>,
        error: SourceError,
    ) -> Self {
        let operation = operation.into();
        let target = target.into();
        if error.is_fatal() {
            Self::SourceUnavailable {
                operation,
                target,
                source: error,
            }
        } else {
            Self::Extraction {
                operation,
                target,
                source: error,
            }
        }
    }

    pub fn load(operation: impl Into<String>, target: impl Into<String>, error: StoreError) -> Self {
        Self::Load {
            operation: operation.into(),
            target: target.into(),
            source: error,
        }
    }

    pub fn pipeline(operation: impl Into<String>, target: impl Into<String>, error: StoreError) -> Self {
        Self::Pipeline {
            operation: operation.into(),
            target: target.into(),
            source: error,
        }
    }

    /// Error of a view registration; a name clash gets its own kind
    pub fn view(operation: impl Into<String>, target: impl Into<String>, error: StoreError) -> Self {
        match error {
            StoreError::ViewAlreadyExists(_) => Self::ViewAlreadyExists {
                operation: operation.into(),
                target: target.into(),
            },
            other => Self::pipeline(operation, target, other),
        }
    }

    pub fn mutation(operation: impl Into<String>, target: impl Into<String>, error: StoreError) -> Self {
        Self::Mutation {
            operation: operation.into(),
            target: target.into(),
            source: error,
        }
    }

    pub fn deletion(operation: impl Into<String>, target: impl Into<String>, error: StoreError) -> Self {
        Self::Deletion {
            operation: operation.into(),
            target: target.into(),
            source: error,
        }
    }

    pub fn namespace(operation: impl Into<String>, target: impl Into<String>, error: StoreError) -> Self {
        Self::Namespace {
            operation: operation.into(),
            target: target.into(),
            source: error,
        }
    }

    /// Name of the failed operation
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::SourceUnavailable { operation, .. }
            | Self::Extraction { operation, .. }
            | Self::Load { operation, .. }
            | Self::Pipeline { operation, .. }
            | Self::ViewAlreadyExists { operation, .. }
            | Self::Mutation { operation, .. }
            | Self::Deletion { operation, .. }
            | Self::Namespace { operation, .. } => Some(operation),
            Self::Config(_) => None,
        }
    }

    /// Table, collection or view the operation worked on
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::SourceUnavailable { target, .. }
            | Self::Extraction { target, .. }
            | Self::Load { target, .. }
            | Self::Pipeline { target, .. }
            | Self::ViewAlreadyExists { target, .. }
            | Self::Mutation { target, .. }
            | Self::Deletion { target, .. }
            | Self::Namespace { target, .. } => Some(target),
            Self::Config(_) => None,
        }
    }

    /// Whether the run has to skip to cleanup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::Namespace { .. } | Self::Config(_)
        )
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            Self::SourceUnavailable { source, .. } => source.user_message(),
            Self::ViewAlreadyExists { target, .. } => format!(
                "View '{target}' already exists\n\nHint: Drop the view first or pick another name."
            ),
            Self::Namespace { target, source, .. } => format!(
                "Could not reset namespace '{target}': {source}\n\nHint: Namespace names may only contain letters, digits, '_' and '-'."
            ),
            _ => self.to_string(),
        }
    }
}
