//! Error types for document store operations

use thiserror::Error;

use crate::aggregation::PipelineError;
use crate::document::filter::FilterError;

/// Errors raised by a [`DocumentSink`](super::DocumentSink)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A bulk insert stopped at an invalid record; earlier records stay inserted
    #[error(
        "Bulk insert into '{collection}' failed at record {index} ({inserted} documents already inserted): {reason}"
    )]
    Load {
        collection: String,
        index: usize,
        inserted: usize,
        reason: String,
    },

    /// A view (or collection) with this name already exists
    #[error("View already exists: {0}")]
    ViewAlreadyExists(String),

    #[error("View not found: {0}")]
    ViewNotFound(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// No namespace has been reset/selected yet
    #[error("No namespace selected")]
    NamespaceNotSelected,

    #[error("Invalid namespace name: '{0}'")]
    InvalidNamespace(String),

    #[error("Invalid collection name: '{0}'")]
    InvalidCollection(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Collection or view the error refers to, if any
    pub fn target(&self) -> Option<&str> {
        match self {
            StoreError::Load { collection, .. } => Some(collection),
            StoreError::ViewAlreadyExists(name)
            | StoreError::ViewNotFound(name)
            | StoreError::CollectionNotFound(name)
            | StoreError::InvalidCollection(name)
            | StoreError::InvalidNamespace(name) => Some(name),
            _ => None,
        }
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            StoreError::ViewAlreadyExists(name) => format!(
                "View '{name}' already exists\n\nHint: Drop the view before creating it again."
            ),
            StoreError::NamespaceNotSelected => {
                "No namespace selected\n\nHint: Reset the destination namespace before loading."
                    .to_string()
            }
            StoreError::InvalidNamespace(name) => format!(
                "Invalid namespace name: '{name}'\n\nHint: Use 1-64 letters, digits, '_' or '-'."
            ),
            StoreError::Pipeline(e) => e.user_message(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let err = StoreError::Load {
            collection: "film".to_string(),
            index: 3,
            inserted: 3,
            reason: "record is a number, not a mapping".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("'film'"));
        assert!(display.contains("record 3"));
        assert_eq!(err.target(), Some("film"));
    }

    #[test]
    fn test_user_message() {
        let msg = StoreError::ViewAlreadyExists("customer_list".to_string()).user_message();
        assert!(msg.contains("customer_list"));
        assert!(msg.contains("Hint:"));
    }

    #[test]
    fn test_from_pipeline_error() {
        let err: StoreError = PipelineError::invalid_stage(1, "bad").into();
        assert!(matches!(err, StoreError::Pipeline(_)));
        assert!(err.to_string().contains("index 1"));
    }
}
