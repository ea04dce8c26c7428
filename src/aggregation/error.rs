//! Error types for pipeline parsing and evaluation
//!
//! Every evaluation error names the offending stage index and the collection
//! the pipeline was running against, so that a failed read can be logged and
//! skipped without further context from the caller.

use thiserror::Error;

/// Errors raised while parsing or evaluating an aggregation pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A stage definition could not be parsed
    #[error("Invalid stage at index {index}: {reason}")]
    InvalidStage { index: usize, reason: String },

    /// A pipeline or lookup named a collection that does not exist
    #[error("Unknown collection '{collection}'{}", at_stage(.stage))]
    UnknownCollection {
        collection: String,
        stage: Option<usize>,
    },

    /// A referenced field path is absent from every input document
    #[error(
        "Stage {index} ({stage}) on collection '{collection}': field path '{path}' does not exist"
    )]
    MissingField {
        index: usize,
        stage: String,
        collection: String,
        path: String,
    },

    /// A stage could not evaluate an input document
    #[error("Stage {index} ({stage}) on collection '{collection}' failed: {message}")]
    StageFailed {
        index: usize,
        stage: String,
        collection: String,
        message: String,
    },

    /// Views nested deeper than the engine allows
    #[error("View '{view}' nests deeper than {max_depth} levels")]
    ViewDepthExceeded { view: String, max_depth: usize },
}

fn at_stage(stage: &Option<usize>) -> String {
    stage
        .map(|index| format!(" referenced by stage {index}"))
        .unwrap_or_default()
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Create a parse error for the stage at `index`
    pub fn invalid_stage(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidStage {
            index,
            reason: reason.into(),
        }
    }

    /// Index of the offending stage, when one is known
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            PipelineError::InvalidStage { index, .. }
            | PipelineError::MissingField { index, .. }
            | PipelineError::StageFailed { index, .. } => Some(*index),
            PipelineError::UnknownCollection { stage, .. } => *stage,
            PipelineError::ViewDepthExceeded { .. } => None,
        }
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::InvalidStage { .. } => {
                format!("{self}\n\nHint: Each stage must be an object with a single '$' operator key.")
            }
            PipelineError::UnknownCollection { collection, .. } => {
                format!(
                    "Unknown collection '{collection}'\n\nHint: Check that the table was extracted and loaded, or that the view exists."
                )
            }
            PipelineError::MissingField { path, .. } => {
                format!(
                    "{self}\n\nHint: Field paths are case-sensitive; '{path}' must exist on at least one input document."
                )
            }
            _ => self.to_string(),
        }
    }
}
