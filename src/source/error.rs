//! Error types for row source operations

use thiserror::Error;

/// Errors raised by a [`RowSource`](super::RowSource)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The source could not be reached; nothing can be extracted
    #[error("Source unavailable ({target}): {reason}")]
    Unavailable { target: String, reason: String },

    /// One table could not be extracted; other tables are unaffected
    #[error("Extraction of table '{table}' failed: {reason}")]
    Extraction { table: String, reason: String },

    /// Invalid connection descriptor
    #[error("Invalid source configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for row source operations
pub type SourceResult<T> = Result<T, SourceError>;

impl SourceError {
    pub fn unavailable(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn extraction(table: impl Into<String>, reason: impl ToString) -> Self {
        Self::Extraction {
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the whole run must stop
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SourceError::Extraction { .. })
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            SourceError::Unavailable { target, reason } => format!(
                "Cannot connect to source {target}: {reason}\n\nHint: Check the [source] section of your configuration and that the database is running."
            ),
            SourceError::InvalidConfig(msg) => format!(
                "Invalid source configuration: {msg}\n\nHint: [source] kind must be \"duckdb\" or \"postgres\"."
            ),
            SourceError::Extraction { .. } => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(SourceError::unavailable("localhost:5432", "refused").is_fatal());
        assert!(!SourceError::extraction("film", "bad type").is_fatal());
    }

    #[test]
    fn test_display_and_hint() {
        let err = SourceError::unavailable("dvdrental.duckdb", "file is locked");
        assert!(err.to_string().contains("dvdrental.duckdb"));
        assert!(err.user_message().contains("Hint:"));

        let err = SourceError::extraction("payment", "unsupported type");
        assert_eq!(
            err.to_string(),
            "Extraction of table 'payment' failed: unsupported type"
        );
    }
}
