//! Error types for path, filter and subscription handling.

use thiserror::Error;

/// Main error type for query-core operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    // --- Structural errors ---
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid property path: {0}")]
    InvalidPropertyPath(String),

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Query options not allowed: {0}")]
    QueryOptionsNotAllowed(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Parse error in '{input}': {message}")]
    Parse { input: String, message: String },

    // --- Semantic / type errors ---
    #[error("Could not convert parameter of kind {from} to {to}")]
    Conversion { from: String, to: String },

    #[error("None of the sub-fields could be converted to {0}")]
    NoCompatibleSubField(String),

    #[error("Incompatible operands: {0}")]
    IncompatibleOperands(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl QueryError {
    /// Shape errors raised before any typing happens.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            QueryError::InvalidPath(_)
                | QueryError::InvalidPropertyPath(_)
                | QueryError::InvalidTopic { .. }
                | QueryError::QueryOptionsNotAllowed(_)
                | QueryError::InvalidId(_)
                | QueryError::Parse { .. }
        )
    }

    pub(crate) fn parse(input: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::Parse {
            input: input.into(),
            message: message.into(),
        }
    }

    pub(crate) fn topic(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::Serialization(e.to_string())
    }
}

/// Result type for query-core operations.
pub type Result<T> = std::result::Result<T, QueryError>;
