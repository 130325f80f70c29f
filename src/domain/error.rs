use thiserror::Error;

/// Tuple-model errors for schema and field lookups
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("stream {stream} has no field named {field}")]
    UnknownField { stream: String, field: String },

    #[error("stream {stream} expects {expected} values, got {actual}")]
    ArityMismatch {
        stream: String,
        expected: usize,
        actual: usize,
    },

    #[error("no declared stream named {0}")]
    UnknownStream(String),
}
