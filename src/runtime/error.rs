use std::io;

use thiserror::Error;

use crate::domain::DomainError;
use crate::routing::RoutingError;

/// A task failed on one tuple.
///
/// Never fatal to the topology: the anchored roots are resolved to failure
/// and replayed from the source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("processing failed: {0}")]
pub struct ProcessingFailure(String);

impl ProcessingFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<DomainError> for ProcessingFailure {
    fn from(error: DomainError) -> Self {
        Self(error.to_string())
    }
}

/// Runtime plumbing errors: handler registration, channels, subprocesses
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("no handler registered for stage {0}")]
    MissingHandler(String),

    #[error("handler registered for unknown stage {0}")]
    UnknownStage(String),

    #[error("stage {stage} requires a {expected} handler")]
    HandlerRoleMismatch { stage: String, expected: String },

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("subprocess i/o error: {0}")]
    Subprocess(#[from] io::Error),

    #[error("subprocess protocol violation: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats_correctly() {
        assert_eq!(
            RuntimeError::MissingHandler("transactions".to_string()).to_string(),
            "no handler registered for stage transactions"
        );
        assert_eq!(
            ProcessingFailure::new("hbase write refused").to_string(),
            "processing failed: hbase write refused"
        );
    }

    #[test]
    fn domain_error_converts_to_processing_failure() {
        let failure = ProcessingFailure::from(DomainError::UnknownStream("txStream".to_string()));
        assert!(failure.to_string().contains("txStream"));
    }

    #[test]
    fn io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err = RuntimeError::from(io_err);

        match err {
            RuntimeError::Subprocess(_) => {}
            _ => panic!("Expected Subprocess error variant"),
        }
    }
}
