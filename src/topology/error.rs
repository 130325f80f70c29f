use thiserror::Error;

use crate::routing::RoutingError;

/// One violated topology invariant
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Violation {
    #[error("duplicate stage name {0}")]
    DuplicateStage(String),

    #[error("stage {0} declares zero parallelism")]
    ZeroParallelism(String),

    #[error("stage {stage} declares stream {stream} more than once")]
    DuplicateStream { stage: String, stream: String },

    #[error("edge references unknown stage {0}")]
    UnknownStage(String),

    #[error("stage {stage} does not declare stream {stream}")]
    UnknownStream { stage: String, stream: String },

    #[error("source stage {0} cannot consume input streams")]
    SourceWithInputs(String),

    #[error("processor stage {0} consumes no input streams")]
    ProcessorWithoutInputs(String),

    #[error("topology declares no source stage")]
    NoSource,

    #[error("topology declares more than one source stage ({0})")]
    MultipleSources(String),

    #[error("edge {from}/{stream} -> {to}: {source}")]
    Routing {
        from: String,
        stream: String,
        to: String,
        #[source]
        source: RoutingError,
    },
}

fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Malformed topology graph, fatal at build time
///
/// Validation is exhaustive: every violated invariant is collected so a
/// broken definition can be fixed in one pass instead of error-by-error.
#[derive(Error, Debug)]
#[error("invalid topology: {}", describe(.violations))]
pub struct ValidationError {
    violations: Vec<Violation>,
}

impl ValidationError {
    pub(crate) fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    /// Every violation found during validation
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}
