pub mod error;
pub mod executor;
pub mod placement;
pub mod shell;
pub mod task;
mod worker;

// Re-export commonly used types
pub use error::{ProcessingFailure, RuntimeError};
pub use executor::{RunningTopology, TopologyExecutor};
pub use placement::Placement;
pub use shell::{ShellCommand, ShellSource, ShellTask};
pub use task::{OutputCollector, SourceHandler, SourcePoll, TaskContext, TaskHandler};
