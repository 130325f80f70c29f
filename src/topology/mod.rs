pub mod builder;
pub mod error;
pub mod stage;

// Re-export commonly used types
pub use builder::{Edge, Topology, TopologyBuilder};
pub use error::{ValidationError, Violation};
pub use stage::{StageDef, StageRole};
