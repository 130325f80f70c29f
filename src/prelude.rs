//! Prelude module for convenient imports
//!
//! Import everything you need with: `use ledgerflow::prelude::*;`

// Domain types
pub use crate::domain::{DomainError, StreamSchema, Tuple, TupleId, TupleIds, Value};

// Topology types
pub use crate::topology::{
    StageDef, StageRole, Topology, TopologyBuilder, ValidationError, Violation,
};

// Routing types
pub use crate::routing::{Grouping, RoutingError, TaskSelector};

// Delivery types
pub use crate::delivery::{DeliveryStats, DeliveryTracker};

// Runtime types
pub use crate::runtime::{
    OutputCollector, Placement, ProcessingFailure, RunningTopology, RuntimeError, ShellCommand,
    ShellSource, ShellTask, SourceHandler, SourcePoll, TaskContext, TaskHandler, TopologyExecutor,
};

// App types
pub use crate::app::{AppError, CliApp, ConfigError, TopologyConfig};
