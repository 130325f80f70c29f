//! Topology orchestration core for a ledger-import stream pipeline.
//!
//! A topology is a directed graph of one source and several processor
//! stages wired by named, schema-typed streams. Each stage runs as a set of
//! parallel task instances; tuples are routed to instances by a per-edge
//! grouping strategy, and every root tuple is tracked through its causal
//! chain with acknowledgments and a timeout-triggered replay, giving
//! at-least-once delivery.
//!
//! Stage computations live behind the [`runtime::TaskHandler`] and
//! [`runtime::SourceHandler`] capability traits; in-process handlers and
//! external subprocess scripts ([`runtime::ShellTask`],
//! [`runtime::ShellSource`]) are interchangeable.

pub mod app;
pub mod delivery;
pub mod domain;
pub mod prelude;
pub mod routing;
pub mod runtime;
pub mod topology;
