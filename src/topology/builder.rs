use std::collections::{HashMap, HashSet};

use super::error::{ValidationError, Violation};
use super::stage::{StageDef, StageRole};
use crate::routing::Grouping;

/// A validated edge: tuples emitted on `stream` by stage `from` are routed
/// to the task instances of stage `to` by `grouping`
#[derive(Debug, Clone)]
pub struct Edge {
    from: usize,
    stream: String,
    to: usize,
    grouping: Grouping,
}

impl Edge {
    pub fn from(&self) -> usize {
        self.from
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn to(&self) -> usize {
        self.to
    }

    pub fn grouping(&self) -> &Grouping {
        &self.grouping
    }
}

/// Immutable directed graph of stages wired by (stream, grouping) edges
///
/// Built once by [`TopologyBuilder::build`]; nothing about the graph can
/// change after submission.
#[derive(Debug)]
pub struct Topology {
    stages: Vec<StageDef>,
    edges: Vec<Edge>,
    source: usize,
}

impl Topology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::new()
    }

    pub fn stages(&self) -> &[StageDef] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> &StageDef {
        &self.stages[index]
    }

    /// Look up a stage and its index by name
    pub fn stage_named(&self, name: &str) -> Option<(usize, &StageDef)> {
        self.stages
            .iter()
            .enumerate()
            .find(|(_, stage)| stage.name() == name)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Index of the single source stage
    pub fn source_index(&self) -> usize {
        self.source
    }

    /// Edges consuming the given stream of the given stage
    pub fn edges_from<'a>(
        &'a self,
        stage: usize,
        stream: &'a str,
    ) -> impl Iterator<Item = &'a Edge> {
        self.edges
            .iter()
            .filter(move |edge| edge.from == stage && edge.stream == stream)
    }
}

struct EdgeDef {
    from: String,
    stream: String,
    to: String,
    grouping: Grouping,
}

/// Accumulates stage and edge declarations, validated as a whole on `build`
pub struct TopologyBuilder {
    stages: Vec<StageDef>,
    edges: Vec<EdgeDef>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Add a stage declaration
    pub fn stage(mut self, stage: StageDef) -> Self {
        self.stages.push(stage);
        self
    }

    /// Wire `from`'s output `stream` into `to`, routed by `grouping`
    pub fn edge(mut self, from: &str, stream: &str, to: &str, grouping: Grouping) -> Self {
        self.edges.push(EdgeDef {
            from: from.to_string(),
            stream: stream.to_string(),
            to: to.to_string(),
            grouping,
        });
        self
    }

    /// Validate every declared invariant and produce the immutable topology.
    ///
    /// Collects all violations rather than failing on the first so a broken
    /// definition gets actionable feedback in one pass.
    pub fn build(self) -> Result<Topology, ValidationError> {
        let mut violations = Vec::new();

        let mut by_name: HashMap<&str, usize> = HashMap::new();
        for (index, stage) in self.stages.iter().enumerate() {
            if by_name.insert(stage.name(), index).is_some() {
                violations.push(Violation::DuplicateStage(stage.name().to_string()));
            }
            if stage.parallelism() == 0 {
                violations.push(Violation::ZeroParallelism(stage.name().to_string()));
            }
            let mut declared = HashSet::new();
            for schema in stage.outputs() {
                if !declared.insert(schema.name()) {
                    violations.push(Violation::DuplicateStream {
                        stage: stage.name().to_string(),
                        stream: schema.name().to_string(),
                    });
                }
            }
        }

        let source_indices: Vec<usize> = self
            .stages
            .iter()
            .enumerate()
            .filter(|(_, stage)| stage.role() == StageRole::Source)
            .map(|(index, _)| index)
            .collect();
        match source_indices.len() {
            0 => violations.push(Violation::NoSource),
            1 => {}
            _ => {
                let names = source_indices
                    .iter()
                    .map(|&index| self.stages[index].name())
                    .collect::<Vec<_>>()
                    .join(", ");
                violations.push(Violation::MultipleSources(names));
            }
        }

        let mut has_input = vec![false; self.stages.len()];
        for edge in &self.edges {
            let from = by_name.get(edge.from.as_str()).copied();
            let to = by_name.get(edge.to.as_str()).copied();

            if from.is_none() {
                violations.push(Violation::UnknownStage(edge.from.clone()));
            }
            if to.is_none() {
                violations.push(Violation::UnknownStage(edge.to.clone()));
            }

            if let Some(to_index) = to {
                has_input[to_index] = true;
                if self.stages[to_index].role() == StageRole::Source {
                    violations.push(Violation::SourceWithInputs(edge.to.clone()));
                }
            }

            if let Some(from_index) = from {
                match self.stages[from_index].output(&edge.stream) {
                    None => violations.push(Violation::UnknownStream {
                        stage: edge.from.clone(),
                        stream: edge.stream.clone(),
                    }),
                    Some(schema) => {
                        if let Some(to_index) = to {
                            // Zero parallelism is reported on the stage
                            // itself; compile against at least one task so
                            // key-field problems still surface alongside it.
                            let task_count = self.stages[to_index].parallelism().max(1);
                            if let Err(source) = edge.grouping.compile(schema, task_count) {
                                violations.push(Violation::Routing {
                                    from: edge.from.clone(),
                                    stream: edge.stream.clone(),
                                    to: edge.to.clone(),
                                    source,
                                });
                            }
                        }
                    }
                }
            }
        }

        for (index, stage) in self.stages.iter().enumerate() {
            if stage.role() == StageRole::Processor && !has_input[index] {
                violations.push(Violation::ProcessorWithoutInputs(stage.name().to_string()));
            }
        }

        if !violations.is_empty() {
            return Err(ValidationError::new(violations));
        }

        let edges = self
            .edges
            .into_iter()
            .map(|edge| Edge {
                from: by_name[edge.from.as_str()],
                stream: edge.stream,
                to: by_name[edge.to.as_str()],
                grouping: edge.grouping,
            })
            .collect();

        Ok(Topology {
            stages: self.stages,
            edges,
            source: source_indices[0],
        })
    }
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RoutingError;

    fn ledger_source() -> StageDef {
        StageDef::source("ledger-stream")
            .declares("txStream", ["tx"])
            .declares("statsAggregation", ["stat", "label"])
    }

    fn transactions_stage() -> StageDef {
        StageDef::processor("transactions")
            .with_parallelism(2)
            .declares("exchangeAggregation", ["exchange", "pair"])
            .declares("statsAggregation", ["stat", "label"])
    }

    #[test]
    fn builds_valid_ledger_topology() {
        let topology = Topology::builder()
            .stage(ledger_source())
            .stage(transactions_stage())
            .stage(StageDef::processor("exchanges").with_parallelism(2))
            .edge("ledger-stream", "txStream", "transactions", Grouping::Shuffle)
            .edge(
                "transactions",
                "exchangeAggregation",
                "exchanges",
                Grouping::fields(["pair"]),
            )
            .build()
            .unwrap();

        assert_eq!(topology.stages().len(), 3);
        assert_eq!(topology.edges().len(), 2);
        assert_eq!(
            topology.stage(topology.source_index()).name(),
            "ledger-stream"
        );

        let (transactions, _) = topology.stage_named("transactions").unwrap();
        let outgoing: Vec<_> = topology
            .edges_from(transactions, "exchangeAggregation")
            .collect();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(topology.stage(outgoing[0].to()).name(), "exchanges");
    }

    #[test]
    fn collects_unknown_stream_and_zero_parallelism_together() {
        let err = Topology::builder()
            .stage(ledger_source())
            .stage(StageDef::processor("transactions").with_parallelism(0))
            .edge(
                "ledger-stream",
                "feeSummaryStream",
                "transactions",
                Grouping::Shuffle,
            )
            .build()
            .unwrap_err();

        let violations = err.violations();
        assert!(violations.contains(&Violation::ZeroParallelism("transactions".to_string())));
        assert!(violations.contains(&Violation::UnknownStream {
            stage: "ledger-stream".to_string(),
            stream: "feeSummaryStream".to_string(),
        }));
    }

    #[test]
    fn rejects_duplicate_stage_names() {
        let err = Topology::builder()
            .stage(ledger_source())
            .stage(StageDef::processor("transactions"))
            .stage(StageDef::processor("transactions"))
            .edge("ledger-stream", "txStream", "transactions", Grouping::Shuffle)
            .build()
            .unwrap_err();

        assert!(err
            .violations()
            .contains(&Violation::DuplicateStage("transactions".to_string())));
    }

    #[test]
    fn rejects_unknown_grouping_field() {
        let err = Topology::builder()
            .stage(ledger_source())
            .stage(transactions_stage())
            .stage(StageDef::processor("exchanges"))
            .edge("ledger-stream", "txStream", "transactions", Grouping::Shuffle)
            .edge(
                "transactions",
                "exchangeAggregation",
                "exchanges",
                Grouping::fields(["account"]),
            )
            .build()
            .unwrap_err();

        assert!(err.violations().contains(&Violation::Routing {
            from: "transactions".to_string(),
            stream: "exchangeAggregation".to_string(),
            to: "exchanges".to_string(),
            source: RoutingError::UnknownKeyField {
                stream: "exchangeAggregation".to_string(),
                field: "account".to_string(),
            },
        }));
    }

    #[test]
    fn rejects_edges_into_the_source() {
        let err = Topology::builder()
            .stage(ledger_source())
            .stage(transactions_stage())
            .edge("ledger-stream", "txStream", "transactions", Grouping::Shuffle)
            .edge(
                "transactions",
                "statsAggregation",
                "ledger-stream",
                Grouping::Shuffle,
            )
            .build()
            .unwrap_err();

        assert!(err
            .violations()
            .contains(&Violation::SourceWithInputs("ledger-stream".to_string())));
    }

    #[test]
    fn rejects_disconnected_processor() {
        let err = Topology::builder()
            .stage(ledger_source())
            .stage(StageDef::processor("stats"))
            .build()
            .unwrap_err();

        assert!(err
            .violations()
            .contains(&Violation::ProcessorWithoutInputs("stats".to_string())));
    }

    #[test]
    fn rejects_missing_and_multiple_sources() {
        let err = Topology::builder()
            .stage(StageDef::processor("transactions"))
            .build()
            .unwrap_err();
        assert!(err.violations().contains(&Violation::NoSource));

        let err = Topology::builder()
            .stage(StageDef::source("a").declares("txStream", ["tx"]))
            .stage(StageDef::source("b"))
            .stage(StageDef::processor("transactions"))
            .edge("a", "txStream", "transactions", Grouping::Shuffle)
            .build()
            .unwrap_err();
        assert!(err
            .violations()
            .contains(&Violation::MultipleSources("a, b".to_string())));
    }

    #[test]
    fn rejects_edge_to_unknown_stage() {
        let err = Topology::builder()
            .stage(ledger_source())
            .edge("ledger-stream", "txStream", "transactions", Grouping::Shuffle)
            .build()
            .unwrap_err();

        assert!(err
            .violations()
            .contains(&Violation::UnknownStage("transactions".to_string())));
    }
}
