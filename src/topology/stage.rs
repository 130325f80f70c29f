use serde::{Deserialize, Serialize};

use crate::domain::StreamSchema;

/// Whether a stage ingests data into the topology or processes upstream
/// streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageRole {
    Source,
    Processor,
}

/// Declaration of one stage: a named unit of computation instantiated as
/// `parallelism` independent task instances
#[derive(Debug, Clone)]
pub struct StageDef {
    name: String,
    role: StageRole,
    parallelism: usize,
    outputs: Vec<StreamSchema>,
}

impl StageDef {
    /// Declare a source stage (defaults to parallelism 1)
    pub fn source(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: StageRole::Source,
            parallelism: 1,
            outputs: Vec::new(),
        }
    }

    /// Declare a processor stage (defaults to parallelism 1)
    pub fn processor(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: StageRole::Processor,
            parallelism: 1,
            outputs: Vec::new(),
        }
    }

    /// Set the number of parallel task instances
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Declare an output stream with its ordered field names
    pub fn declares<N, F, I>(mut self, stream: N, fields: I) -> Self
    where
        N: Into<String>,
        F: Into<String>,
        I: IntoIterator<Item = F>,
    {
        self.outputs.push(StreamSchema::new(stream, fields));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> StageRole {
        self.role
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn outputs(&self) -> &[StreamSchema] {
        &self.outputs
    }

    /// Schema of a declared output stream, if any
    pub fn output(&self, stream: &str) -> Option<&StreamSchema> {
        self.outputs.iter().find(|s| s.name() == stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_defaults_to_single_instance() {
        let stage = StageDef::source("ledger-stream");

        assert_eq!(stage.name(), "ledger-stream");
        assert_eq!(stage.role(), StageRole::Source);
        assert_eq!(stage.parallelism(), 1);
        assert!(stage.outputs().is_empty());
    }

    #[test]
    fn declared_streams_are_retrievable() {
        let stage = StageDef::processor("transactions")
            .with_parallelism(4)
            .declares("exchangeAggregation", ["exchange", "pair"])
            .declares("paymentsAggregation", ["payment", "key"]);

        assert_eq!(stage.parallelism(), 4);
        assert_eq!(stage.outputs().len(), 2);

        let schema = stage.output("exchangeAggregation").unwrap();
        assert_eq!(schema.fields(), ["exchange", "pair"]);
        assert!(stage.output("txStream").is_none());
    }
}
