use async_trait::async_trait;

use super::error::{ProcessingFailure, RuntimeError};
use crate::domain::{Tuple, Value};

/// Identity of one task instance within a running topology
#[derive(Debug, Clone)]
pub struct TaskContext {
    stage: String,
    index: usize,
    task_count: usize,
}

impl TaskContext {
    pub(crate) fn new(stage: impl Into<String>, index: usize, task_count: usize) -> Self {
        Self {
            stage: stage.into(),
            index,
            task_count,
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Instance index in `0..task_count`
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }
}

/// Buffer for tuples emitted while handling one input (or one source poll).
///
/// Handlers name the output stream and supply the field values; ids and
/// causal anchoring are assigned by the runtime when the batch is routed.
#[derive(Debug, Default)]
pub struct OutputCollector {
    emitted: Vec<(String, Vec<Value>)>,
}

impl OutputCollector {
    /// Queue an emission on a declared output stream
    pub fn emit(&mut self, stream: impl Into<String>, values: Vec<Value>) {
        self.emitted.push((stream.into(), values));
    }

    pub fn len(&self) -> usize {
        self.emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty()
    }

    pub(crate) fn drain(&mut self) -> Vec<(String, Vec<Value>)> {
        std::mem::take(&mut self.emitted)
    }

    /// Drop buffered emissions from a failed processing attempt
    pub(crate) fn discard(&mut self) {
        self.emitted.clear();
    }
}

/// One parallel instance of a processor stage's computation.
///
/// Anything satisfying this contract is a valid task implementation;
/// in-process handlers and subprocess scripts are interchangeable behind it.
/// Returning `Ok` acknowledges the input tuple; returning `Err` negatively
/// acknowledges it, resolving its anchored roots to immediate replay.
#[async_trait]
pub trait TaskHandler: Send {
    /// Called once before the first tuple is delivered
    async fn open(&mut self, _ctx: &TaskContext) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Process one input tuple, queueing any emissions on the collector
    async fn process(
        &mut self,
        input: &Tuple,
        out: &mut OutputCollector,
    ) -> Result<(), ProcessingFailure>;

    /// Called once at topology stop
    async fn close(&mut self) {}
}

/// Result of one source poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePoll {
    /// Root tuples were emitted; poll again immediately
    Emitted,
    /// Nothing available right now; poll again after a short backoff
    Idle,
    /// The stream is finished; only replays remain
    Exhausted,
}

/// The ingestion end of the topology: emits root tuples
#[async_trait]
pub trait SourceHandler: Send {
    /// Called once before the first poll
    async fn open(&mut self, _ctx: &TaskContext) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Emit zero or more root tuples onto declared streams
    async fn poll(&mut self, out: &mut OutputCollector) -> Result<SourcePoll, ProcessingFailure>;

    /// A root tuple missed its delivery deadline and is about to be
    /// re-emitted by the runtime
    async fn replayed(&mut self, _root: &Tuple) {}

    /// Called once at topology stop
    async fn close(&mut self) {}
}
