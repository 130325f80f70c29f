use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::error::RuntimeError;
use super::placement::{Placement, Spawner};
use super::task::{SourceHandler, TaskContext, TaskHandler};
use super::worker::{self, EdgeTarget, Emitter};
use crate::delivery::{DeliveryStats, DeliveryTracker};
use crate::domain::{Tuple, TupleIds};
use crate::topology::{StageRole, Topology};

/// Per-tuple processing deadline used when none is configured
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type TaskFactory = Box<dyn Fn(&TaskContext) -> Box<dyn TaskHandler> + Send>;
type SourceFactory = Box<dyn Fn(&TaskContext) -> Box<dyn SourceHandler> + Send>;

/// Schedules a validated topology.
///
/// Instantiates `parallelism` task workers per stage, wires one mailbox per
/// processor instance along the declared edges, and owns the delivery
/// tracker for the run. Handlers are supplied per stage as factories so
/// every instance gets its own state.
pub struct TopologyExecutor {
    topology: Topology,
    timeout: Duration,
    placement: Placement,
    sources: HashMap<String, SourceFactory>,
    tasks: HashMap<String, TaskFactory>,
}

impl TopologyExecutor {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            timeout: DEFAULT_TIMEOUT,
            placement: Placement::Local,
            sources: HashMap::new(),
            tasks: HashMap::new(),
        }
    }

    /// Set the per-tuple processing deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Select where task workers execute
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Register the handler factory for the source stage
    pub fn source<F>(mut self, stage: &str, factory: F) -> Self
    where
        F: Fn(&TaskContext) -> Box<dyn SourceHandler> + Send + 'static,
    {
        self.sources.insert(stage.to_string(), Box::new(factory));
        self
    }

    /// Register the handler factory for a processor stage
    pub fn task<F>(mut self, stage: &str, factory: F) -> Self
    where
        F: Fn(&TaskContext) -> Box<dyn TaskHandler> + Send + 'static,
    {
        self.tasks.insert(stage.to_string(), Box::new(factory));
        self
    }

    /// Start every task instance and hand back the running topology.
    ///
    /// Fails fast if any stage is missing a handler of the right kind or a
    /// factory targets an unknown stage; nothing is spawned in that case.
    /// Must be called from within a tokio runtime.
    pub fn submit(self) -> Result<RunningTopology, RuntimeError> {
        self.check_handlers()?;

        let (tracker, replay_rx) = DeliveryTracker::start(self.timeout);
        let ids = Arc::new(TupleIds::new());
        let cancel = CancellationToken::new();

        // One mailbox per processor task instance.
        let mut senders: Vec<Vec<mpsc::UnboundedSender<Tuple>>> = Vec::new();
        let mut receivers: Vec<Vec<mpsc::UnboundedReceiver<Tuple>>> = Vec::new();
        for stage in self.topology.stages() {
            let mut stage_senders = Vec::new();
            let mut stage_receivers = Vec::new();
            if stage.role() == StageRole::Processor {
                for _ in 0..stage.parallelism() {
                    let (tx, rx) = mpsc::unbounded_channel();
                    stage_senders.push(tx);
                    stage_receivers.push(rx);
                }
            }
            senders.push(stage_senders);
            receivers.push(stage_receivers);
        }

        // Per-stage routing: declared stream -> consuming edges.
        let mut emitters = Vec::new();
        for (index, stage) in self.topology.stages().iter().enumerate() {
            let mut streams = HashMap::new();
            for schema in stage.outputs() {
                let mut targets = Vec::new();
                for edge in self.topology.edges_from(index, schema.name()) {
                    let destination = edge.to();
                    let selector = edge
                        .grouping()
                        .compile(schema, self.topology.stage(destination).parallelism())?;
                    targets.push(EdgeTarget {
                        selector,
                        mailboxes: senders[destination].clone(),
                    });
                }
                streams.insert(schema.name().to_string(), (schema.clone(), targets));
            }
            emitters.push(Arc::new(Emitter::new(
                streams,
                Arc::clone(&ids),
                Arc::clone(&tracker),
            )));
        }

        let mut spawner = Spawner::new(self.placement);
        let mut replay_rx = Some(replay_rx);
        for (index, stage) in self.topology.stages().iter().enumerate() {
            let mut stage_receivers = std::mem::take(&mut receivers[index]);
            for task_index in 0..stage.parallelism() {
                let ctx = TaskContext::new(stage.name(), task_index, stage.parallelism());
                match stage.role() {
                    StageRole::Source => {
                        let factory = self
                            .sources
                            .get(stage.name())
                            .ok_or_else(|| RuntimeError::MissingHandler(stage.name().into()))?;
                        let handler = factory(&ctx);
                        // Replays are drained by the first source instance.
                        let worker = worker::run_source(
                            ctx,
                            handler,
                            replay_rx.take(),
                            Arc::clone(&emitters[index]),
                            cancel.child_token(),
                        );
                        spawner.spawn(worker.boxed());
                    }
                    StageRole::Processor => {
                        let factory = self
                            .tasks
                            .get(stage.name())
                            .ok_or_else(|| RuntimeError::MissingHandler(stage.name().into()))?;
                        let handler = factory(&ctx);
                        let mailbox = stage_receivers.remove(0);
                        let worker = worker::run_task(
                            ctx,
                            handler,
                            mailbox,
                            Arc::clone(&emitters[index]),
                            cancel.child_token(),
                        );
                        spawner.spawn(worker.boxed());
                    }
                }
            }
        }

        info!(
            stages = self.topology.stages().len(),
            timeout_secs = self.timeout.as_secs(),
            placement = ?self.placement,
            "topology submitted"
        );

        Ok(RunningTopology {
            cancel,
            spawner: Some(spawner),
            tracker,
        })
    }

    fn check_handlers(&self) -> Result<(), RuntimeError> {
        for name in self.sources.keys().chain(self.tasks.keys()) {
            if self.topology.stage_named(name).is_none() {
                return Err(RuntimeError::UnknownStage(name.clone()));
            }
        }
        for stage in self.topology.stages() {
            let (registered, expected) = match stage.role() {
                StageRole::Source => (self.sources.contains_key(stage.name()), "source"),
                StageRole::Processor => (self.tasks.contains_key(stage.name()), "task"),
            };
            if !registered {
                let other = match stage.role() {
                    StageRole::Source => self.tasks.contains_key(stage.name()),
                    StageRole::Processor => self.sources.contains_key(stage.name()),
                };
                return Err(if other {
                    RuntimeError::HandlerRoleMismatch {
                        stage: stage.name().to_string(),
                        expected: expected.to_string(),
                    }
                } else {
                    RuntimeError::MissingHandler(stage.name().to_string())
                });
            }
        }
        Ok(())
    }
}

/// Handle to a started topology: delivery counters and clean shutdown
pub struct RunningTopology {
    cancel: CancellationToken,
    spawner: Option<Spawner>,
    tracker: Arc<DeliveryTracker>,
}

impl RunningTopology {
    pub fn stats(&self) -> DeliveryStats {
        self.tracker.stats()
    }

    /// Roots currently awaiting full acknowledgment
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }

    /// Wait until every tracked root has resolved (acked or replayed and
    /// settled)
    pub async fn settled(&self) {
        loop {
            if self.tracker.in_flight() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Stop the topology: cancel workers, discard in-flight mailboxes, and
    /// drop outstanding deadlines without triggering replays
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(spawner) = self.spawner.take() {
            spawner.join().await;
        }
        info!(stats = ?self.tracker.stats(), "topology stopped");
    }
}

impl Drop for RunningTopology {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for RunningTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningTopology")
            .field("in_flight", &self.tracker.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Value;
    use crate::routing::Grouping;
    use crate::runtime::error::ProcessingFailure;
    use crate::runtime::task::{OutputCollector, SourcePoll};
    use crate::topology::StageDef;
    use async_trait::async_trait;

    struct ListSource {
        items: Vec<String>,
    }

    #[async_trait]
    impl SourceHandler for ListSource {
        async fn poll(
            &mut self,
            out: &mut OutputCollector,
        ) -> Result<SourcePoll, ProcessingFailure> {
            match self.items.pop() {
                Some(item) => {
                    out.emit("txStream", vec![Value::from(item)]);
                    Ok(SourcePoll::Emitted)
                }
                None => Ok(SourcePoll::Exhausted),
            }
        }
    }

    struct CountingTask {
        seen: Arc<dashmap::DashMap<String, usize>>,
    }

    #[async_trait]
    impl TaskHandler for CountingTask {
        async fn process(
            &mut self,
            input: &Tuple,
            _out: &mut OutputCollector,
        ) -> Result<(), ProcessingFailure> {
            let key = input
                .value(0)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            *self.seen.entry(key).or_insert(0) += 1;
            Ok(())
        }
    }

    fn two_stage_topology() -> Topology {
        Topology::builder()
            .stage(StageDef::source("ledger-stream").declares("txStream", ["tx"]))
            .stage(StageDef::processor("transactions").with_parallelism(2))
            .edge("ledger-stream", "txStream", "transactions", Grouping::Shuffle)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn processes_all_roots_through_the_pipeline() {
        let seen = Arc::new(dashmap::DashMap::new());
        let seen_handle = Arc::clone(&seen);

        let running = TopologyExecutor::new(two_stage_topology())
            .with_timeout(Duration::from_secs(5))
            .source("ledger-stream", |_| {
                Box::new(ListSource {
                    items: vec!["a".into(), "b".into(), "c".into()],
                })
            })
            .task("transactions", move |_| {
                Box::new(CountingTask {
                    seen: Arc::clone(&seen_handle),
                })
            })
            .submit()
            .unwrap();

        for _ in 0..1000 {
            if running.stats().acked == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        running.settled().await;
        let stats = running.stats();
        running.stop().await;

        assert_eq!(stats.acked, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn missing_handler_is_rejected_before_spawning() {
        let err = TopologyExecutor::new(two_stage_topology())
            .source("ledger-stream", |_| {
                Box::new(ListSource { items: vec![] })
            })
            .submit()
            .unwrap_err();

        assert!(matches!(err, RuntimeError::MissingHandler(stage) if stage == "transactions"));
    }

    #[tokio::test]
    async fn handler_for_unknown_stage_is_rejected() {
        let seen = Arc::new(dashmap::DashMap::new());
        let err = TopologyExecutor::new(two_stage_topology())
            .source("ledger-stream", |_| {
                Box::new(ListSource { items: vec![] })
            })
            .task("transactions", {
                let seen = Arc::clone(&seen);
                move |_| {
                    Box::new(CountingTask {
                        seen: Arc::clone(&seen),
                    })
                }
            })
            .task("exchanges", {
                let seen = Arc::clone(&seen);
                move |_| {
                    Box::new(CountingTask {
                        seen: Arc::clone(&seen),
                    })
                }
            })
            .submit()
            .unwrap_err();

        assert!(matches!(err, RuntimeError::UnknownStage(stage) if stage == "exchanges"));
    }
}
