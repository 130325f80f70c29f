use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::RuntimeError;
use super::task::{OutputCollector, SourceHandler, SourcePoll, TaskContext, TaskHandler};
use crate::delivery::DeliveryTracker;
use crate::domain::{DomainError, StreamSchema, Tuple, TupleId, TupleIds};
use crate::routing::TaskSelector;

/// Backoff between polls of an idle source
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// One consuming edge of a stream: the compiled routing function plus the
/// destination stage's mailboxes, one per task instance
pub(crate) struct EdgeTarget {
    pub(crate) selector: TaskSelector,
    pub(crate) mailboxes: Vec<mpsc::UnboundedSender<Tuple>>,
}

/// Routing handle shared by every task instance of one stage.
///
/// Owns the stage's declared output schemas and their consuming edges;
/// assigns tuple ids, anchors emissions with the delivery tracker before
/// they are enqueued, and applies each edge's grouping.
pub(crate) struct Emitter {
    streams: HashMap<String, (StreamSchema, Vec<EdgeTarget>)>,
    ids: Arc<TupleIds>,
    tracker: Arc<DeliveryTracker>,
}

impl Emitter {
    pub(crate) fn new(
        streams: HashMap<String, (StreamSchema, Vec<EdgeTarget>)>,
        ids: Arc<TupleIds>,
        tracker: Arc<DeliveryTracker>,
    ) -> Self {
        Self {
            streams,
            ids,
            tracker,
        }
    }

    pub(crate) fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    /// Route emissions collected from a processor, anchored to the input
    /// tuple's roots
    pub(crate) fn forward(
        &self,
        out: &mut OutputCollector,
        anchors: &[TupleId],
    ) -> Result<(), RuntimeError> {
        for (stream, values) in out.drain() {
            let (schema, targets) = self
                .streams
                .get(&stream)
                .ok_or_else(|| DomainError::UnknownStream(stream.clone()))?;
            schema.check_arity(&values)?;

            if targets.is_empty() {
                debug!(%stream, "dropping tuple emitted on a stream with no consumers");
                continue;
            }

            let tuple = Tuple::anchored(self.ids.next_id(), stream, values, anchors.to_vec());
            for target in targets {
                // Increment before enqueue so the record cannot reach zero
                // between this emission and its acknowledgment.
                self.tracker.anchor(tuple.anchors());
                self.send(target, &tuple);
            }
        }
        Ok(())
    }

    /// Route root tuples collected from a source poll
    pub(crate) fn emit_roots(&self, out: &mut OutputCollector) -> Result<(), RuntimeError> {
        for (stream, values) in out.drain() {
            let (schema, _) = self
                .streams
                .get(&stream)
                .ok_or_else(|| DomainError::UnknownStream(stream.clone()))?;
            schema.check_arity(&values)?;

            let id = self.ids.next_id();
            self.dispatch_root(Tuple::root(id, stream, values));
        }
        Ok(())
    }

    /// Re-dispatch a root tuple whose deadline elapsed
    pub(crate) fn redispatch(&self, root: Tuple) {
        if self.streams.contains_key(root.stream()) {
            self.dispatch_root(root);
        } else {
            warn!(
                stream = root.stream(),
                root = root.id(),
                "replayed tuple references an undeclared stream"
            );
        }
    }

    fn dispatch_root(&self, tuple: Tuple) {
        let Some((_, targets)) = self.streams.get(tuple.stream()) else {
            return;
        };
        if targets.is_empty() {
            debug!(
                stream = tuple.stream(),
                "dropping root tuple with no consumers"
            );
            return;
        }

        self.tracker.track(&tuple);
        // The record's initial pending unit covers the first delivery;
        // every additional consuming edge anchors one more.
        let mut first = true;
        for target in targets {
            if !first {
                self.tracker.anchor(tuple.anchors());
            }
            first = false;
            self.send(target, &tuple);
        }
    }

    fn send(&self, target: &EdgeTarget, tuple: &Tuple) {
        let index = target.selector.select(tuple);
        if target.mailboxes[index].send(tuple.clone()).is_err() {
            // Destination worker already stopped (topology shutting down);
            // release the anchored unit so the record does not linger.
            self.tracker.ack(tuple.anchors());
        }
    }
}

/// Worker loop for one processor task instance.
///
/// Exactly one worker drains each mailbox, so handler state is never
/// mutated concurrently. Acknowledgment happens only after the handler's
/// emissions were anchored and enqueued.
pub(crate) async fn run_task(
    ctx: TaskContext,
    mut handler: Box<dyn TaskHandler>,
    mut mailbox: mpsc::UnboundedReceiver<Tuple>,
    emitter: Arc<Emitter>,
    cancel: CancellationToken,
) {
    if let Err(error) = handler.open(&ctx).await {
        warn!(
            stage = ctx.stage(),
            index = ctx.index(),
            %error,
            "task failed to open; its tuples will resolve by replay"
        );
        return;
    }
    debug!(stage = ctx.stage(), index = ctx.index(), "task started");

    let mut out = OutputCollector::default();
    loop {
        let tuple = tokio::select! {
            _ = cancel.cancelled() => break,
            received = mailbox.recv() => match received {
                Some(tuple) => tuple,
                None => break,
            },
        };

        // A stalled handler must not block shutdown; an aborted attempt
        // resolves like any other unacknowledged tuple.
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = handler.process(&tuple, &mut out) => Some(result),
        };
        let Some(result) = outcome else { break };

        match result {
            Ok(()) => match emitter.forward(&mut out, tuple.anchors()) {
                Ok(()) => emitter.tracker().ack(tuple.anchors()),
                Err(error) => {
                    warn!(
                        stage = ctx.stage(),
                        index = ctx.index(),
                        tuple = tuple.id(),
                        %error,
                        "emission rejected, failing input tuple"
                    );
                    out.discard();
                    emitter.tracker().fail(tuple.anchors());
                }
            },
            Err(failure) => {
                warn!(
                    stage = ctx.stage(),
                    index = ctx.index(),
                    tuple = tuple.id(),
                    %failure,
                    "tuple processing failed"
                );
                out.discard();
                emitter.tracker().fail(tuple.anchors());
            }
        }
    }

    handler.close().await;
    debug!(stage = ctx.stage(), index = ctx.index(), "task stopped");
}

/// Worker loop for one source task instance.
///
/// Polls the handler for fresh root tuples and re-dispatches roots handed
/// back by the delivery tracker after a missed deadline. Replays keep
/// flowing after the source itself is exhausted.
pub(crate) async fn run_source(
    ctx: TaskContext,
    mut handler: Box<dyn SourceHandler>,
    mut replays: Option<mpsc::UnboundedReceiver<Tuple>>,
    emitter: Arc<Emitter>,
    cancel: CancellationToken,
) {
    if let Err(error) = handler.open(&ctx).await {
        warn!(stage = ctx.stage(), index = ctx.index(), %error, "source failed to open");
        return;
    }
    debug!(stage = ctx.stage(), index = ctx.index(), "source started");

    let mut out = OutputCollector::default();
    let mut exhausted = false;
    loop {
        if cancel.is_cancelled() {
            break;
        }

        // Expired roots go back through the pipeline before new input.
        if let Some(rx) = replays.as_mut() {
            while let Ok(root) = rx.try_recv() {
                handler.replayed(&root).await;
                emitter.redispatch(root);
            }
        }

        if exhausted {
            match replays.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        replay = rx.recv() => match replay {
                            Some(root) => {
                                handler.replayed(&root).await;
                                emitter.redispatch(root);
                            }
                            None => {
                                cancel.cancelled().await;
                                break;
                            }
                        }
                    }
                }
                None => {
                    cancel.cancelled().await;
                    break;
                }
            }
            continue;
        }

        let polled = tokio::select! {
            _ = cancel.cancelled() => None,
            result = handler.poll(&mut out) => Some(result),
        };
        let Some(result) = polled else { break };

        match result {
            Ok(state) => {
                if let Err(error) = emitter.emit_roots(&mut out) {
                    warn!(stage = ctx.stage(), %error, "source emission rejected");
                    out.discard();
                }
                match state {
                    SourcePoll::Emitted => {}
                    SourcePoll::Idle => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(IDLE_BACKOFF) => {}
                        }
                    }
                    SourcePoll::Exhausted => {
                        debug!(stage = ctx.stage(), "source exhausted, watching for replays");
                        exhausted = true;
                    }
                }
            }
            Err(failure) => {
                warn!(stage = ctx.stage(), %failure, "source poll failed");
                out.discard();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_BACKOFF) => {}
                }
            }
        }
    }

    handler.close().await;
    debug!(stage = ctx.stage(), index = ctx.index(), "source stopped");
}
