use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::timer::{self, TimerCmd};
use crate::domain::{Tuple, TupleId};

/// Bookkeeping for one root tuple's causal chain: outstanding
/// acknowledgments plus the retained root for replay
#[derive(Debug)]
struct DeliveryRecord {
    pending: u64,
    root: Tuple,
}

/// Delivery counters since topology start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Roots whose full causal chain acknowledged before the deadline
    pub acked: u64,
    /// Roots resolved to failure (deadline elapsed or explicit fail)
    pub failed: u64,
    /// Replays issued for failed roots
    pub replayed: u64,
}

/// At-least-once delivery bookkeeping for every root tuple.
///
/// One record per in-flight root; increments and decrements race across
/// tasks, so each record is mutated under its own map shard, never a
/// tracker-wide lock. Scoped to one topology run and torn down with it.
pub struct DeliveryTracker {
    records: DashMap<TupleId, DeliveryRecord>,
    timer: mpsc::UnboundedSender<TimerCmd>,
    replay: mpsc::UnboundedSender<Tuple>,
    acked: AtomicU64,
    failed: AtomicU64,
    replayed: AtomicU64,
}

impl DeliveryTracker {
    /// Start a tracker and its deadline timer.
    ///
    /// Returns the receiver on which failed roots are handed back for
    /// replay. Must be called from within a tokio runtime.
    pub fn start(timeout: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<Tuple>) {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (replay_tx, replay_rx) = mpsc::unbounded_channel();

        let tracker = Arc::new(Self {
            records: DashMap::new(),
            timer: timer_tx,
            replay: replay_tx,
            acked: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
        });
        tokio::spawn(timer::run(timeout, timer_rx, Arc::downgrade(&tracker)));

        (tracker, replay_rx)
    }

    /// Begin tracking a root tuple: pending count 1, deadline armed
    pub fn track(&self, root: &Tuple) {
        self.records.insert(
            root.id(),
            DeliveryRecord {
                pending: 1,
                root: root.clone(),
            },
        );
        let _ = self.timer.send(TimerCmd::Schedule(root.id()));
    }

    /// Record a causally anchored emission: one increment per anchored root.
    ///
    /// Callers invoke this before the emitted tuple is enqueued downstream,
    /// so a record can never reach zero between an emission and its
    /// eventual acknowledgment.
    pub fn anchor(&self, roots: &[TupleId]) {
        for root in roots {
            if let Some(mut record) = self.records.get_mut(root) {
                record.pending += 1;
            }
        }
    }

    /// Acknowledge a processed tuple: one decrement per anchored root.
    ///
    /// A root whose count reaches zero is fully processed; its record is
    /// destroyed and the deadline cancelled. Acks for roots already resolved
    /// by timeout are ignored.
    pub fn ack(&self, roots: &[TupleId]) {
        for &root in roots {
            let mut completed = false;
            if let Some(mut record) = self.records.get_mut(&root) {
                record.pending = record.pending.saturating_sub(1);
                completed = record.pending == 0;
            }
            if completed
                && self
                    .records
                    .remove_if(&root, |_, record| record.pending == 0)
                    .is_some()
            {
                let _ = self.timer.send(TimerCmd::Cancel(root));
                self.acked.fetch_add(1, Ordering::Relaxed);
                debug!(root, "root tuple fully acknowledged");
            }
        }
    }

    /// Explicit negative acknowledgment: resolve the anchored roots to
    /// failure immediately instead of waiting out the deadline.
    pub fn fail(&self, roots: &[TupleId]) {
        for &root in roots {
            if let Some((_, record)) = self.records.remove(&root) {
                let _ = self.timer.send(TimerCmd::Cancel(root));
                warn!(root, "tuple failed, replaying root tuple");
                self.resolve_failed(record.root);
            }
        }
    }

    /// Deadline expired with the record still outstanding
    pub(crate) fn expire(&self, root: TupleId) {
        if let Some((_, record)) = self.records.remove(&root) {
            warn!(
                root,
                pending = record.pending,
                "delivery deadline elapsed, replaying root tuple"
            );
            self.resolve_failed(record.root);
        }
    }

    fn resolve_failed(&self, root: Tuple) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if self.replay.send(root).is_ok() {
            self.replayed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of in-flight roots
    pub fn in_flight(&self) -> usize {
        self.records.len()
    }

    /// Outstanding acknowledgment count for one root, if still tracked
    pub fn pending_for(&self, root: TupleId) -> Option<u64> {
        self.records.get(&root).map(|record| record.pending)
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            acked: self.acked.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for DeliveryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTracker")
            .field("in_flight", &self.records.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
