use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::time::delay_queue::{DelayQueue, Key};

use super::tracker::DeliveryTracker;
use crate::domain::TupleId;

#[derive(Debug)]
pub(crate) enum TimerCmd {
    Schedule(TupleId),
    Cancel(TupleId),
}

/// Deadline wheel for the delivery tracker.
///
/// Runs as a background task off the processing path. Exits when the command
/// channel closes (topology stop), dropping outstanding deadlines without
/// firing spurious replays.
pub(crate) async fn run(
    timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<TimerCmd>,
    tracker: Weak<DeliveryTracker>,
) {
    let mut deadlines: DelayQueue<TupleId> = DelayQueue::new();
    let mut keys: HashMap<TupleId, Key> = HashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(TimerCmd::Schedule(root)) => {
                    keys.insert(root, deadlines.insert(root, timeout));
                }
                Some(TimerCmd::Cancel(root)) => {
                    if let Some(key) = keys.remove(&root) {
                        deadlines.remove(&key);
                    }
                }
                None => break,
            },
            Some(expired) = deadlines.next() => {
                let root = expired.into_inner();
                keys.remove(&root);
                match tracker.upgrade() {
                    Some(tracker) => tracker.expire(root),
                    None => break,
                }
            }
        }
    }
}
