use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tracing::debug;

/// Where task workers execute: on the submitting runtime for local
/// development, or across a fixed pool of dedicated worker threads for a
/// production submission.
///
/// A configuration-selected strategy behind one executor, not two divergent
/// scheduler implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Spawn workers on the current tokio runtime
    Local,
    /// Spread workers round-robin across this many dedicated
    /// single-threaded worker runtimes
    Pool(usize),
}

/// Dispatches worker futures according to the configured placement
pub(crate) enum Spawner {
    Local(Vec<tokio::task::JoinHandle<()>>),
    Pool(WorkerPool),
}

impl Spawner {
    pub(crate) fn new(placement: Placement) -> Self {
        match placement {
            Placement::Local => Self::Local(Vec::new()),
            Placement::Pool(workers) => Self::Pool(WorkerPool::new(workers.max(1))),
        }
    }

    pub(crate) fn spawn(&mut self, worker: BoxFuture<'static, ()>) {
        match self {
            Self::Local(handles) => handles.push(tokio::spawn(worker)),
            Self::Pool(pool) => pool.spawn(worker),
        }
    }

    /// Wait for every worker to finish; callers cancel first
    pub(crate) async fn join(self) {
        match self {
            Self::Local(handles) => {
                for handle in handles {
                    let _ = handle.await;
                }
            }
            Self::Pool(pool) => pool.join().await,
        }
    }
}

/// Fixed pool of worker threads, each driving its own single-threaded
/// runtime; workers are assigned round-robin at submission
pub(crate) struct WorkerPool {
    senders: Vec<mpsc::UnboundedSender<BoxFuture<'static, ()>>>,
    threads: Vec<std::thread::JoinHandle<()>>,
    next: usize,
}

impl WorkerPool {
    fn new(workers: usize) -> Self {
        let mut senders = Vec::with_capacity(workers);
        let mut threads = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            threads.push(spawn_worker_thread(index, rx));
        }
        Self {
            senders,
            threads,
            next: 0,
        }
    }

    fn spawn(&mut self, worker: BoxFuture<'static, ()>) {
        let slot = self.next % self.senders.len();
        self.next += 1;
        let _ = self.senders[slot].send(worker);
    }

    async fn join(mut self) {
        // Closing the assignment channels lets each thread drain and exit.
        self.senders.clear();
        let threads = std::mem::take(&mut self.threads);
        let _ = tokio::task::spawn_blocking(move || {
            for thread in threads {
                let _ = thread.join();
            }
        })
        .await;
    }
}

fn spawn_worker_thread(
    index: usize,
    mut assignments: mpsc::UnboundedReceiver<BoxFuture<'static, ()>>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("topology-worker-{index}"))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build worker runtime");

            runtime.block_on(async move {
                let mut running = FuturesUnordered::new();
                loop {
                    tokio::select! {
                        assigned = assignments.recv() => match assigned {
                            Some(worker) => running.push(tokio::spawn(worker)),
                            None => break,
                        },
                        Some(_) = running.next() => {}
                    }
                }
                while running.next().await.is_some() {}
                debug!(worker = index, "worker thread drained");
            });
        })
        .expect("failed to spawn worker thread")
}
