use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ledgerflow::prelude::*;
use tokio::runtime::Runtime;

const PAIRS: [&str; 4] = ["USD/XRP", "BTC/XRP", "EUR/XRP", "JPY/XRP"];

struct PairSource {
    remaining: usize,
}

#[async_trait]
impl SourceHandler for PairSource {
    async fn poll(&mut self, out: &mut OutputCollector) -> Result<SourcePoll, ProcessingFailure> {
        if self.remaining == 0 {
            return Ok(SourcePoll::Exhausted);
        }
        self.remaining -= 1;
        out.emit(
            "txStream",
            vec![Value::from(PAIRS[self.remaining % PAIRS.len()])],
        );
        Ok(SourcePoll::Emitted)
    }
}

struct CountTask {
    counter: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskHandler for CountTask {
    async fn process(
        &mut self,
        _input: &Tuple,
        _out: &mut OutputCollector,
    ) -> Result<(), ProcessingFailure> {
        self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn bench_topology(parallelism: usize) -> Topology {
    Topology::builder()
        .stage(StageDef::source("ledger-stream").declares("txStream", ["tx"]))
        .stage(StageDef::processor("transactions").with_parallelism(parallelism))
        .edge("ledger-stream", "txStream", "transactions", Grouping::Shuffle)
        .build()
        .expect("valid topology")
}

/// End-to-end throughput of a source -> processor pipeline, including
/// delivery tracking, for increasing batch sizes
fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology_end_to_end");
    let runtime = Runtime::new().unwrap();

    for tuples in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(tuples as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tuples), &tuples, |b, &tuples| {
            b.iter(|| {
                runtime.block_on(async {
                    let counter = Arc::new(AtomicUsize::new(0));
                    let counter_handle = Arc::clone(&counter);

                    let running = TopologyExecutor::new(bench_topology(4))
                        .with_timeout(Duration::from_secs(30))
                        .source("ledger-stream", move |_| {
                            Box::new(PairSource { remaining: tuples })
                        })
                        .task("transactions", move |_| {
                            Box::new(CountTask {
                                counter: Arc::clone(&counter_handle),
                            })
                        })
                        .submit()
                        .expect("topology submits");

                    while counter.load(Ordering::Relaxed) < tuples {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    running.settled().await;
                    running.stop().await;

                    assert_eq!(counter.load(Ordering::Relaxed), tuples);
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_end_to_end);
criterion_main!(benches);
