use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ledgerflow::prelude::*;

const PAIRS: [&str; 6] = [
    "USD/XRP", "BTC/XRP", "EUR/XRP", "JPY/XRP", "CNY/XRP", "KRW/XRP",
];

fn exchange_tuple(id: u64, pair: &str) -> Tuple {
    Tuple::anchored(
        id,
        "exchangeAggregation",
        vec![Value::from("exchange"), Value::from(pair)],
        vec![1],
    )
}

/// Benchmark keyed routing across destination task counts
fn bench_fields_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("fields_grouping");
    let schema = StreamSchema::new("exchangeAggregation", ["exchange", "pair"]);

    let tuples: Vec<Tuple> = (0..1024)
        .map(|i| exchange_tuple(i, PAIRS[i as usize % PAIRS.len()]))
        .collect();

    for task_count in [2usize, 8, 32] {
        let selector = Grouping::fields(["pair"])
            .compile(&schema, task_count)
            .unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(task_count),
            &task_count,
            |b, _| {
                b.iter(|| {
                    for tuple in &tuples {
                        black_box(selector.select(tuple));
                    }
                });
            },
        );
    }
    group.finish();
}

/// Benchmark round-robin routing for comparison with the keyed path
fn bench_shuffle_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("shuffle_grouping");
    let schema = StreamSchema::new("txStream", ["tx"]);

    let tuples: Vec<Tuple> = (0..1024)
        .map(|i| Tuple::root(i, "txStream", vec![Value::from(i as i64)]))
        .collect();

    for task_count in [2usize, 8, 32] {
        let selector = Grouping::Shuffle.compile(&schema, task_count).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(task_count),
            &task_count,
            |b, _| {
                b.iter(|| {
                    for tuple in &tuples {
                        black_box(selector.select(tuple));
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_fields_grouping, bench_shuffle_grouping);
criterion_main!(benches);
