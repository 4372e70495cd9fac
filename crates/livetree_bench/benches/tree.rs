//! Synchronized tree benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use livetree_bench::{flat_children, random_paths};
use livetree_data::{Node, Path};
use livetree_engine::{SyncTree, WriteId, WriteOp};
use std::collections::BTreeMap;

/// Build a tree whose server layer holds `count` children under `/items`.
fn seeded_tree(count: usize) -> SyncTree {
    let mut tree = SyncTree::new();
    let items = Path::parse("items").unwrap();
    tree.apply_server_update(&items, flat_children(count));
    tree
}

/// Benchmark reads through a growing stack of optimistic writes.
fn bench_read_with_pending(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_with_pending");
    let items = Path::parse("items").unwrap();

    for pending in [0usize, 10, 100, 500] {
        let mut tree = seeded_tree(1000);
        for (i, path) in random_paths(pending, 3, 8).into_iter().enumerate() {
            let path = items.join(&path);
            tree.apply_optimistic_write(
                WriteId(i as u64 + 1),
                path,
                WriteOp::Overwrite(Node::from(i as i64)),
                true,
            );
        }

        group.bench_with_input(BenchmarkId::from_parameter(pending), &tree, |b, tree| {
            b.iter(|| black_box(tree.read(black_box(&items))));
        });
    }

    group.finish();
}

/// Benchmark applying and acknowledging writes in order.
fn bench_write_ack_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_ack_cycle");

    for count in [10usize, 100, 1000] {
        let paths = random_paths(count, 3, 8);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &paths, |b, paths| {
            b.iter(|| {
                let mut tree = SyncTree::new();
                for (i, path) in paths.iter().enumerate() {
                    tree.apply_optimistic_write(
                        WriteId(i as u64 + 1),
                        path.clone(),
                        WriteOp::Overwrite(Node::from(i as i64)),
                        true,
                    );
                }
                for i in 0..paths.len() {
                    tree.acknowledge(WriteId(i as u64 + 1));
                }
                black_box(tree.pending_count());
            });
        });
    }

    group.finish();
}

/// Benchmark reverting the oldest write underneath later ones.
fn bench_revert(c: &mut Criterion) {
    let items = Path::parse("items").unwrap();
    let base = seeded_tree(500);

    c.bench_function("revert_oldest_of_100", |b| {
        b.iter_batched(
            || {
                let mut tree = base.clone();
                for i in 0..100u64 {
                    let mut merge = BTreeMap::new();
                    merge.insert(format!("item_{i:05}"), Node::from("changed"));
                    tree.apply_optimistic_write(
                        WriteId(i + 1),
                        items.clone(),
                        WriteOp::Merge(merge),
                        true,
                    );
                }
                tree
            },
            |mut tree| {
                tree.revert(WriteId(1));
                black_box(tree.read(&items));
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_read_with_pending, bench_write_ack_cycle, bench_revert);
criterion_main!(benches);
