//! Benchmarks for status report formatting over large pools

use batchrun::config::StatusFormat;
use batchrun::grid::{NodeSnapshot, NodeState, PoolSnapshot, TaskSnapshot, TaskState};
use batchrun::status::{PoolStatusReporter, StatusSnapshot};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::time::Duration;

/// Build a snapshot with a mix of node and task states
fn create_snapshot(nodes: usize, tasks: usize) -> StatusSnapshot {
    let nodes = (0..nodes)
        .map(|i| NodeSnapshot {
            id: format!("node-{i:04}"),
            state: if i % 3 == 0 { NodeState::Idle } else { NodeState::Running },
            running_tasks: (i % 3 != 0) as u32,
        })
        .collect();
    let tasks = (0..tasks)
        .map(|i| {
            let id = format!("task-{:04}", i + 1);
            match i % 4 {
                0 => TaskSnapshot::completed(id, 0),
                1 => TaskSnapshot::completed(id, 1),
                2 => {
                    let mut task = TaskSnapshot::new(id, TaskState::Running);
                    task.node_id = Some(format!("node-{:04}", i % 7));
                    task
                }
                _ => TaskSnapshot::new(id, TaskState::Active),
            }
        })
        .collect();

    StatusSnapshot {
        poll: 42,
        elapsed: Duration::from_secs(3725),
        pool: PoolSnapshot {
            pool_id: "bench-pool".into(),
            nodes,
            resize_errors: vec![],
        },
        tasks,
    }
}

fn bench_report_formats(c: &mut Criterion) {
    let mut group = c.benchmark_group("status_report");

    for size in [10usize, 100, 1000] {
        let snapshot = create_snapshot(size / 10 + 1, size);
        for format in [StatusFormat::Terse, StatusFormat::Verbose, StatusFormat::Json] {
            let reporter = PoolStatusReporter::new(format);
            group.bench_with_input(
                BenchmarkId::new(format!("{format:?}"), size),
                &snapshot,
                |b, snapshot| b.iter(|| black_box(reporter.report(black_box(snapshot)))),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_report_formats);
criterion_main!(benches);
