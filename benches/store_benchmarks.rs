//! Results store benchmarks
//!
//! Measures the per-result cost the runner pays between invocations:
//! - Durable append (record file + fsync + index line)
//! - Session reload from the index
//! - Metric parsing of tool stdout

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gp_bench::experiment::{
    FsResultsStore, MemoryResultsStore, MetricRecord, ResultsStore, RunConfiguration, RunResult,
    RunStatus, ToolKind,
};

fn result(trial: u32) -> RunResult {
    let config = RunConfiguration::builder("deap", ToolKind::Deap, "nicolau_a")
        .param("max_depth", 7)
        .param("fitness_cases", 1000)
        .trial(trial)
        .build();
    RunResult::builder(config)
        .exit_code(Some(0))
        .stdout("@metric min_avg_runtime 0 0.0125\n@metric min_avg_runtime 1 0.0131\n")
        .build(RunStatus::Success)
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    group.bench_function("memory", |b| {
        b.iter_batched(
            MemoryResultsStore::new,
            |mut store| {
                for trial in 0..100 {
                    store.append(result(trial)).unwrap();
                }
                store
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.sample_size(10);
    group.bench_function("fs_durable", |b| {
        b.iter_batched(
            || tempfile::tempdir().unwrap(),
            |dir| {
                let mut store = FsResultsStore::open(dir.path().join("s")).unwrap();
                for trial in 0..10 {
                    store.append(result(trial)).unwrap();
                }
                dir
            },
            criterion::BatchSize::PerIteration,
        );
    });

    group.finish();
}

fn bench_reload(c: &mut Criterion) {
    let mut group = c.benchmark_group("reload");
    group.sample_size(10);

    for count in [10u32, 100] {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("s");
        let mut store = FsResultsStore::open(&root).unwrap();
        for trial in 0..count {
            store.append(result(trial)).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), &root, |b, root| {
            b.iter(|| FsResultsStore::open_existing(black_box(root)).unwrap().len());
        });
    }

    group.finish();
}

fn bench_metric_parsing(c: &mut Criterion) {
    let stdout: String = (0..1000)
        .map(|i| format!("size bin {i}\n@metric min_avg_runtime {i} 0.{i:04}\n"))
        .collect();

    c.bench_function("parse_output_2000_lines", |b| {
        b.iter(|| MetricRecord::parse_output("deap/nicolau_a/trial-0000", black_box(&stdout)));
    });
}

criterion_group!(benches, bench_append, bench_reload, bench_metric_parsing);
criterion_main!(benches);
