//! Benchmarks the core per-row dispatch cycle — generate, give, return,
//! slice — without the transport or thread overhead of a full `Manager`
//! run, isolating the history table's cost as the dispatch loop's hottest
//! path (§2: History Table is ≈25% of the core).

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use indexmap::IndexMap;

use ensemble_coordinator::history::{Column, FieldKind, FieldSpec, FieldValue, HistorySlice, HistoryTable};
use ensemble_coordinator::types::WorkerId;

fn one_cycle(hist: &mut HistoryTable, row_x: f64) {
    let mut record = HashMap::new();
    record.insert("x".to_string(), FieldValue::F64(row_x));
    let range = hist
        .append_generated(WorkerId(1), vec![record])
        .expect("capacity sized for the benchmark");
    let row = range.start;

    hist.mark_given(&[row], WorkerId(2), 0.0).expect("not yet given");

    let mut columns = IndexMap::new();
    columns.insert("x".to_string(), Column::F64(vec![row_x * row_x]));
    let slice = HistorySlice::new(vec![row], columns);
    hist.mark_returned(WorkerId(2), &slice).expect("outstanding");

    black_box(hist.slice(&["x".to_string()], &[row]).unwrap());
}

fn dispatch_loop_benchmark(c: &mut Criterion) {
    c.bench_function("history_dispatch_cycle", |b| {
        b.iter_batched(
            || HistoryTable::new(1, 0, &[FieldSpec::new("x", FieldKind::F64)]),
            |mut hist| one_cycle(&mut hist, 1.5),
            criterion::BatchSize::SmallInput,
        );
    });

    c.bench_function("history_dispatch_cycle_batch_1000", |b| {
        b.iter_batched(
            || HistoryTable::new(1000, 0, &[FieldSpec::new("x", FieldKind::F64)]),
            |mut hist| {
                for i in 0..1000 {
                    one_cycle(&mut hist, i as f64);
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, dispatch_loop_benchmark);
criterion_main!(benches);
