use criterion::{Criterion, black_box, criterion_group, criterion_main};

use taintflow_core::{Label, TaintRuntime, TaintSource, op};

fn bench_union(c: &mut Criterion) {
    let bytes: Vec<u8> = (0..=255u8).collect();
    let rt = TaintRuntime::with_heap_storage(1 << 20, TaintSource::from_bytes(&bytes));

    c.bench_function("union_hash_cons_hit", |b| {
        let warm = rt.union(1, 2, op::ADD, 8, 0, 0);
        b.iter(|| {
            let l = rt.union(black_box(1), black_box(2), op::ADD, 8, 0, 0);
            assert_eq!(l, warm);
            l
        });
    });

    c.bench_function("union_load_shape_collapse", |b| {
        let cells: Vec<Label> = (1..=8).collect();
        b.iter(|| rt.union_load(black_box(&cells), black_box(&bytes[0..8])));
    });

    c.bench_function("union_store_load_writeback", |b| {
        let loaded = rt.union_load(&(1..=8).collect::<Vec<Label>>(), &bytes[0..8]);
        let mut out = [0 as Label; 8];
        b.iter(|| {
            rt.union_store(black_box(loaded), black_box(&mut out));
            out[0]
        });
    });
}

criterion_group!(benches, bench_union);
criterion_main!(benches);
