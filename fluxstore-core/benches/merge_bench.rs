//! Compaction and search benchmarks
//!
//! Run with:
//!   cargo bench --bench merge_bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rand::prelude::*;

use fluxstore_core::{
    merge_block_streams, unpack_series, BlockStreamReader, BlockStreamWriter, InmemoryPart,
    MergeCounters, Part, PartHeader, Partition, PartitionSearch, RawRow, TimeRange, Tsid,
};

const SERIES: u64 = 200;
const ROWS_PER_SERIES: i64 = 2_000;

/// Parts with interleaved timestamps so that every series overlaps across parts
fn make_parts(count: i64) -> Vec<Arc<Part>> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|p| {
            let mut rows = Vec::with_capacity((SERIES as i64 * ROWS_PER_SERIES) as usize);
            for id in 1..=SERIES {
                let mut value: f64 = rng.gen_range(0.0..100.0);
                for i in 0..ROWS_PER_SERIES {
                    let ts = 1_700_000_000_000 + (i * count + p) * 15_000;
                    value += rng.gen_range(-0.5..0.5);
                    rows.push(RawRow::new(
                        Tsid::with_metric_id(id),
                        ts,
                        (value * 100.0).round() / 100.0,
                    ));
                }
            }
            Arc::new(Part::from_inmemory(InmemoryPart::from_rows(&mut rows)).unwrap())
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.sample_size(10);

    for parts_count in [2, 8] {
        let parts = make_parts(parts_count);
        let rows: u64 = parts.iter().map(|p| p.header().rows_count).sum();
        group.throughput(Throughput::Elements(rows));
        group.bench_function(format!("overlapping_{}_parts", parts_count), |b| {
            b.iter_batched(
                || {
                    parts
                        .iter()
                        .map(|p| BlockStreamReader::new(Arc::clone(p)))
                        .collect::<Vec<_>>()
                },
                |readers| {
                    let mut bsw = BlockStreamWriter::new();
                    let mut ph = PartHeader::default();
                    let counters = MergeCounters::default();
                    merge_block_streams(&mut ph, &mut bsw, readers, None, None, &counters)
                        .unwrap();
                    black_box(ph.rows_count)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let pt = Arc::new(Partition::new(TimeRange::all()));
    for part in make_parts(4) {
        pt.add_part(part);
    }
    let tsids: Vec<Tsid> = (1..=SERIES).step_by(10).map(Tsid::with_metric_id).collect();

    let mut group = c.benchmark_group("search");
    group.bench_function("unpack_20_series", |b| {
        b.iter(|| {
            let mut pts = PartitionSearch::new();
            pts.init(&pt, black_box(&tsids), TimeRange::all());
            let series = unpack_series(&mut pts).unwrap();
            pts.must_close();
            black_box(series.len())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_merge, bench_search);
criterion_main!(benches);
