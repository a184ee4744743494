// Compares `Block::lookup`'s binary search against a reference linear scan
// at realistic block fan-out, to confirm the binary-search implementation
// (required by the format's design) actually outperforms the linear scan
// the original implementation used.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pagedb::storage::block::{Block, BlockWriter};
use tempfile::tempdir;

fn make_entries(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..n)
        .map(|i| (format!("key{i:08}").into_bytes(), format!("value{i}").into_bytes()))
        .collect()
}

fn build_block(dir: &std::path::Path, file_id: u64, entries: &[(Vec<u8>, Vec<u8>)]) {
    let mut w = BlockWriter::create(dir, file_id).unwrap();
    for (k, v) in entries {
        w.add(k, v).unwrap();
    }
    w.finish().unwrap();
}

/// The original's defect, reimplemented here only as a benchmark baseline:
/// scan every entry in order instead of binary-searching the sorted index.
fn linear_scan_lookup<'a>(entries: &'a [(Vec<u8>, Vec<u8>)], key: &[u8]) -> Option<&'a [u8]> {
    entries
        .iter()
        .find(|(k, _)| k.as_slice() == key)
        .map(|(_, v)| v.as_slice())
}

fn bench_lookup(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut group = c.benchmark_group("block_lookup");

    for &size in &[100usize, 1_000, 10_000] {
        let entries = make_entries(size);
        let file_id = size as u64;
        build_block(dir.path(), file_id, &entries);
        let block = Block::open(dir.path(), file_id).unwrap();

        let probe_keys: Vec<Vec<u8>> = (0..size)
            .step_by((size / 20).max(1))
            .map(|i| format!("key{i:08}").into_bytes())
            .collect();

        group.bench_with_input(BenchmarkId::new("binary_search", size), &size, |b, _| {
            b.iter(|| {
                for key in &probe_keys {
                    black_box(block.get(black_box(key)).unwrap());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("linear_scan", size), &size, |b, _| {
            b.iter(|| {
                for key in &probe_keys {
                    black_box(linear_scan_lookup(black_box(&entries), black_box(key)));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
