//! Storage backend and page transform benchmarks.

use burrowdb_bench::utils::random_data;
use burrowdb_core::{DbConfig, EnvConfig, Environment, InsertFlags};
use burrowdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

const PAGE_SIZES: [usize; 3] = [1024, 4096, 16384];

/// Benchmark InMemoryBackend page-sized writes.
fn bench_inmemory_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_write");

    for size in PAGE_SIZES.iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut backend = InMemoryBackend::new();
            let data = random_data(size);
            let mut slot = 0u64;

            b.iter(|| {
                backend
                    .write_at(black_box(slot * size as u64), black_box(&data))
                    .unwrap();
                slot = (slot + 1) % 256;
            });
        });
    }
    group.finish();
}

/// Benchmark FileBackend page-sized reads.
fn bench_file_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_read");
    group.sample_size(50);

    for size in PAGE_SIZES.iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let path = temp_dir.path().join("bench.dat");
            let mut backend = FileBackend::create(&path, 0o644).unwrap();
            let data = random_data(size);
            for slot in 0..64u64 {
                backend.write_at(slot * size as u64, &data).unwrap();
            }
            backend.flush().unwrap();
            let mut slot = 0u64;

            b.iter(|| {
                let page = backend
                    .read_at(black_box(slot * size as u64), black_box(size))
                    .unwrap();
                slot = (slot + 7) % 64;
                black_box(page);
            });
        });
    }
    group.finish();
}

/// Benchmark FileBackend sync after a page write.
fn bench_file_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_sync");
    group.sample_size(20);

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bench.dat");
    let mut backend = FileBackend::create(&path, 0o644).unwrap();
    let data = random_data(4096);

    group.bench_function("after_page_write", |b| {
        b.iter(|| {
            backend.write_at(0, &data).unwrap();
            backend.sync().unwrap();
        });
    });
    group.finish();
}

fn flush_config(name: &str) -> EnvConfig {
    let config = EnvConfig::new().page_size(4096);
    match name {
        "crc32" => config.enable_crc32(true),
        "aes_gcm" => config.encryption_key(b"benchmark key".to_vec()),
        _ => config,
    }
}

/// Benchmark writing dirty pages through each page transform.
fn bench_transform_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_flush");
    group.sample_size(20);

    for name in ["plain", "crc32", "aes_gcm"] {
        group.bench_function(name, |b| {
            let temp_dir = TempDir::new().unwrap();
            let path = temp_dir.path().join("bench.brw");
            let env = Environment::create(&path, flush_config(name)).unwrap();
            let db = env.create_db(1, DbConfig::new()).unwrap();
            let record = random_data(256);
            let mut next = 0u32;

            b.iter(|| {
                for _ in 0..100 {
                    db.insert(None, &next.to_be_bytes(), &record, InsertFlags::NONE)
                        .unwrap();
                    next += 1;
                }
                env.flush().unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_inmemory_write,
    bench_file_read,
    bench_file_sync,
    bench_transform_flush,
);

criterion_main!(benches);
