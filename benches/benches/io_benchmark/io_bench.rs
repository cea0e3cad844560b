//! Запись и чтение CPHD в зависимости от числа потоков.
//!
//! Запуск: cargo bench -p cphd-benchmark

use std::{hint::black_box, time::Duration};

use cphd_core::{
    ChannelDescriptor, CphdReader, CphdWriter, Metadata, PvpBlock, SignalArray, WriterConfig,
};
use cphd_types::{Compression, SignalFormat};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use num_complex::Complex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::TempDir;

const CHANNELS: usize = 8;
const VECTORS: usize = 256;
const SAMPLES: usize = 1024;

fn bench_metadata(compression: Compression) -> Metadata {
    let channels = (0..CHANNELS)
        .map(|i| ChannelDescriptor::new(&format!("CH{i}"), VECTORS, SAMPLES))
        .collect();
    let mut m = Metadata::new(SignalFormat::Ci4, channels);
    m.compression = compression;
    m
}

fn bench_channels() -> Vec<SignalArray> {
    let mut rng = StdRng::seed_from_u64(1);
    (0..CHANNELS)
        .map(|_| {
            Array2::from_shape_simple_fn((VECTORS, SAMPLES), || {
                Complex::new(rng.gen_range(-512i16..512), rng.gen_range(-512i16..512))
            })
            .into()
        })
        .collect()
}

fn write_file(
    path: &std::path::Path,
    metadata: Metadata,
    channels: &[SignalArray],
    threads: usize,
) {
    let pvp = PvpBlock::new(&metadata);
    let config = WriterConfig {
        num_threads: threads,
        ..WriterConfig::default()
    };
    let mut writer = CphdWriter::with_config(metadata, path, config).unwrap();
    writer.write_wideband(&pvp, channels, &[]).unwrap();
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_wideband");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    let dir = TempDir::new().unwrap();
    let channels = bench_channels();
    let bytes = (CHANNELS * VECTORS * SAMPLES * SignalFormat::Ci4.sample_size()) as u64;
    group.throughput(Throughput::Bytes(bytes));

    for compression in [Compression::None, Compression::Lz4] {
        for threads in [1, 2, 4, 8] {
            let path = dir.path().join(format!("w_{compression}_{threads}.cphd"));
            group.bench_with_input(
                BenchmarkId::new(compression.to_string(), threads),
                &threads,
                |b, &threads| b.iter(|| write_file(&path, bench_metadata(compression), black_box(&channels), threads)),
            );
        }
    }

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_all");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    let dir = TempDir::new().unwrap();
    let channels = bench_channels();
    let bytes = (CHANNELS * VECTORS * SAMPLES * SignalFormat::Ci4.sample_size()) as u64;
    group.throughput(Throughput::Bytes(bytes));

    for compression in [Compression::None, Compression::Lz4] {
        let path = dir.path().join(format!("r_{compression}.cphd"));
        write_file(&path, bench_metadata(compression), &channels, 4);

        for threads in [1, 2, 4, 8] {
            group.bench_with_input(
                BenchmarkId::new(compression.to_string(), threads),
                &threads,
                |b, &threads| {
                    b.iter(|| {
                        let reader = CphdReader::open(&path, 8 * 1024 * 1024).unwrap();
                        black_box(reader.read_all(threads).unwrap())
                    })
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_write, bench_read);
criterion_main!(benches);
