//! Edit Benchmarks
//!
//! Insert, overwrite and read throughput against channel size.
//! An insert in the middle should not depend on how long the channel is.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use sg_storage::{Channel, InsertMode, Sample, SAMPLE_MAX, SAMPLE_MIN};

/// Channel sizes in samples
const CHANNEL_SIZES: &[usize] = &[1 << 16, 1 << 20, 1 << 23];

const BLOCK: usize = 4096;

/// Segment bound for the channels under test
const SEGMENT_LENGTH: usize = 1 << 16;

/// Reproducible 24 bit noise
fn generate_samples(size: usize, seed: u64) -> Vec<Sample> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..size).map(|_| rng.random_range(SAMPLE_MIN..=SAMPLE_MAX)).collect()
}

fn bounded_channel(samples: Vec<Sample>) -> Channel {
    let channel = Channel::new().with_max_segment_length(SEGMENT_LENGTH);
    channel.extend_from(samples);
    channel
}

fn bench_insert_middle(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_middle");
    let block = generate_samples(BLOCK, 7);

    for &size in CHANNEL_SIZES {
        group.throughput(Throughput::Elements(BLOCK as u64));
        let channel = bounded_channel(generate_samples(size, 42));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut writer = channel.open_writer(InsertMode::Insert, size / 2, size / 2).unwrap();
                writer.write(black_box(&block)).unwrap();
                writer.close().unwrap();
                // keep the channel length stable between iterations
                channel.delete(size / 2, BLOCK).unwrap();
            })
        });
    }

    group.finish();
}

fn bench_overwrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("overwrite");
    let block = generate_samples(BLOCK, 11);

    for &size in CHANNEL_SIZES {
        group.throughput(Throughput::Elements(BLOCK as u64));
        let channel = Channel::from_samples(generate_samples(size, 42));
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let left = rng.random_range(0..size - BLOCK);
                let mut writer = channel
                    .open_writer(InsertMode::Overwrite, left, left + BLOCK - 1)
                    .unwrap();
                writer.write(black_box(&block)).unwrap();
                writer.close().unwrap();
            })
        });
    }

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let size = 1 << 20;
    let channel = Channel::from_samples(generate_samples(size, 42));

    // same data split into many small segments
    let fragmented = Channel::new();
    for chunk in generate_samples(size, 42).chunks(BLOCK) {
        let mut writer = fragmented.open_writer(InsertMode::Append, 0, 0).unwrap();
        writer.write(chunk).unwrap();
        writer.close().unwrap();
    }

    group.throughput(Throughput::Elements(size as u64));
    for (name, channel) in [("contiguous", &channel), ("fragmented", &fragmented)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut reader = channel.open_reader(0, size - 1);
                black_box(reader.read_to_end())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert_middle, bench_overwrite, bench_read);
criterion_main!(benches);
