// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Benchmarks for the persistent queue.
//!
//! Measures:
//! - Encoding cost per format
//! - Send latency per store
//! - Send-then-receive round trip through the gate

use std::hint::black_box;

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use inmq_queue::{EncodingKind, FlushMode, Message, QueueBuilder, StoreKind};
use tempfile::TempDir;

/// Body sizes to benchmark (bytes)
const BODY_SIZES: &[usize] = &[64, 1024, 16384];

/// Number of messages for round-trip tests
const BATCH_SIZE: usize = 200;

fn create_queue(
    temp_dir: &TempDir,
    store: StoreKind,
    encoding: EncodingKind,
    flush_mode: FlushMode,
) -> inmq_queue::Queue {
    QueueBuilder::new(temp_dir.path())
        .name("bench")
        .store(store)
        .encoding(encoding)
        .flush_mode(flush_mode)
        .build()
        .expect("Failed to create queue")
}

fn generate_message(size: usize) -> Message {
    Message::new("x".repeat(size)).with_id("bench")
}

// =============================================================================
// Encoding
// =============================================================================

fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoding");

    for kind in EncodingKind::ALL {
        let encoding = kind.encoding();
        for &size in BODY_SIZES {
            let msg = generate_message(size);
            let bytes = encoding.marshal(&msg).unwrap();
            group.throughput(Throughput::Bytes(size as u64));

            group.bench_with_input(
                BenchmarkId::new(format!("{kind}_marshal"), size),
                &msg,
                |b, msg| b.iter(|| encoding.marshal(black_box(msg)).unwrap()),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("{kind}_unmarshal"), size),
                &bytes,
                |b, bytes| b.iter(|| encoding.unmarshal(black_box(bytes)).unwrap()),
            );
        }
    }

    group.finish();
}

// =============================================================================
// Send Latency
// =============================================================================

fn bench_send_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_latency_async");

    for store in [StoreKind::Log, StoreKind::Directory] {
        for &size in BODY_SIZES {
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new(store.to_string(), size), &size, |b, &size| {
                let temp_dir = TempDir::new().unwrap();
                let queue = create_queue(&temp_dir, store, EncodingKind::Msgpack, FlushMode::Async);
                let producer = queue.producer();
                let msg = generate_message(size);

                b.iter(|| producer.send(black_box(msg.clone())).unwrap());

                queue.shutdown().unwrap();
            });
        }
    }

    group.finish();
}

fn bench_send_latency_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_latency_sync");
    // Sync mode is slow, reduce sample size
    group.sample_size(20);

    for store in [StoreKind::Log, StoreKind::Directory] {
        group.bench_function(store.to_string(), |b| {
            let temp_dir = TempDir::new().unwrap();
            let queue = create_queue(&temp_dir, store, EncodingKind::Msgpack, FlushMode::Sync);
            let producer = queue.producer();
            let msg = generate_message(256);

            b.iter(|| producer.send(black_box(msg.clone())).unwrap());

            queue.shutdown().unwrap();
        });
    }

    group.finish();
}

// =============================================================================
// Round Trip
// =============================================================================

/// Fill then drain. Log store removal rewrites the remaining tail, so this
/// shows compaction cost growing with queue depth.
fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");
    group.sample_size(10);

    for store in [StoreKind::Log, StoreKind::Directory] {
        for kind in EncodingKind::ALL {
            group.throughput(Throughput::Elements(BATCH_SIZE as u64));
            group.bench_function(BenchmarkId::new(store.to_string(), kind), |b| {
                b.iter_batched(
                    || {
                        let temp_dir = TempDir::new().unwrap();
                        let queue = create_queue(&temp_dir, store, kind, FlushMode::Async);
                        (temp_dir, queue, generate_message(256))
                    },
                    |(temp_dir, queue, msg)| {
                        let producer = queue.producer();
                        let consumer = queue.consumer();
                        for _ in 0..BATCH_SIZE {
                            producer.send(msg.clone()).unwrap();
                        }
                        for _ in 0..BATCH_SIZE {
                            black_box(consumer.recv().unwrap());
                        }
                        queue.shutdown().unwrap();
                        drop(temp_dir);
                    },
                    BatchSize::PerIteration,
                );
            });
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encoding,
    bench_send_latency,
    bench_send_latency_sync,
    bench_round_trip,
);

criterion_main!(benches);
