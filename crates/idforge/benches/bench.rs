use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use idforge::{
    CoordinationConfig, CounterConfig, CounterIdGenerator, DEFAULT_EPOCH, GeneratorRegistry,
    IdGenStatus, LockSnowflakeGenerator, MemoryCoordinator, MemoryScriptStore, MonotonicClock,
    RetryConfig, SequenceIdGenerator, TimeSource,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};
use tokio::runtime::Builder;

struct FixedMockTime {
    millis: u64,
}

impl TimeSource for FixedMockTime {
    fn current_millis(&self) -> u64 {
        self.millis
    }
}

// Number of IDs generated per benchmark iteration (per-thread for
// multi-threaded).
const TOTAL_IDS: usize = 4096;

fn mono_clock() -> MonotonicClock {
    MonotonicClock::with_epoch(DEFAULT_EPOCH).unwrap()
}

/// Hot path with a fixed clock: every poll is `Ready`.
fn benchmark_mock_sequential_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("mock/sequential/lock");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let generator =
                    LockSnowflakeGenerator::new(0, 0, FixedMockTime { millis: 1 }).unwrap();
                for _ in 0..TOTAL_IDS {
                    match generator.try_poll_id().unwrap() {
                        IdGenStatus::Ready { id } => {
                            black_box(id);
                        }
                        IdGenStatus::Pending { .. } => unreachable!(),
                    }
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Real clock, spinning through exhausted milliseconds.
fn benchmark_mono_sequential_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("mono/sequential/lock");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        let clock = mono_clock();
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let generator = LockSnowflakeGenerator::new(0, 0, clock.clone()).unwrap();
                for _ in 0..TOTAL_IDS {
                    black_box(generator.next_packed_id().unwrap());
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// One shared generator hammered by several threads.
fn benchmark_mono_contended_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("mono/contended/lock");
    let clock = mono_clock();

    for thread_count in [1, 2, 4, 8, 16] {
        let ids_per_thread = TOTAL_IDS / thread_count;

        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(
            format!("elems/{}/threads/{}", TOTAL_IDS, thread_count),
            |b| {
                b.iter_custom(|iters| {
                    let start = Instant::now();

                    for _ in 0..iters {
                        let generator =
                            Arc::new(LockSnowflakeGenerator::new(0, 0, clock.clone()).unwrap());
                        let barrier = Arc::new(Barrier::new(thread_count + 1));
                        scope(|s| {
                            for _ in 0..thread_count {
                                let generator = Arc::clone(&generator);
                                let barrier = Arc::clone(&barrier);
                                s.spawn(move || {
                                    barrier.wait();
                                    for _ in 0..ids_per_thread {
                                        black_box(generator.next_packed_id().unwrap());
                                    }
                                });
                            }
                            barrier.wait();
                        });
                    }

                    start.elapsed()
                });
            },
        );
    }

    group.finish();
}

/// One generator per machine, all looked up through the registry.
fn benchmark_mono_registry_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("mono/registry/threaded");
    let thread_count = num_cpus::get().min(32);
    let ids_per_thread = TOTAL_IDS / thread_count;
    group.throughput(Throughput::Elements((ids_per_thread * thread_count) as u64));

    group.bench_function(
        format!("elems/{}/threads/{}", TOTAL_IDS, thread_count),
        |b| {
            let registry = GeneratorRegistry::new(mono_clock());
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    scope(|s| {
                        for machine_id in 0..thread_count as u64 {
                            let registry = &registry;
                            s.spawn(move || {
                                for _ in 0..ids_per_thread {
                                    let generator = registry.get_generator(1, machine_id).unwrap();
                                    black_box(generator.next_packed_id().unwrap());
                                }
                            });
                        }
                    });
                }
                start.elapsed()
            });
        },
    );

    group.finish();
}

/// Counter IDs through the in-memory script store on one Tokio thread.
fn benchmark_counter_memory_tokio(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter/memory/tokio");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        let generator =
            CounterIdGenerator::new(MemoryScriptStore::new(), CounterConfig::default()).unwrap();

        b.to_async(&rt).iter_custom(|iters| {
            let generator = &generator;
            async move {
                let start = Instant::now();
                for _ in 0..iters {
                    for _ in 0..TOTAL_IDS {
                        black_box(generator.next_unique_id("bench:order:k", 1, 8).await.unwrap());
                    }
                }
                start.elapsed()
            }
        });
    });

    group.finish();
}

/// Sequence IDs through the in-memory coordinator on one Tokio thread.
fn benchmark_sequence_memory_tokio(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence/memory/tokio");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        let config = CoordinationConfig {
            connect_string: "memory".to_string(),
            retry: RetryConfig::default(),
            ..CoordinationConfig::default()
        };
        let generator = rt
            .block_on(SequenceIdGenerator::connect(
                MemoryCoordinator::new(),
                config,
                None,
            ))
            .unwrap();

        b.to_async(&rt).iter_custom(|iters| {
            let generator = &generator;
            async move {
                let start = Instant::now();
                for _ in 0..iters {
                    for _ in 0..TOTAL_IDS {
                        black_box(generator.next_sequence_id("bench").await.unwrap());
                    }
                }
                start.elapsed()
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_mock_sequential_lock,
    benchmark_mono_sequential_lock,
    benchmark_mono_contended_lock,
    benchmark_mono_registry_threaded,
    benchmark_counter_memory_tokio,
    benchmark_sequence_memory_tokio,
);
criterion_main!(benches);
