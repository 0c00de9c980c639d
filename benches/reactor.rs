//! Reactor benchmarks
//!
//! Measures the cost of one arm/wait/drain/recycle pass on the in-memory
//! stack, so the numbers reflect engine overhead rather than the kernel.
//!
//! Run with: `cargo bench --bench reactor`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use riox_integration_tests::{memory_addr, memory_reactor_with, small_config};
use riox_transport::payload::PAYLOAD_LEN;
use riox_transport::{MemoryStack, Role, StatsWindow};
use std::time::{Duration, Instant};

/// Benchmark receive cycles at different batch sizes
fn bench_receive_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("receive_cycle");
    let datagram = vec![0xAB; 1024];

    for batch in [1usize, 4, 16, 64] {
        group.throughput(Throughput::Elements(batch as u64));

        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let mut config = small_config(Role::Receive, 128, 1024);
            config.batch_size = batch;
            let (mut reactor, wire) =
                memory_reactor_with(MemoryStack::new(memory_addr()), &config, Role::Receive);
            reactor.start().unwrap();

            b.iter(|| {
                for _ in 0..batch {
                    wire.deliver(&datagram);
                }
                black_box(reactor.cycle().unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark send cycles with immediate completion
fn bench_send_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_cycle");

    for concurrency in [16u32, 128] {
        group.throughput(Throughput::Bytes(concurrency as u64 * PAYLOAD_LEN as u64));

        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                let mut config = small_config(Role::Send, concurrency, 1024);
                config.batch_size = concurrency as usize;
                let stack = MemoryStack::new(memory_addr())
                    .with_auto_complete_sends(true)
                    .with_sent_log(0);
                let (mut reactor, _wire) = memory_reactor_with(stack, &config, Role::Send);
                reactor.start().unwrap();

                b.iter(|| black_box(reactor.cycle().unwrap()));
            },
        );
    }

    group.finish();
}

/// Benchmark statistics accounting
fn bench_stats_record(c: &mut Criterion) {
    c.bench_function("stats_record_and_flush", |b| {
        let start = Instant::now();
        let mut window = StatsWindow::new(start, Duration::from_secs(1), Role::Receive);
        let mut now = start;

        b.iter(|| {
            window.record(black_box(1024));
            now += Duration::from_micros(10);
            black_box(window.maybe_flush(now));
        });
    });
}

criterion_group!(benches, bench_receive_cycle, bench_send_cycle, bench_stats_record);
criterion_main!(benches);
