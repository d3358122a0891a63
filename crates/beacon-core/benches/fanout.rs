//! Fanout benchmarks for beacon-core.

use beacon_core::{ConnectionRegistry, FanoutRouter};
use beacon_protocol::{Envelope, PresenceStatus};
use beacon_transport::{outbound, ConnectionId, OutboundQueue};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

fn populate(connections: usize) -> (FanoutRouter, Vec<OutboundQueue>) {
    let registry = Arc::new(ConnectionRegistry::new());
    let queues = (0..connections)
        .map(|i| {
            let (handle, queue) = outbound::channel(ConnectionId::generate(), 1 << 16);
            registry.register(&format!("user{}", i), handle);
            queue
        })
        .collect();
    (FanoutRouter::new(registry), queues)
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for connections in [10, 100, 1000] {
        let (router, mut queues) = populate(connections);
        group.throughput(Throughput::Elements(connections as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(connections),
            &connections,
            |b, _| {
                b.iter(|| {
                    let report = router.broadcast(
                        black_box(Envelope::status("user0", PresenceStatus::Online)),
                        Some("user0"),
                    );
                    for queue in &mut queues {
                        while queue.try_next().is_some() {}
                    }
                    report
                })
            },
        );
    }
    group.finish();
}

fn bench_send_to(c: &mut Criterion) {
    let (router, mut queues) = populate(100);

    c.bench_function("send_to", |b| {
        b.iter(|| {
            let delivery = router.send_to(black_box("user42"), Envelope::direct("user42", "hi"));
            while queues[42].try_next().is_some() {}
            delivery
        })
    });
}

criterion_group!(benches, bench_broadcast, bench_send_to);
criterion_main!(benches);
