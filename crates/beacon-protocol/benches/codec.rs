//! Codec benchmarks for beacon-protocol.

use beacon_protocol::{codec, ChatMessage, Envelope};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn sample(len: usize) -> Envelope {
    Envelope::DirectMessage(
        ChatMessage::new("x".repeat(len))
            .with_sender("alice")
            .with_to("bob"),
    )
}

fn bench_encode(c: &mut Criterion) {
    let envelope = sample(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("msgpack_64", |b| b.iter(|| codec::encode(black_box(&envelope))));
    group.bench_function("json_64", |b| {
        b.iter(|| codec::encode_json(black_box(&envelope)))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let envelope = sample(64);
    let binary = codec::encode(&envelope).unwrap();
    let text = codec::encode_json(&envelope).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(binary.len() as u64));
    group.bench_function("msgpack_64", |b| b.iter(|| codec::decode(black_box(&binary))));
    group.bench_function("json_64", |b| {
        b.iter(|| codec::decode_json(black_box(&text)))
    });
    group.finish();
}

fn bench_max_content(c: &mut Criterion) {
    let envelope = sample(1000);

    c.bench_function("json_roundtrip_1000_chars", |b| {
        b.iter(|| {
            let text = codec::encode_json(black_box(&envelope)).unwrap();
            codec::decode_json(black_box(&text)).unwrap()
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_max_content);
criterion_main!(benches);
