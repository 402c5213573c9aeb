//! Ring buffer throughput
//!
//! One render period of stereo float audio through the stream ring buffer,
//! the path every producer write and render read goes through.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use mcae_engine::engine::RingBuffer;

const PERIOD_BYTES: usize = 512 * 2 * 4;

fn bench_ring_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");
    group.throughput(Throughput::Bytes(PERIOD_BYTES as u64));

    group.bench_function("write_then_read_period", |b| {
        let ring = RingBuffer::new(PERIOD_BYTES * 16);
        let data = vec![0x55u8; PERIOD_BYTES];
        let mut out = vec![0u8; PERIOD_BYTES];

        b.iter(|| {
            ring.write(black_box(&data));
            black_box(ring.read(&mut out));
        });
    });

    group.bench_function("rejected_write", |b| {
        let ring = RingBuffer::new(PERIOD_BYTES);
        ring.write(&vec![0u8; PERIOD_BYTES]);
        let data = vec![0x55u8; PERIOD_BYTES];

        b.iter(|| black_box(ring.write(black_box(&data))));
    });

    group.bench_function("empty_read", |b| {
        let ring = RingBuffer::new(PERIOD_BYTES);
        let mut out = vec![0u8; PERIOD_BYTES];

        b.iter(|| black_box(ring.read(&mut out)));
    });

    group.finish();
}

criterion_group!(benches, bench_ring_buffer);
criterion_main!(benches);
