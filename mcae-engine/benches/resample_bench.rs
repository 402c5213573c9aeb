//! Resampling throughput
//!
//! One second of stereo audio through `StreamResampler` at each quality
//! setting, for the common media rate conversions.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mcae_common::ResampleQuality;
use mcae_engine::audio::resampler::StreamResampler;
use std::f32::consts::PI;

fn stereo_sine(rate: u32) -> Vec<f32> {
    (0..rate as usize)
        .flat_map(|i| {
            let v = (2.0 * PI * 440.0 * i as f32 / rate as f32).sin() * 0.5;
            [v, v]
        })
        .collect()
}

fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample_1s_stereo");
    group.sample_size(20);

    for (from, to) in [(44100, 48000), (48000, 44100), (96000, 48000)] {
        let input = stereo_sine(from);
        group.throughput(Throughput::Elements(from as u64));

        for quality in [ResampleQuality::Low, ResampleQuality::Medium, ResampleQuality::High] {
            let id = BenchmarkId::new(format!("{:?}", quality), format!("{}->{}", from, to));
            group.bench_with_input(id, &input, |b, input| {
                let mut out = Vec::with_capacity(to as usize * 2 + 8192);
                b.iter(|| {
                    let mut resampler = StreamResampler::new(from, to, 2, quality)
                        .expect("resampler");
                    out.clear();
                    resampler.process(black_box(input), &mut out).expect("process");
                    resampler.finish(&mut out).expect("finish");
                    black_box(out.len())
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_resample);
criterion_main!(benches);
