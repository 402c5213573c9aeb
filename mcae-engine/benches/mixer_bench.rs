//! Render path throughput
//!
//! Drives full engine renders on the null backend: several streams summed,
//! then downmixed through the master matrix to the hardware layout.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mcae_common::EngineSettings;
use mcae_engine::audio::format::{AudioFormat, SampleFormat, StdLayout};
use mcae_engine::audio::mix_matrix::MixMatrix;
use mcae_engine::engine::output_graph::build_mix_map;
use mcae_engine::hal::NullHal;
use mcae_engine::{Engine, StreamOptions};

const PERIOD: usize = 512;

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_period");
    group.throughput(Throughput::Elements(PERIOD as u64));

    for streams in [1usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("streams", streams), &streams, |b, &n| {
            let hal = NullHal::new();
            let settings = EngineSettings {
                device: "null".to_string(),
                ..EngineSettings::default()
            };
            let engine = Engine::new(Box::new(hal.clone()), settings);
            let format = AudioFormat::pcm(48000, StdLayout::Stereo, SampleFormat::S16);
            let block = vec![1000i16; PERIOD * 2];

            let streams: Vec<_> = (0..n)
                .map(|_| {
                    engine
                        .create_stream(format.clone(), StreamOptions::default())
                        .expect("stream")
                })
                .collect();

            b.iter(|| {
                for stream in &streams {
                    stream.add_data(bytemuck::cast_slice(&block));
                }
                black_box(hal.pull(PERIOD))
            });
        });
    }

    group.finish();
}

fn bench_downmix(c: &mut Criterion) {
    let mut group = c.benchmark_group("mix_matrix");
    group.throughput(Throughput::Elements(PERIOD as u64));

    let pairs = [
        (StdLayout::L5_1, StdLayout::Stereo),
        (StdLayout::L7_1, StdLayout::Stereo),
        (StdLayout::Stereo, StdLayout::L5_1),
    ];
    for (from, to) in pairs {
        let matrix: MixMatrix = build_mix_map(&from.layout(), &to.layout()).expect("matrix");
        let input = vec![0.25f32; PERIOD * matrix.inputs()];
        let mut output = vec![0.0f32; PERIOD * matrix.outputs()];

        let id = BenchmarkId::new("apply", format!("{}->{}", from.layout(), to.layout()));
        group.bench_function(id, |b| {
            b.iter(|| {
                black_box(matrix.apply(black_box(&input), &mut output, PERIOD));
                black_box(&output);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_render, bench_downmix);
criterion_main!(benches);
