//! End-to-end engine scenarios on the null backend
//!
//! Each test builds an engine on a `NullHal`, feeds streams from the test
//! thread and drives renders with `NullHal::pull`.

mod helpers;

use helpers::{as_f32, as_i16, peak, sine_f32, sine_s16, test_engine, test_settings, RenderOnOpenHal};
use mcae_engine::engine::{EngineState, StreamId, VisualizationSink};
use mcae_engine::hal::{NullHal, RenderStatus};
use mcae_engine::{AudioFormat, Error, SampleFormat, StdLayout, StreamOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn pcm(rate: u32, layout: StdLayout, format: SampleFormat) -> AudioFormat {
    AudioFormat::pcm(rate, layout, format)
}

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (Arc::clone(&count), count)
}

#[test]
fn test_two_rates_mix_into_48k() {
    let (engine, hal) = test_engine(NullHal::new(), test_settings());

    let a = engine
        .create_stream(pcm(44100, StdLayout::Stereo, SampleFormat::S16), StreamOptions::default())
        .unwrap();
    let b = engine
        .create_stream(pcm(48000, StdLayout::Stereo, SampleFormat::S16), StreamOptions::default())
        .unwrap();

    engine
        .initialize(&pcm(48000, StdLayout::Stereo, SampleFormat::Float))
        .unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(engine.mix_format().unwrap().sample_rate, 48000);
    assert_eq!(hal.open_count(), 2);

    let tone_a = sine_s16(44100, 2, 4410, 440.0, 0.5);
    let tone_b = sine_s16(48000, 2, 4800, 660.0, 0.5);
    assert!(a.add_data(bytemuck::cast_slice(&tone_a)) > 0);
    assert!(b.add_data(bytemuck::cast_slice(&tone_b)) > 0);
    assert!(a.buffered_frames() >= 512, "a has {}", a.buffered_frames());
    assert!(b.buffered_frames() >= 512, "b has {}", b.buffered_frames());

    let (status, out) = hal.pull(512).unwrap();
    assert_eq!(status, RenderStatus::Mixed);
    let samples = as_f32(&out);
    assert_eq!(samples.len(), 1024);
    assert!(peak(&samples) > 0.1);
}

#[test]
fn test_passthrough_takes_device_exclusively() {
    let (engine, hal) = test_engine(NullHal::new(), test_settings());
    let (drained, drain_count) = counter();
    let pcm48 = pcm(48000, StdLayout::Stereo, SampleFormat::Float);

    let options = StreamOptions::default().on_drain(Arc::new(move |_id: StreamId| {
        drain_count.fetch_add(1, Ordering::SeqCst);
    }));
    let music = engine.create_stream(pcm48.clone(), options).unwrap();
    music.add_data(bytemuck::cast_slice(&sine_f32(48000, 2, 1024, 440.0, 0.5)));
    assert_eq!(hal.pull(256).unwrap().0, RenderStatus::Mixed);

    let ac3 = AudioFormat::bitstream(48000, SampleFormat::Ac3);
    let raw = engine.create_stream(ac3.clone(), StreamOptions::default()).unwrap();
    assert!(engine.is_passthrough());
    assert_eq!(hal.opened().unwrap().format, ac3);
    assert_eq!(hal.open_count(), 2);
    assert!(music.is_draining());
    assert_eq!(music.buffered_frames(), 0);

    // 256 frames of 4 bytes, untouched on the way out
    let payload: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();
    assert_eq!(raw.add_data(&payload), payload.len());
    let (status, out) = hal.pull(256).unwrap();
    assert_eq!(status, RenderStatus::Passthrough);
    assert_eq!(out, payload);
    assert_eq!(drained.load(Ordering::SeqCst), 1);

    assert!(matches!(
        engine.create_stream(pcm48, StreamOptions::default()),
        Err(Error::PassthroughActive)
    ));
    assert!(matches!(
        engine.create_stream(ac3, StreamOptions::default()),
        Err(Error::PassthroughBusy)
    ));

    engine.free_stream(&raw);
    assert_eq!(engine.collect_garbage(), 1);
    assert!(!engine.is_passthrough());
    assert_eq!(hal.opened().unwrap().format.sample_format, SampleFormat::Float);
    assert_eq!(hal.open_count(), 3);
}

#[test]
fn test_locked_render_is_silent() {
    let (engine, hal) = test_engine(NullHal::new(), test_settings());
    let stream = engine
        .create_stream(pcm(48000, StdLayout::Stereo, SampleFormat::Float), StreamOptions::default())
        .unwrap();
    stream.add_data(bytemuck::cast_slice(&vec![0.5f32; 2048]));

    assert!(engine.suspend());
    let (status, out) = hal.pull(256).unwrap();
    assert_eq!(status, RenderStatus::Silence);
    assert!(out.iter().all(|b| *b == 0));
    assert_eq!(stream.buffered_frames(), 1024);

    assert!(engine.resume());
    let (status, out) = hal.pull(256).unwrap();
    assert_eq!(status, RenderStatus::Mixed);
    assert!(peak(&as_f32(&out)) > 0.4);
    assert_eq!(stream.buffered_frames(), 768);
}

#[test]
fn test_render_during_initialize_is_silent() {
    let hal = RenderOnOpenHal::default();
    let engine = hal.engine(test_settings());
    let format = pcm(48000, StdLayout::Stereo, SampleFormat::Float);

    let stream = engine.create_stream(format.clone(), StreamOptions::default()).unwrap();
    stream.add_data(bytemuck::cast_slice(&vec![0.5f32; 2 * 1024]));
    assert_eq!(hal.null().pull(128).unwrap().0, RenderStatus::Mixed);

    // Reopen while running with audio still buffered
    engine.initialize(&format).unwrap();
    assert_eq!(engine.state(), EngineState::Running);

    let renders = hal.renders();
    assert_eq!(renders.len(), 2);
    assert_eq!(renders[0].state, Some(EngineState::Initializing));
    assert_eq!(renders[1].state, Some(EngineState::Locked));
    for render in &renders {
        assert_eq!(render.status, RenderStatus::Silence);
        assert!(render.out.iter().all(|b| *b == 0));
    }
}

#[test]
fn test_open_failure_leaves_engine_uninitialized() {
    let (engine, hal) = test_engine(NullHal::new(), test_settings());
    let format = pcm(44100, StdLayout::Stereo, SampleFormat::S16);

    hal.fail_next_open();
    let err = engine
        .create_stream(format.clone(), StreamOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::AudioOutput(_)));
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert_eq!(engine.stats().streams, 0);
    assert!(hal.pull(64).is_none());

    engine.create_stream(format.clone(), StreamOptions::default()).unwrap();
    assert_eq!(engine.state(), EngineState::Running);

    hal.fail_next_open();
    assert!(engine.initialize(&format).is_err());
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert!(engine.output_format().is_none());
}

#[test]
fn test_full_scale_sum_is_clamped_not_wrapped() {
    let hal = NullHal::new().with_sample_format(SampleFormat::S16);
    let (engine, hal) = test_engine(hal, test_settings());
    let format = pcm(48000, StdLayout::Stereo, SampleFormat::S16);
    let tone = sine_s16(48000, 2, 480, 1000.0, 1.0);

    let a = engine.create_stream(format.clone(), StreamOptions::default()).unwrap();
    let b = engine.create_stream(format, StreamOptions::default()).unwrap();
    a.add_data(bytemuck::cast_slice(&tone));
    b.add_data(bytemuck::cast_slice(&tone));

    let (_, out) = hal.pull(480).unwrap();
    let out = as_i16(&out);
    for (got, input) in out.iter().zip(&tone) {
        let expected = (2 * *input as i32).clamp(i16::MIN as i32, i16::MAX as i32);
        assert_eq!(*got as i32, expected);
    }
    assert_eq!(*out.iter().max().unwrap(), i16::MAX);
    assert_eq!(*out.iter().min().unwrap(), i16::MIN);
}

#[test]
fn test_half_volume_sum_stays_in_range() {
    let hal = NullHal::new().with_sample_format(SampleFormat::S16);
    let (engine, hal) = test_engine(hal, test_settings());
    let format = pcm(48000, StdLayout::Stereo, SampleFormat::S16);
    let tone = sine_s16(48000, 2, 480, 1000.0, 1.0);

    for _ in 0..2 {
        let stream = engine
            .create_stream(format.clone(), StreamOptions::default().with_volume(0.5))
            .unwrap();
        stream.add_data(bytemuck::cast_slice(&tone));
    }

    let (_, out) = hal.pull(480).unwrap();
    assert_eq!(as_i16(&out), tone);
}

#[test]
fn test_half_volume_sounds_stay_in_range() {
    let hal = NullHal::new().with_sample_format(SampleFormat::S16);
    let (engine, hal) = test_engine(hal, test_settings());
    let format = pcm(48000, StdLayout::Stereo, SampleFormat::S16);
    let tone = sine_s16(48000, 2, 480, 1000.0, 1.0);
    let bytes: &[u8] = bytemuck::cast_slice(&tone);

    for name in ["left", "right"] {
        let sound = engine.load_sound_pcm(name, &format, bytes).unwrap();
        sound.set_volume(0.5);
        assert!(engine.play_sound(&sound).unwrap());
    }
    assert_eq!(engine.output_format().unwrap().sample_format, SampleFormat::S16);
    assert_eq!(engine.stats().playing_sounds, 2);

    let (status, out) = hal.pull(480).unwrap();
    assert_eq!(status, RenderStatus::Mixed);
    let out = as_i16(&out);
    assert_eq!(out, tone);
    // Full scale reached without wrapping
    assert!(out.iter().map(|s| (*s as i32).abs()).max().unwrap() > 32000);
}

#[test]
fn test_eight_channel_hardware_order() {
    let hal = NullHal::new()
        .with_channels(8)
        .with_preferred_layout(StdLayout::L7_1.layout());
    let (engine, hal) = test_engine(hal, test_settings());

    let stream = engine
        .create_stream(pcm(48000, StdLayout::L7_1, SampleFormat::Float), StreamOptions::default())
        .unwrap();
    // FL FR FC LFE BL BR SL SR
    let frame = [0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
    let data: Vec<f32> = frame.iter().copied().cycle().take(8 * 64).collect();
    stream.add_data(bytemuck::cast_slice(&data));

    let (_, out) = hal.pull(64).unwrap();
    let out = as_f32(&out);
    // FL FR FC LFE SL SR BL BR
    assert_eq!(&out[..8], &[0.1, 0.2, 0.3, 0.4, 0.7, 0.8, 0.5, 0.6]);
}

#[test]
fn test_master_matrix_downmixes_to_hardware() {
    let hal = NullHal::new()
        .with_preferred_layout(StdLayout::L5_1.layout())
        .with_channels(2);
    let (engine, hal) = test_engine(hal, test_settings());

    let stream = engine
        .create_stream(pcm(48000, StdLayout::Stereo, SampleFormat::Float), StreamOptions::default())
        .unwrap();
    assert_eq!(engine.mix_format().unwrap().channels(), 6);
    assert_eq!(engine.output_format().unwrap().channels(), 2);

    let left_only: Vec<f32> = [0.5f32, 0.0].iter().copied().cycle().take(2 * 128).collect();
    stream.add_data(bytemuck::cast_slice(&left_only));

    let (_, out) = hal.pull(128).unwrap();
    let out = as_f32(&out);
    assert!(out[0] > 0.1);
    assert!(out[1].abs() < 1e-6);
}

#[test]
fn test_visualizer_gets_stereo_copy() {
    let (engine, _hal) = test_engine(NullHal::new(), test_settings());
    let (seen, seen_samples) = counter();
    let sink: Arc<dyn VisualizationSink> = Arc::new(move |_id: StreamId, rate: u32, stereo: &[f32]| {
        assert_eq!(rate, 48000);
        seen_samples.fetch_add(stereo.len(), Ordering::SeqCst);
    });
    engine.set_visualizer(Some(sink));

    let stream = engine
        .create_stream(pcm(48000, StdLayout::L5_1, SampleFormat::Float), StreamOptions::default())
        .unwrap();
    stream.add_data(bytemuck::cast_slice(&vec![0.25f32; 6 * 100]));
    assert_eq!(seen.load(Ordering::SeqCst), 200);
}
