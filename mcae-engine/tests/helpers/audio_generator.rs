//! Audio test signal generation
//!
//! Deterministic sine waves as interleaved PCM, and WAV files written with
//! `hound` for the sound loading tests. Every channel carries the same
//! signal.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Interleaved f32 sine, `frames` frames long
pub fn sine_f32(rate: u32, channels: usize, frames: usize, frequency: f32, amplitude: f32) -> Vec<f32> {
    let mut samples = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        let t = i as f32 / rate as f32;
        let v = (2.0 * PI * frequency * t).sin() * amplitude;
        samples.extend(std::iter::repeat(v).take(channels));
    }
    samples
}

/// Interleaved 16-bit sine
pub fn sine_s16(rate: u32, channels: usize, frames: usize, frequency: f32, amplitude: f32) -> Vec<i16> {
    sine_f32(rate, channels, frames, frequency, amplitude)
        .into_iter()
        .map(|v| (v * i16::MAX as f32).round() as i16)
        .collect()
}

/// Write a 16-bit sine WAV file
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    rate: u32,
    channels: u16,
    duration_ms: u64,
    frequency: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let frames = (rate as u64 * duration_ms / 1000) as usize;
    for s in sine_s16(rate, channels as usize, frames, frequency, amplitude) {
        writer.write_sample(s)?;
    }
    writer.finalize()
}

/// Largest absolute sample value
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}
