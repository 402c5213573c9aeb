//! Streaming sample rate conversion using rubato
//!
//! Wraps a `SincFixedIn` resampler so it can be fed arbitrary-sized
//! interleaved blocks across many calls. Filter state persists between calls
//! and is only cleared by `reset` (stream flush).
//!
//! The resampler's own filter delay is discarded at the start of the stream
//! and `finish` flushes the tail, so the total output for a stream is
//! `round(input_frames * ratio)` frames.

use crate::error::{Error, Result};
use mcae_common::ResampleQuality;
use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Frames fed to rubato per process call
pub const CHUNK_FRAMES: usize = 256;

/// Largest relative ratio adjustment accepted by `set_ratio_relative`
pub const MAX_RELATIVE_RATIO: f64 = 1.05;

/// Headroom given to rubato, which rejects ratios at its exact limit
const RUBATO_RELATIVE_LIMIT: f64 = 1.1;

fn sinc_parameters(quality: ResampleQuality) -> SincInterpolationParameters {
    match quality {
        ResampleQuality::Low => SincInterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.90,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 64,
            window: WindowFunction::Hann2,
        },
        ResampleQuality::Medium => SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.925,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        },
        ResampleQuality::High => SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        },
    }
}

/// Stateful interleaved-in, interleaved-out resampler
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    input_rate: u32,
    output_rate: u32,
    relative: f64,
    /// Largest relative ratio the next chunk can run at (ramp start or end)
    peak_relative: f64,
    /// Planar input waiting for a full chunk
    pending: Vec<Vec<f32>>,
    pending_frames: usize,
    /// Planar rubato output, sized to `output_frames_max`
    planar_out: Vec<Vec<f32>>,
    /// Output frames still to discard (filter delay)
    skip_frames: usize,
    /// Expected output length accumulated over every fed frame
    expected_out: f64,
    produced_out: u64,
    fed_in: u64,
}

impl StreamResampler {
    pub fn new(
        input_rate: u32,
        output_rate: u32,
        channels: usize,
        quality: ResampleQuality,
    ) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 || channels == 0 {
            return Err(Error::Resample(format!(
                "Invalid resampler shape: {}Hz -> {}Hz, {} channels",
                input_rate, output_rate, channels
            )));
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let inner = SincFixedIn::<f32>::new(
            ratio,
            RUBATO_RELATIVE_LIMIT,
            sinc_parameters(quality),
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| Error::Resample(format!("Failed to create resampler: {}", e)))?;

        let out_max = inner.output_frames_max();
        let skip_frames = inner.output_delay();

        debug!(
            "Resampler {}Hz -> {}Hz ({} channels, {:?}, delay {} frames)",
            input_rate, output_rate, channels, quality, skip_frames
        );

        Ok(Self {
            inner,
            channels,
            input_rate,
            output_rate,
            relative: 1.0,
            peak_relative: 1.0,
            pending: vec![vec![0.0; CHUNK_FRAMES]; channels],
            pending_frames: 0,
            planar_out: vec![vec![0.0; out_max]; channels],
            skip_frames,
            expected_out: 0.0,
            produced_out: 0,
            fed_in: 0,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Current effective output/input ratio
    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64 * self.relative
    }

    /// Adjust the ratio relative to the nominal one, ramping over the next chunk
    pub fn set_ratio_relative(&mut self, relative: f64) -> Result<()> {
        let clamped = relative.clamp(1.0 / MAX_RELATIVE_RATIO, MAX_RELATIVE_RATIO);
        self.inner
            .set_resample_ratio_relative(clamped, true)
            .map_err(|e| Error::Resample(format!("Failed to set ratio: {}", e)))?;
        self.peak_relative = self.relative.max(clamped);
        self.relative = clamped;
        Ok(())
    }

    /// Upper bound on frames `process` can emit for `input_frames` more input
    ///
    /// Follows the ratio in effect rather than rubato's buffer size, which
    /// includes headroom for the widest allowed ratio adjustment. Rubato's
    /// fractional read position moves the output by at most one frame either
    /// way over any run of chunks.
    pub fn max_output_frames(&self, input_frames: usize) -> usize {
        let chunks = (self.pending_frames + input_frames) / CHUNK_FRAMES;
        if chunks == 0 {
            return 0;
        }
        let peak = self.output_rate as f64 / self.input_rate as f64 * self.peak_relative;
        ((chunks * CHUNK_FRAMES) as f64 * peak).ceil() as usize + 2
    }

    /// Feed interleaved input, appending interleaved output to `out`
    ///
    /// Returns the number of frames appended.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<usize> {
        let frames = input.len() / self.channels;
        self.fed_in += frames as u64;
        self.expected_out += frames as f64 * self.ratio();

        let mut appended = 0;
        let mut frame = 0;
        while frame < frames {
            let take = (CHUNK_FRAMES - self.pending_frames).min(frames - frame);
            for i in 0..take {
                let src = (frame + i) * self.channels;
                for ch in 0..self.channels {
                    self.pending[ch][self.pending_frames + i] = input[src + ch];
                }
            }
            self.pending_frames += take;
            frame += take;

            if self.pending_frames == CHUNK_FRAMES {
                appended += self.run_chunk(out, usize::MAX)?;
                self.pending_frames = 0;
            }
        }

        Ok(appended)
    }

    /// Flush the filter tail so total output matches the input duration
    pub fn finish(&mut self, out: &mut Vec<f32>) -> Result<usize> {
        let target = self.expected_out.round() as u64;
        let mut appended = 0;

        let per_chunk = ((CHUNK_FRAMES as f64 * self.ratio()).floor() as usize).max(1);
        let needed = self.skip_frames + target.saturating_sub(self.produced_out) as usize;
        let max_rounds = needed / per_chunk + 3;
        let mut rounds = 0;
        while self.produced_out < target && rounds < max_rounds {
            for ch in self.pending.iter_mut() {
                ch[self.pending_frames..].fill(0.0);
            }
            let remaining = (target - self.produced_out) as usize;
            appended += self.run_chunk(out, remaining)?;
            self.pending_frames = 0;
            rounds += 1;
        }

        debug!(
            "Resampler drained: {} frames in, {} frames out (target {})",
            self.fed_in, self.produced_out, target
        );
        Ok(appended)
    }

    /// Clear filter state and counters (flush/seek)
    pub fn reset(&mut self) {
        self.inner.reset();
        self.pending_frames = 0;
        self.skip_frames = self.inner.output_delay();
        self.expected_out = 0.0;
        self.produced_out = 0;
        self.fed_in = 0;
    }

    /// Process one full pending chunk, emitting at most `limit` frames
    fn run_chunk(&mut self, out: &mut Vec<f32>, limit: usize) -> Result<usize> {
        let (_, produced) = self
            .inner
            .process_into_buffer(&self.pending, &mut self.planar_out, None)
            .map_err(|e| Error::Resample(format!("Resampling failed: {}", e)))?;

        let skip = self.skip_frames.min(produced);
        self.skip_frames -= skip;
        let emit = (produced - skip).min(limit);

        out.reserve(emit * self.channels);
        for i in skip..skip + emit {
            for ch in 0..self.channels {
                out.push(self.planar_out[ch][i]);
            }
        }
        self.produced_out += emit as u64;
        self.peak_relative = self.relative;
        Ok(emit)
    }
}
