//! Per-stream format pipeline
//!
//! Converts producer bytes into the engine's mix format:
//! 1. Convert: integer/float samples to `f32`
//! 2. Resample: only when the rates differ (or resampling is forced)
//! 3. Remap: input layout to the negotiated output layout
//!
//! Output is interleaved native-endian `f32` bytes ready for the stream's
//! ring buffer. Bitstream input bypasses every stage and is returned
//! unmodified.

use super::convert;
use super::format::{AudioFormat, SampleFormat, StdLayout};
use super::mix_matrix::MixMatrix;
use super::resampler::StreamResampler;
use crate::engine::output_graph::build_mix_map;
use crate::error::{Error, Result};
use mcae_common::ResampleQuality;
use tracing::debug;

/// Buffer holding the most recent PCM output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Converted,
    Resampled,
    Remapped,
}

pub struct FormatPipeline {
    input: AudioFormat,
    output: AudioFormat,
    passthrough: bool,
    resampler: Option<StreamResampler>,
    /// None when input and output layouts match
    matrix: Option<MixMatrix>,
    /// Output layout to stereo, for visualization
    viz_matrix: Option<MixMatrix>,
    converted: Vec<f32>,
    resampled: Vec<f32>,
    remapped: Vec<f32>,
    viz: Vec<f32>,
    last: Stage,
}

impl FormatPipeline {
    /// Build the stage chain from `input` to `output`
    ///
    /// PCM output must be `Float`; bitstream input requires the identical
    /// bitstream output format.
    pub fn new(
        input: &AudioFormat,
        output: &AudioFormat,
        quality: ResampleQuality,
        force_resample: bool,
    ) -> Result<Self> {
        input.validate()?;
        output.validate()?;

        if input.is_bitstream() || output.is_bitstream() {
            if input != output {
                return Err(Error::Format(format!(
                    "Passthrough requires matching formats: {} vs {}",
                    input, output
                )));
            }
            debug!("Pipeline {}: passthrough", input);
            return Ok(Self::empty(input, output, true, None, None));
        }

        if output.sample_format != SampleFormat::Float {
            return Err(Error::Format(format!(
                "Pipeline output must be float, got {}",
                output.sample_format
            )));
        }

        let resampler = if input.sample_rate != output.sample_rate || force_resample {
            Some(StreamResampler::new(
                input.sample_rate,
                output.sample_rate,
                input.channels(),
                quality,
            )?)
        } else {
            None
        };

        let matrix = build_mix_map(&input.channel_layout, &output.channel_layout)?;
        let matrix = if matrix.is_identity() { None } else { Some(matrix) };

        let stereo = StdLayout::Stereo.layout();
        let viz_matrix = build_mix_map(&output.channel_layout, &stereo)
            .ok()
            .filter(|m| !m.is_identity());

        debug!(
            "Pipeline {} -> {} (resample: {}, remap: {})",
            input,
            output,
            resampler.is_some(),
            matrix.is_some()
        );

        Ok(Self::empty(input, output, false, resampler, matrix).with_viz(viz_matrix))
    }

    fn empty(
        input: &AudioFormat,
        output: &AudioFormat,
        passthrough: bool,
        resampler: Option<StreamResampler>,
        matrix: Option<MixMatrix>,
    ) -> Self {
        Self {
            input: input.clone(),
            output: output.clone(),
            passthrough,
            resampler,
            matrix,
            viz_matrix: None,
            converted: Vec::new(),
            resampled: Vec::new(),
            remapped: Vec::new(),
            viz: Vec::new(),
            last: Stage::Converted,
        }
    }

    fn with_viz(mut self, viz_matrix: Option<MixMatrix>) -> Self {
        self.viz_matrix = viz_matrix;
        self
    }

    pub fn input_format(&self) -> &AudioFormat {
        &self.input
    }

    pub fn output_format(&self) -> &AudioFormat {
        &self.output
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    pub fn is_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    /// Worst-case output bytes for `input_frames` more input frames
    ///
    /// Checked before `process` so a rejected block leaves no state behind.
    pub fn max_output_bytes(&self, input_frames: usize) -> usize {
        let frames = match &self.resampler {
            Some(r) => r.max_output_frames(input_frames),
            None => input_frames,
        };
        frames * self.output.frame_size()
    }

    /// Run whole input frames through the chain
    pub fn process<'a>(&'a mut self, input: &'a [u8]) -> Result<&'a [u8]> {
        if self.passthrough {
            return Ok(input);
        }

        let bps = self.input.sample_format.bytes_per_sample();
        let samples = input.len() / bps;
        self.converted.resize(samples, 0.0);
        convert::to_float(self.input.sample_format, input, &mut self.converted)?;

        let floats = match self.resampler.as_mut() {
            Some(resampler) => {
                self.resampled.clear();
                resampler.process(&self.converted, &mut self.resampled)?;
                self.last = Stage::Resampled;
                &self.resampled
            }
            None => {
                self.last = Stage::Converted;
                &self.converted
            }
        };

        if self.matrix.is_some() {
            self.last = Stage::Remapped;
        }
        let channels = self.input.channels();
        Ok(bytemuck::cast_slice(remap(&self.matrix, floats, channels, &mut self.remapped)?))
    }

    /// Flush the resampler tail (stream drain)
    pub fn drain(&mut self) -> Result<&[u8]> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(&[]);
        };
        self.resampled.clear();
        resampler.finish(&mut self.resampled)?;
        self.last = if self.matrix.is_some() {
            Stage::Remapped
        } else {
            Stage::Resampled
        };
        let channels = self.input.channels();
        Ok(bytemuck::cast_slice(remap(
            &self.matrix,
            &self.resampled,
            channels,
            &mut self.remapped,
        )?))
    }

    /// Clear resampler state (stream flush)
    pub fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    pub fn set_ratio_relative(&mut self, relative: f64) -> Result<()> {
        match self.resampler.as_mut() {
            Some(resampler) => resampler.set_ratio_relative(relative),
            None => Err(Error::InvalidState(
                "Stream was created without a resampler".to_string(),
            )),
        }
    }

    /// Stereo copy of the most recent `process` or `drain` output
    pub fn visualization(&mut self) -> &[f32] {
        if self.passthrough {
            return &[];
        }
        let samples: &[f32] = match self.last {
            Stage::Converted => &self.converted,
            Stage::Resampled => &self.resampled,
            Stage::Remapped => &self.remapped,
        };
        match &self.viz_matrix {
            Some(m) => {
                let frames = samples.len() / m.inputs();
                self.viz.resize(frames * 2, 0.0);
                if !m.apply(samples, &mut self.viz, frames) {
                    return &[];
                }
                &self.viz
            }
            None if self.output.channels() == 2 => samples,
            None => &[],
        }
    }
}

/// Apply `matrix` to `channels`-wide frames; a matrix of other dimensions is refused
fn remap<'a>(
    matrix: &Option<MixMatrix>,
    input: &'a [f32],
    channels: usize,
    scratch: &'a mut Vec<f32>,
) -> Result<&'a [f32]> {
    let Some(m) = matrix else {
        return Ok(input);
    };
    let frames = input.len() / channels.max(1);
    scratch.resize(frames * m.outputs(), 0.0);
    if m.inputs() != channels || !m.apply(input, scratch, frames) {
        return Err(Error::MixMap {
            from: format!("{} channel input", channels),
            to: m.output().to_string(),
        });
    }
    Ok(&scratch[..])
}
