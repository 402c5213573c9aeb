//! Channel mixing matrices
//!
//! A `MixMatrix` holds one gain per (output, input) channel pair and maps
//! interleaved frames from one layout to another. Matrices are built by
//! `engine::output_graph::build_mix_map` and tagged with the negotiation
//! generation they belong to. A matrix is only ever applied to buffers of
//! its own dimensions: `apply` refuses anything else.

use super::format::{Channel, ChannelLayout};

#[derive(Debug, Clone, PartialEq)]
pub struct MixMatrix {
    input: ChannelLayout,
    output: ChannelLayout,
    /// Row-major: `gains[out * inputs + in]`
    gains: Vec<f32>,
    generation: u64,
}

impl MixMatrix {
    /// All-zero matrix
    pub fn zeros(input: ChannelLayout, output: ChannelLayout) -> Self {
        let gains = vec![0.0; input.count() * output.count()];
        Self {
            input,
            output,
            gains,
            generation: 0,
        }
    }

    /// Pass-through matrix for a single layout
    pub fn identity(layout: &ChannelLayout) -> Self {
        let mut matrix = Self::zeros(layout.clone(), layout.clone());
        for i in 0..layout.count() {
            matrix.set_gain(i, i, 1.0);
        }
        matrix
    }

    pub fn input(&self) -> &ChannelLayout {
        &self.input
    }

    pub fn output(&self) -> &ChannelLayout {
        &self.output
    }

    pub fn inputs(&self) -> usize {
        self.input.count()
    }

    pub fn outputs(&self) -> usize {
        self.output.count()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Built under negotiation `generation`
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn gain(&self, input: usize, output: usize) -> f32 {
        self.gains[output * self.inputs() + input]
    }

    pub fn set_gain(&mut self, input: usize, output: usize, gain: f32) {
        let inputs = self.inputs();
        self.gains[output * inputs + input] = gain;
    }

    /// Set a gain by channel role; ignored if either role is absent
    pub fn set(&mut self, input: Channel, output: Channel, gain: f32) {
        if let (Some(i), Some(o)) = (self.input.index_of(input), self.output.index_of(output)) {
            self.set_gain(i, o, gain);
        }
    }

    /// Gain by channel role; zero if either role is absent
    pub fn get(&self, input: Channel, output: Channel) -> f32 {
        match (self.input.index_of(input), self.output.index_of(output)) {
            (Some(i), Some(o)) => self.gain(i, o),
            _ => 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        if self.input != self.output {
            return false;
        }
        let n = self.inputs();
        (0..n).all(|o| (0..n).all(|i| self.gain(i, o) == if i == o { 1.0 } else { 0.0 }))
    }

    /// True when no non-LFE input channel reaches any output
    pub fn is_silent(&self) -> bool {
        self.input
            .channels()
            .iter()
            .enumerate()
            .filter(|(_, ch)| !ch.is_lfe())
            .all(|(i, _)| (0..self.outputs()).all(|o| self.gain(i, o) == 0.0))
    }

    /// Scale any output row whose gains sum above unity
    pub fn normalize_rows(&mut self) {
        let inputs = self.inputs();
        for row in self.gains.chunks_mut(inputs.max(1)) {
            let sum: f32 = row.iter().sum();
            if sum > 1.0 {
                for g in row.iter_mut() {
                    *g /= sum;
                }
            }
        }
    }

    /// Map `frames` interleaved frames from `input` into `output`
    ///
    /// `output` is overwritten. Returns false and leaves `output` untouched
    /// when either buffer is too short for `frames` frames of this matrix's
    /// layouts. Real-time safe.
    #[must_use]
    pub fn apply(&self, input: &[f32], output: &mut [f32], frames: usize) -> bool {
        let ins = self.inputs();
        let outs = self.outputs();
        if ins == 0 || input.len() < frames * ins || output.len() < frames * outs {
            return false;
        }

        for (src, dst) in input
            .chunks_exact(ins)
            .zip(output.chunks_exact_mut(outs))
            .take(frames)
        {
            for (o, out) in dst.iter_mut().enumerate() {
                let row = &self.gains[o * ins..(o + 1) * ins];
                *out = row.iter().zip(src).map(|(g, s)| g * s).sum();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::StdLayout;

    #[test]
    fn test_identity_copies() {
        let matrix = MixMatrix::identity(&StdLayout::Stereo.layout());
        assert!(matrix.is_identity());

        let input = [0.1, 0.2, 0.3, 0.4];
        let mut output = [0.0; 4];
        assert!(matrix.apply(&input, &mut output, 2));
        assert_eq!(output, input);
    }

    #[test]
    fn test_downmix_stereo_to_mono() {
        let mut matrix = MixMatrix::zeros(StdLayout::Stereo.layout(), StdLayout::Mono.layout());
        matrix.set(Channel::FL, Channel::FC, 1.0);
        matrix.set(Channel::FR, Channel::FC, 1.0);
        matrix.normalize_rows();

        assert_eq!(matrix.get(Channel::FL, Channel::FC), 0.5);

        let mut output = [0.0; 1];
        assert!(matrix.apply(&[0.4, 0.8], &mut output, 1));
        assert!((output[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_lfe_only_is_silent() {
        let mut matrix = MixMatrix::zeros(StdLayout::L2_1.layout(), StdLayout::Mono.layout());
        assert!(matrix.is_silent());
        matrix.set(Channel::LFE, Channel::FC, 1.0);
        assert!(matrix.is_silent());
        matrix.set(Channel::FL, Channel::FC, 0.5);
        assert!(!matrix.is_silent());
    }

    #[test]
    fn test_apply_refuses_mismatched_buffers() {
        let matrix = MixMatrix::identity(&StdLayout::L5_1.layout()).with_generation(3);
        assert!(matrix.is_current(3));
        assert!(!matrix.is_current(4));

        // Stereo-sized buffers handed to a 5.1 matrix
        let input = [0.5f32; 4];
        let mut output = [7.0f32; 4];
        assert!(!matrix.apply(&input, &mut output, 2));
        assert_eq!(output, [7.0; 4]);

        let input = [0.5f32; 12];
        assert!(!matrix.apply(&input, &mut output, 2));
        assert_eq!(output, [7.0; 4]);
    }
}
