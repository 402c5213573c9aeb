//! Sample formats, conversion, resampling and channel mapping

pub mod convert;
pub mod decoder;
pub mod format;
pub mod mix_matrix;
pub mod pipeline;
pub mod resampler;

pub use format::{AudioFormat, Channel, ChannelLayout, SampleFormat, StdLayout};
pub use mix_matrix::MixMatrix;
pub use pipeline::FormatPipeline;
