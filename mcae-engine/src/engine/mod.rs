//! Mixing engine: streams, sounds, output graph and the render path

pub mod callbacks;
pub mod core;
pub mod output_graph;
pub mod ring_buffer;
pub mod sound;
pub mod stream;

pub use self::core::{Engine, EngineState, EngineStats, Negotiated};
pub use callbacks::{DataCallback, DrainCallback, FreeCallback, VisualizationSink};
pub use ring_buffer::{RingBuffer, RingBufferStats};
pub use sound::{Sound, SoundId, SoundMixer, MAX_PLAYING_SOUNDS};
pub use stream::{Stream, StreamId, StreamOptions};
