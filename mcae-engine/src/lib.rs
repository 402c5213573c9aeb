//! # MCAE audio engine (mcae-engine)
//!
//! Real-time mixing engine for a media center.
//!
//! **Purpose:** Accept audio from any number of producer streams in arbitrary
//! PCM formats, convert, resample and remap them to a single negotiated
//! output format, mix them together with short UI sound effects, and deliver
//! the result to an audio device. Compressed bitstreams (AC3, DTS, ...) can
//! take the device exclusively for passthrough.
//!
//! **Architecture:** producer threads feed per-stream ring buffers; the
//! device's render callback mixes them without blocking or allocating.
//! Device access goes through the [`hal::AudioHal`] trait (cpal or null).

pub mod audio;
pub mod engine;
pub mod error;
pub mod hal;

pub use audio::{AudioFormat, ChannelLayout, SampleFormat, StdLayout};
pub use engine::{Engine, EngineState, Stream, StreamOptions};
pub use error::{Error, Result};
pub use hal::{AudioHal, RenderCallback, RenderStatus};
