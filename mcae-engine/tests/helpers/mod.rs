//! Test helpers for mcae-engine integration tests
//!
//! - audio_generator: sine/PCM generators and WAV fixtures
//! - harness: engine on a NullHal plus sample decoding helpers

#![allow(dead_code)]

pub mod audio_generator;
pub mod harness;

pub use audio_generator::{generate_sine_wav, peak, sine_f32, sine_s16};
pub use harness::{as_f32, as_i16, test_engine, test_settings, RenderOnOpenHal};
