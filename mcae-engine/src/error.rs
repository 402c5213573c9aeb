//! Error types for mcae-engine
//!
//! Defines engine error types using thiserror for clear error propagation.
//! Nothing in here is ever returned from the render path: render failures
//! become silence and are resolved by the next non-real-time call.

use thiserror::Error;

/// Main error type for the audio engine
#[derive(Error, Debug)]
pub enum Error {
    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Named output device does not exist
    #[error("Output device not found: {0}")]
    DeviceNotFound(String),

    /// Unsupported or inconsistent audio format
    #[error("Audio format error: {0}")]
    Format(String),

    /// Resampler construction or processing errors
    #[error("Resample error: {0}")]
    Resample(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// No mixing matrix exists between two layouts
    #[error("Cannot map {from} to {to}")]
    MixMap { from: String, to: String },

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A PCM stream was requested while a bitstream owns the device
    #[error("Passthrough stream active, PCM stream rejected")]
    PassthroughActive,

    /// A second bitstream was requested
    #[error("A passthrough stream already exists")]
    PassthroughBusy,

    /// Input bus pool exhausted
    #[error("No free input bus")]
    NoFreeBus,

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
