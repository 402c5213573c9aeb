//! # MCAE Common Library
//!
//! Shared code for the media-center audio engine and its front ends:
//! - Engine settings (TOML schema, defaults, validation)
//! - Config file resolution
//! - Common error type

pub mod config;
pub mod error;

pub use config::{EngineSettings, LoggingConfig, ResampleQuality};
pub use error::{Error, Result};
