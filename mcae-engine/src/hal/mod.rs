//! Audio hardware abstraction
//!
//! The engine drives output through the `AudioHal` trait and is in turn
//! driven by the backend through `RenderCallback`. Backends are chosen by
//! the caller (`CpalHal` for real devices, `NullHal` for tests and headless
//! runs); nothing is selected at compile time.

pub mod cpal_backend;
pub mod null;

pub use cpal_backend::CpalHal;
pub use null::NullHal;

use crate::audio::format::{AudioFormat, ChannelLayout};
use crate::error::Result;
use std::sync::Arc;

/// Outcome of one render callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// PCM streams and sounds were mixed
    Mixed,
    /// A bitstream was copied through unaltered
    Passthrough,
    /// The buffer was filled with silence (not running or contended)
    Silence,
}

/// Real-time render entry point, invoked from the device thread
///
/// Implementations must not block, allocate, or perform I/O. `timestamp` is
/// the device frame position of the first frame in `out`.
pub trait RenderCallback: Send + Sync {
    fn on_render(&self, timestamp: u64, frames: usize, out: &mut [u8]) -> RenderStatus;
}

/// One output device as reported by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    /// Identifier accepted by `AudioHal::open`
    pub id: String,
    /// Maximum output channels
    pub channels: usize,
    pub preferred_layout: Option<ChannelLayout>,
    pub is_default: bool,
}

/// What the device actually accepted
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedDevice {
    /// Hardware format, which may differ from the requested one
    pub format: AudioFormat,
    /// Frames per callback
    pub buffer_frames: usize,
    /// Hardware channel order for 8-channel PCM devices
    pub channel_order: Option<ChannelLayout>,
}

pub trait AudioHal: Send {
    /// Backend name for logging
    fn name(&self) -> &str;

    fn enumerate_output_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Layout the device prefers, if it reports one
    fn preferred_channel_layout(&self, device_id: &str) -> Option<ChannelLayout>;

    /// Open `device_id` and start calling `render`
    ///
    /// Any previously opened device must be closed first.
    fn open(
        &mut self,
        device_id: &str,
        format: &AudioFormat,
        buffer_frames: usize,
        render: Arc<dyn RenderCallback>,
    ) -> Result<OpenedDevice>;

    /// Stop callbacks and release the device; a no-op when closed
    fn close(&mut self);

    fn is_open(&self) -> bool;
}
