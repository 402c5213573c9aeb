//! Deviceless backend
//!
//! Accepts any format (unless told otherwise) and only renders when the
//! owner calls `pull`. Clones share state, so a test can keep a handle while
//! the engine owns the boxed backend.

use super::{AudioHal, DeviceInfo, OpenedDevice, RenderCallback, RenderStatus};
use crate::audio::format::{AudioFormat, ChannelLayout, SampleFormat};
use crate::engine::output_graph::default_hw_order_8ch;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

pub const NULL_DEVICE: &str = "null";

#[derive(Default)]
struct NullState {
    render: Option<Arc<dyn RenderCallback>>,
    opened: Option<OpenedDevice>,
    device_id: Option<String>,
    position: u64,
    open_count: usize,
    fail_next_open: bool,
    /// Force this many hardware channels for PCM
    channels: Option<usize>,
    /// Force this hardware sample format for PCM
    sample_format: Option<SampleFormat>,
    preferred: Option<ChannelLayout>,
}

#[derive(Clone, Default)]
pub struct NullHal {
    state: Arc<Mutex<NullState>>,
}

impl NullHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `layout` as the device's preferred layout
    pub fn with_preferred_layout(self, layout: ChannelLayout) -> Self {
        self.state.lock().preferred = Some(layout);
        self
    }

    /// Open PCM with exactly `channels` hardware channels
    pub fn with_channels(self, channels: usize) -> Self {
        self.state.lock().channels = Some(channels);
        self
    }

    /// Open PCM in `format` instead of the requested sample format
    pub fn with_sample_format(self, format: SampleFormat) -> Self {
        self.state.lock().sample_format = Some(format);
        self
    }

    /// Make the next `open` fail
    pub fn fail_next_open(&self) {
        self.state.lock().fail_next_open = true;
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn opened(&self) -> Option<OpenedDevice> {
        self.state.lock().opened.clone()
    }

    pub fn device_id(&self) -> Option<String> {
        self.state.lock().device_id.clone()
    }

    /// Run one render callback of `frames` frames
    ///
    /// Returns `None` when no device is open.
    pub fn pull(&self, frames: usize) -> Option<(RenderStatus, Vec<u8>)> {
        let (render, frame_size, timestamp) = {
            let mut state = self.state.lock();
            let render = Arc::clone(state.render.as_ref()?);
            let frame_size = state.opened.as_ref()?.format.frame_size();
            let timestamp = state.position;
            state.position += frames as u64;
            (render, frame_size, timestamp)
        };

        let mut out = vec![0xAAu8; frames * frame_size];
        let status = render.on_render(timestamp, frames, &mut out);
        Some((status, out))
    }
}

impl AudioHal for NullHal {
    fn name(&self) -> &str {
        "null"
    }

    fn enumerate_output_devices(&self) -> Result<Vec<DeviceInfo>> {
        let state = self.state.lock();
        let preferred = state.preferred.clone();
        Ok(vec![DeviceInfo {
            name: "Null output".to_string(),
            id: NULL_DEVICE.to_string(),
            channels: preferred
                .as_ref()
                .map_or(state.channels.unwrap_or(8), ChannelLayout::count),
            preferred_layout: preferred,
            is_default: true,
        }])
    }

    fn preferred_channel_layout(&self, _device_id: &str) -> Option<ChannelLayout> {
        self.state.lock().preferred.clone()
    }

    fn open(
        &mut self,
        device_id: &str,
        format: &AudioFormat,
        buffer_frames: usize,
        render: Arc<dyn RenderCallback>,
    ) -> Result<OpenedDevice> {
        let mut state = self.state.lock();
        if state.render.is_some() {
            return Err(Error::InvalidState("Null device already open".to_string()));
        }
        if std::mem::take(&mut state.fail_next_open) {
            return Err(Error::AudioOutput(format!(
                "Failed to open null device '{}'",
                device_id
            )));
        }

        let mut hw = format.clone();
        if !format.is_bitstream() {
            if let Some(channels) = state.channels {
                hw.channel_layout = ChannelLayout::from_count(channels).ok_or_else(|| {
                    Error::AudioOutput(format!("Unsupported channel count {}", channels))
                })?;
            }
            if let Some(sample_format) = state.sample_format {
                hw.sample_format = sample_format;
            }
        }

        let channel_order = (!hw.is_bitstream() && hw.channels() == 8).then(default_hw_order_8ch);
        let opened = OpenedDevice {
            format: hw,
            buffer_frames: buffer_frames.max(1),
            channel_order,
        };

        info!("Null device '{}' opened: {}", device_id, opened.format);
        state.render = Some(render);
        state.opened = Some(opened.clone());
        state.device_id = Some(device_id.to_string());
        state.position = 0;
        state.open_count += 1;
        Ok(opened)
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        if state.render.take().is_some() {
            debug!("Null device closed");
        }
        state.opened = None;
        state.device_id = None;
    }

    fn is_open(&self) -> bool {
        self.state.lock().render.is_some()
    }
}
