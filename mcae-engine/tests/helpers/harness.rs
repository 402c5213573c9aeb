//! Engine harness on the null backend

use mcae_common::{EngineSettings, ResampleQuality};
use mcae_engine::hal::{DeviceInfo, NullHal, OpenedDevice};
use mcae_engine::{AudioFormat, AudioHal, ChannelLayout, Engine, EngineState};
use mcae_engine::{RenderCallback, RenderStatus, Result};
use std::sync::{Arc, Mutex, Weak};

/// Settings with short buffers so tests stay small
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        device: "null".to_string(),
        buffer_seconds: 0.5,
        low_water_ms: 20,
        period_frames: 256,
        resample_quality: ResampleQuality::Low,
        ..EngineSettings::default()
    }
}

/// Engine driving `hal`; the returned clone shares the backend state
pub fn test_engine(hal: NullHal, settings: EngineSettings) -> (Arc<Engine>, NullHal) {
    let engine = Engine::new(Box::new(hal.clone()), settings);
    (engine, hal)
}

/// One render made from inside `AudioHal::open`
#[derive(Debug, Clone)]
pub struct OpenRender {
    pub state: Option<EngineState>,
    pub status: RenderStatus,
    pub out: Vec<u8>,
}

/// Null backend that renders once before `open` returns
///
/// Some devices start calling back while they are still being opened; this
/// backend does so on every open and records what the engine produced and
/// the state it was in.
#[derive(Clone, Default)]
pub struct RenderOnOpenHal {
    inner: NullHal,
    engine: Arc<Mutex<Weak<Engine>>>,
    renders: Arc<Mutex<Vec<OpenRender>>>,
}

impl RenderOnOpenHal {
    /// Engine driving this backend, with the backend told about it
    pub fn engine(&self, settings: EngineSettings) -> Arc<Engine> {
        let engine = Engine::new(Box::new(self.clone()), settings);
        *self.engine.lock().unwrap() = Arc::downgrade(&engine);
        engine
    }

    pub fn renders(&self) -> Vec<OpenRender> {
        self.renders.lock().unwrap().clone()
    }

    pub fn null(&self) -> &NullHal {
        &self.inner
    }
}

impl AudioHal for RenderOnOpenHal {
    fn name(&self) -> &str {
        "render-on-open"
    }

    fn enumerate_output_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.inner.enumerate_output_devices()
    }

    fn preferred_channel_layout(&self, device_id: &str) -> Option<ChannelLayout> {
        self.inner.preferred_channel_layout(device_id)
    }

    fn open(
        &mut self,
        device_id: &str,
        format: &AudioFormat,
        buffer_frames: usize,
        render: Arc<dyn RenderCallback>,
    ) -> Result<OpenedDevice> {
        let frames = 256;
        let mut out = vec![0xAAu8; frames * format.frame_size()];
        let status = render.on_render(0, frames, &mut out);
        let state = self.engine.lock().unwrap().upgrade().map(|e| e.state());
        self.renders
            .lock()
            .unwrap()
            .push(OpenRender { state, status, out });
        self.inner.open(device_id, format, buffer_frames, render)
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

/// Native-endian f32 samples from rendered bytes
pub fn as_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Native-endian i16 samples from rendered bytes
pub fn as_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_ne_bytes([c[0], c[1]]))
        .collect()
}
