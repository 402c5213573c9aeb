//! Audio output using cpal
//!
//! The cpal stream is created on, and kept alive by, a dedicated output
//! thread because cpal streams cannot move between threads on every
//! platform. `open` waits for that thread to report the negotiated
//! configuration; `close` signals it and joins.
//!
//! Bitstream formats are carried as 16-bit stereo frames, the usual IEC 61937
//! framing over a PCM output.

use super::{AudioHal, DeviceInfo, OpenedDevice, RenderCallback};
use crate::audio::format::{AudioFormat, ChannelLayout, SampleFormat};
use crate::engine::output_graph::default_hw_order_8ch;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig, SupportedStreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_DEVICE: &str = "default";

struct OutputThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct CpalHal {
    output: Option<OutputThread>,
}

impl CpalHal {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Find a device by name, falling back to the default device
fn find_device(device_id: &str) -> Result<Device> {
    let host = cpal::default_host();

    if device_id != DEFAULT_DEVICE {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
        if let Some(dev) = devices.find(|d| d.name().ok().as_deref() == Some(device_id)) {
            info!("Found requested audio device: {}", device_id);
            return Ok(dev);
        }
        warn!(
            "Requested device '{}' not found, falling back to default device",
            device_id
        );
    }

    host.default_output_device()
        .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))
}

fn to_cpal_format(format: SampleFormat) -> cpal::SampleFormat {
    match format {
        SampleFormat::U8 => cpal::SampleFormat::U8,
        SampleFormat::S32 => cpal::SampleFormat::I32,
        SampleFormat::Float => cpal::SampleFormat::F32,
        _ => cpal::SampleFormat::I16,
    }
}

fn from_cpal_format(format: cpal::SampleFormat) -> Option<SampleFormat> {
    match format {
        cpal::SampleFormat::U8 => Some(SampleFormat::U8),
        cpal::SampleFormat::I16 => Some(SampleFormat::S16),
        cpal::SampleFormat::I32 => Some(SampleFormat::S32),
        cpal::SampleFormat::F32 => Some(SampleFormat::Float),
        _ => None,
    }
}

/// Pick the supported config closest to `format`
///
/// Exact channels, rate and sample format first, then exact channels and
/// rate in any format we can write, then the device default.
fn best_config(device: &Device, format: &AudioFormat) -> Result<SupportedStreamConfig> {
    let channels = format.channels() as u16;
    let rate = format.sample_rate;
    let wanted = to_cpal_format(format.sample_format);

    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
        .filter(|c| {
            c.channels() == channels
                && c.min_sample_rate().0 <= rate
                && c.max_sample_rate().0 >= rate
                && from_cpal_format(c.sample_format()).is_some()
        })
        .collect();

    let exact = configs.iter().find(|c| c.sample_format() == wanted);
    if let Some(config) = exact.or(configs.first()) {
        return Ok(config.clone().with_sample_rate(cpal::SampleRate(rate)));
    }

    if format.is_bitstream() {
        return Err(Error::AudioOutput(format!(
            "Device cannot carry {} at {}Hz",
            format.sample_format, rate
        )));
    }

    debug!("No config matches {}, using device default", format);
    device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: cpal::SampleFormat,
    render: Arc<dyn RenderCallback>,
) -> Result<cpal::Stream> {
    let channels = config.channels as usize;
    let position = Arc::new(AtomicU64::new(0));

    macro_rules! stream_for {
        ($t:ty) => {{
            let position = Arc::clone(&position);
            let render = Arc::clone(&render);
            device.build_output_stream(
                config,
                move |data: &mut [$t], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    let timestamp = position.fetch_add(frames as u64, Ordering::Relaxed);
                    render.on_render(timestamp, frames, bytemuck::cast_slice_mut(data));
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
        }};
    }

    let stream = match sample_format {
        cpal::SampleFormat::U8 => stream_for!(u8),
        cpal::SampleFormat::I16 => stream_for!(i16),
        cpal::SampleFormat::I32 => stream_for!(i32),
        cpal::SampleFormat::F32 => stream_for!(f32),
        other => {
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };
    stream.map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

/// Open the device and start the stream on the current thread
fn start(
    device_id: &str,
    format: &AudioFormat,
    buffer_frames: usize,
    render: Arc<dyn RenderCallback>,
) -> Result<(cpal::Stream, OpenedDevice)> {
    let device = find_device(device_id)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = best_config(&device, format)?;
    let sample_format = supported.sample_format();
    let hw_sample_format = if format.is_bitstream() {
        if sample_format != cpal::SampleFormat::I16 {
            return Err(Error::AudioOutput(format!(
                "Device '{}' has no 16-bit output for {}",
                name, format.sample_format
            )));
        }
        format.sample_format
    } else {
        from_cpal_format(sample_format).ok_or_else(|| {
            Error::AudioOutput(format!("Unsupported sample format: {:?}", sample_format))
        })?
    };

    let mut config = supported.config();
    config.buffer_size = cpal::BufferSize::Fixed(buffer_frames as u32);

    let layout = if format.is_bitstream() {
        format.channel_layout.clone()
    } else {
        ChannelLayout::from_count(config.channels as usize).ok_or_else(|| {
            Error::AudioOutput(format!("Unsupported channel count {}", config.channels))
        })?
    };
    let hw = AudioFormat::new(config.sample_rate.0, layout, hw_sample_format);

    let stream = match build_stream(&device, &config, sample_format, Arc::clone(&render)) {
        Ok(stream) => stream,
        Err(e) => {
            // Some backends reject fixed sizes; retry with the device default
            debug!("Fixed buffer size rejected ({}), retrying with default", e);
            config.buffer_size = cpal::BufferSize::Default;
            build_stream(&device, &config, sample_format, render)?
        }
    };
    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

    info!(
        "Audio device '{}' started: {} ({:?} buffer)",
        name, hw, config.buffer_size
    );

    let channel_order = (!hw.is_bitstream() && hw.channels() == 8).then(default_hw_order_8ch);
    Ok((
        stream,
        OpenedDevice {
            format: hw,
            buffer_frames,
            channel_order,
        },
    ))
}

impl AudioHal for CpalHal {
    fn name(&self) -> &str {
        "cpal"
    }

    fn enumerate_output_devices(&self) -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

        let mut found = Vec::new();
        for device in devices {
            let Ok(name) = device.name() else {
                continue;
            };
            let channels = match device.supported_output_configs() {
                Ok(configs) => configs.map(|c| c.channels() as usize).max().unwrap_or(0),
                Err(_) => continue,
            };
            let preferred_layout = device
                .default_output_config()
                .ok()
                .and_then(|c| ChannelLayout::from_count(c.channels() as usize));

            found.push(DeviceInfo {
                is_default: default_name.as_ref() == Some(&name),
                id: name.clone(),
                name,
                channels,
                preferred_layout,
            });
        }

        debug!("Found {} output devices", found.len());
        Ok(found)
    }

    fn preferred_channel_layout(&self, device_id: &str) -> Option<ChannelLayout> {
        let device = find_device(device_id).ok()?;
        let config = device.default_output_config().ok()?;
        ChannelLayout::from_count(config.channels() as usize)
    }

    fn open(
        &mut self,
        device_id: &str,
        format: &AudioFormat,
        buffer_frames: usize,
        render: Arc<dyn RenderCallback>,
    ) -> Result<OpenedDevice> {
        if self.output.is_some() {
            return Err(Error::InvalidState("Audio device already open".to_string()));
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let device_id = device_id.to_string();
        let format = format.clone();

        let handle = std::thread::Builder::new()
            .name("mcae-output".to_string())
            .spawn(move || {
                let stream = match start(&device_id, &format, buffer_frames, render) {
                    Ok((stream, opened)) => {
                        let _ = tx.send(Ok(opened));
                        stream
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };

                // The stream plays for as long as it is alive
                while !stop_flag.load(Ordering::Acquire) {
                    std::thread::park_timeout(Duration::from_millis(100));
                }
                drop(stream);
                info!("Audio output stopped");
            })
            .map_err(Error::Io)?;

        let opened = match rx.recv() {
            Ok(result) => result,
            Err(_) => Err(Error::AudioOutput("Output thread exited".to_string())),
        };
        match opened {
            Ok(opened) => {
                self.output = Some(OutputThread { stop, handle });
                Ok(opened)
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if let Some(output) = self.output.take() {
            output.stop.store(true, Ordering::Release);
            output.handle.thread().unpark();
            if output.handle.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.output.is_some()
    }
}

impl Drop for CpalHal {
    fn drop(&mut self) {
        // Signal only; joining here could run on the render thread
        if let Some(output) = &self.output {
            output.stop.store(true, Ordering::Release);
            output.handle.thread().unpark();
        }
    }
}
