//! Engine core: device lifecycle, stream/sound ownership and the render path
//!
//! # State machine
//!
//! ```text
//! Uninitialized ──initialize──► Initializing ──ok──► Running ◄──► Locked
//!       ▲                             │                 │
//!       └────────────failed───────────┘                 └──shutdown──► Stopped
//! ```
//!
//! Reconfiguration (`initialize`, passthrough switches, `deinitialize`) is
//! serialized by the reconfiguration mutex and runs with the render path
//! short-circuited (state `Locked`/`Initializing`).
//!
//! # Real-time rules
//!
//! `on_render` runs on the device thread. It only ever `try_lock`s; any
//! contention or a non-running state produces a silent buffer. All scratch
//! buffers are sized at initialize time and larger requests are rendered in
//! chunks. Streams and sounds are released by `collect_garbage`, never on the
//! render thread.

use super::callbacks::VisualizationSink;
use super::output_graph::{build_mix_map, negotiate, reorder_map, BusPool};
use super::sound::{Sound, SoundId, SoundMixer};
use super::stream::{Stream, StreamId, StreamOptions, StreamSink};
use crate::audio::convert;
use crate::audio::decoder::{self, DecodedAudio};
use crate::audio::format::{AudioFormat, ChannelLayout, SampleFormat, StdLayout};
use crate::audio::mix_matrix::MixMatrix;
use crate::error::{Error, Result};
use crate::hal::{AudioHal, DeviceInfo, RenderCallback, RenderStatus};
use mcae_common::EngineSettings;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Smallest render chunk planned for, whatever the device reports
const MIN_RENDER_FRAMES: usize = 256;

/// Log every Nth silent render
const SILENCE_LOG_EVERY: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineState {
    Uninitialized = 0,
    Initializing = 1,
    Running = 2,
    /// Reconfiguring or suspended; renders are silent
    Locked = 3,
    Stopped = 4,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Initializing,
            2 => EngineState::Running,
            3 => EngineState::Locked,
            4 => EngineState::Stopped,
            _ => EngineState::Uninitialized,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initializing => "initializing",
            EngineState::Running => "running",
            EngineState::Locked => "locked",
            EngineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Formats chosen by the last successful `initialize`
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    /// Float format every stream is converted to
    pub mix: AudioFormat,
    /// Format the device accepted
    pub hardware: AudioFormat,
    pub passthrough: bool,
    pub buffer_frames: usize,
    /// Bumped on every successful device open
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub state: EngineState,
    pub streams: usize,
    pub playing_sounds: usize,
    pub renders: u64,
    pub silent_renders: u64,
    pub passthrough: bool,
}

/// Everything `on_render` needs, preallocated
struct RenderState {
    generation: u64,
    mix_channels: usize,
    hw_format: AudioFormat,
    passthrough: bool,
    /// Mix layout to hardware layout, when they differ
    master: Option<MixMatrix>,
    /// 8-channel hardware order
    reorder: Option<Vec<usize>>,
    max_frames: usize,
    mix: Vec<f32>,
    stream_buf: Vec<f32>,
    hw: Vec<f32>,
    reordered: Vec<f32>,
}

impl RenderState {
    fn new(
        negotiated: &Negotiated,
        master: Option<MixMatrix>,
        reorder: Option<Vec<usize>>,
        period_frames: usize,
    ) -> Self {
        let max_frames = negotiated
            .buffer_frames
            .max(period_frames)
            .max(MIN_RENDER_FRAMES);
        let mix_channels = negotiated.mix.channels();
        let hw_channels = negotiated.hardware.channels();
        let pcm = !negotiated.passthrough;

        Self {
            generation: negotiated.generation,
            mix_channels,
            hw_format: negotiated.hardware.clone(),
            passthrough: negotiated.passthrough,
            master,
            reorder,
            max_frames,
            mix: vec![0.0; if pcm { max_frames * mix_channels } else { 0 }],
            stream_buf: vec![0.0; if pcm { max_frames * mix_channels } else { 0 }],
            hw: vec![0.0; if pcm { max_frames * hw_channels } else { 0 }],
            reordered: vec![0.0; if pcm { max_frames * hw_channels } else { 0 }],
        }
    }

    /// Mix up to `max_frames` frames into `out` (hardware format)
    ///
    /// Streams still configured for an earlier negotiation are skipped. A
    /// master matrix from another negotiation, or of the wrong size, is never
    /// applied: the chunk goes out silent and false is returned.
    fn render_chunk(
        &mut self,
        streams: &[Arc<Stream>],
        sounds: &mut SoundMixer,
        frames: usize,
        master_gain: f32,
        out: &mut [u8],
    ) -> bool {
        let ch = self.mix_channels;
        let len = frames * ch;
        let mix_frame_size = ch * std::mem::size_of::<f32>();

        self.mix[..len].fill(0.0);
        for stream in streams {
            if stream.out_frame_size() != mix_frame_size || stream.generation() != self.generation {
                continue;
            }
            let buf = &mut self.stream_buf[..len];
            let got = stream.get_frames(bytemuck::cast_slice_mut(&mut buf[..]), frames);
            if got == 0 {
                continue;
            }
            let gain = stream.gain() * master_gain;
            for (dst, src) in self.mix[..got * ch].iter_mut().zip(&buf[..got * ch]) {
                *dst += src * gain;
            }
        }
        sounds.mix(&mut self.mix[..len], frames, ch, master_gain);

        let hw_ch = self.hw_format.channels();
        let hw_len = frames * hw_ch;
        let mut samples: &[f32] = &self.mix[..len];
        let mut mixed = true;

        if let Some(matrix) = &self.master {
            let hw = &mut self.hw[..hw_len];
            if !matrix.is_current(self.generation) || !matrix.apply(samples, hw, frames) {
                hw.fill(0.0);
                mixed = false;
            }
            samples = &self.hw[..hw_len];
        }

        if let Some(map) = &self.reorder {
            let dst = &mut self.reordered[..hw_len];
            for (src_frame, dst_frame) in samples.chunks_exact(hw_ch).zip(dst.chunks_exact_mut(hw_ch)) {
                for (slot, &from) in dst_frame.iter_mut().zip(map) {
                    *slot = src_frame[from];
                }
            }
            samples = &self.reordered[..hw_len];
        }

        convert::from_float(self.hw_format.sample_format, samples, out);
        mixed
    }
}

/// Render entry handed to the HAL; never keeps the engine alive
struct EngineRenderer {
    engine: Weak<Engine>,
}

impl RenderCallback for EngineRenderer {
    fn on_render(&self, timestamp: u64, frames: usize, out: &mut [u8]) -> RenderStatus {
        match self.engine.upgrade() {
            Some(engine) => engine.on_render(timestamp, frames, out),
            None => {
                out.fill(0);
                RenderStatus::Silence
            }
        }
    }
}

/// The audio engine
///
/// Create with [`Engine::new`] and share the returned `Arc`. The engine owns
/// the HAL, every stream and every sound.
pub struct Engine {
    weak_self: Weak<Engine>,
    settings: EngineSettings,
    user_layout: ChannelLayout,
    state: AtomicU8,

    hal: Mutex<Box<dyn AudioHal>>,
    reconfig: Mutex<()>,
    render: Mutex<Option<RenderState>>,
    negotiated: RwLock<Option<Negotiated>>,

    streams: Mutex<Vec<Arc<Stream>>>,
    sounds: Mutex<Vec<Arc<Sound>>>,
    sound_mixer: Mutex<SoundMixer>,
    buses: Mutex<BusPool>,

    volume: AtomicU32,
    muted: AtomicBool,
    next_stream_id: AtomicU64,
    next_sound_id: AtomicU64,
    generation: AtomicU64,
    renders: AtomicU64,
    silent_renders: AtomicU64,
    visualizer: RwLock<Option<Arc<dyn VisualizationSink>>>,
}

impl Engine {
    pub fn new(hal: Box<dyn AudioHal>, settings: EngineSettings) -> Arc<Self> {
        let user_layout = settings
            .channel_layout
            .parse::<StdLayout>()
            .unwrap_or(StdLayout::Stereo)
            .layout();
        info!(
            "Audio engine created ({} backend, device '{}', layout {})",
            hal.name(),
            settings.device,
            user_layout
        );

        Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            volume: AtomicU32::new(settings.master_volume.clamp(0.0, 1.0).to_bits()),
            muted: AtomicBool::new(settings.muted),
            settings,
            user_layout,
            state: AtomicU8::new(EngineState::Uninitialized as u8),
            hal: Mutex::new(hal),
            reconfig: Mutex::new(()),
            render: Mutex::new(None),
            negotiated: RwLock::new(None),
            streams: Mutex::new(Vec::new()),
            sounds: Mutex::new(Vec::new()),
            sound_mixer: Mutex::new(SoundMixer::new()),
            buses: Mutex::new(BusPool::new()),
            next_stream_id: AtomicU64::new(1),
            next_sound_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
            renders: AtomicU64::new(0),
            silent_renders: AtomicU64::new(0),
            visualizer: RwLock::new(None),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: EngineState) {
        let prev = EngineState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if prev != state {
            debug!("Engine state {} -> {}", prev, state);
        }
    }

    /// PCM format used when no stream dictates one
    pub fn default_format(&self) -> AudioFormat {
        AudioFormat::new(
            self.settings.default_sample_rate,
            self.user_layout.clone(),
            SampleFormat::Float,
        )
    }

    pub fn negotiated(&self) -> Option<Negotiated> {
        self.negotiated.read().clone()
    }

    /// Hardware format of the open device
    pub fn output_format(&self) -> Option<AudioFormat> {
        self.negotiated.read().as_ref().map(|n| n.hardware.clone())
    }

    /// Format streams are converted to before mixing
    pub fn mix_format(&self) -> Option<AudioFormat> {
        self.negotiated.read().as_ref().map(|n| n.mix.clone())
    }

    pub fn is_passthrough(&self) -> bool {
        self.negotiated
            .read()
            .as_ref()
            .is_some_and(|n| n.passthrough)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the output device for `format` and reconfigure everything
    ///
    /// On failure the engine is left `Uninitialized` with the device closed.
    pub fn initialize(&self, format: &AudioFormat) -> Result<()> {
        let _reconfig = self.reconfig.lock();
        self.initialize_locked(format)
    }

    fn initialize_locked(&self, requested: &AudioFormat) -> Result<()> {
        requested.validate()?;
        let prev = self.state();
        if prev == EngineState::Stopped {
            return Err(Error::InvalidState("Engine is stopped".to_string()));
        }
        self.set_state(if prev == EngineState::Running {
            EngineState::Locked
        } else {
            EngineState::Initializing
        });
        info!("Initializing output for {}", requested);

        match self.open_output(requested) {
            Ok((negotiated, render_state)) => {
                *self.render.lock() = Some(render_state);
                self.apply_format(&negotiated);
                info!(
                    "Output running: mix {} on device {}{}",
                    negotiated.mix,
                    negotiated.hardware,
                    if negotiated.passthrough { " (passthrough)" } else { "" }
                );
                *self.negotiated.write() = Some(negotiated);
                self.set_state(EngineState::Running);
                Ok(())
            }
            Err(e) => {
                warn!("Output initialization failed: {}", e);
                self.hal.lock().close();
                *self.render.lock() = None;
                *self.negotiated.write() = None;
                self.sound_mixer.lock().stop_all();
                self.set_state(EngineState::Uninitialized);
                Err(e)
            }
        }
    }

    fn open_output(&self, requested: &AudioFormat) -> Result<(Negotiated, RenderState)> {
        let renderer: Arc<dyn RenderCallback> = Arc::new(EngineRenderer {
            engine: self.weak_self.clone(),
        });
        let period = self.settings.period_frames as usize;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut hal = self.hal.lock();
        hal.close();

        if requested.is_bitstream() {
            let device = self.settings.passthrough_device();
            let opened = hal.open(device, requested, period, renderer)?;
            if opened.format != *requested {
                return Err(Error::Format(format!(
                    "Device '{}' opened {} for passthrough of {}",
                    device, opened.format, requested
                )));
            }
            let negotiated = Negotiated {
                mix: requested.clone(),
                hardware: opened.format,
                passthrough: true,
                buffer_frames: opened.buffer_frames,
                generation,
            };
            let render_state = RenderState::new(&negotiated, None, None, period);
            return Ok((negotiated, render_state));
        }

        let preferred = hal.preferred_channel_layout(&self.settings.device);
        let (layout, _) = negotiate(
            &requested.channel_layout,
            preferred.as_ref(),
            &self.user_layout,
        )?;
        let wanted = AudioFormat::new(requested.sample_rate, layout.clone(), SampleFormat::Float);
        let opened = hal.open(&self.settings.device, &wanted, period, renderer)?;
        if opened.format.is_bitstream() {
            return Err(Error::Format(format!(
                "Device opened {} for PCM output",
                opened.format
            )));
        }

        let mix = AudioFormat::new(opened.format.sample_rate, layout, SampleFormat::Float);
        let hw_layout = &opened.format.channel_layout;
        let master = if mix.channel_layout == *hw_layout {
            None
        } else {
            let matrix = build_mix_map(&mix.channel_layout, hw_layout)?.with_generation(generation);
            info!(
                "Master matrix {} -> {} (generation {})",
                mix.channel_layout, hw_layout, generation
            );
            Some(matrix)
        };
        let reorder = opened
            .channel_order
            .as_ref()
            .and_then(|order| reorder_map(hw_layout, order));
        if reorder.is_some() {
            debug!("Reordering output channels for hardware");
        }

        let negotiated = Negotiated {
            mix,
            hardware: opened.format,
            passthrough: false,
            buffer_frames: opened.buffer_frames,
            generation,
        };
        let render_state = RenderState::new(&negotiated, master, reorder, period);
        Ok((negotiated, render_state))
    }

    fn sink_for(&self, negotiated: &Negotiated) -> StreamSink {
        StreamSink {
            output: negotiated.mix.clone(),
            generation: negotiated.generation,
            quality: self.settings.resample_quality,
            buffer_seconds: self.settings.buffer_seconds,
            low_water_ms: self.settings.low_water_ms,
        }
    }

    /// Point every stream and sound at the new mix format
    fn apply_format(&self, negotiated: &Negotiated) {
        let sink = self.sink_for(negotiated);
        for stream in self.streams.lock().iter() {
            if stream.is_deleted() || (negotiated.passthrough && !stream.is_raw()) {
                continue;
            }
            stream.reconfigure(&sink);
        }

        self.sound_mixer.lock().stop_all();
        if negotiated.passthrough {
            return;
        }
        for sound in self.sounds.lock().iter() {
            if let Err(e) = sound.prepare(&negotiated.mix, self.settings.resample_quality) {
                warn!("{} '{}' cannot be prepared: {}", sound.id(), sound.name(), e);
            }
        }
    }

    /// Close the device; streams and sounds are kept
    pub fn deinitialize(&self) {
        let _reconfig = self.reconfig.lock();
        if self.state() == EngineState::Stopped {
            return;
        }
        self.close_output(EngineState::Uninitialized);
    }

    fn close_output(&self, next: EngineState) {
        if self.state() == EngineState::Running {
            self.set_state(EngineState::Locked);
        }
        self.hal.lock().close();
        *self.render.lock() = None;
        *self.negotiated.write() = None;
        self.sound_mixer.lock().stop_all();
        self.set_state(next);
        info!("Output closed");
    }

    /// Close the device and release everything; the engine cannot restart
    pub fn shutdown(&self) {
        {
            let _reconfig = self.reconfig.lock();
            if self.state() == EngineState::Stopped {
                return;
            }
            self.close_output(EngineState::Stopped);
            for stream in self.streams.lock().iter() {
                stream.mark_deleted();
            }
            for sound in self.sounds.lock().iter() {
                sound.mark_deleted();
            }
        }
        self.collect_garbage();
        info!("Audio engine stopped");
    }

    /// Silence output without closing the device (Running -> Locked)
    pub fn suspend(&self) -> bool {
        let ok = self
            .state
            .compare_exchange(
                EngineState::Running as u8,
                EngineState::Locked as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if ok {
            info!("Output suspended");
        }
        ok
    }

    /// Undo `suspend` (Locked -> Running)
    pub fn resume(&self) -> bool {
        let _reconfig = self.reconfig.lock();
        if self.render.lock().is_none() {
            return false;
        }
        let ok = self
            .state
            .compare_exchange(
                EngineState::Locked as u8,
                EngineState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if ok {
            info!("Output resumed");
        }
        ok
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    /// Create a stream for producer data in `format`
    ///
    /// The first stream reinitializes the device for its format. A bitstream
    /// stream drains every PCM stream and switches the device to
    /// passthrough; while it lives, PCM streams are rejected.
    pub fn create_stream(&self, format: AudioFormat, options: StreamOptions) -> Result<Arc<Stream>> {
        format.validate()?;
        let _reconfig = self.reconfig.lock();
        if self.state() == EngineState::Stopped {
            return Err(Error::InvalidState("Engine is stopped".to_string()));
        }

        let (has_raw, pcm_live) = {
            let streams = self.streams.lock();
            let live: Vec<Arc<Stream>> = streams.iter().filter(|s| !s.is_deleted()).cloned().collect();
            let has_raw = live.iter().any(|s| s.is_raw());
            (has_raw, live.into_iter().filter(|s| !s.is_raw()).collect::<Vec<_>>())
        };

        let bus = self.buses.lock().acquire()?;
        let result = self.attach_stream(format, options, bus, has_raw, &pcm_live);
        if result.is_err() {
            self.buses.lock().release(bus);
        }
        result
    }

    fn attach_stream(
        &self,
        format: AudioFormat,
        options: StreamOptions,
        bus: usize,
        has_raw: bool,
        pcm_live: &[Arc<Stream>],
    ) -> Result<Arc<Stream>> {
        if format.is_bitstream() {
            if has_raw {
                return Err(Error::PassthroughBusy);
            }
            if !pcm_live.is_empty() {
                info!(
                    "Passthrough requested, draining {} PCM stream(s)",
                    pcm_live.len()
                );
            }
            for stream in pcm_live {
                stream.drain();
                stream.discard_buffered();
            }
            self.initialize_locked(&format)?;
        } else if has_raw {
            return Err(Error::PassthroughActive);
        } else if pcm_live.is_empty() || self.state() != EngineState::Running {
            let requested = AudioFormat::new(
                format.sample_rate,
                format.channel_layout.clone(),
                SampleFormat::Float,
            );
            self.initialize_locked(&requested)?;
        }

        let negotiated = self
            .negotiated()
            .ok_or_else(|| Error::InvalidState("Output is not initialized".to_string()))?;
        let sink = self.sink_for(&negotiated);
        let id = StreamId(self.next_stream_id.fetch_add(1, Ordering::Relaxed));
        let stream = Arc::new(Stream::new(id, format, options, bus, &sink));
        if !stream.is_valid() {
            return Err(Error::Format(format!(
                "{}: cannot convert {} to {}",
                id,
                stream.input_format(),
                negotiated.mix
            )));
        }
        stream.set_visualizer(self.visualizer.read().clone());

        self.streams.lock().push(Arc::clone(&stream));
        debug!("{} created on bus {}: {}", id, bus, stream.input_format());
        Ok(stream)
    }

    /// Mark a stream for removal by the next `collect_garbage`
    pub fn free_stream(&self, stream: &Stream) {
        stream.mark_deleted();
        debug!("{} marked for deletion", stream.id());
    }

    /// Live (not freed) streams
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.streams
            .lock()
            .iter()
            .filter(|s| !s.is_deleted())
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Sounds
    // ------------------------------------------------------------------

    /// Decode a sound effect file
    pub fn load_sound(&self, path: &Path) -> Result<Arc<Sound>> {
        let decoded = decoder::decode_file(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("sound")
            .to_string();
        self.add_sound(name, decoded)
    }

    /// Create a sound from raw interleaved PCM
    pub fn load_sound_pcm(&self, name: &str, format: &AudioFormat, data: &[u8]) -> Result<Arc<Sound>> {
        format.validate()?;
        if format.is_bitstream() {
            return Err(Error::Format(format!(
                "Sound '{}' cannot be a {} bitstream",
                name, format.sample_format
            )));
        }
        let frames = format.bytes_to_frames(data.len());
        let mut samples = vec![0.0f32; frames * format.channels()];
        convert::to_float(
            format.sample_format,
            &data[..format.frames_to_bytes(frames)],
            &mut samples,
        )?;

        let decoded = DecodedAudio {
            samples,
            format: AudioFormat::new(
                format.sample_rate,
                format.channel_layout.clone(),
                SampleFormat::Float,
            ),
        };
        self.add_sound(name.to_string(), decoded)
    }

    fn add_sound(&self, name: String, decoded: DecodedAudio) -> Result<Arc<Sound>> {
        let _reconfig = self.reconfig.lock();
        let id = SoundId(self.next_sound_id.fetch_add(1, Ordering::Relaxed));
        let sound = Arc::new(Sound::new(id, name, decoded));

        if let Some(negotiated) = self.negotiated().filter(|n| !n.passthrough) {
            sound.prepare(&negotiated.mix, self.settings.resample_quality)?;
        }
        self.sounds.lock().push(Arc::clone(&sound));
        debug!("{} loaded: '{}' ({:.2}s)", id, sound.name(), sound.duration());
        Ok(sound)
    }

    /// Start a playback of `sound`
    ///
    /// Returns `Ok(false)` when the sound cannot be heard right now
    /// (passthrough, a stream playing with UI sounds disabled, or the mixer
    /// is full). An idle engine is initialized with the default format.
    /// Finished playbacks are released here as well as in `collect_garbage`,
    /// so only sounds still playing count against the mixer's limit.
    pub fn play_sound(&self, sound: &Arc<Sound>) -> Result<bool> {
        if sound.is_deleted() {
            return Err(Error::InvalidState(format!("{} has been freed", sound.id())));
        }
        let _reconfig = self.reconfig.lock();
        match self.state() {
            EngineState::Stopped => {
                return Err(Error::InvalidState("Engine is stopped".to_string()));
            }
            EngineState::Uninitialized => self.initialize_locked(&self.default_format())?,
            _ => {}
        }

        if self.is_passthrough() {
            debug!("{} not played: passthrough active", sound.id());
            return Ok(false);
        }
        if !self.settings.ui_sounds_during_playback
            && self.streams.lock().iter().any(|s| s.is_active())
        {
            debug!("{} not played: stream playing", sound.id());
            return Ok(false);
        }
        let mut mixer = self.sound_mixer.lock();
        mixer.collect_retired();
        Ok(mixer.play(Arc::clone(sound)))
    }

    pub fn stop_sound(&self, sound: &Arc<Sound>) {
        self.sound_mixer.lock().stop(sound);
    }

    /// Stop and mark a sound for removal by the next `collect_garbage`
    pub fn free_sound(&self, sound: &Arc<Sound>) {
        self.stop_sound(sound);
        sound.mark_deleted();
        debug!("{} marked for deletion", sound.id());
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Release freed or invalid streams and finished sounds
    ///
    /// Non-real-time; call periodically. Writes resampler tails that
    /// draining streams had to defer and fires each removed stream's
    /// `FreeCallback`. Once the last passthrough stream is gone the device
    /// returns to PCM. Returns the number of streams removed.
    pub fn collect_garbage(&self) -> usize {
        let _reconfig = self.reconfig.lock();

        let dead = {
            let mut streams = self.streams.lock();
            let mut dead = Vec::new();
            streams.retain(|s| {
                if s.is_deleted() || !s.is_valid() {
                    dead.push(Arc::clone(s));
                    false
                } else {
                    true
                }
            });
            dead
        };

        let draining: Vec<Arc<Stream>> = self
            .streams
            .lock()
            .iter()
            .filter(|s| s.is_draining())
            .cloned()
            .collect();
        for stream in &draining {
            stream.write_pending_tail();
        }

        for stream in &dead {
            self.buses.lock().release(stream.bus());
            if let Some(cb) = stream.free_callback() {
                cb.on_freed(stream.id());
            }
            debug!("{} freed", stream.id());
        }

        let released = self.sound_mixer.lock().collect_retired();
        if released > 0 {
            trace!("Released {} finished sound playbacks", released);
        }
        self.sounds
            .lock()
            .retain(|s| !(s.is_deleted() && s.in_use() == 0));

        let raw_freed = dead.iter().any(|s| s.is_raw());
        if raw_freed && self.is_passthrough() && self.state() != EngineState::Stopped {
            let next = self
                .streams
                .lock()
                .iter()
                .find(|s| !s.is_raw() && !s.is_deleted())
                .map(|s| {
                    AudioFormat::new(
                        s.input_format().sample_rate,
                        s.input_format().channel_layout.clone(),
                        SampleFormat::Float,
                    )
                })
                .unwrap_or_else(|| self.default_format());
            info!("Passthrough ended, returning to PCM");
            if let Err(e) = self.initialize_locked(&next) {
                warn!("Failed to reopen PCM output: {}", e);
            }
        }

        dead.len()
    }

    // ------------------------------------------------------------------
    // Volume, devices, visualization
    // ------------------------------------------------------------------

    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() { 1.0 } else { volume.clamp(0.0, 1.0) };
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
        debug!("Master volume {:.2}", volume);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_mute(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
        debug!("Mute {}", muted);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn enumerate_output_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.hal.lock().enumerate_output_devices()
    }

    /// Install (or remove) the sink receiving a stereo copy of stream audio
    pub fn set_visualizer(&self, sink: Option<Arc<dyn VisualizationSink>>) {
        *self.visualizer.write() = sink.clone();
        for stream in self.streams.lock().iter() {
            stream.set_visualizer(sink.clone());
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            state: self.state(),
            streams: self.streams.lock().iter().filter(|s| !s.is_deleted()).count(),
            playing_sounds: self.sound_mixer.lock().playing(),
            renders: self.renders.load(Ordering::Relaxed),
            silent_renders: self.silent_renders.load(Ordering::Relaxed),
            passthrough: self.is_passthrough(),
        }
    }

    // ------------------------------------------------------------------
    // Render path
    // ------------------------------------------------------------------

    fn silence(&self, out: &mut [u8], reason: &'static str) -> RenderStatus {
        out.fill(0);
        let count = self.silent_renders.fetch_add(1, Ordering::Relaxed) + 1;
        if count % SILENCE_LOG_EVERY == 1 {
            trace!("Silent render #{} ({})", count, reason);
        }
        RenderStatus::Silence
    }
}

impl RenderCallback for Engine {
    fn on_render(&self, _timestamp: u64, frames: usize, out: &mut [u8]) -> RenderStatus {
        self.renders.fetch_add(1, Ordering::Relaxed);
        if self.state() != EngineState::Running {
            return self.silence(out, "not running");
        }

        let Some(mut render) = self.render.try_lock() else {
            return self.silence(out, "render state busy");
        };
        let Some(rs) = render.as_mut() else {
            return self.silence(out, "no render state");
        };
        let Some(streams) = self.streams.try_lock() else {
            return self.silence(out, "stream list busy");
        };
        let Some(mut sounds) = self.sound_mixer.try_lock() else {
            return self.silence(out, "sound mixer busy");
        };

        let frame_size = rs.hw_format.frame_size();
        let frames = frames.min(out.len() / frame_size);
        let (body, tail) = out.split_at_mut(frames * frame_size);
        tail.fill(0);

        if rs.passthrough {
            let mut got = 0;
            for stream in streams.iter() {
                if stream.is_raw()
                    && stream.out_frame_size() == frame_size
                    && stream.generation() == rs.generation
                {
                    if got == 0 {
                        got = stream.get_frames(body, frames);
                    }
                } else {
                    stream.service_drain();
                }
            }
            body[got * frame_size..].fill(0);
            return RenderStatus::Passthrough;
        }

        let master_gain = if self.is_muted() { 0.0 } else { self.volume() };
        let mut mixed = true;
        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(rs.max_frames);
            mixed &= rs.render_chunk(
                &streams,
                &mut sounds,
                n,
                master_gain,
                &mut body[done * frame_size..(done + n) * frame_size],
            );
            done += n;
        }
        if mixed {
            RenderStatus::Mixed
        } else {
            let count = self.silent_renders.fetch_add(1, Ordering::Relaxed) + 1;
            if count % SILENCE_LOG_EVERY == 1 {
                trace!("Silent render #{} (stale master matrix)", count);
            }
            RenderStatus::Silence
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("negotiated", &self.negotiated())
            .finish()
    }
}
