//! Audio streams: one producer's queue into the mix
//!
//! A `Stream` owns a ring buffer and a format pipeline. The producer thread
//! calls `add_data`; the render thread calls `get_frames`. The two sides meet
//! only at the ring buffer and the atomics below.
//!
//! Producer-side state (pipeline, partial-frame carry) lives behind the
//! producer mutex, which the render thread never touches. The ring buffer is
//! behind an `RwLock` so reconfiguration can swap it; the render thread only
//! ever `try_read`s it.

use super::callbacks::{DataCallback, DrainCallback, FreeCallback, VisualizationSink};
use super::ring_buffer::{RingBuffer, RingBufferStats};
use crate::audio::format::AudioFormat;
use crate::audio::pipeline::FormatPipeline;
use mcae_common::ResampleQuality;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Engine-assigned stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Options fixed at stream creation
#[derive(Clone)]
pub struct StreamOptions {
    /// Start paused; no frames are consumed until `resume`
    pub paused: bool,
    pub volume: f32,
    /// Run the resampler even when rates match, so the ratio can be adjusted
    pub force_resample: bool,
    pub data_callback: Option<Arc<dyn DataCallback>>,
    pub drain_callback: Option<Arc<dyn DrainCallback>>,
    pub free_callback: Option<Arc<dyn FreeCallback>>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            paused: false,
            volume: 1.0,
            force_resample: false,
            data_callback: None,
            drain_callback: None,
            free_callback: None,
        }
    }
}

impl StreamOptions {
    pub fn paused(mut self) -> Self {
        self.paused = true;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn force_resample(mut self) -> Self {
        self.force_resample = true;
        self
    }

    pub fn on_data(mut self, callback: Arc<dyn DataCallback>) -> Self {
        self.data_callback = Some(callback);
        self
    }

    pub fn on_drain(mut self, callback: Arc<dyn DrainCallback>) -> Self {
        self.drain_callback = Some(callback);
        self
    }

    pub fn on_free(mut self, callback: Arc<dyn FreeCallback>) -> Self {
        self.free_callback = Some(callback);
        self
    }
}

/// What the engine tells a stream about its output side
#[derive(Debug, Clone)]
pub(crate) struct StreamSink {
    pub output: AudioFormat,
    /// Negotiation the output format belongs to
    pub generation: u64,
    pub quality: ResampleQuality,
    pub buffer_seconds: f32,
    pub low_water_ms: u32,
}

struct Producer {
    pipeline: Option<FormatPipeline>,
    output: AudioFormat,
    /// Trailing partial input frame from the previous `add_data`
    carry: Vec<u8>,
    staging: Vec<u8>,
    /// Resampler tail that did not fit in the ring when draining began
    tail: Vec<u8>,
}

pub struct Stream {
    id: StreamId,
    input_format: AudioFormat,
    force_resample: bool,
    bus: usize,

    producer: Mutex<Producer>,
    ring: RwLock<RingBuffer>,

    out_frame_size: AtomicUsize,
    out_rate: AtomicU32,
    low_water_bytes: AtomicUsize,
    generation: AtomicU64,

    paused: AtomicBool,
    draining: AtomicBool,
    drained: AtomicBool,
    tail_pending: AtomicBool,
    valid: AtomicBool,
    delete_pending: AtomicBool,
    volume: AtomicU32,
    replay_gain: AtomicU32,

    data_callback: Option<Arc<dyn DataCallback>>,
    drain_callback: Option<Arc<dyn DrainCallback>>,
    free_callback: Option<Arc<dyn FreeCallback>>,
    visualizer: RwLock<Option<Arc<dyn VisualizationSink>>>,
}

impl Stream {
    pub(crate) fn new(
        id: StreamId,
        input_format: AudioFormat,
        options: StreamOptions,
        bus: usize,
        sink: &StreamSink,
    ) -> Self {
        let stream = Self {
            id,
            input_format,
            force_resample: options.force_resample,
            bus,
            producer: Mutex::new(Producer {
                pipeline: None,
                output: sink.output.clone(),
                carry: Vec::new(),
                staging: Vec::new(),
                tail: Vec::new(),
            }),
            ring: RwLock::new(RingBuffer::new(1)),
            out_frame_size: AtomicUsize::new(0),
            out_rate: AtomicU32::new(0),
            low_water_bytes: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            paused: AtomicBool::new(options.paused),
            draining: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            tail_pending: AtomicBool::new(false),
            valid: AtomicBool::new(false),
            delete_pending: AtomicBool::new(false),
            volume: AtomicU32::new(options.volume.clamp(0.0, 1.0).to_bits()),
            replay_gain: AtomicU32::new(1.0f32.to_bits()),
            data_callback: options.data_callback,
            drain_callback: options.drain_callback,
            free_callback: options.free_callback,
            visualizer: RwLock::new(None),
        };
        stream.reconfigure(sink);
        stream
    }

    /// Rebuild the pipeline and ring for a new output format
    ///
    /// Buffered audio is discarded. Called by the engine while the render
    /// path is locked out.
    pub(crate) fn reconfigure(&self, sink: &StreamSink) {
        let mut producer = self.producer.lock();
        producer.carry.clear();
        producer.tail.clear();
        self.tail_pending.store(false, Ordering::Release);
        producer.output = sink.output.clone();

        let pipeline = match FormatPipeline::new(
            &self.input_format,
            &sink.output,
            sink.quality,
            self.force_resample,
        ) {
            Ok(p) => p,
            Err(e) => {
                warn!("{}: pipeline setup failed, stream invalid: {}", self.id, e);
                producer.pipeline = None;
                self.valid.store(false, Ordering::Release);
                return;
            }
        };
        producer.pipeline = Some(pipeline);

        let frame_size = sink.output.frame_size();
        let rate = sink.output.sample_rate;
        let capacity_frames = ((sink.buffer_seconds as f64 * rate as f64) as usize).max(1);
        let low_water_frames = sink.low_water_ms as usize * rate as usize / 1000;

        *self.ring.write() = RingBuffer::new(capacity_frames * frame_size);
        self.out_frame_size.store(frame_size, Ordering::Release);
        self.out_rate.store(rate, Ordering::Release);
        self.low_water_bytes
            .store(low_water_frames * frame_size, Ordering::Release);
        self.generation.store(sink.generation, Ordering::Release);
        self.valid.store(true, Ordering::Release);

        debug!(
            "{}: {} -> {} ({} frame buffer)",
            self.id, self.input_format, sink.output, capacity_frames
        );
    }

    /// Queue producer bytes
    ///
    /// Returns `data.len()` once accepted, or 0 when the stream is invalid,
    /// draining, freed, or the converted block would overflow the ring. A
    /// rejected call changes nothing. A trailing partial frame is held back
    /// and joined with the next call.
    pub fn add_data(&self, data: &[u8]) -> usize {
        if !self.accepts_data() || data.is_empty() {
            return 0;
        }

        let mut guard = self.producer.lock();
        let Producer {
            pipeline,
            carry,
            staging,
            output,
            ..
        } = &mut *guard;
        let Some(pipeline) = pipeline.as_mut() else {
            return 0;
        };

        let in_frame = self.input_format.frame_size();
        let total = carry.len() + data.len();
        let whole = total / in_frame * in_frame;

        if whole == 0 {
            carry.extend_from_slice(data);
            return data.len();
        }

        let ring = self.ring.read();
        if pipeline.max_output_bytes(whole / in_frame) > ring.write_size() {
            return 0;
        }

        let from_data = whole - carry.len();
        staging.clear();
        staging.extend_from_slice(carry);
        staging.extend_from_slice(&data[..from_data]);

        let out = match pipeline.process(staging.as_slice()) {
            Ok(out) => out,
            Err(e) => {
                warn!("{}: conversion failed, stream invalid: {}", self.id, e);
                self.valid.store(false, Ordering::Release);
                return 0;
            }
        };
        if !ring.write(out) {
            warn!("{}: ring rejected {} converted bytes", self.id, out.len());
            return 0;
        }

        carry.clear();
        carry.extend_from_slice(&data[from_data..]);

        if let Some(sink) = self.visualizer.read().as_ref() {
            let stereo = pipeline.visualization();
            if !stereo.is_empty() {
                sink.on_samples(self.id, output.sample_rate, stereo);
            }
        }

        data.len()
    }

    /// Consumer side: read up to `frames` frames into `buffer`
    ///
    /// Never blocks. Invokes the data callback when below the low-water
    /// mark, and the drain callback once a draining stream runs dry.
    pub fn get_frames(&self, buffer: &mut [u8], frames: usize) -> usize {
        if !self.is_active() {
            return 0;
        }
        let Some(ring) = self.ring.try_read() else {
            return 0;
        };
        let frame_size = self.out_frame_size.load(Ordering::Acquire);
        if frame_size == 0 {
            return 0;
        }

        let draining = self.draining.load(Ordering::Acquire);
        if !draining && ring.read_size() < self.low_water_bytes.load(Ordering::Relaxed) {
            if let Some(cb) = &self.data_callback {
                cb.on_data_needed(self.id, ring.read_size() / frame_size);
            }
        }

        let want = frames.min(buffer.len() / frame_size) * frame_size;
        let got = ring.read(&mut buffer[..want]);

        if draining && ring.read_size() == 0 && !self.tail_pending.load(Ordering::Acquire) {
            self.fire_drained();
        }
        got / frame_size
    }

    /// Fire the drain callback for a draining stream that is not being read
    pub(crate) fn service_drain(&self) {
        if !self.draining.load(Ordering::Acquire) {
            return;
        }
        if self.tail_pending.load(Ordering::Acquire) {
            return;
        }
        if let Some(ring) = self.ring.try_read() {
            if ring.read_size() == 0 {
                self.fire_drained();
            }
        }
    }

    fn fire_drained(&self) {
        if !self.drained.swap(true, Ordering::AcqRel) {
            if let Some(cb) = &self.drain_callback {
                cb.on_drained(self.id);
            }
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Stop accepting data and play out what is buffered
    ///
    /// The resampler tail is flushed into the ring first. When the ring is
    /// too full for it, the tail is held back and written by a later `drain`
    /// call or by the engine's maintenance pass; the drain callback waits for
    /// it.
    pub fn drain(&self) {
        if self.draining.load(Ordering::Acquire) {
            self.write_pending_tail();
            return;
        }
        let mut guard = self.producer.lock();
        let Producer { pipeline, carry, tail, .. } = &mut *guard;
        carry.clear();
        if let Some(pipeline) = pipeline.as_mut() {
            match pipeline.drain() {
                Ok(out) if !out.is_empty() => {
                    if !self.ring.read().write(out) {
                        debug!("{}: deferring {} byte resampler tail", self.id, out.len());
                        tail.clear();
                        tail.extend_from_slice(out);
                        self.tail_pending.store(true, Ordering::Release);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("{}: resampler drain failed: {}", self.id, e),
            }
        }
        self.draining.store(true, Ordering::Release);
        debug!("{}: draining", self.id);
    }

    /// Move a deferred resampler tail into the ring once it fits
    ///
    /// Returns true when nothing is left pending. Never called on the render
    /// thread.
    pub(crate) fn write_pending_tail(&self) -> bool {
        if !self.tail_pending.load(Ordering::Acquire) {
            return true;
        }
        let mut producer = self.producer.lock();
        if !self.ring.read().write(&producer.tail) {
            return false;
        }
        trace!("{}: wrote {} byte deferred tail", self.id, producer.tail.len());
        producer.tail.clear();
        self.tail_pending.store(false, Ordering::Release);
        true
    }

    /// Discard buffered audio and resampler state; cancels a drain
    pub fn flush(&self) {
        let mut producer = self.producer.lock();
        self.ring.read().reset();
        if let Some(pipeline) = producer.pipeline.as_mut() {
            pipeline.reset();
        }
        producer.carry.clear();
        producer.tail.clear();
        self.tail_pending.store(false, Ordering::Release);
        self.draining.store(false, Ordering::Release);
        self.drained.store(false, Ordering::Release);
        debug!("{}: flushed", self.id);
    }

    /// Adjust playback speed relative to nominal (e.g. for A/V sync)
    pub fn set_resample_ratio(&self, relative: f64) -> crate::Result<()> {
        match self.producer.lock().pipeline.as_mut() {
            Some(pipeline) => pipeline.set_ratio_relative(relative),
            None => Err(crate::Error::InvalidState(format!("{} is invalid", self.id))),
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Linear gain from replay-gain metadata; not limited to unity
    pub fn set_replay_gain(&self, gain: f32) {
        self.replay_gain
            .store(gain.clamp(0.0, 4.0).to_bits(), Ordering::Relaxed);
    }

    /// Volume times replay gain
    pub fn gain(&self) -> f32 {
        self.volume() * f32::from_bits(self.replay_gain.load(Ordering::Relaxed))
    }

    /// Seconds of audio currently buffered
    pub fn delay(&self) -> f64 {
        self.seconds(self.ring.read().read_size())
    }

    /// Seconds buffered; same measure as `delay` since the ring is the only cache
    pub fn cache_time(&self) -> f64 {
        self.delay()
    }

    /// Seconds the ring can hold
    pub fn cache_total(&self) -> f64 {
        self.seconds(self.ring.read().capacity())
    }

    fn seconds(&self, bytes: usize) -> f64 {
        let frame_size = self.out_frame_size.load(Ordering::Acquire);
        let rate = self.out_rate.load(Ordering::Acquire);
        if frame_size == 0 || rate == 0 {
            return 0.0;
        }
        (bytes / frame_size) as f64 / rate as f64
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn bus(&self) -> usize {
        self.bus
    }

    pub fn input_format(&self) -> &AudioFormat {
        &self.input_format
    }

    pub fn output_format(&self) -> AudioFormat {
        self.producer.lock().output.clone()
    }

    /// Compressed bitstream stream
    pub fn is_raw(&self) -> bool {
        self.input_format.is_bitstream()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Drain completed and the drain callback has fired
    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    /// Negotiation the buffered audio was converted for
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_pending.load(Ordering::Acquire)
    }

    /// Frames currently buffered
    pub fn buffered_frames(&self) -> usize {
        let frame_size = self.out_frame_size.load(Ordering::Acquire);
        match frame_size {
            0 => 0,
            fs => self.ring.read().read_size() / fs,
        }
    }

    /// Frames that can be queued right now (in output frames)
    pub fn space_frames(&self) -> usize {
        let frame_size = self.out_frame_size.load(Ordering::Acquire);
        match frame_size {
            0 => 0,
            fs => self.ring.read().write_size() / fs,
        }
    }

    pub fn stats(&self) -> RingBufferStats {
        self.ring.read().stats()
    }

    fn accepts_data(&self) -> bool {
        self.is_valid() && !self.is_draining() && !self.is_deleted()
    }

    /// Eligible to be mixed this render pass
    pub(crate) fn is_active(&self) -> bool {
        self.is_valid() && !self.is_paused() && !self.is_deleted()
    }

    /// Bytes per output frame; 0 while invalid
    pub(crate) fn out_frame_size(&self) -> usize {
        if self.is_valid() {
            self.out_frame_size.load(Ordering::Acquire)
        } else {
            0
        }
    }

    /// Drop buffered output without cancelling a drain
    ///
    /// Used when the device leaves PCM mode and the audio can no longer play.
    pub(crate) fn discard_buffered(&self) {
        self.ring.read().reset();
    }

    pub(crate) fn mark_deleted(&self) {
        self.delete_pending.store(true, Ordering::Release);
    }

    pub(crate) fn set_visualizer(&self, sink: Option<Arc<dyn VisualizationSink>>) {
        *self.visualizer.write() = sink;
    }

    pub(crate) fn free_callback(&self) -> Option<&Arc<dyn FreeCallback>> {
        self.free_callback.as_ref()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("input", &self.input_format)
            .field("bus", &self.bus)
            .field("valid", &self.is_valid())
            .field("paused", &self.is_paused())
            .field("draining", &self.is_draining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::{SampleFormat, StdLayout};
    use std::sync::atomic::AtomicUsize;

    fn sink(rate: u32) -> StreamSink {
        StreamSink {
            output: AudioFormat::pcm(rate, StdLayout::Stereo, SampleFormat::Float),
            generation: 1,
            quality: ResampleQuality::Low,
            buffer_seconds: 0.1,
            low_water_ms: 20,
        }
    }

    fn float_stream(rate: u32, options: StreamOptions) -> Stream {
        let input = AudioFormat::pcm(rate, StdLayout::Stereo, SampleFormat::Float);
        Stream::new(StreamId(1), input, options, 0, &sink(rate))
    }

    fn ramp(frames: usize) -> Vec<f32> {
        (0..frames * 2).map(|i| i as f32 / 10_000.0).collect()
    }

    #[test]
    fn test_bytes_come_back_in_order() {
        let stream = float_stream(48000, StreamOptions::default());
        let samples = ramp(100);
        let bytes: &[u8] = bytemuck::cast_slice(&samples);
        assert_eq!(stream.add_data(bytes), bytes.len());

        let mut out = vec![0u8; bytes.len()];
        assert_eq!(stream.get_frames(&mut out, 100), 100);
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_overflow_rejected_whole() {
        // 0.1 s at 48 kHz = 4800 frames
        let stream = float_stream(48000, StreamOptions::default());
        let first = ramp(4000);
        assert!(stream.add_data(bytemuck::cast_slice(&first)) > 0);

        let second = ramp(1000);
        assert_eq!(stream.add_data(bytemuck::cast_slice(&second)), 0);
        assert_eq!(stream.buffered_frames(), 4000);
    }

    #[test]
    fn test_partial_frame_carried() {
        let stream = float_stream(48000, StreamOptions::default());
        let samples = ramp(2);
        let bytes: &[u8] = bytemuck::cast_slice(&samples);

        assert_eq!(stream.add_data(&bytes[..5]), 5);
        assert_eq!(stream.buffered_frames(), 0);
        assert_eq!(stream.add_data(&bytes[5..]), bytes.len() - 5);
        assert_eq!(stream.buffered_frames(), 2);

        let mut out = vec![0u8; bytes.len()];
        stream.get_frames(&mut out, 2);
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_paused_stream_yields_nothing() {
        let stream = float_stream(48000, StreamOptions::default().paused());
        stream.add_data(bytemuck::cast_slice(&ramp(10)));

        let mut out = vec![0u8; 80];
        assert_eq!(stream.get_frames(&mut out, 10), 0);
        stream.resume();
        assert_eq!(stream.get_frames(&mut out, 10), 10);
    }

    #[test]
    fn test_drain_fires_once_and_rejects_data() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let options = StreamOptions::default().on_drain(Arc::new(move |_id: StreamId| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let stream = float_stream(48000, options);
        stream.add_data(bytemuck::cast_slice(&ramp(10)));
        stream.drain();

        assert_eq!(stream.add_data(bytemuck::cast_slice(&ramp(10))), 0);

        let mut out = vec![0u8; 80];
        assert_eq!(stream.get_frames(&mut out, 5), 5);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(stream.get_frames(&mut out, 10), 5);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(stream.get_frames(&mut out, 10), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(stream.is_drained());
    }

    #[test]
    fn test_data_callback_below_low_water() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let options = StreamOptions::default().on_data(Arc::new(move |_id: StreamId, _frames: usize| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let stream = float_stream(48000, options);

        // 20 ms low water = 960 frames
        stream.add_data(bytemuck::cast_slice(&ramp(2000)));
        let mut out = vec![0u8; 8 * 512];
        for _ in 0..3 {
            stream.get_frames(&mut out, 512);
        }
        // 2000 - 3 * 512 = 464 frames left, below the mark
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        stream.get_frames(&mut out, 512);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_flush_clears_and_cancels_drain() {
        let stream = float_stream(44100, StreamOptions::default());
        stream.add_data(bytemuck::cast_slice(&ramp(100)));
        stream.drain();
        stream.flush();

        assert_eq!(stream.buffered_frames(), 0);
        assert!(!stream.is_draining());
        assert!(stream.add_data(bytemuck::cast_slice(&ramp(10))) > 0);
    }

    #[test]
    fn test_unmappable_layout_is_invalid() {
        let input = AudioFormat::new(
            48000,
            crate::audio::format::ChannelLayout::new(vec![crate::audio::format::Channel::LFE]).unwrap(),
            SampleFormat::Float,
        );
        let stream = Stream::new(StreamId(7), input, StreamOptions::default(), 0, &sink(48000));
        assert!(!stream.is_valid());
        assert_eq!(stream.add_data(&[0u8; 8]), 0);
    }

    #[test]
    fn test_delay_and_cache_total() {
        let stream = float_stream(48000, StreamOptions::default());
        assert!((stream.cache_total() - 0.1).abs() < 1e-9);
        stream.add_data(bytemuck::cast_slice(&ramp(4800 / 2)));
        assert!((stream.delay() - 0.05).abs() < 1e-9);
    }

    fn read_all(stream: &Stream) -> usize {
        let mut out = vec![0u8; 8 * 1024];
        let mut total = 0;
        loop {
            let n = stream.get_frames(&mut out, 1024);
            if n == 0 {
                return total;
            }
            total += n;
        }
    }

    #[test]
    fn test_large_resampled_block_fits_empty_ring() {
        let input = AudioFormat::pcm(44100, StdLayout::Stereo, SampleFormat::S16);
        let sink = StreamSink {
            buffer_seconds: 1.0,
            ..sink(48000)
        };
        let stream = Stream::new(StreamId(2), input, StreamOptions::default(), 0, &sink);
        assert_eq!(stream.space_frames(), 48000);

        // Roughly 43500 frames once converted to 48 kHz
        let block = vec![1000i16; 2 * 40000];
        let bytes: &[u8] = bytemuck::cast_slice(&block);
        assert_eq!(stream.add_data(bytes), bytes.len());
        assert!(stream.buffered_frames() > 43000);
    }

    #[test]
    fn test_tail_waits_for_room_in_ring() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let options = StreamOptions::default().on_drain(Arc::new(move |_id: StreamId| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let input = AudioFormat::pcm(44100, StdLayout::Stereo, SampleFormat::Float);
        let stream = Stream::new(StreamId(3), input, options, 0, &sink(48000));

        // Feed until the next converted chunk no longer fits; the unconverted
        // remainder plus filter delay is then larger than the free space
        let block = vec![0.25f32; 2 * 10];
        let mut fed = 0;
        while stream.add_data(bytemuck::cast_slice(&block)) > 0 {
            fed += 10;
            assert!(fed < 10_000);
        }
        stream.drain();

        let mut read = read_all(&stream);
        assert!(!stream.is_drained());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Calling drain again writes the held-back tail
        stream.drain();
        read += read_all(&stream);
        assert!(stream.is_drained());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let expected = (fed as f64 * 48000.0 / 44100.0).round() as i64;
        assert!(
            (read as i64 - expected).abs() <= 1,
            "read {} frames, expected {}",
            read,
            expected
        );
    }

    #[test]
    fn test_generation_follows_reconfigure() {
        let stream = float_stream(48000, StreamOptions::default());
        assert_eq!(stream.generation(), 1);

        let next = StreamSink {
            generation: 2,
            ..sink(44100)
        };
        stream.reconfigure(&next);
        assert_eq!(stream.generation(), 2);
        assert_eq!(stream.output_format().sample_rate, 44100);
    }
}
