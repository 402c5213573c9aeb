//! UI sound effects
//!
//! A `Sound` is fully decoded into memory at load time and converted to the
//! current mix format whenever the engine (re)initializes. Playing a sound
//! adds an entry to the `SoundMixer`'s preallocated active list; the render
//! thread mixes and retires entries without allocating or freeing.
//!
//! Retired entries are parked in a second preallocated list and only
//! released (and their in-use counts dropped) by `collect_retired`, which
//! runs outside the render path. A sound is never deallocated on the render
//! thread.

use crate::audio::decoder::DecodedAudio;
use crate::audio::format::AudioFormat;
use crate::audio::resampler::StreamResampler;
use crate::engine::output_graph::build_mix_map;
use crate::error::{Error, Result};
use mcae_common::ResampleQuality;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Concurrently playing sound instances
pub const MAX_PLAYING_SOUNDS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundId(pub u64);

impl fmt::Display for SoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sound-{}", self.0)
    }
}

/// Samples converted to the mix format
#[derive(Debug, Default)]
struct Rendered {
    samples: Vec<f32>,
    channels: usize,
}

pub struct Sound {
    id: SoundId,
    name: String,
    source: DecodedAudio,
    rendered: RwLock<Rendered>,
    volume: AtomicU32,
    in_use: AtomicUsize,
    delete_pending: AtomicBool,
}

impl Sound {
    pub(crate) fn new(id: SoundId, name: String, source: DecodedAudio) -> Self {
        Self {
            id,
            name,
            source,
            rendered: RwLock::new(Rendered::default()),
            volume: AtomicU32::new(1.0f32.to_bits()),
            in_use: AtomicUsize::new(0),
            delete_pending: AtomicBool::new(false),
        }
    }

    /// Convert the source to `mix` (resample + remap)
    pub(crate) fn prepare(&self, mix: &AudioFormat, quality: ResampleQuality) -> Result<()> {
        let src = &self.source;
        let channels = src.format.channels();

        let resampled = if src.format.sample_rate != mix.sample_rate {
            let mut resampler =
                StreamResampler::new(src.format.sample_rate, mix.sample_rate, channels, quality)?;
            let mut out = Vec::with_capacity(
                (src.samples.len() as f64 * mix.sample_rate as f64 / src.format.sample_rate as f64)
                    as usize
                    + 1024,
            );
            resampler.process(&src.samples, &mut out)?;
            resampler.finish(&mut out)?;
            out
        } else {
            src.samples.clone()
        };

        let matrix = build_mix_map(&src.format.channel_layout, &mix.channel_layout)?;
        let samples = if matrix.is_identity() {
            resampled
        } else {
            let frames = resampled.len() / channels;
            let mut out = vec![0.0; frames * mix.channels()];
            if !matrix.apply(&resampled, &mut out, frames) {
                return Err(Error::MixMap {
                    from: src.format.channel_layout.to_string(),
                    to: mix.channel_layout.to_string(),
                });
            }
            out
        };

        debug!(
            "{} '{}': {} frames prepared for {}",
            self.id,
            self.name,
            samples.len() / mix.channels(),
            mix
        );
        *self.rendered.write() = Rendered {
            samples,
            channels: mix.channels(),
        };
        Ok(())
    }

    pub fn id(&self) -> SoundId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_format(&self) -> &AudioFormat {
        &self.source.format
    }

    /// Length of the source in seconds
    pub fn duration(&self) -> f64 {
        self.source.frames() as f64 / self.source.format.sample_rate as f64
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Number of active or not-yet-collected playbacks
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.in_use() > 0
    }

    pub(crate) fn mark_deleted(&self) {
        self.delete_pending.store(true, Ordering::Release);
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.delete_pending.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sound")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("format", &self.source.format)
            .field("in_use", &self.in_use())
            .finish()
    }
}

struct Playing {
    sound: Arc<Sound>,
    /// Next frame to mix
    cursor: usize,
}

/// Mixes playing sounds into the render buffer
pub struct SoundMixer {
    active: Vec<Playing>,
    retired: Vec<Arc<Sound>>,
}

impl Default for SoundMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundMixer {
    pub fn new() -> Self {
        Self {
            active: Vec::with_capacity(MAX_PLAYING_SOUNDS),
            retired: Vec::with_capacity(MAX_PLAYING_SOUNDS),
        }
    }

    /// Start a playback; false when the mixer is full
    pub fn play(&mut self, sound: Arc<Sound>) -> bool {
        if self.active.len() + self.retired.len() >= MAX_PLAYING_SOUNDS {
            warn!("Sound mixer full, not playing {}", sound.id);
            return false;
        }
        sound.in_use.fetch_add(1, Ordering::AcqRel);
        self.active.push(Playing { sound, cursor: 0 });
        true
    }

    /// Retire every playback of `sound`
    pub fn stop(&mut self, sound: &Arc<Sound>) {
        let mut i = 0;
        while i < self.active.len() {
            if Arc::ptr_eq(&self.active[i].sound, sound) {
                let playing = self.active.swap_remove(i);
                self.retired.push(playing.sound);
            } else {
                i += 1;
            }
        }
    }

    /// Retire everything (engine reinitialization)
    pub fn stop_all(&mut self) {
        for playing in self.active.drain(..) {
            self.retired.push(playing.sound);
        }
    }

    pub fn playing(&self) -> usize {
        self.active.len()
    }

    /// Add `frames` frames of every playing sound into `out`
    ///
    /// Each sample is scaled by the sound's volume and `master`. Real-time
    /// safe: sounds whose buffers are being rebuilt are skipped this pass.
    pub fn mix(&mut self, out: &mut [f32], frames: usize, channels: usize, master: f32) {
        let mut i = 0;
        while i < self.active.len() {
            let finished = {
                let playing = &mut self.active[i];
                match playing.sound.rendered.try_read() {
                    Some(rendered) if rendered.channels == channels => {
                        let total = rendered.samples.len() / channels;
                        let n = (total - playing.cursor.min(total)).min(frames);
                        let gain = playing.sound.volume() * master;

                        let src = &rendered.samples
                            [playing.cursor * channels..(playing.cursor + n) * channels];
                        for (dst, s) in out[..n * channels].iter_mut().zip(src) {
                            *dst += s * gain;
                        }
                        playing.cursor += n;
                        playing.cursor >= total
                    }
                    Some(_) => true,
                    None => false,
                }
            };

            if finished {
                let playing = self.active.swap_remove(i);
                self.retired.push(playing.sound);
            } else {
                i += 1;
            }
        }
    }

    /// Release retired playbacks; call outside the render path
    pub fn collect_retired(&mut self) -> usize {
        let count = self.retired.len();
        for sound in self.retired.drain(..) {
            sound.in_use.fetch_sub(1, Ordering::AcqRel);
        }
        count
    }
}
