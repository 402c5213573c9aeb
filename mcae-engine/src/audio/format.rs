//! Audio format descriptions
//!
//! `AudioFormat` describes one side of every conversion in the engine: the
//! producer's input, a stream's ring buffer contents, the mix bus and the
//! hardware buffer. Frame size is derived on every call and never stored.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Sample encoding
///
/// Bitstream variants are compressed audio carried as 16-bit IEC 61937
/// words. They are never decoded by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    Float,
    Ac3,
    Eac3,
    Dts,
    DtsHd,
    TrueHd,
}

impl SampleFormat {
    /// Bytes per single-channel sample
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::Float => 4,
            SampleFormat::Ac3
            | SampleFormat::Eac3
            | SampleFormat::Dts
            | SampleFormat::DtsHd
            | SampleFormat::TrueHd => 2,
        }
    }

    /// True for compressed passthrough formats
    pub fn is_bitstream(self) -> bool {
        matches!(
            self,
            SampleFormat::Ac3
                | SampleFormat::Eac3
                | SampleFormat::Dts
                | SampleFormat::DtsHd
                | SampleFormat::TrueHd
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::Float => "f32",
            SampleFormat::Ac3 => "ac3",
            SampleFormat::Eac3 => "eac3",
            SampleFormat::Dts => "dts",
            SampleFormat::DtsHd => "dtshd",
            SampleFormat::TrueHd => "truehd",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Speaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Front left
    FL,
    /// Front right
    FR,
    /// Front center
    FC,
    /// Low frequency effects
    LFE,
    /// Back left
    BL,
    /// Back right
    BR,
    /// Front left of center
    FLOC,
    /// Front right of center
    FROC,
    /// Back center
    BC,
    /// Side left
    SL,
    /// Side right
    SR,
}

impl Channel {
    pub fn is_lfe(self) -> bool {
        self == Channel::LFE
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::FL => "FL",
            Channel::FR => "FR",
            Channel::FC => "FC",
            Channel::LFE => "LFE",
            Channel::BL => "BL",
            Channel::BR => "BR",
            Channel::FLOC => "FLOC",
            Channel::FROC => "FROC",
            Channel::BC => "BC",
            Channel::SL => "SL",
            Channel::SR => "SR",
        }
    }
}

/// Standard speaker configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdLayout {
    Mono,
    Stereo,
    L2_1,
    L3_0,
    L3_1,
    L4_0,
    L4_1,
    L5_0,
    L5_1,
    L7_0,
    L7_1,
}

impl StdLayout {
    pub const ALL: [StdLayout; 11] = [
        StdLayout::Mono,
        StdLayout::Stereo,
        StdLayout::L2_1,
        StdLayout::L3_0,
        StdLayout::L3_1,
        StdLayout::L4_0,
        StdLayout::L4_1,
        StdLayout::L5_0,
        StdLayout::L5_1,
        StdLayout::L7_0,
        StdLayout::L7_1,
    ];

    /// Channels in canonical engine order
    pub fn channels(self) -> &'static [Channel] {
        use Channel::*;
        match self {
            StdLayout::Mono => &[FC],
            StdLayout::Stereo => &[FL, FR],
            StdLayout::L2_1 => &[FL, FR, LFE],
            StdLayout::L3_0 => &[FL, FR, FC],
            StdLayout::L3_1 => &[FL, FR, FC, LFE],
            StdLayout::L4_0 => &[FL, FR, BL, BR],
            StdLayout::L4_1 => &[FL, FR, LFE, BL, BR],
            StdLayout::L5_0 => &[FL, FR, FC, BL, BR],
            StdLayout::L5_1 => &[FL, FR, FC, LFE, BL, BR],
            StdLayout::L7_0 => &[FL, FR, FC, BL, BR, SL, SR],
            StdLayout::L7_1 => &[FL, FR, FC, LFE, BL, BR, SL, SR],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StdLayout::Mono => "1.0",
            StdLayout::Stereo => "2.0",
            StdLayout::L2_1 => "2.1",
            StdLayout::L3_0 => "3.0",
            StdLayout::L3_1 => "3.1",
            StdLayout::L4_0 => "4.0",
            StdLayout::L4_1 => "4.1",
            StdLayout::L5_0 => "5.0",
            StdLayout::L5_1 => "5.1",
            StdLayout::L7_0 => "7.0",
            StdLayout::L7_1 => "7.1",
        }
    }

    pub fn layout(self) -> ChannelLayout {
        ChannelLayout(self.channels().to_vec())
    }
}

impl FromStr for StdLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StdLayout::ALL
            .iter()
            .copied()
            .find(|l| l.name() == s.trim())
            .ok_or_else(|| Error::Format(format!("Unknown channel layout '{}'", s)))
    }
}

impl fmt::Display for StdLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered set of distinct speaker positions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ChannelLayout(pub(crate) Vec<Channel>);

impl ChannelLayout {
    /// Build a layout, rejecting duplicate channels
    pub fn new(channels: Vec<Channel>) -> Result<Self> {
        for (i, ch) in channels.iter().enumerate() {
            if channels[..i].contains(ch) {
                return Err(Error::Format(format!("Duplicate channel {} in layout", ch.name())));
            }
        }
        Ok(Self(channels))
    }

    /// Conventional layout for a bare channel count (as reported by drivers)
    pub fn from_count(count: usize) -> Option<Self> {
        let std = match count {
            1 => StdLayout::Mono,
            2 => StdLayout::Stereo,
            3 => StdLayout::L2_1,
            4 => StdLayout::L4_0,
            5 => StdLayout::L5_0,
            6 => StdLayout::L5_1,
            7 => StdLayout::L7_0,
            8 => StdLayout::L7_1,
            _ => return None,
        };
        Some(std.layout())
    }

    pub fn channels(&self) -> &[Channel] {
        &self.0
    }

    pub fn count(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn index_of(&self, channel: Channel) -> Option<usize> {
        self.0.iter().position(|c| *c == channel)
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.0.contains(&channel)
    }

    /// Same channels, possibly in a different order
    pub fn same_channels(&self, other: &ChannelLayout) -> bool {
        self.count() == other.count() && self.0.iter().all(|c| other.contains(*c))
    }

    /// The standard layout this is, if its order is canonical
    pub fn as_std(&self) -> Option<StdLayout> {
        StdLayout::ALL
            .iter()
            .copied()
            .find(|l| l.channels() == self.0.as_slice())
    }
}

impl From<StdLayout> for ChannelLayout {
    fn from(std: StdLayout) -> Self {
        std.layout()
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(std) = self.as_std() {
            return f.write_str(std.name());
        }
        let names: Vec<&str> = self.0.iter().map(|c| c.name()).collect();
        write!(f, "[{}]", names.join(","))
    }
}

/// Complete description of an audio buffer's contents
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channel_layout: ChannelLayout, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channel_layout,
            sample_format,
        }
    }

    /// Interleaved PCM in a standard layout
    pub fn pcm(sample_rate: u32, layout: StdLayout, sample_format: SampleFormat) -> Self {
        Self::new(sample_rate, layout.layout(), sample_format)
    }

    /// IEC 61937 bitstream, always carried as a stereo 16-bit frame
    pub fn bitstream(sample_rate: u32, codec: SampleFormat) -> Self {
        Self::new(sample_rate, StdLayout::Stereo.layout(), codec)
    }

    pub fn channels(&self) -> usize {
        self.channel_layout.count()
    }

    /// Bytes per interleaved frame
    pub fn frame_size(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels()
    }

    pub fn is_bitstream(&self) -> bool {
        self.sample_format.is_bitstream()
    }

    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        match self.frame_size() {
            0 => 0,
            fs => bytes / fs,
        }
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.frame_size()
    }

    /// Reject formats the engine can never carry
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Format("Sample rate must be non-zero".to_string()));
        }
        if self.channel_layout.is_empty() {
            return Err(Error::Format("Channel layout is empty".to_string()));
        }
        if self.is_bitstream() && self.channels() != 2 {
            return Err(Error::Format(format!(
                "Bitstream {} must be carried as 2 channels, got {}",
                self.sample_format,
                self.channels()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz {} {}",
            self.sample_rate, self.channel_layout, self.sample_format
        )
    }
}
