//! Output graph: layout negotiation, mixing matrices and input buses
//!
//! The hardware's preferred layout is tried first, then the user's configured
//! layout. The first candidate for which a mixing matrix exists wins.

use crate::audio::format::{Channel, ChannelLayout, StdLayout};
use crate::audio::mix_matrix::MixMatrix;
use crate::error::{Error, Result};
use tracing::{debug, info};

/// Maximum number of concurrently mixed streams
pub const MAX_INPUT_BUSES: usize = 16;

const MINUS_3DB: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Build the matrix mapping `input` to `output`
///
/// Well-known standard-layout pairs use fixed coefficient tables; anything
/// else gets a same-position / nearest-position matrix normalized so no
/// output row sums above unity.
pub fn build_mix_map(input: &ChannelLayout, output: &ChannelLayout) -> Result<MixMatrix> {
    if input.is_empty() || output.is_empty() {
        return Err(mix_error(input, output));
    }

    if input == output {
        return Ok(MixMatrix::identity(input));
    }

    let matrix = match well_known(input, output) {
        Some(matrix) => matrix,
        None => nearest_channel_map(input, output),
    };

    if matrix.is_silent() {
        return Err(mix_error(input, output));
    }
    Ok(matrix)
}

fn mix_error(input: &ChannelLayout, output: &ChannelLayout) -> Error {
    Error::MixMap {
        from: input.to_string(),
        to: output.to_string(),
    }
}

/// Fixed tables for common standard-layout pairs
fn well_known(input: &ChannelLayout, output: &ChannelLayout) -> Option<MixMatrix> {
    use Channel::*;

    let pair = (input.as_std()?, output.as_std()?);
    let mut m = MixMatrix::zeros(input.clone(), output.clone());

    match pair {
        (StdLayout::Mono, StdLayout::Stereo) => {
            m.set(FC, FL, 1.0);
            m.set(FC, FR, 1.0);
        }
        (StdLayout::Stereo, StdLayout::Mono) => {
            m.set(FL, FC, 0.5);
            m.set(FR, FC, 0.5);
        }
        (StdLayout::Stereo, StdLayout::L5_1) | (StdLayout::Stereo, StdLayout::L7_1) => {
            m.set(FL, FL, 1.0);
            m.set(FR, FR, 1.0);
        }
        (StdLayout::L5_1, StdLayout::Stereo) | (StdLayout::L5_0, StdLayout::Stereo) => {
            m.set(FL, FL, 1.0);
            m.set(FR, FR, 1.0);
            m.set(FC, FL, MINUS_3DB);
            m.set(FC, FR, MINUS_3DB);
            m.set(BL, FL, MINUS_3DB);
            m.set(BR, FR, MINUS_3DB);
            m.normalize_rows();
        }
        (StdLayout::L7_1, StdLayout::Stereo) | (StdLayout::L7_0, StdLayout::Stereo) => {
            m.set(FL, FL, 1.0);
            m.set(FR, FR, 1.0);
            m.set(FC, FL, MINUS_3DB);
            m.set(FC, FR, MINUS_3DB);
            m.set(SL, FL, MINUS_3DB);
            m.set(SR, FR, MINUS_3DB);
            m.set(BL, FL, MINUS_3DB);
            m.set(BR, FR, MINUS_3DB);
            m.normalize_rows();
        }
        (StdLayout::L7_1, StdLayout::L5_1) => {
            for ch in [FL, FR, FC, LFE] {
                m.set(ch, ch, 1.0);
            }
            m.set(BL, BL, MINUS_3DB);
            m.set(SL, BL, MINUS_3DB);
            m.set(BR, BR, MINUS_3DB);
            m.set(SR, BR, MINUS_3DB);
        }
        _ => return None,
    }
    Some(m)
}

/// Substitutes for a channel the output lacks, best first
fn neighbours(channel: Channel) -> &'static [&'static [Channel]] {
    use Channel::*;
    match channel {
        FL | FR => &[&[FC]],
        FC => &[&[FL, FR]],
        FLOC => &[&[FL], &[FC]],
        FROC => &[&[FR], &[FC]],
        BL => &[&[SL], &[FL], &[FC]],
        BR => &[&[SR], &[FR], &[FC]],
        SL => &[&[BL], &[FL], &[FC]],
        SR => &[&[BR], &[FR], &[FC]],
        BC => &[&[BL, BR], &[SL, SR], &[FL, FR], &[FC]],
        LFE => &[],
    }
}

fn nearest_channel_map(input: &ChannelLayout, output: &ChannelLayout) -> MixMatrix {
    let mut m = MixMatrix::zeros(input.clone(), output.clone());

    for &ch in input.channels() {
        if output.contains(ch) {
            m.set(ch, ch, 1.0);
            continue;
        }
        let group = neighbours(ch)
            .iter()
            .find(|group| group.iter().all(|c| output.contains(*c)));
        if let Some(group) = group {
            let gain = 1.0 / (group.len() as f32).sqrt();
            for &target in group.iter() {
                m.set(ch, target, gain);
            }
        }
    }

    m.normalize_rows();
    m
}

/// Pick the mix layout for a stream layout and build its matrix
///
/// Candidates are tried in order: hardware preferred, then user configured.
pub fn negotiate(
    input: &ChannelLayout,
    hardware: Option<&ChannelLayout>,
    user: &ChannelLayout,
) -> Result<(ChannelLayout, MixMatrix)> {
    let candidates = hardware.into_iter().chain(std::iter::once(user));

    let mut last_err = None;
    for candidate in candidates {
        match build_mix_map(input, candidate) {
            Ok(matrix) => {
                info!("Negotiated output layout {} for input {}", candidate, input);
                return Ok((candidate.clone(), matrix));
            }
            Err(e) => {
                debug!("Layout candidate {} rejected: {}", candidate, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| mix_error(input, user)))
}

/// Default hardware order for 8-channel devices
pub fn default_hw_order_8ch() -> ChannelLayout {
    use Channel::*;
    ChannelLayout(vec![FL, FR, FC, LFE, SL, SR, BL, BR])
}

/// Index map from `engine` order to `hardware` order
///
/// `result[h]` is the engine channel written to hardware slot `h`. `None`
/// when the orders already match or the channel sets differ.
pub fn reorder_map(engine: &ChannelLayout, hardware: &ChannelLayout) -> Option<Vec<usize>> {
    if engine == hardware || !engine.same_channels(hardware) {
        return None;
    }
    hardware
        .channels()
        .iter()
        .map(|ch| engine.index_of(*ch))
        .collect()
}

/// Fixed pool of input bus numbers
#[derive(Debug)]
pub struct BusPool {
    in_use: [bool; MAX_INPUT_BUSES],
}

impl Default for BusPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BusPool {
    pub fn new() -> Self {
        Self {
            in_use: [false; MAX_INPUT_BUSES],
        }
    }

    pub fn acquire(&mut self) -> Result<usize> {
        let bus = self
            .in_use
            .iter()
            .position(|used| !used)
            .ok_or(Error::NoFreeBus)?;
        self.in_use[bus] = true;
        Ok(bus)
    }

    pub fn release(&mut self, bus: usize) {
        if let Some(slot) = self.in_use.get_mut(bus) {
            *slot = false;
        }
    }

    pub fn available(&self) -> usize {
        self.in_use.iter().filter(|used| !**used).count()
    }
}
