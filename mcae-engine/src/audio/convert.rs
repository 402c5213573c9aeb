//! Sample format conversion
//!
//! All integer formats are converted to normalized `f32` on the way in and
//! back (rounded and saturated) on the way out. Samples are native-endian.

use super::format::SampleFormat;
use crate::error::{Error, Result};

const S16_SCALE: f32 = 32768.0;
const S32_SCALE: f64 = 2_147_483_648.0;
const U8_SCALE: f32 = 128.0;

/// Decode raw samples into `out`, returning the number of samples written
///
/// `input` must hold whole samples; `out` must have room for all of them.
pub fn to_float(format: SampleFormat, input: &[u8], out: &mut [f32]) -> Result<usize> {
    if format.is_bitstream() {
        return Err(Error::Format(format!("Cannot convert bitstream {} to float", format)));
    }
    let bps = format.bytes_per_sample();
    if input.len() % bps != 0 {
        return Err(Error::Format(format!(
            "Input length {} is not a whole number of {} samples",
            input.len(),
            format
        )));
    }
    let samples = input.len() / bps;
    if out.len() < samples {
        return Err(Error::Format(format!(
            "Float buffer too small: need {}, have {}",
            samples,
            out.len()
        )));
    }

    match format {
        SampleFormat::U8 => {
            for (dst, &b) in out.iter_mut().zip(input) {
                *dst = (b as f32 - 128.0) / U8_SCALE;
            }
        }
        SampleFormat::S16 => {
            for (dst, chunk) in out.iter_mut().zip(input.chunks_exact(2)) {
                *dst = i16::from_ne_bytes([chunk[0], chunk[1]]) as f32 / S16_SCALE;
            }
        }
        SampleFormat::S32 => {
            for (dst, chunk) in out.iter_mut().zip(input.chunks_exact(4)) {
                let v = i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                *dst = (v as f64 / S32_SCALE) as f32;
            }
        }
        SampleFormat::Float => match bytemuck::try_cast_slice::<u8, f32>(input) {
            Ok(floats) => out[..samples].copy_from_slice(floats),
            Err(_) => {
                for (dst, chunk) in out.iter_mut().zip(input.chunks_exact(4)) {
                    *dst = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
            }
        },
        _ => return Ok(0),
    }

    Ok(samples)
}

/// Encode normalized samples into `out` in the given format
///
/// Values outside [-1.0, 1.0] are clamped, never wrapped. Returns the number
/// of bytes written. Real-time safe: no allocation.
pub fn from_float(format: SampleFormat, input: &[f32], out: &mut [u8]) -> usize {
    let bps = format.bytes_per_sample();
    let samples = input.len().min(out.len() / bps);

    match format {
        SampleFormat::U8 => {
            for (dst, &s) in out.iter_mut().zip(&input[..samples]) {
                *dst = (s * U8_SCALE + 128.0).round().clamp(0.0, 255.0) as u8;
            }
        }
        SampleFormat::S16 => {
            for (dst, &s) in out.chunks_exact_mut(2).zip(&input[..samples]) {
                dst.copy_from_slice(&float_to_s16(s).to_ne_bytes());
            }
        }
        SampleFormat::S32 => {
            for (dst, &s) in out.chunks_exact_mut(4).zip(&input[..samples]) {
                let v = (s as f64 * S32_SCALE)
                    .round()
                    .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                dst.copy_from_slice(&v.to_ne_bytes());
            }
        }
        SampleFormat::Float => {
            for (dst, &s) in out.chunks_exact_mut(4).zip(&input[..samples]) {
                dst.copy_from_slice(&s.clamp(-1.0, 1.0).to_ne_bytes());
            }
        }
        // Bitstream output never comes from the float mix
        _ => return 0,
    }

    samples * bps
}

/// Round and saturate a single sample to 16 bits
#[inline]
pub fn float_to_s16(sample: f32) -> i16 {
    (sample * S16_SCALE).round().clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s16_round_trip_exact() {
        let input: Vec<i16> = vec![i16::MIN, -12345, -1, 0, 1, 12345, i16::MAX];
        let bytes: &[u8] = bytemuck::cast_slice(&input);

        let mut floats = vec![0.0f32; input.len()];
        assert_eq!(to_float(SampleFormat::S16, bytes, &mut floats).unwrap(), input.len());

        let mut out = vec![0u8; bytes.len()];
        assert_eq!(from_float(SampleFormat::S16, &floats, &mut out), bytes.len());

        let back: Vec<i16> = out
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]))
            .collect();
        for (a, b) in input.iter().zip(&back) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_u8_midpoint_is_zero() {
        let mut floats = [1.0f32; 3];
        to_float(SampleFormat::U8, &[0, 128, 255], &mut floats).unwrap();
        assert_eq!(floats[0], -1.0);
        assert_eq!(floats[1], 0.0);
        assert!((floats[2] - 0.9921875).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let mut out = [0u8; 4];
        from_float(SampleFormat::S16, &[2.0, -2.0], &mut out);
        assert_eq!(i16::from_ne_bytes([out[0], out[1]]), i16::MAX);
        assert_eq!(i16::from_ne_bytes([out[2], out[3]]), i16::MIN);
    }

    #[test]
    fn test_partial_sample_rejected() {
        let mut floats = [0.0f32; 4];
        assert!(to_float(SampleFormat::S16, &[0, 0, 0], &mut floats).is_err());
    }

    #[test]
    fn test_bitstream_not_convertible() {
        let mut floats = [0.0f32; 4];
        assert!(to_float(SampleFormat::Ac3, &[0, 0], &mut floats).is_err());
    }

    #[test]
    fn test_float_passthrough_and_s32() {
        let input = [0.25f32, -0.5];
        let mut floats = [0.0f32; 2];
        to_float(SampleFormat::Float, bytemuck::cast_slice(&input), &mut floats).unwrap();
        assert_eq!(floats, input);

        let mut out = [0u8; 8];
        from_float(SampleFormat::S32, &input, &mut out);
        assert_eq!(i32::from_ne_bytes([out[0], out[1], out[2], out[3]]), 1 << 29);
    }
}
