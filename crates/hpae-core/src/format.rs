//! Wire sample formats and conversion to/from the engine's float domain.
//!
//! The pipeline runs on interleaved `f32` in \[-1.0, 1.0). Devices and client
//! rings use one of the integer formats below; conversion happens exactly at
//! the edges (sink input, sink output, source input, source output).
//!
//! Integer scaling uses a power-of-two divisor, so the most negative code maps
//! to exactly -1.0 and the most positive one falls just short of 1.0:
//!
//! | Format | Divisor | `MAX` → float |
//! |--------|---------|---------------|
//! | U8 | 128 (after -128 bias) | 0.99219 |
//! | S16LE | 32768 | 0.99997 |
//! | S24LE | 8388608 | 0.9999999 |
//! | S32LE | 2147483648 | 1.0 (f32 rounding) |
//!
//! Float → integer clamps before scaling, so out-of-range mixer output
//! saturates instead of wrapping.

use core::fmt;
use core::str::FromStr;

use crate::error::HpaeError;

const S16_SCALE: f32 = 32768.0;
const S24_SCALE: f32 = 8_388_608.0;
const S32_SCALE: f64 = 2_147_483_648.0;
const U8_SCALE: f32 = 128.0;

/// Interleaved PCM wire format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit, biased by 128.
    U8,
    /// Signed 16-bit little-endian.
    #[default]
    S16Le,
    /// Signed 24-bit little-endian, packed in 3 bytes.
    S24Le,
    /// Signed 32-bit little-endian.
    S32Le,
    /// 32-bit IEEE float little-endian.
    F32Le,
}

impl SampleFormat {
    /// Bytes per sample.
    #[inline]
    pub const fn sample_size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16Le => 2,
            Self::S24Le => 3,
            Self::S32Le | Self::F32Le => 4,
        }
    }

    /// Bits per sample.
    #[inline]
    pub const fn bit_width(self) -> u32 {
        self.sample_size() as u32 * 8
    }

    /// Short lowercase name (`"s16le"` etc.).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::S16Le => "s16le",
            Self::S24Le => "s24le",
            Self::S32Le => "s32le",
            Self::F32Le => "f32le",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = HpaeError;

    /// Accepts both the short (`"s16"`) and the endian-suffixed (`"s16le"`)
    /// spellings, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "u8" => Ok(Self::U8),
            "s16" | "s16le" => Ok(Self::S16Le),
            "s24" | "s24le" => Ok(Self::S24Le),
            "s32" | "s32le" => Ok(Self::S32Le),
            "f32" | "f32le" => Ok(Self::F32Le),
            other => Err(HpaeError::invalid_param(format!(
                "unknown sample format '{other}'"
            ))),
        }
    }
}

/// Converts interleaved wire samples to float.
///
/// Converts `min(src.len() / format.sample_size(), dst.len())` samples and
/// returns that count. Trailing partial samples in `src` are ignored.
pub fn convert_to_float(format: SampleFormat, src: &[u8], dst: &mut [f32]) -> usize {
    let count = (src.len() / format.sample_size()).min(dst.len());
    let dst = &mut dst[..count];
    match format {
        SampleFormat::U8 => {
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = (f32::from(s) - U8_SCALE) / U8_SCALE;
            }
        }
        SampleFormat::S16Le => {
            for (d, s) in dst.iter_mut().zip(src.chunks_exact(2)) {
                *d = f32::from(i16::from_le_bytes([s[0], s[1]])) / S16_SCALE;
            }
        }
        SampleFormat::S24Le => {
            for (d, s) in dst.iter_mut().zip(src.chunks_exact(3)) {
                // Place the 24 bits in the top of an i32, then shift back to sign-extend.
                let v = i32::from_le_bytes([0, s[0], s[1], s[2]]) >> 8;
                *d = v as f32 / S24_SCALE;
            }
        }
        SampleFormat::S32Le => {
            for (d, s) in dst.iter_mut().zip(src.chunks_exact(4)) {
                let v = i32::from_le_bytes([s[0], s[1], s[2], s[3]]);
                *d = (f64::from(v) / S32_SCALE) as f32;
            }
        }
        SampleFormat::F32Le => {
            for (d, s) in dst.iter_mut().zip(src.chunks_exact(4)) {
                *d = f32::from_le_bytes([s[0], s[1], s[2], s[3]]);
            }
        }
    }
    count
}

/// Converts float samples to interleaved wire samples.
///
/// Converts `min(src.len(), dst.len() / format.sample_size())` samples and
/// returns that count. Integer formats saturate at their limits.
pub fn convert_from_float(format: SampleFormat, src: &[f32], dst: &mut [u8]) -> usize {
    let count = src.len().min(dst.len() / format.sample_size());
    let src = &src[..count];
    match format {
        SampleFormat::U8 => {
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = ((s * U8_SCALE).round() + U8_SCALE).clamp(0.0, 255.0) as u8;
            }
        }
        SampleFormat::S16Le => {
            for (d, &s) in dst.chunks_exact_mut(2).zip(src) {
                let v = (s * S16_SCALE).round().clamp(-S16_SCALE, S16_SCALE - 1.0) as i16;
                d.copy_from_slice(&v.to_le_bytes());
            }
        }
        SampleFormat::S24Le => {
            for (d, &s) in dst.chunks_exact_mut(3).zip(src) {
                let v = (s * S24_SCALE).round().clamp(-S24_SCALE, S24_SCALE - 1.0) as i32;
                d.copy_from_slice(&v.to_le_bytes()[..3]);
            }
        }
        SampleFormat::S32Le => {
            for (d, &s) in dst.chunks_exact_mut(4).zip(src) {
                let v = (f64::from(s) * S32_SCALE)
                    .round()
                    .clamp(-S32_SCALE, S32_SCALE - 1.0) as i32;
                d.copy_from_slice(&v.to_le_bytes());
            }
        }
        SampleFormat::F32Le => {
            for (d, &s) in dst.chunks_exact_mut(4).zip(src) {
                d.copy_from_slice(&s.to_le_bytes());
            }
        }
    }
    count
}
