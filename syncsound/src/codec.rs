//! Sample byte-order conversion between bus order and host order.
//!
//! The bus carries samples big-endian. Little-endian client formats are
//! byte-swapped per sample on the way in and out; big-endian and 8-bit
//! formats are copied unchanged. The codec is chosen once when a stream is
//! prepared and stays fixed until the next prepare.
//!
//! Conversion is symmetric: the playback path calls
//! `convert(unit, ring)` and the capture path `convert(ring, unit)`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SyncSoundError};

/// Byte order of a sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

/// Negotiated sample layout: physical width in bits plus byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleFormat {
    pub physical_width: u32,
    pub endianness: Endianness,
}

impl SampleFormat {
    /// 8-bit samples; byte order is irrelevant.
    pub const U8: Self = Self::new(8, Endianness::Little);
    pub const S16_LE: Self = Self::new(16, Endianness::Little);
    pub const S16_BE: Self = Self::new(16, Endianness::Big);
    /// 24-bit samples packed in 3 bytes.
    pub const S24_3LE: Self = Self::new(24, Endianness::Little);
    pub const S24_3BE: Self = Self::new(24, Endianness::Big);
    pub const S32_LE: Self = Self::new(32, Endianness::Little);
    pub const S32_BE: Self = Self::new(32, Endianness::Big);

    pub const fn new(physical_width: u32, endianness: Endianness) -> Self {
        Self {
            physical_width,
            endianness,
        }
    }

    pub fn is_big_endian(&self) -> bool {
        self.endianness == Endianness::Big
    }

    /// Bytes per frame for `channels` interleaved samples.
    pub fn frame_bytes(&self, channels: u32) -> usize {
        (self.physical_width * channels / 8) as usize
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = match self.endianness {
            Endianness::Little => "le",
            Endianness::Big => "be",
        };
        match self.physical_width {
            8 => write!(f, "u8"),
            24 => write!(f, "s24_3{order}"),
            width => write!(f, "s{width}_{order}"),
        }
    }
}

impl FromStr for SampleFormat {
    type Err = SyncSoundError;

    fn from_str(s: &str) -> Result<Self> {
        let format = match s.to_ascii_lowercase().as_str() {
            "u8" | "s8" => Self::U8,
            "s16_le" => Self::S16_LE,
            "s16_be" => Self::S16_BE,
            "s24_3le" => Self::S24_3LE,
            "s24_3be" => Self::S24_3BE,
            "s32_le" => Self::S32_LE,
            "s32_be" => Self::S32_BE,
            other => {
                return Err(SyncSoundError::InvalidParameter(format!(
                    "unknown sample format '{other}'"
                )))
            }
        };
        Ok(format)
    }
}

/// Byte transformation applied to every block moved across the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Straight copy (8-bit or already big-endian).
    Copy,
    Swap16,
    Swap24,
    Swap32,
}

impl Codec {
    /// Select the codec for a negotiated sample format.
    ///
    /// Widths other than 8, 16, 24 and 32 bits are rejected.
    pub fn for_format(format: SampleFormat) -> Result<Self> {
        let width = format.physical_width;
        if !matches!(width, 8 | 16 | 24 | 32) {
            return Err(SyncSoundError::InvalidParameter(format!(
                "unsupported format: {width}-bit samples"
            )));
        }
        if width == 8 || format.is_big_endian() {
            return Ok(Codec::Copy);
        }
        Ok(match width {
            16 => Codec::Swap16,
            24 => Codec::Swap24,
            _ => Codec::Swap32,
        })
    }

    /// Width in bytes of the sample group this codec operates on.
    pub fn sample_bytes(self) -> usize {
        match self {
            Codec::Copy => 1,
            Codec::Swap16 => 2,
            Codec::Swap24 => 3,
            Codec::Swap32 => 4,
        }
    }

    /// Convert `src` into `dst`. Both slices must have the same length,
    /// a multiple of [`sample_bytes`](Self::sample_bytes).
    pub fn convert(self, dst: &mut [u8], src: &[u8]) {
        debug_assert_eq!(dst.len(), src.len());
        match self {
            Codec::Copy => dst.copy_from_slice(src),
            Codec::Swap16 => swap_copy::<2>(dst, src),
            Codec::Swap24 => swap_copy::<3>(dst, src),
            Codec::Swap32 => swap_copy::<4>(dst, src),
        }
    }
}

/// Reverse the bytes of every `N`-byte sample. Only whole samples are
/// processed; for `N == 3` this is the `[a,b,c] -> [c,b,a]` swap.
fn swap_copy<const N: usize>(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(src.len() % N, 0, "byte count must be a multiple of {N}");
    for (d, s) in dst.chunks_exact_mut(N).zip(src.chunks_exact(N)) {
        for (out, byte) in d.iter_mut().zip(s.iter().rev()) {
            *out = *byte;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(codec: Codec, src: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; src.len()];
        codec.convert(&mut out, src);
        out
    }

    #[test]
    fn test_select_by_width_and_order() {
        assert_eq!(Codec::for_format(SampleFormat::U8).unwrap(), Codec::Copy);
        assert_eq!(Codec::for_format(SampleFormat::S16_LE).unwrap(), Codec::Swap16);
        assert_eq!(Codec::for_format(SampleFormat::S16_BE).unwrap(), Codec::Copy);
        assert_eq!(Codec::for_format(SampleFormat::S24_3LE).unwrap(), Codec::Swap24);
        assert_eq!(Codec::for_format(SampleFormat::S24_3BE).unwrap(), Codec::Copy);
        assert_eq!(Codec::for_format(SampleFormat::S32_LE).unwrap(), Codec::Swap32);
        assert_eq!(Codec::for_format(SampleFormat::S32_BE).unwrap(), Codec::Copy);
    }

    #[test]
    fn test_unsupported_width_rejected() {
        let err = Codec::for_format(SampleFormat::new(20, Endianness::Little)).unwrap_err();
        assert!(matches!(err, SyncSoundError::InvalidParameter(_)));
        // Big-endian does not rescue an unknown width.
        assert!(Codec::for_format(SampleFormat::new(12, Endianness::Big)).is_err());
    }

    #[test]
    fn test_swap16_example() {
        let out = convert(Codec::Swap16, &[0x00, 0x01, 0xFF, 0x00]);
        assert_eq!(out, vec![0x01, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn test_swap24_example() {
        let out = convert(Codec::Swap24, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(out, vec![0x03, 0x02, 0x01, 0x06, 0x05, 0x04]);
    }

    #[test]
    fn test_swap32_reverses_words() {
        let out = convert(Codec::Swap32, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(out, vec![4, 3, 2, 1, 8, 7, 6, 5]);
        let word = 0x1122_3344u32;
        let out = convert(Codec::Swap32, &word.to_le_bytes());
        assert_eq!(out, word.to_be_bytes());
    }

    #[test]
    fn test_copy_is_identity() {
        let src = [9u8, 8, 7, 6, 5];
        assert_eq!(convert(Codec::Copy, &src), src.to_vec());
    }

    #[test]
    fn test_round_trip_restores_input() {
        for codec in [Codec::Swap16, Codec::Swap24, Codec::Swap32] {
            let width = codec.sample_bytes();
            for samples in [1usize, 2, 7, 64] {
                let src: Vec<u8> = (0..samples * width).map(|i| (i * 37 + 11) as u8).collect();
                let bus = convert(codec, &src);
                let back = convert(codec, &bus);
                assert_eq!(back, src, "{codec:?} with {samples} samples");
            }
        }
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(SampleFormat::S16_LE.frame_bytes(2), 4);
        assert_eq!(SampleFormat::S24_3BE.frame_bytes(6), 18);
        assert_eq!(SampleFormat::U8.frame_bytes(1), 1);
        assert_eq!(SampleFormat::S24_3LE.to_string(), "s24_3le");
        assert_eq!("S16_BE".parse::<SampleFormat>().unwrap(), SampleFormat::S16_BE);
        assert!("s20_le".parse::<SampleFormat>().is_err());
    }
}
