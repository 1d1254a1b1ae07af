//! Conversion between fixed-point samples and 8/16/24-bit PCM in either byte
//! order.

use serde::{Deserialize, Serialize};

use crate::error::{EditError, Result};
use crate::{Sample, SAMPLE_MAX, SAMPLE_MIN};

const FULL_SCALE: f32 = 8_388_608.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    pub fn read_u16(self, b: &[u8]) -> u16 {
        let raw = [b[0], b[1]];
        match self {
            ByteOrder::Little => u16::from_le_bytes(raw),
            ByteOrder::Big => u16::from_be_bytes(raw),
        }
    }

    pub fn read_u32(self, b: &[u8]) -> u32 {
        let raw = [b[0], b[1], b[2], b[3]];
        match self {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        }
    }

    pub fn put_u16(self, v: u16, out: &mut Vec<u8>) {
        match self {
            ByteOrder::Little => out.extend_from_slice(&v.to_le_bytes()),
            ByteOrder::Big => out.extend_from_slice(&v.to_be_bytes()),
        }
    }

    pub fn put_u32(self, v: u32, out: &mut Vec<u8>) {
        match self {
            ByteOrder::Little => out.extend_from_slice(&v.to_le_bytes()),
            ByteOrder::Big => out.extend_from_slice(&v.to_be_bytes()),
        }
    }
}

/// Bytes per sample for a supported width.
pub fn bytes_per_sample(bits: u16) -> Result<usize> {
    match bits {
        8 => Ok(1),
        16 => Ok(2),
        24 => Ok(3),
        other => Err(EditError::UnsupportedFormat { bits: other }),
    }
}

/// Decode one sample. 8-bit data is unsigned with a 128 offset.
#[inline]
pub fn decode_sample(raw: &[u8], bits: u16, order: ByteOrder) -> Sample {
    match bits {
        8 => (raw[0] as Sample - 128) << 16,
        16 => (order.read_u16(raw) as i16 as Sample) << 8,
        _ => {
            let x = match order {
                ByteOrder::Little => {
                    raw[0] as u32 | (raw[1] as u32) << 8 | (raw[2] as u32) << 16
                }
                ByteOrder::Big => {
                    raw[2] as u32 | (raw[1] as u32) << 8 | (raw[0] as u32) << 16
                }
            };
            ((x << 8) as i32) >> 8
        }
    }
}

#[inline]
pub fn encode_sample(s: Sample, bits: u16, order: ByteOrder, out: &mut Vec<u8>) {
    let s = s.clamp(SAMPLE_MIN, SAMPLE_MAX);
    match bits {
        8 => out.push(((s >> 16) + 128) as u8),
        16 => order.put_u16((s >> 8) as i16 as u16, out),
        _ => {
            let b = (s as u32).to_le_bytes();
            match order {
                ByteOrder::Little => out.extend_from_slice(&b[..3]),
                ByteOrder::Big => out.extend_from_slice(&[b[2], b[1], b[0]]),
            }
        }
    }
}

/// Generic loader: `out.len()` samples starting at byte `offset`, `stride`
/// bytes apart.
pub fn load_strided(
    data: &[u8],
    offset: usize,
    stride: usize,
    bits: u16,
    order: ByteOrder,
    out: &mut [Sample],
) {
    let width = (bits / 8) as usize;
    for (i, slot) in out.iter_mut().enumerate() {
        let at = offset + i * stride;
        *slot = match data.get(at..at + width) {
            Some(raw) => decode_sample(raw, bits, order),
            None => 0,
        };
    }
}

/// Fast path for interleaved 16-bit frames.
pub fn deinterleave_i16(data: &[u8], order: ByteOrder, out: &mut [&mut [Sample]]) {
    let channels = out.len();
    if channels == 0 {
        return;
    }
    let frames = out.iter().map(|c| c.len()).min().unwrap_or(0);
    for (f, frame) in data.chunks_exact(channels * 2).take(frames).enumerate() {
        for (c, raw) in frame.chunks_exact(2).enumerate() {
            let v = match order {
                ByteOrder::Little => i16::from_le_bytes([raw[0], raw[1]]),
                ByteOrder::Big => i16::from_be_bytes([raw[0], raw[1]]),
            };
            out[c][f] = (v as Sample) << 8;
        }
    }
}

#[inline]
pub fn fixed_to_f32(s: Sample) -> f32 {
    s as f32 / FULL_SCALE
}

#[inline]
pub fn fixed_from_f32(v: f32) -> Sample {
    crate::clamp_sample(v as f64 * FULL_SCALE as f64)
}

/// One device buffer at the negotiated width.
#[derive(Clone, Debug, PartialEq)]
pub enum PcmFragment {
    U8(Vec<u8>),
    I16(Vec<i16>),
    /// 24-bit values in the low bits of an `i32`.
    I24(Vec<i32>),
}

impl PcmFragment {
    pub fn encode(samples: &[Sample], bits: u16) -> Result<Self> {
        bytes_per_sample(bits)?;
        Ok(match bits {
            8 => PcmFragment::U8(
                samples
                    .iter()
                    .map(|&s| ((s.clamp(SAMPLE_MIN, SAMPLE_MAX) >> 16) + 128) as u8)
                    .collect(),
            ),
            16 => PcmFragment::I16(
                samples
                    .iter()
                    .map(|&s| (s.clamp(SAMPLE_MIN, SAMPLE_MAX) >> 8) as i16)
                    .collect(),
            ),
            _ => PcmFragment::I24(
                samples
                    .iter()
                    .map(|&s| s.clamp(SAMPLE_MIN, SAMPLE_MAX))
                    .collect(),
            ),
        })
    }

    pub fn bits(&self) -> u16 {
        match self {
            PcmFragment::U8(_) => 8,
            PcmFragment::I16(_) => 16,
            PcmFragment::I24(_) => 24,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PcmFragment::U8(v) => v.len(),
            PcmFragment::I16(v) => v.len(),
            PcmFragment::I24(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Back to the 24-bit fixed-point scale.
    pub fn to_fixed(&self) -> Vec<Sample> {
        match self {
            PcmFragment::U8(v) => v.iter().map(|&b| (b as Sample - 128) << 16).collect(),
            PcmFragment::I16(v) => v.iter().map(|&x| (x as Sample) << 8).collect(),
            PcmFragment::I24(v) => v.clone(),
        }
    }

    pub fn to_f32(&self) -> Vec<f32> {
        self.to_fixed().into_iter().map(fixed_to_f32).collect()
    }
}
