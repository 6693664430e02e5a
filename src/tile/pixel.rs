//! Pixel representations and their decoding from raw backend bytes.
//!
//! Decoding always honours the backend's byte order, never the host's.

use crate::backend::{ByteOrder, SampleFormat, SampleKind};

/// One typed pixel representation a tile loader can produce.
pub trait PixelKind: Send + Sync + 'static {
    /// Element type of the decoded array
    type Sample: Copy + Default + Send + Sync + std::fmt::Debug + 'static;

    const TYPE: PixelType;

    /// Bytes one pixel occupies in the backend data.
    fn bytes_per_pixel() -> usize;

    /// Decode `raw`, whose length is a multiple of `bytes_per_pixel()`.
    fn decode(raw: &[u8], order: ByteOrder) -> Vec<Self::Sample>;

    fn wrap(samples: Vec<Self::Sample>) -> PixelBuffer;
}

/// The pixel representations with a typed loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    U8,
    U16,
    I32,
    F32,
    /// 8-bit RGB repacked to `0xFFRRGGBB`
    PackedRgb,
}

impl PixelType {
    /// Representation for a stored sample format, if one exists.
    pub fn from_format(format: SampleFormat) -> Option<Self> {
        match (format.kind, format.bits, format.samples_per_pixel) {
            (SampleKind::Unsigned, 8, 1) => Some(PixelType::U8),
            (SampleKind::Unsigned, 16, 1) => Some(PixelType::U16),
            (SampleKind::Signed, 32, 1) => Some(PixelType::I32),
            (SampleKind::Float, 32, 1) => Some(PixelType::F32),
            (SampleKind::Unsigned, 8, 3) => Some(PixelType::PackedRgb),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelType::U8 => "u8",
            PixelType::U16 => "u16",
            PixelType::I32 => "i32",
            PixelType::F32 => "f32",
            PixelType::PackedRgb => "argb",
        }
    }
}

/// Unsigned 8-bit grey.
#[derive(Debug, Clone, Copy)]
pub struct U8;

/// Unsigned 16-bit grey.
#[derive(Debug, Clone, Copy)]
pub struct U16;

/// Signed 32-bit grey.
#[derive(Debug, Clone, Copy)]
pub struct I32;

/// 32-bit float grey.
#[derive(Debug, Clone, Copy)]
pub struct F32;

/// 8-bit interleaved RGB, delivered as packed ARGB.
#[derive(Debug, Clone, Copy)]
pub struct PackedRgb;

/// Decode fixed-width words with the given byte order.
fn decode_words<const N: usize, T>(
    raw: &[u8],
    order: ByteOrder,
    from_le: fn([u8; N]) -> T,
    from_be: fn([u8; N]) -> T,
) -> Vec<T> {
    let convert = match order {
        ByteOrder::Little => from_le,
        ByteOrder::Big => from_be,
    };
    raw.chunks_exact(N)
        .map(|chunk| {
            let mut word = [0u8; N];
            word.copy_from_slice(chunk);
            convert(word)
        })
        .collect()
}

/// Pack one RGB triple as opaque ARGB.
#[inline]
pub fn pack_argb(r: u8, g: u8, b: u8) -> u32 {
    0xFF00_0000 | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

impl PixelKind for U8 {
    type Sample = u8;
    const TYPE: PixelType = PixelType::U8;

    fn bytes_per_pixel() -> usize {
        1
    }

    fn decode(raw: &[u8], _order: ByteOrder) -> Vec<u8> {
        raw.to_vec()
    }

    fn wrap(samples: Vec<u8>) -> PixelBuffer {
        PixelBuffer::U8(samples)
    }
}

impl PixelKind for U16 {
    type Sample = u16;
    const TYPE: PixelType = PixelType::U16;

    fn bytes_per_pixel() -> usize {
        2
    }

    fn decode(raw: &[u8], order: ByteOrder) -> Vec<u16> {
        decode_words(raw, order, u16::from_le_bytes, u16::from_be_bytes)
    }

    fn wrap(samples: Vec<u16>) -> PixelBuffer {
        PixelBuffer::U16(samples)
    }
}

impl PixelKind for I32 {
    type Sample = i32;
    const TYPE: PixelType = PixelType::I32;

    fn bytes_per_pixel() -> usize {
        4
    }

    fn decode(raw: &[u8], order: ByteOrder) -> Vec<i32> {
        decode_words(raw, order, i32::from_le_bytes, i32::from_be_bytes)
    }

    fn wrap(samples: Vec<i32>) -> PixelBuffer {
        PixelBuffer::I32(samples)
    }
}

impl PixelKind for F32 {
    type Sample = f32;
    const TYPE: PixelType = PixelType::F32;

    fn bytes_per_pixel() -> usize {
        4
    }

    fn decode(raw: &[u8], order: ByteOrder) -> Vec<f32> {
        decode_words(raw, order, f32::from_le_bytes, f32::from_be_bytes)
    }

    fn wrap(samples: Vec<f32>) -> PixelBuffer {
        PixelBuffer::F32(samples)
    }
}

impl PixelKind for PackedRgb {
    type Sample = u32;
    const TYPE: PixelType = PixelType::PackedRgb;

    fn bytes_per_pixel() -> usize {
        3
    }

    fn decode(raw: &[u8], _order: ByteOrder) -> Vec<u32> {
        raw.chunks_exact(3)
            .map(|rgb| pack_argb(rgb[0], rgb[1], rgb[2]))
            .collect()
    }

    fn wrap(samples: Vec<u32>) -> PixelBuffer {
        PixelBuffer::Argb(samples)
    }
}

// =============================================================================
// PixelBuffer
// =============================================================================

/// Decoded block in one of the supported representations.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    Argb(Vec<u32>),
}

impl PixelBuffer {
    /// Zero-filled buffer of `len` pixels.
    pub fn zeroed(pixel_type: PixelType, len: usize) -> Self {
        match pixel_type {
            PixelType::U8 => PixelBuffer::U8(vec![0; len]),
            PixelType::U16 => PixelBuffer::U16(vec![0; len]),
            PixelType::I32 => PixelBuffer::I32(vec![0; len]),
            PixelType::F32 => PixelBuffer::F32(vec![0.0; len]),
            PixelType::PackedRgb => PixelBuffer::Argb(vec![0; len]),
        }
    }

    pub fn pixel_type(&self) -> PixelType {
        match self {
            PixelBuffer::U8(_) => PixelType::U8,
            PixelBuffer::U16(_) => PixelType::U16,
            PixelBuffer::I32(_) => PixelType::I32,
            PixelBuffer::F32(_) => PixelType::F32,
            PixelBuffer::Argb(_) => PixelType::PackedRgb,
        }
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::U16(v) => v.len(),
            PixelBuffer::I32(v) => v.len(),
            PixelBuffer::F32(v) => v.len(),
            PixelBuffer::Argb(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// In-memory size in bytes, used for cache accounting.
    pub fn byte_size(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::U16(v) => v.len() * 2,
            PixelBuffer::I32(v) => v.len() * 4,
            PixelBuffer::F32(v) => v.len() * 4,
            PixelBuffer::Argb(v) => v.len() * 4,
        }
    }

    /// Convert to 8-bit pixels for display.
    ///
    /// Grey representations are min-max stretched to `0..=255`; packed ARGB
    /// becomes RGBA bytes.
    pub fn to_display(&self) -> DisplayPixels {
        fn stretch(values: impl Iterator<Item = f64> + Clone) -> Vec<u8> {
            let (min, max) = values
                .clone()
                .filter(|v| v.is_finite())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            let range = max - min;
            values
                .map(|v| {
                    if !v.is_finite() || range <= 0.0 {
                        0
                    } else {
                        (((v - min) / range) * 255.0).round() as u8
                    }
                })
                .collect()
        }

        match self {
            PixelBuffer::U8(v) => DisplayPixels::Gray(v.clone()),
            PixelBuffer::U16(v) => DisplayPixels::Gray(stretch(v.iter().map(|&x| f64::from(x)))),
            PixelBuffer::I32(v) => DisplayPixels::Gray(stretch(v.iter().map(|&x| f64::from(x)))),
            PixelBuffer::F32(v) => DisplayPixels::Gray(stretch(v.iter().map(|&x| f64::from(x)))),
            PixelBuffer::Argb(v) => DisplayPixels::Rgba(
                v.iter()
                    .flat_map(|&p| {
                        [
                            (p >> 16) as u8,
                            (p >> 8) as u8,
                            p as u8,
                            (p >> 24) as u8,
                        ]
                    })
                    .collect(),
            ),
        }
    }
}

/// 8-bit pixels ready to hand to an image encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayPixels {
    Gray(Vec<u8>),
    Rgba(Vec<u8>),
}
