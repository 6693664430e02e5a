//! Byte layout of a raw pyramid dataset.
//!
//! ```text
//! data file
//! ┌──────────────── series 0 ────────────────┬──── series 1 ────┐
//! │ level 0            │ level 1  │ level 2  │ level 0 │ ...    │
//! │ plane 0 │ plane 1 │…                                         │
//! └──────────────────────────────────────────────────────────────┘
//!
//! plane = height rows of (width × bytes_per_pixel) bytes, samples interleaved
//! planes per level = size_z × size_c × size_t, ordered by the dimension order
//! ```

use bytes::{Bytes, BytesMut};

use super::metadata::{DimensionOrder, ImageMetadata, PlaneAxis};
use super::{Region2, Selection};
use crate::error::{BackendError, FormatError};

// =============================================================================
// Plane indexing
// =============================================================================

/// Maps (z, channel, timepoint) to a plane index within one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub size_z: u64,
    pub size_c: u32,
    pub size_t: u32,
    pub order: DimensionOrder,

    /// Treat the stored Z and C axes as exchanged
    pub swap_zc: bool,
}

impl PlaneLayout {
    pub fn new(size_z: u64, size_c: u32, size_t: u32, order: DimensionOrder) -> Self {
        Self {
            size_z,
            size_c,
            size_t,
            order,
            swap_zc: false,
        }
    }

    pub fn with_swap_zc(mut self, swap_zc: bool) -> Self {
        self.swap_zc = swap_zc;
        self
    }

    /// Total planes in one level.
    pub fn plane_count(&self) -> u64 {
        self.size_z * u64::from(self.size_c) * u64::from(self.size_t)
    }

    /// Plane index of slice `z` of `channel` at `timepoint`.
    ///
    /// With `swap_zc` the z coordinate is stored in the channel slot of the
    /// dimension order and vice versa, sizes included.
    pub fn plane_index(&self, z: u64, channel: u32, timepoint: u32) -> u64 {
        let (z_coord, z_size, c_coord, c_size) = if self.swap_zc {
            (
                u64::from(channel),
                u64::from(self.size_c),
                z,
                self.size_z,
            )
        } else {
            (
                z,
                self.size_z,
                u64::from(channel),
                u64::from(self.size_c),
            )
        };

        let mut index = 0;
        let mut stride = 1;
        for axis in self.order.plane_axes() {
            let (coord, size) = match axis {
                PlaneAxis::Z => (z_coord, z_size),
                PlaneAxis::C => (c_coord, c_size),
                PlaneAxis::T => (u64::from(timepoint), u64::from(self.size_t)),
            };
            index += coord * stride;
            stride *= size;
        }
        index
    }
}

// =============================================================================
// Level slices
// =============================================================================

/// Location and shape of one level inside the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelSlice {
    pub offset: u64,
    pub width: u64,
    pub height: u64,
    pub planes: u64,
    pub bytes_per_pixel: usize,
}

impl LevelSlice {
    pub fn plane_bytes(&self) -> u64 {
        self.width * self.height * self.bytes_per_pixel as u64
    }

    /// Byte span covering `region` of `plane`.
    ///
    /// The span runs from the first pixel of the region's top row to the last
    /// pixel of its bottom row; [`ByteSpan::extract`] drops the columns
    /// outside the region.
    pub fn span(&self, plane: u64, region: Region2) -> Result<ByteSpan, BackendError> {
        if plane >= self.planes {
            return Err(BackendError::PlaneOutOfRange {
                plane: plane as usize,
                count: self.planes as usize,
            });
        }

        let right = u64::from(region.x) + u64::from(region.width);
        let bottom = u64::from(region.y) + u64::from(region.height);
        if right > self.width || bottom > self.height {
            return Err(BackendError::RegionOutOfBounds {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                plane_width: self.width,
                plane_height: self.height,
            });
        }

        let bpp = self.bytes_per_pixel as u64;
        let stride = self.width * bpp;
        let row_len = u64::from(region.width) * bpp;
        let rows = u64::from(region.height);

        if rows == 0 || row_len == 0 {
            return Ok(ByteSpan {
                offset: self.offset,
                len: 0,
                stride: stride as usize,
                row_len: 0,
                rows: 0,
            });
        }

        let base = self.offset + plane * self.plane_bytes();
        let offset = base + u64::from(region.y) * stride + u64::from(region.x) * bpp;
        let len = (rows - 1) * stride + row_len;

        Ok(ByteSpan {
            offset,
            len: len as usize,
            stride: stride as usize,
            row_len: row_len as usize,
            rows: rows as usize,
        })
    }
}

/// Contiguous byte range holding a region, plus how to crop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub offset: u64,
    pub len: usize,
    stride: usize,
    row_len: usize,
    rows: usize,
}

impl ByteSpan {
    /// Bytes the region itself occupies once cropped.
    pub fn region_len(&self) -> usize {
        self.rows * self.row_len
    }

    /// Crop the bytes read for this span down to the region.
    pub fn extract(&self, raw: Bytes) -> Result<Bytes, BackendError> {
        if raw.len() != self.len {
            return Err(BackendError::ShortRead {
                expected: self.len,
                actual: raw.len(),
            });
        }

        if self.rows <= 1 || self.stride == self.row_len {
            return Ok(raw);
        }

        let mut out = BytesMut::with_capacity(self.region_len());
        for row in 0..self.rows {
            let start = row * self.stride;
            out.extend_from_slice(&raw[start..start + self.row_len]);
        }
        Ok(out.freeze())
    }
}

// =============================================================================
// RawLayout
// =============================================================================

/// Offsets of every level of every series in the data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLayout {
    series: Vec<Vec<LevelSlice>>,
    channels: u32,
    total_bytes: u64,
}

impl RawLayout {
    /// Compute the layout described by `metadata`.
    pub fn new(metadata: &ImageMetadata) -> Result<Self, FormatError> {
        metadata.validate()?;

        let overflow = || FormatError::InvalidDataset {
            reason: "dataset size overflows".to_string(),
        };
        let bytes_per_pixel = metadata.format.bytes_per_pixel();
        let planes_per_z = u64::from(metadata.size_c) * u64::from(metadata.size_t);

        let mut offset: u64 = 0;
        let mut series = Vec::with_capacity(metadata.series.len());
        for s in &metadata.series {
            let mut levels = Vec::with_capacity(s.levels.len());
            for level in &s.levels {
                let [width, height, depth] = level.dimensions;
                let slice = LevelSlice {
                    offset,
                    width,
                    height,
                    planes: depth.checked_mul(planes_per_z).ok_or_else(overflow)?,
                    bytes_per_pixel,
                };
                let level_bytes = width
                    .checked_mul(height)
                    .and_then(|n| n.checked_mul(bytes_per_pixel as u64))
                    .and_then(|n| n.checked_mul(slice.planes))
                    .ok_or_else(overflow)?;
                offset = offset.checked_add(level_bytes).ok_or_else(overflow)?;
                levels.push(slice);
            }
            series.push(levels);
        }

        Ok(Self {
            series,
            channels: metadata.size_c,
            total_bytes: offset,
        })
    }

    /// Size the data file must have.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Resolve a selection to its level slice.
    pub fn level(&self, selection: Selection) -> Result<LevelSlice, BackendError> {
        let invalid = BackendError::InvalidSelection {
            series: selection.series,
            level: selection.level,
            channel: selection.channel,
        };
        if selection.channel >= self.channels as usize {
            return Err(invalid);
        }
        self.series
            .get(selection.series)
            .and_then(|levels| levels.get(selection.level))
            .copied()
            .ok_or(invalid)
    }
}

// =============================================================================
// Per-handle selection
// =============================================================================

/// Active selection of one handle.
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    active: Option<(Selection, LevelSlice)>,
}

impl SelectionState {
    pub fn select(&mut self, layout: &RawLayout, selection: Selection) -> Result<(), BackendError> {
        let slice = layout.level(selection)?;
        self.active = Some((selection, slice));
        Ok(())
    }

    pub fn selection(&self) -> Option<Selection> {
        self.active.map(|(selection, _)| selection)
    }

    /// Byte span of `region` of `plane` in the selected level.
    pub fn span(&self, plane: u64, region: Region2) -> Result<ByteSpan, BackendError> {
        let (_, slice) = self.active.ok_or(BackendError::NoSelection)?;
        slice.span(plane, region)
    }
}
