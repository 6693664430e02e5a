use crate::backend::{BackendKind, LevelMetadata, SeriesMetadata};
use crate::error::GeometryError;

use super::transform::AffineTransform3;

/// How per-level downsampling factors are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownsamplingPolicy {
    /// `extent[0] / extent[level]` per axis
    FromExtents,
    /// `2^level` in x and y, 1 in z
    PowerOfTwo,
    /// Extent ratios for levels where every axis divides exactly, `2^level`
    /// in x and y (1 in z) for levels with rounded extents
    IntegralExtentsOrPowerOfTwo,
}

impl DownsamplingPolicy {
    /// Remote datasets are often written by tools that round halved extents,
    /// so their non-integral ratios fall back to powers of two.
    pub fn for_backend(kind: BackendKind) -> Self {
        match kind {
            BackendKind::RemoteStore => DownsamplingPolicy::IntegralExtentsOrPowerOfTwo,
            BackendKind::LocalFile | BackendKind::Memory => DownsamplingPolicy::FromExtents,
        }
    }

    /// Factors for every level.
    pub fn factors(&self, levels: &[LevelMetadata]) -> Vec<[f64; 3]> {
        let Some(base) = levels.first() else {
            return Vec::new();
        };
        levels
            .iter()
            .enumerate()
            .map(|(index, level)| match self {
                DownsamplingPolicy::FromExtents => extent_ratios(base, level),
                DownsamplingPolicy::PowerOfTwo => power_of_two(index),
                DownsamplingPolicy::IntegralExtentsOrPowerOfTwo => {
                    let ratios = extent_ratios(base, level);
                    if ratios.iter().all(|r| r.fract() == 0.0) {
                        ratios
                    } else {
                        power_of_two(index)
                    }
                }
            })
            .collect()
    }
}

fn extent_ratios(base: &LevelMetadata, level: &LevelMetadata) -> [f64; 3] {
    let mut factors = [1.0; 3];
    for (axis, factor) in factors.iter_mut().enumerate() {
        *factor = base.dimensions[axis] as f64 / level.dimensions[axis] as f64;
    }
    factors
}

fn power_of_two(level: usize) -> [f64; 3] {
    let f = 2f64.powi(level as i32);
    [f, f, 1.0]
}

/// Clamp a block at `origin` with `shape` to `extent`.
///
/// Returns the readable shape; any axis starting at or beyond the extent
/// yields zero.
pub fn clamp_block(origin: [u64; 3], shape: [u32; 3], extent: [u64; 3]) -> [u32; 3] {
    let mut clamped = [0u32; 3];
    for axis in 0..3 {
        let available = extent[axis].saturating_sub(origin[axis]);
        clamped[axis] = available.min(u64::from(shape[axis])) as u32;
    }
    clamped
}

/// Geometry of one resolution level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelGeometry {
    pub dimensions: [u64; 3],
    pub block_shape: [u32; 3],
    /// Downsampling relative to level 0
    pub downsampling: [f64; 3],
}

/// Geometry of every level of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGeometry {
    levels: Vec<LevelGeometry>,
    voxel_size: [f64; 3],
}

impl ImageGeometry {
    /// Build from level metadata with factors computed by `policy`.
    pub fn new(
        levels: &[LevelMetadata],
        voxel_size: [f64; 3],
        policy: DownsamplingPolicy,
    ) -> Result<Self, GeometryError> {
        let factors = policy.factors(levels);
        Self::with_factors(levels, &factors, voxel_size)
    }

    /// Geometry of `series` as read through a backend of `kind`.
    pub fn from_series(series: &SeriesMetadata, kind: BackendKind) -> Result<Self, GeometryError> {
        Self::new(
            &series.levels,
            series.voxel_size,
            DownsamplingPolicy::for_backend(kind),
        )
    }

    /// Build from explicit factors, validating them.
    pub fn with_factors(
        levels: &[LevelMetadata],
        factors: &[[f64; 3]],
        voxel_size: [f64; 3],
    ) -> Result<Self, GeometryError> {
        if levels.is_empty() {
            return Err(GeometryError::NoLevels);
        }
        if factors.len() != levels.len() {
            return Err(GeometryError::InvalidLevel {
                level: factors.len(),
                levels: levels.len(),
            });
        }
        if factors[0] != [1.0, 1.0, 1.0] {
            return Err(GeometryError::BadBaseFactor {
                factors: factors[0],
            });
        }

        let mut out = Vec::with_capacity(levels.len());
        for (level, (meta, f)) in levels.iter().zip(factors).enumerate() {
            if meta.dimensions.contains(&0) || meta.block_shape.contains(&0) {
                return Err(GeometryError::EmptyLevel { level });
            }
            if level > 0 {
                let previous = factors[level - 1];
                if let Some(axis) = (0..3).find(|&axis| f[axis] < previous[axis]) {
                    return Err(GeometryError::NonMonotonic { level, axis });
                }
            }
            out.push(LevelGeometry {
                dimensions: meta.dimensions,
                block_shape: meta.block_shape,
                downsampling: *f,
            });
        }

        Ok(Self {
            levels: out,
            voxel_size,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[LevelGeometry] {
        &self.levels
    }

    pub fn voxel_size(&self) -> [f64; 3] {
        self.voxel_size
    }

    pub fn level(&self, level: usize) -> Result<&LevelGeometry, GeometryError> {
        self.levels.get(level).ok_or(GeometryError::InvalidLevel {
            level,
            levels: self.levels.len(),
        })
    }

    pub fn downsampling_factors(&self) -> Vec<[f64; 3]> {
        self.levels.iter().map(|l| l.downsampling).collect()
    }

    /// Readable part of a block requested at `level`.
    pub fn clamp_block(
        &self,
        level: usize,
        origin: [u64; 3],
        shape: [u32; 3],
    ) -> Result<[u32; 3], GeometryError> {
        Ok(clamp_block(origin, shape, self.level(level)?.dimensions))
    }

    /// Transform from `level` voxel coordinates to physical coordinates.
    pub fn level_transform(&self, level: usize) -> Result<AffineTransform3, GeometryError> {
        let factors = self.level(level)?.downsampling;
        Ok(AffineTransform3::scale(self.voxel_size).compose(&AffineTransform3::mipmap(factors)))
    }
}
