//! Multi-resolution geometry.
//!
//! Per-level extents, block shapes and downsampling factors relative to
//! level 0, plus the affine placement of each level in physical space.

mod levels;
mod transform;

pub use levels::{clamp_block, DownsamplingPolicy, ImageGeometry, LevelGeometry};
pub use transform::AffineTransform3;
