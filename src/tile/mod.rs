//! Typed tile loading.
//!
//! # Components
//!
//! - [`TileLoader`]: loads blocks of one series in one pixel representation
//! - [`AnyTileLoader`]: picks the representation from the driver's sample format
//! - [`PixelBuffer`]: a decoded block in any representation
//! - [`PixelKind`]: decoding rules per representation (`U8`, `U16`, `I32`,
//!   `F32`, `PackedRgb`)

mod loader;
mod pixel;

pub use loader::{AnyTileLoader, BlockRequest, TileLoader};
pub use pixel::{
    pack_argb, DisplayPixels, PackedRgb, PixelBuffer, PixelKind, PixelType, F32, I32, U16, U8,
};
