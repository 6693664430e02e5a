//! Cache-grid bridge.
//!
//! A level is divided into a regular [`CellGrid`] of blocks. The
//! [`CacheGridBridge`] turns cell keys into block requests for a typed
//! loader, decides per level whether a load may block or must fit into the
//! remaining [`IoBudget`], and keeps completed cells in a [`CellCache`].
//!
//! ```text
//! CellKey ──► CellGrid (origin, clamped shape) ──► BlockRequest
//!                                                      │
//!            CellCache ◄── complete ── AnyTileLoader ◄─┘
//!                              │
//!                              └── failed ──► zero-filled placeholder
//! ```

mod bridge;
mod cache;
mod cell_grid;

pub use bridge::{CacheGridBridge, CacheHints, CellKey, IoBudget, LoadedCell, LoadingStrategy};
pub use cache::{CellCache, CellCacheKey, DEFAULT_CELL_CACHE_CAPACITY};
pub use cell_grid::CellGrid;
