//! # pyramid-fetch
//!
//! Concurrent tile fetching from large multi-resolution, multi-channel
//! images through a bounded pool of expensive, non-thread-safe backend
//! handles.
//!
//! Client code asks for a block of pixels at a level, timepoint and channel;
//! the crate clamps it to the level, borrows a handle from the pool, reads
//! each plane of the block, hands the handle back and decodes the bytes into
//! a typed array.
//!
//! ## Architecture
//!
//! - [`pool`] - Generic bounded resource pool with RAII checkout
//! - [`backend`] - Driver trait and the local, S3 and in-memory drivers
//! - [`tile`] - Typed tile loaders and pixel decoding
//! - [`geometry`] - Per-level extents, downsampling factors and transforms
//! - [`grid`] - Cache-grid bridge, loading hints, I/O budget and cell cache
//! - [`source`] - Openers, image sessions and the session registry
//! - [`io`] - Range readers and object stores
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use pyramid_fetch::source::{LocalOpener, OpenOptions, SourceKey, SourceRegistry};
//! use pyramid_fetch::tile::BlockRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = SourceRegistry::new(LocalOpener);
//!     let session = registry
//!         .get(&SourceKey::new("data/sample", OpenOptions::default()))
//!         .await?;
//!
//!     let loader = session.loader(0)?;
//!     let block = loader
//!         .load(&BlockRequest {
//!             timepoint: 0,
//!             level: 0,
//!             channel: 0,
//!             origin: [0, 0, 0],
//!             shape: [256, 256, 1],
//!         })
//!         .await?;
//!     println!("{} {} pixels", block.pixel_type().as_str(), block.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod io;
pub mod pool;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use backend::{
    BackendDriver, BackendKind, ByteOrder, ImageMetadata, LocalFileDriver, Manifest, MemoryDriver,
    Region2, RemoteStoreDriver, SampleFormat, Selection, SyntheticImage,
};
pub use config::{BenchConfig, Cli, Command, ExportConfig, InspectConfig, SourceConfig};
pub use error::{
    BackendError, FormatError, GeometryError, IoError, LoadError, PoolError, SourceError,
};
pub use geometry::{AffineTransform3, DownsamplingPolicy, ImageGeometry, LevelGeometry};
pub use grid::{
    CacheGridBridge, CacheHints, CellCache, CellGrid, CellKey, IoBudget, LoadedCell,
    LoadingStrategy,
};
pub use io::{create_s3_client, ObjectStore, RangeReader, S3ObjectStore, S3RangeReader};
pub use pool::{CreationMode, PoolConfig, PoolStats, Pooled, ResourceFactory, ResourcePool};
pub use source::{ImageSession, OpenOptions, SourceKey, SourceOpener, SourceRegistry};
pub use tile::{AnyTileLoader, BlockRequest, PixelBuffer, PixelType, TileLoader};
