//! Storage backends.
//!
//! Every backend reads the same "raw pyramid" layout: a JSON manifest
//! describing the image ([`ImageMetadata`]) and a flat data file holding every
//! plane of every level of every series (see [`layout`]).
//!
//! # Drivers
//!
//! | Driver               | Handle                     | Clone support |
//! |----------------------|----------------------------|---------------|
//! | [`LocalFileDriver`]  | open data file + index     | yes           |
//! | [`RemoteStoreDriver`]| object-store session       | no            |
//! | [`MemoryDriver`]     | view of an in-memory buffer| yes           |

mod driver;
pub mod layout;
mod local;
mod manifest;
mod memory;
mod metadata;
mod remote;

pub use driver::BackendDriver;
pub use layout::{ByteSpan, LevelSlice, PlaneLayout, RawLayout};
pub use local::{LocalFileDriver, LocalHandle};
pub use manifest::{Manifest, DEFAULT_DATA_FILE_NAME, MANIFEST_FILE_NAME};
pub use memory::{MemoryDriver, MemoryHandle, SyntheticImage};
pub use metadata::{
    ByteOrder, DimensionOrder, ImageMetadata, LevelMetadata, PlaneAxis, SampleFormat, SampleKind,
    SeriesMetadata,
};
pub use remote::{RemoteHandle, RemoteStoreDriver};

/// Storage family a driver reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Dataset on a local filesystem
    LocalFile,
    /// Dataset in S3 or another object store
    RemoteStore,
    /// Dataset held in memory
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::LocalFile => "local",
            BackendKind::RemoteStore => "remote",
            BackendKind::Memory => "memory",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active series, resolution level and channel of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Selection {
    pub series: usize,
    pub level: usize,
    pub channel: usize,
}

impl Selection {
    pub fn new(series: usize, level: usize, channel: usize) -> Self {
        Self {
            series,
            level,
            channel,
        }
    }
}

/// Rectangle within one 2D plane, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region2 {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region2 {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}
