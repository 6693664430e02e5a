//! Raw pyramid datasets held in memory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::driver::BackendDriver;
use super::layout::{RawLayout, SelectionState};
use super::manifest::Manifest;
use super::metadata::{
    ByteOrder, DimensionOrder, ImageMetadata, LevelMetadata, SampleFormat, SeriesMetadata,
};
use super::{BackendKind, Region2, Selection};
use crate::error::BackendError;
use crate::io::{MemoryRangeReader, RangeReader};
use crate::pool::ResourceFactory;

/// Driver over a dataset already in memory.
///
/// An optional per-read latency makes it usable as a stand-in for slow
/// storage in benchmarks.
pub struct MemoryDriver {
    manifest: Manifest,
    layout: Arc<RawLayout>,
    data: Bytes,
    read_latency: Option<Duration>,
    handles_created: AtomicUsize,
}

/// View of the shared buffer with its own selection.
pub struct MemoryHandle {
    id: usize,
    reader: MemoryRangeReader,
    state: SelectionState,
}

impl MemoryHandle {
    /// Sequence number of this handle within its driver.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn selection(&self) -> Option<Selection> {
        self.state.selection()
    }
}

impl MemoryDriver {
    /// Serve `data` laid out as described by `metadata`.
    pub fn new(metadata: ImageMetadata, data: impl Into<Bytes>) -> Result<Self, BackendError> {
        let data = data.into();
        let manifest = Manifest::new(metadata);
        let layout = manifest.layout_for(data.len() as u64)?;
        Ok(Self {
            manifest,
            layout: Arc::new(layout),
            data,
            read_latency: None,
            handles_created: AtomicUsize::new(0),
        })
    }

    /// Generate a synthetic dataset.
    pub fn synthetic(image: &SyntheticImage) -> Result<Self, BackendError> {
        let metadata = image.metadata();
        let layout = RawLayout::new(&metadata)?;
        let data = synthetic_bytes(layout.total_bytes() as usize);
        Self::new(metadata, data)
    }

    /// Sleep for `latency` before every region read.
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = Some(latency);
        self
    }

    /// Handles built so far, by construction or cloning.
    pub fn handles_created(&self) -> usize {
        self.handles_created.load(Ordering::SeqCst)
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    fn new_handle(&self) -> MemoryHandle {
        let id = self.handles_created.fetch_add(1, Ordering::SeqCst);
        MemoryHandle {
            id,
            reader: MemoryRangeReader::new(
                self.data.clone(),
                format!("mem://{}", self.manifest.image.name),
            ),
            state: SelectionState::default(),
        }
    }
}

/// Deterministic, non-repeating-looking fill.
fn synthetic_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}

#[async_trait]
impl ResourceFactory for MemoryDriver {
    type Resource = MemoryHandle;

    async fn create(&self) -> Result<MemoryHandle, BackendError> {
        let handle = self.new_handle();
        debug!(id = handle.id, "created memory handle");
        Ok(handle)
    }

    fn supports_clone(&self) -> bool {
        true
    }

    async fn clone_resource(&self, _template: &mut MemoryHandle) -> Result<MemoryHandle, BackendError> {
        Ok(self.new_handle())
    }
}

#[async_trait]
impl BackendDriver for MemoryDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn metadata(&self) -> &ImageMetadata {
        &self.manifest.image
    }

    async fn select(
        &self,
        handle: &mut MemoryHandle,
        selection: Selection,
    ) -> Result<(), BackendError> {
        handle.state.select(&self.layout, selection)
    }

    async fn read_plane_region(
        &self,
        handle: &mut MemoryHandle,
        plane: u64,
        region: Region2,
    ) -> Result<Bytes, BackendError> {
        let span = handle.state.span(plane, region)?;
        if let Some(latency) = self.read_latency {
            tokio::time::sleep(latency).await;
        }
        if span.len == 0 {
            return Ok(Bytes::new());
        }
        let raw = handle.reader.read_exact_at(span.offset, span.len).await?;
        span.extract(raw)
    }
}

// =============================================================================
// Synthetic images
// =============================================================================

/// Shape of a generated multi-resolution image.
///
/// Each level halves width and height (rounding up) and keeps the depth.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticImage {
    pub name: String,
    pub format: SampleFormat,
    pub byte_order: ByteOrder,
    pub dimensions: [u64; 3],
    pub block_shape: [u32; 3],
    pub levels: usize,
    pub size_c: u32,
    pub size_t: u32,
}

impl Default for SyntheticImage {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            format: SampleFormat::UINT16,
            byte_order: ByteOrder::Little,
            dimensions: [512, 512, 8],
            block_shape: [64, 64, 4],
            levels: 4,
            size_c: 1,
            size_t: 1,
        }
    }
}

impl SyntheticImage {
    pub fn metadata(&self) -> ImageMetadata {
        let [width, height, depth] = self.dimensions;
        let levels = (0..self.levels.max(1))
            .map(|level| LevelMetadata {
                dimensions: [
                    width.div_ceil(1 << level).max(1),
                    height.div_ceil(1 << level).max(1),
                    depth,
                ],
                block_shape: self.block_shape,
            })
            .collect();

        ImageMetadata {
            name: self.name.clone(),
            format: self.format,
            byte_order: self.byte_order,
            size_c: self.size_c,
            size_t: self.size_t,
            dimension_order: DimensionOrder::Xyzct,
            series: vec![SeriesMetadata {
                name: None,
                levels,
                voxel_size: [1.0, 1.0, 1.0],
            }],
        }
    }
}
