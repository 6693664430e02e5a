use async_trait::async_trait;
use bytes::Bytes;

use super::metadata::{ByteOrder, ImageMetadata, SampleFormat};
use super::{BackendKind, Region2, Selection};
use crate::error::BackendError;
use crate::pool::ResourceFactory;

/// A storage backend able to serve rectangular plane regions.
///
/// The driver itself is shared (`Send + Sync`) and stateless; all per-request
/// state lives in the handles it constructs as a [`ResourceFactory`]. Handles
/// must be selected before they can be read.
///
/// # Example
///
/// ```ignore
/// let mut handle = pool.acquire().await?;
/// driver.select(&mut handle, Selection::new(0, level, channel)).await?;
/// let bytes = driver.read_plane_region(&mut handle, plane, region).await?;
/// ```
#[async_trait]
pub trait BackendDriver: ResourceFactory {
    /// Which storage family this driver reads from.
    fn kind(&self) -> BackendKind;

    /// Static description of the image.
    fn metadata(&self) -> &ImageMetadata;

    fn sample_format(&self) -> SampleFormat {
        self.metadata().format
    }

    fn byte_order(&self) -> ByteOrder {
        self.metadata().byte_order
    }

    fn bytes_per_sample(&self) -> usize {
        self.sample_format().bytes_per_sample()
    }

    fn samples_per_pixel(&self) -> usize {
        usize::from(self.sample_format().samples_per_pixel)
    }

    /// Make `selection` the active series, level and channel of `handle`.
    async fn select(
        &self,
        handle: &mut Self::Resource,
        selection: Selection,
    ) -> Result<(), BackendError>;

    /// Read `region` of plane `plane` at the handle's active selection.
    ///
    /// Returns exactly `region.width * region.height * bytes_per_pixel`
    /// bytes, rows top to bottom.
    async fn read_plane_region(
        &self,
        handle: &mut Self::Resource,
        plane: u64,
        region: Region2,
    ) -> Result<Bytes, BackendError>;
}
