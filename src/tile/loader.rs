//! Typed tile loaders.
//!
//! A loader turns a [`BlockRequest`] into a typed array:
//!
//! ```text
//! BlockRequest ──clamp──► (w, h, d) ──acquire──► select(series, level, channel)
//!                                                      │
//!                          d == 1: one plane read ◄────┤
//!                          d  > 1: d reads, ascending z, concatenated
//!                                                      │
//!                       recycle handle ◄───────────────┘
//!                            │
//!                            ▼
//!                      decode (byte order / RGB repack) ──► Vec<Sample>
//! ```
//!
//! The handle goes back to the pool as soon as the reads finish, before any
//! decoding, and on every error path.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::warn;

use super::pixel::{PackedRgb, PixelBuffer, PixelKind, PixelType, F32, I32, U16, U8};
use crate::backend::{BackendDriver, PlaneLayout, Region2, Selection};
use crate::error::{BackendError, LoadError};
use crate::geometry::ImageGeometry;
use crate::pool::ResourcePool;

/// A block of one level, channel and timepoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub timepoint: u32,
    pub level: usize,
    pub channel: u32,
    /// Block origin in pixels at `level`
    pub origin: [u64; 3],
    /// Requested shape; clamped to the level extent when read
    pub shape: [u32; 3],
}

/// Loader for one series of an image in one pixel representation.
pub struct TileLoader<D: BackendDriver, P: PixelKind> {
    pool: Arc<ResourcePool<D>>,
    geometry: Arc<ImageGeometry>,
    series: usize,
    size_c: u32,
    size_t: u32,
    planes: PlaneLayout,
    _kind: PhantomData<fn() -> P>,
}

impl<D: BackendDriver, P: PixelKind> TileLoader<D, P> {
    /// Create a loader for `series`.
    ///
    /// Fails with [`LoadError::UnsupportedPixelType`] if the driver's sample
    /// format is not the one `P` decodes.
    pub fn new(
        pool: Arc<ResourcePool<D>>,
        series: usize,
        swap_zc: bool,
    ) -> Result<Self, LoadError> {
        let driver = pool.factory();
        let metadata = driver.metadata();
        let format = metadata.format;
        if PixelType::from_format(format) != Some(P::TYPE) {
            return Err(LoadError::UnsupportedPixelType(format!(
                "{} cannot be loaded as {}",
                format.describe(),
                P::TYPE.as_str()
            )));
        }

        let series_meta = metadata.series.get(series).ok_or_else(|| {
            LoadError::InvalidRequest(format!(
                "series {} (image has {})",
                series,
                metadata.series.len()
            ))
        })?;
        let geometry = ImageGeometry::from_series(series_meta, driver.kind())?;

        // size_z is filled in per level
        let planes = PlaneLayout::new(
            1,
            metadata.size_c,
            metadata.size_t,
            metadata.dimension_order,
        )
        .with_swap_zc(swap_zc);

        Ok(Self {
            geometry: Arc::new(geometry),
            series,
            size_c: metadata.size_c,
            size_t: metadata.size_t,
            planes,
            pool,
            _kind: PhantomData,
        })
    }

    pub fn geometry(&self) -> &Arc<ImageGeometry> {
        &self.geometry
    }

    pub fn series(&self) -> usize {
        self.series
    }

    pub fn pool(&self) -> &Arc<ResourcePool<D>> {
        &self.pool
    }

    /// Load one block.
    ///
    /// The result holds `w * h * d` samples for the clamped shape, x fastest
    /// then y then z. A block entirely outside the level yields an empty
    /// vector without touching the pool.
    pub async fn load(&self, request: &BlockRequest) -> Result<Vec<P::Sample>, LoadError> {
        self.check_request(request)?;
        let [w, h, d] = self
            .geometry
            .clamp_block(request.level, request.origin, request.shape)?;
        if w == 0 || h == 0 || d == 0 {
            return Ok(Vec::new());
        }

        let raw = self.read_block(request, [w, h, d]).await?;

        let expected = w as usize * h as usize * d as usize * P::bytes_per_pixel();
        if raw.len() != expected {
            return Err(LoadError::Interrupted(BackendError::ShortRead {
                expected,
                actual: raw.len(),
            }));
        }

        Ok(P::decode(&raw, self.pool.factory().byte_order()))
    }

    fn check_request(&self, request: &BlockRequest) -> Result<(), LoadError> {
        if request.channel >= self.size_c {
            return Err(LoadError::InvalidRequest(format!(
                "channel {} (image has {})",
                request.channel, self.size_c
            )));
        }
        if request.timepoint >= self.size_t {
            return Err(LoadError::InvalidRequest(format!(
                "timepoint {} (image has {})",
                request.timepoint, self.size_t
            )));
        }
        Ok(())
    }

    /// Acquire a handle, read every plane of the block and recycle.
    async fn read_block(
        &self,
        request: &BlockRequest,
        shape: [u32; 3],
    ) -> Result<Bytes, LoadError> {
        let [w, h, d] = shape;
        let level = self.geometry.level(request.level)?;
        let planes = PlaneLayout {
            size_z: level.dimensions[2],
            ..self.planes
        };
        let region = Region2 {
            x: to_u32(request.origin[0])?,
            y: to_u32(request.origin[1])?,
            width: w,
            height: h,
        };
        let selection = Selection::new(self.series, request.level, request.channel as usize);
        let plane_of = |dz: u32| {
            planes.plane_index(
                request.origin[2] + u64::from(dz),
                request.channel,
                request.timepoint,
            )
        };

        let driver = self.pool.factory();
        let mut handle = self.pool.acquire().await?;

        let result = async {
            driver.select(&mut *handle, selection).await?;
            if d == 1 {
                return driver
                    .read_plane_region(&mut *handle, plane_of(0), region)
                    .await;
            }

            let mut buf =
                BytesMut::with_capacity(region.pixel_count() * d as usize * P::bytes_per_pixel());
            for dz in 0..d {
                let plane = driver
                    .read_plane_region(&mut *handle, plane_of(dz), region)
                    .await?;
                buf.extend_from_slice(&plane);
            }
            Ok(buf.freeze())
        }
        .await;

        drop(handle);

        result.map_err(|err: BackendError| {
            warn!(
                series = self.series,
                level = request.level,
                channel = request.channel,
                timepoint = request.timepoint,
                error = %err,
                "block load interrupted"
            );
            LoadError::Interrupted(err)
        })
    }
}

fn to_u32(value: u64) -> Result<u32, LoadError> {
    u32::try_from(value)
        .map_err(|_| LoadError::InvalidRequest(format!("coordinate {} exceeds plane range", value)))
}

// =============================================================================
// AnyTileLoader
// =============================================================================

/// Tile loader whose representation is picked from the driver's sample format.
pub enum AnyTileLoader<D: BackendDriver> {
    U8(TileLoader<D, U8>),
    U16(TileLoader<D, U16>),
    I32(TileLoader<D, I32>),
    F32(TileLoader<D, F32>),
    PackedRgb(TileLoader<D, PackedRgb>),
}

impl<D: BackendDriver> AnyTileLoader<D> {
    /// Create the loader matching the image's sample format.
    ///
    /// Formats without a typed loader fail here rather than per request.
    pub fn new(
        pool: Arc<ResourcePool<D>>,
        series: usize,
        swap_zc: bool,
    ) -> Result<Self, LoadError> {
        let format = pool.factory().sample_format();
        let pixel_type = PixelType::from_format(format)
            .ok_or_else(|| LoadError::UnsupportedPixelType(format.describe()))?;

        Ok(match pixel_type {
            PixelType::U8 => AnyTileLoader::U8(TileLoader::new(pool, series, swap_zc)?),
            PixelType::U16 => AnyTileLoader::U16(TileLoader::new(pool, series, swap_zc)?),
            PixelType::I32 => AnyTileLoader::I32(TileLoader::new(pool, series, swap_zc)?),
            PixelType::F32 => AnyTileLoader::F32(TileLoader::new(pool, series, swap_zc)?),
            PixelType::PackedRgb => {
                AnyTileLoader::PackedRgb(TileLoader::new(pool, series, swap_zc)?)
            }
        })
    }

    pub fn pixel_type(&self) -> PixelType {
        match self {
            AnyTileLoader::U8(_) => PixelType::U8,
            AnyTileLoader::U16(_) => PixelType::U16,
            AnyTileLoader::I32(_) => PixelType::I32,
            AnyTileLoader::F32(_) => PixelType::F32,
            AnyTileLoader::PackedRgb(_) => PixelType::PackedRgb,
        }
    }

    pub fn geometry(&self) -> &Arc<ImageGeometry> {
        match self {
            AnyTileLoader::U8(l) => l.geometry(),
            AnyTileLoader::U16(l) => l.geometry(),
            AnyTileLoader::I32(l) => l.geometry(),
            AnyTileLoader::F32(l) => l.geometry(),
            AnyTileLoader::PackedRgb(l) => l.geometry(),
        }
    }

    pub fn series(&self) -> usize {
        match self {
            AnyTileLoader::U8(l) => l.series(),
            AnyTileLoader::U16(l) => l.series(),
            AnyTileLoader::I32(l) => l.series(),
            AnyTileLoader::F32(l) => l.series(),
            AnyTileLoader::PackedRgb(l) => l.series(),
        }
    }

    pub async fn load(&self, request: &BlockRequest) -> Result<PixelBuffer, LoadError> {
        match self {
            AnyTileLoader::U8(l) => l.load(request).await.map(U8::wrap),
            AnyTileLoader::U16(l) => l.load(request).await.map(U16::wrap),
            AnyTileLoader::I32(l) => l.load(request).await.map(I32::wrap),
            AnyTileLoader::F32(l) => l.load(request).await.map(F32::wrap),
            AnyTileLoader::PackedRgb(l) => l.load(request).await.map(PackedRgb::wrap),
        }
    }
}
