//! An opened image and its handle pool.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::backend::{BackendDriver, ImageMetadata};
use crate::error::SourceError;
use crate::geometry::ImageGeometry;
use crate::grid::CacheGridBridge;
use crate::pool::{CreationMode, PoolConfig, PoolStats, ResourcePool, DEFAULT_POOL_CAPACITY};
use crate::tile::AnyTileLoader;

/// How an image is opened.
///
/// Part of the registry key: the same location opened with different
/// options yields a different session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenOptions {
    /// Handles in the session's pool
    pub pool_size: usize,

    pub creation: CreationMode,

    /// Bound on how long a load waits for a free handle
    pub acquire_timeout: Option<Duration>,

    /// Exchange the z and channel coordinates when computing plane indices
    pub swap_zc: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_CAPACITY,
            creation: CreationMode::Dynamic,
            acquire_timeout: None,
            swap_zc: false,
        }
    }
}

impl OpenOptions {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            capacity: self.pool_size,
            creation: self.creation,
            acquire_timeout: self.acquire_timeout,
        }
    }
}

/// Registry key: a location plus the options it was opened with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub location: String,
    pub options: OpenOptions,
}

impl SourceKey {
    pub fn new(location: impl Into<String>, options: OpenOptions) -> Self {
        Self {
            location: location.into(),
            options,
        }
    }
}

/// An open image: driver, handle pool and options.
///
/// Closing the session shuts the pool down; loads still in flight fail with
/// `PoolClosed` once they try to acquire.
pub struct ImageSession<D: BackendDriver> {
    key: SourceKey,
    pool: Arc<ResourcePool<D>>,
}

impl<D: BackendDriver> std::fmt::Debug for ImageSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSession")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<D: BackendDriver> ImageSession<D> {
    /// Build the handle pool for `driver`.
    pub async fn open(driver: D, key: SourceKey) -> Result<Self, SourceError> {
        let pool = ResourcePool::new(Arc::new(driver), key.options.pool_config()).await?;

        info!(
            location = %key.location,
            backend = %pool.factory().kind(),
            pool_size = key.options.pool_size,
            "session opened"
        );

        Ok(Self {
            key,
            pool: Arc::new(pool),
        })
    }

    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    pub fn driver(&self) -> &Arc<D> {
        self.pool.factory()
    }

    pub fn metadata(&self) -> &ImageMetadata {
        self.pool.factory().metadata()
    }

    pub fn pool(&self) -> &Arc<ResourcePool<D>> {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Check that `series` and `channel` exist in the image.
    pub fn check_selection(&self, series: usize, channel: u32) -> Result<(), SourceError> {
        let metadata = self.metadata();
        if series >= metadata.series.len() {
            return Err(SourceError::InvalidSeries {
                series,
                count: metadata.series.len(),
            });
        }
        if channel >= metadata.size_c {
            return Err(SourceError::InvalidChannel {
                channel: channel as usize,
                count: metadata.size_c as usize,
            });
        }
        Ok(())
    }

    pub fn geometry(&self, series: usize) -> Result<ImageGeometry, SourceError> {
        self.check_selection(series, 0)?;
        let driver = self.pool.factory();
        Ok(ImageGeometry::from_series(
            &driver.metadata().series[series],
            driver.kind(),
        )?)
    }

    /// Typed loader for `series`.
    pub fn loader(&self, series: usize) -> Result<AnyTileLoader<D>, SourceError> {
        self.check_selection(series, 0)?;
        Ok(AnyTileLoader::new(
            self.pool.clone(),
            series,
            self.key.options.swap_zc,
        )?)
    }

    /// Cache-grid bridge for `series`, without cache or budget.
    pub fn bridge(&self, series: usize) -> Result<CacheGridBridge<D>, SourceError> {
        let loader = self.loader(series)?;
        Ok(CacheGridBridge::new(
            Arc::new(loader),
            self.key.location.as_str(),
        ))
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Shut the pool down. Returns the number of handles closed now.
    pub fn close(&self) -> usize {
        if self.pool.is_closed() {
            return 0;
        }
        let closed = self.pool.shutdown();
        info!(location = %self.key.location, closed, "session closed");
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryDriver, SyntheticImage};
    use crate::error::LoadError;
    use crate::tile::{BlockRequest, PixelType};

    async fn session(options: OpenOptions) -> ImageSession<MemoryDriver> {
        let driver = MemoryDriver::synthetic(&SyntheticImage {
            dimensions: [64, 64, 2],
            block_shape: [32, 32, 2],
            levels: 2,
            size_c: 2,
            ..Default::default()
        })
        .unwrap();
        ImageSession::open(driver, SourceKey::new("mem", options))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_eager_session_builds_pool() {
        let session = session(OpenOptions {
            pool_size: 3,
            creation: CreationMode::Eager,
            ..Default::default()
        })
        .await;
        assert_eq!(session.pool_stats().created, 3);
        // One template plus two clones of it
        assert_eq!(session.driver().handles_created(), 3);
    }

    #[tokio::test]
    async fn test_selection_checks() {
        let session = session(OpenOptions::default()).await;
        assert!(session.check_selection(0, 1).is_ok());
        assert!(matches!(
            session.check_selection(1, 0),
            Err(SourceError::InvalidSeries { series: 1, count: 1 })
        ));
        assert!(matches!(
            session.check_selection(0, 2),
            Err(SourceError::InvalidChannel { channel: 2, count: 2 })
        ));
        assert!(session.loader(3).is_err());
    }

    #[tokio::test]
    async fn test_loader_and_geometry() {
        let session = session(OpenOptions::default()).await;
        let geometry = session.geometry(0).unwrap();
        assert_eq!(geometry.num_levels(), 2);

        let loader = session.loader(0).unwrap();
        assert_eq!(loader.pixel_type(), PixelType::U16);
        let bridge = session.bridge(0).unwrap();
        assert_eq!(bridge.num_levels(), 2);
    }

    #[tokio::test]
    async fn test_close_fails_later_loads() {
        let session = session(OpenOptions::default()).await;
        let loader = session.loader(0).unwrap();
        let request = BlockRequest {
            timepoint: 0,
            level: 0,
            channel: 0,
            origin: [0, 0, 0],
            shape: [8, 8, 1],
        };
        loader.load(&request).await.unwrap();

        // The free clone and the parked template
        assert_eq!(session.close(), 2);
        assert!(session.is_closed());
        assert_eq!(session.close(), 0);
        assert!(matches!(
            loader.load(&request).await,
            Err(LoadError::PoolClosed)
        ));
    }
}
