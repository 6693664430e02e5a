//! Openers turn a location string into a backend driver.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{
    BackendDriver, LocalFileDriver, MemoryDriver, RemoteStoreDriver, SyntheticImage,
};
use crate::error::SourceError;
use crate::io::{ObjectStore, S3ObjectStore};

/// Creates drivers for image locations.
///
/// This abstraction lets the registry work with different storage backends
/// without being tied to a specific one.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    type Driver: BackendDriver;

    /// Open the image at `location`, reading and validating its index.
    async fn open_driver(&self, location: &str) -> Result<Self::Driver, SourceError>;
}

/// Opens datasets on the local filesystem.
///
/// Locations are a dataset directory or its manifest path.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOpener;

#[async_trait]
impl SourceOpener for LocalOpener {
    type Driver = LocalFileDriver;

    async fn open_driver(&self, location: &str) -> Result<Self::Driver, SourceError> {
        Ok(LocalFileDriver::open(Path::new(location)).await?)
    }
}

/// Opens datasets from an object store; locations are manifest keys.
#[derive(Clone)]
pub struct StoreOpener<S> {
    store: S,
}

/// Opener for datasets in an S3 bucket.
pub type S3Opener = StoreOpener<S3ObjectStore>;

impl<S: ObjectStore + Clone> StoreOpener<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: ObjectStore + Clone> SourceOpener for StoreOpener<S> {
    type Driver = RemoteStoreDriver<S>;

    async fn open_driver(&self, location: &str) -> Result<Self::Driver, SourceError> {
        Ok(RemoteStoreDriver::open(self.store.clone(), location).await?)
    }
}

/// Builds in-memory synthetic images; the location becomes the image name.
#[derive(Debug, Clone, Default)]
pub struct SyntheticOpener {
    template: SyntheticImage,
    read_latency: Option<Duration>,
}

impl SyntheticOpener {
    pub fn new(template: SyntheticImage) -> Self {
        Self {
            template,
            read_latency: None,
        }
    }

    /// Delay every region read of opened images by `latency`.
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = Some(latency);
        self
    }
}

#[async_trait]
impl SourceOpener for SyntheticOpener {
    type Driver = MemoryDriver;

    async fn open_driver(&self, location: &str) -> Result<Self::Driver, SourceError> {
        let image = SyntheticImage {
            name: location.to_string(),
            ..self.template.clone()
        };
        let driver = MemoryDriver::synthetic(&image)?;
        Ok(match self.read_latency {
            Some(latency) => driver.with_read_latency(latency),
            None => driver,
        })
    }
}
