//! Raw pyramid datasets in an object store, read with range requests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use super::driver::BackendDriver;
use super::layout::{RawLayout, SelectionState};
use super::manifest::Manifest;
use super::metadata::ImageMetadata;
use super::{BackendKind, Region2, Selection};
use crate::error::{BackendError, FormatError};
use crate::io::{read_object, ObjectStore, RangeReader, S3ObjectStore};
use crate::pool::ResourceFactory;

/// Driver for a dataset whose manifest and data live in an object store.
///
/// Each handle is a session bound to the data object: building one costs an
/// object metadata round trip. Sessions cannot be cloned.
pub struct RemoteStoreDriver<S: ObjectStore = S3ObjectStore> {
    store: S,
    manifest_key: String,
    data_key: String,
    manifest: Manifest,
    layout: Arc<RawLayout>,
}

/// Remote session with its current selection.
pub struct RemoteHandle<R> {
    reader: R,
    state: SelectionState,
}

impl<R: RangeReader> RemoteHandle<R> {
    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    pub fn selection(&self) -> Option<Selection> {
        self.state.selection()
    }
}

impl<S: ObjectStore> RemoteStoreDriver<S> {
    /// Fetch and validate the manifest at `manifest_key`.
    ///
    /// The data object is resolved relative to the manifest key and its size
    /// is checked against the manifest.
    pub async fn open(store: S, manifest_key: &str) -> Result<Self, BackendError> {
        let raw = read_object(&store, manifest_key).await?;
        let manifest = Manifest::parse(&raw)?;
        let data_key = sibling_key(manifest_key, &manifest.data);

        let reader = store.open_reader(&data_key).await?;
        let layout = manifest.layout_for(reader.size())?;

        info!(
            manifest = %store.locate(manifest_key),
            name = %manifest.image.name,
            series = manifest.image.series.len(),
            "opened remote dataset"
        );

        Ok(Self {
            store,
            manifest_key: manifest_key.to_string(),
            data_key,
            manifest,
            layout: Arc::new(layout),
        })
    }

    pub fn manifest_key(&self) -> &str {
        &self.manifest_key
    }

    pub fn data_key(&self) -> &str {
        &self.data_key
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Resolve `name` against the "directory" of `key`.
fn sibling_key(key: &str, name: &str) -> String {
    match key.rfind('/') {
        Some(slash) => format!("{}/{}", &key[..slash], name),
        None => name.to_string(),
    }
}

#[async_trait]
impl<S: ObjectStore> ResourceFactory for RemoteStoreDriver<S> {
    type Resource = RemoteHandle<S::Reader>;

    async fn create(&self) -> Result<Self::Resource, BackendError> {
        let reader = self.store.open_reader(&self.data_key).await?;
        if reader.size() != self.layout.total_bytes() {
            return Err(FormatError::DataSizeMismatch {
                expected: self.layout.total_bytes(),
                actual: reader.size(),
            }
            .into());
        }
        debug!(object = %reader.identifier(), "created remote session");

        Ok(RemoteHandle {
            reader,
            state: SelectionState::default(),
        })
    }
}

#[async_trait]
impl<S: ObjectStore> BackendDriver for RemoteStoreDriver<S> {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteStore
    }

    fn metadata(&self) -> &ImageMetadata {
        &self.manifest.image
    }

    async fn select(
        &self,
        handle: &mut Self::Resource,
        selection: Selection,
    ) -> Result<(), BackendError> {
        handle.state.select(&self.layout, selection)
    }

    async fn read_plane_region(
        &self,
        handle: &mut Self::Resource,
        plane: u64,
        region: Region2,
    ) -> Result<Bytes, BackendError> {
        let span = handle.state.span(plane, region)?;
        if span.len == 0 {
            return Ok(Bytes::new());
        }
        let raw = handle.reader.read_exact_at(span.offset, span.len).await?;
        span.extract(raw)
    }
}
