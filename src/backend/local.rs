//! Raw pyramid datasets on the local filesystem.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use super::driver::BackendDriver;
use super::layout::{RawLayout, SelectionState};
use super::manifest::{Manifest, MANIFEST_FILE_NAME};
use super::metadata::ImageMetadata;
use super::{BackendKind, Region2, Selection};
use crate::error::{BackendError, FormatError, IoError};
use crate::pool::ResourceFactory;

/// Driver for a dataset stored as `manifest.json` plus a data file.
pub struct LocalFileDriver {
    manifest_path: PathBuf,
    data_path: PathBuf,
    manifest: Manifest,
}

/// Open data file with its parsed index and current selection.
pub struct LocalHandle {
    file: File,
    layout: Arc<RawLayout>,
    state: SelectionState,
}

impl LocalHandle {
    pub fn selection(&self) -> Option<Selection> {
        self.state.selection()
    }
}

impl LocalFileDriver {
    /// Open a dataset.
    ///
    /// `location` is either the manifest itself or a directory containing
    /// `manifest.json`. The data file size is checked against the manifest.
    pub async fn open(location: impl AsRef<Path>) -> Result<Self, BackendError> {
        let manifest_path = resolve_manifest_path(location.as_ref()).await?;
        let (manifest, data_path, _) = load_index(&manifest_path).await?;

        info!(
            manifest = %manifest_path.display(),
            name = %manifest.image.name,
            series = manifest.image.series.len(),
            "opened local dataset"
        );

        Ok(Self {
            manifest_path,
            data_path,
            manifest,
        })
    }

    /// Write `data` and a manifest describing it into `dir`.
    ///
    /// Returns the manifest path.
    pub async fn write_dataset(
        dir: impl AsRef<Path>,
        manifest: &Manifest,
        data: &[u8],
    ) -> Result<PathBuf, BackendError> {
        let dir = dir.as_ref();
        manifest.layout_for(data.len() as u64)?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| IoError::file(dir.display().to_string(), &e))?;

        let data_path = dir.join(&manifest.data);
        tokio::fs::write(&data_path, data)
            .await
            .map_err(|e| IoError::file(data_path.display().to_string(), &e))?;

        let manifest_path = dir.join(MANIFEST_FILE_NAME);
        tokio::fs::write(&manifest_path, manifest.to_json()?)
            .await
            .map_err(|e| IoError::file(manifest_path.display().to_string(), &e))?;

        Ok(manifest_path)
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    async fn open_data(&self) -> Result<File, BackendError> {
        File::open(&self.data_path)
            .await
            .map_err(|e| IoError::file(self.data_path.display().to_string(), &e).into())
    }
}

async fn resolve_manifest_path(location: &Path) -> Result<PathBuf, BackendError> {
    let meta = tokio::fs::metadata(location)
        .await
        .map_err(|e| IoError::file(location.display().to_string(), &e))?;
    if meta.is_dir() {
        Ok(location.join(MANIFEST_FILE_NAME))
    } else {
        Ok(location.to_path_buf())
    }
}

/// Parse the manifest at `manifest_path` and check its data file.
async fn load_index(manifest_path: &Path) -> Result<(Manifest, PathBuf, RawLayout), BackendError> {
    let raw = tokio::fs::read(manifest_path)
        .await
        .map_err(|e| IoError::file(manifest_path.display().to_string(), &e))?;
    let manifest = Manifest::parse(&raw)?;

    let data_path = manifest_path
        .parent()
        .map(|dir| dir.join(&manifest.data))
        .unwrap_or_else(|| PathBuf::from(&manifest.data));
    let data_size = tokio::fs::metadata(&data_path)
        .await
        .map_err(|e| IoError::file(data_path.display().to_string(), &e))?
        .len();
    let layout = manifest.layout_for(data_size)?;

    Ok((manifest, data_path, layout))
}

#[async_trait]
impl ResourceFactory for LocalFileDriver {
    type Resource = LocalHandle;

    /// Re-read and re-validate the manifest, then open the data file.
    async fn create(&self) -> Result<LocalHandle, BackendError> {
        let (manifest, _, layout) = load_index(&self.manifest_path).await?;
        if manifest.image != self.manifest.image {
            return Err(FormatError::InvalidDataset {
                reason: format!("{} changed since open", self.manifest_path.display()),
            }
            .into());
        }

        let file = self.open_data().await?;
        debug!(data = %self.data_path.display(), "created local handle");

        Ok(LocalHandle {
            file,
            layout: Arc::new(layout),
            state: SelectionState::default(),
        })
    }

    fn supports_clone(&self) -> bool {
        true
    }

    /// Open another descriptor and share the template's parsed index.
    async fn clone_resource(&self, template: &mut LocalHandle) -> Result<LocalHandle, BackendError> {
        Ok(LocalHandle {
            file: self.open_data().await?,
            layout: Arc::clone(&template.layout),
            state: SelectionState::default(),
        })
    }
}

#[async_trait]
impl BackendDriver for LocalFileDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalFile
    }

    fn metadata(&self) -> &ImageMetadata {
        &self.manifest.image
    }

    async fn select(
        &self,
        handle: &mut LocalHandle,
        selection: Selection,
    ) -> Result<(), BackendError> {
        handle.state.select(&handle.layout, selection)
    }

    async fn read_plane_region(
        &self,
        handle: &mut LocalHandle,
        plane: u64,
        region: Region2,
    ) -> Result<Bytes, BackendError> {
        let span = handle.state.span(plane, region)?;
        if span.len == 0 {
            return Ok(Bytes::new());
        }

        let path = || self.data_path.display().to_string();
        handle
            .file
            .seek(SeekFrom::Start(span.offset))
            .await
            .map_err(|e| IoError::file(path(), &e))?;

        let mut buf = vec![0u8; span.len];
        let mut filled = 0;
        while filled < buf.len() {
            let n = handle
                .file
                .read(&mut buf[filled..])
                .await
                .map_err(|e| IoError::file(path(), &e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        span.extract(Bytes::from(buf))
    }
}
