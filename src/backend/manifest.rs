use serde::{Deserialize, Serialize};

use super::layout::RawLayout;
use super::metadata::ImageMetadata;
use crate::error::FormatError;

/// Conventional manifest name inside a dataset directory or key prefix.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Default data file name written next to the manifest.
pub const DEFAULT_DATA_FILE_NAME: &str = "data.raw";

/// On-disk description of a raw pyramid dataset.
///
/// ```json
/// {
///   "name": "brain",
///   "format": { "kind": "unsigned", "bits": 16 },
///   "byte_order": "big",
///   "size_c": 2,
///   "series": [{ "levels": [{ "dimensions": [2048, 2048, 64], "block_shape": [256, 256, 16] }] }],
///   "data": "data.raw"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(flatten)]
    pub image: ImageMetadata,

    /// Data file location, relative to the manifest
    #[serde(default = "default_data")]
    pub data: String,
}

fn default_data() -> String {
    DEFAULT_DATA_FILE_NAME.to_string()
}

impl Manifest {
    pub fn new(image: ImageMetadata) -> Self {
        Self {
            image,
            data: default_data(),
        }
    }

    /// Parse and validate a manifest.
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        let manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|e| FormatError::Manifest(e.to_string()))?;
        manifest.image.validate()?;
        if manifest.data.is_empty() {
            return Err(FormatError::InvalidDataset {
                reason: "empty data location".to_string(),
            });
        }
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, FormatError> {
        serde_json::to_vec_pretty(self).map_err(|e| FormatError::Manifest(e.to_string()))
    }

    /// Compute the data layout and check that `data_size` matches it.
    pub fn layout_for(&self, data_size: u64) -> Result<RawLayout, FormatError> {
        let layout = RawLayout::new(&self.image)?;
        if layout.total_bytes() != data_size {
            return Err(FormatError::DataSizeMismatch {
                expected: layout.total_bytes(),
                actual: data_size,
            });
        }
        Ok(layout)
    }
}
