//! Static image description shared by every handle of a driver.
//!
//! The same types are the on-disk manifest schema, so a dataset's manifest is
//! simply a serialized [`ImageMetadata`] plus the location of its data.

use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// Byte order of multi-byte samples in the stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Numeric interpretation of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Unsigned,
    Signed,
    Float,
}

/// How one pixel is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleFormat {
    pub kind: SampleKind,

    /// Bits per sample: 8, 16 or 32
    pub bits: u8,

    /// Interleaved samples per pixel: 1 (grey) or 3 (RGB)
    #[serde(default = "default_samples_per_pixel")]
    pub samples_per_pixel: u8,
}

fn default_samples_per_pixel() -> u8 {
    1
}

impl SampleFormat {
    pub const UINT8: SampleFormat = SampleFormat::new(SampleKind::Unsigned, 8, 1);
    pub const UINT16: SampleFormat = SampleFormat::new(SampleKind::Unsigned, 16, 1);
    pub const INT32: SampleFormat = SampleFormat::new(SampleKind::Signed, 32, 1);
    pub const FLOAT32: SampleFormat = SampleFormat::new(SampleKind::Float, 32, 1);
    pub const RGB8: SampleFormat = SampleFormat::new(SampleKind::Unsigned, 8, 3);

    pub const fn new(kind: SampleKind, bits: u8, samples_per_pixel: u8) -> Self {
        Self {
            kind,
            bits,
            samples_per_pixel,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits / 8)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.samples_per_pixel)
    }

    /// Short name such as `uint16` or `uint8x3`.
    pub fn describe(&self) -> String {
        let kind = match self.kind {
            SampleKind::Unsigned => "uint",
            SampleKind::Signed => "int",
            SampleKind::Float => "float",
        };
        if self.samples_per_pixel == 1 {
            format!("{}{}", kind, self.bits)
        } else {
            format!("{}{}x{}", kind, self.bits, self.samples_per_pixel)
        }
    }
}

/// Order of the Z, C and T plane axes in the data, fastest varying first
/// after X and Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DimensionOrder {
    #[default]
    Xyzct,
    Xyztc,
    Xyczt,
    Xyctz,
    Xytzc,
    Xytcz,
}

/// Plane axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneAxis {
    Z,
    C,
    T,
}

impl DimensionOrder {
    /// Plane axes from fastest to slowest varying.
    pub fn plane_axes(&self) -> [PlaneAxis; 3] {
        use PlaneAxis::{C, T, Z};
        match self {
            DimensionOrder::Xyzct => [Z, C, T],
            DimensionOrder::Xyztc => [Z, T, C],
            DimensionOrder::Xyczt => [C, Z, T],
            DimensionOrder::Xyctz => [C, T, Z],
            DimensionOrder::Xytzc => [T, Z, C],
            DimensionOrder::Xytcz => [T, C, Z],
        }
    }
}

/// One resolution level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelMetadata {
    /// Extent in pixels: width, height, depth
    pub dimensions: [u64; 3],

    /// Preferred read block shape: width, height, depth
    pub block_shape: [u32; 3],
}

/// One series (an independent image stack within the dataset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    #[serde(default)]
    pub name: Option<String>,

    /// Levels from full resolution (0) to coarsest
    pub levels: Vec<LevelMetadata>,

    /// Physical voxel size at level 0: x, y, z
    #[serde(default = "default_voxel_size")]
    pub voxel_size: [f64; 3],
}

fn default_voxel_size() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

impl SeriesMetadata {
    /// Number of Z slices at `level`, or 0 if the level does not exist.
    pub fn size_z(&self, level: usize) -> u64 {
        self.levels.get(level).map(|l| l.dimensions[2]).unwrap_or(0)
    }
}

/// Static description of a multi-resolution image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub name: String,
    pub format: SampleFormat,

    #[serde(default)]
    pub byte_order: ByteOrder,

    #[serde(default = "default_one")]
    pub size_c: u32,

    #[serde(default = "default_one")]
    pub size_t: u32,

    #[serde(default)]
    pub dimension_order: DimensionOrder,

    pub series: Vec<SeriesMetadata>,
}

fn default_one() -> u32 {
    1
}

impl ImageMetadata {
    /// Reject descriptions that no driver can serve.
    pub fn validate(&self) -> Result<(), FormatError> {
        let invalid = |reason: String| Err(FormatError::InvalidDataset { reason });

        if !matches!(self.format.bits, 8 | 16 | 32) {
            return invalid(format!("unsupported sample width {} bits", self.format.bits));
        }
        if !matches!(self.format.samples_per_pixel, 1 | 3) {
            return invalid(format!(
                "unsupported samples per pixel {}",
                self.format.samples_per_pixel
            ));
        }
        if self.format.kind == SampleKind::Float && self.format.bits != 32 {
            return invalid(format!("unsupported float width {}", self.format.bits));
        }
        if self.size_c == 0 || self.size_t == 0 {
            return invalid("size_c and size_t must be at least 1".to_string());
        }
        if self.series.is_empty() {
            return invalid("no series".to_string());
        }

        for (s, series) in self.series.iter().enumerate() {
            if series.levels.is_empty() {
                return invalid(format!("series {} has no levels", s));
            }
            for (l, level) in series.levels.iter().enumerate() {
                if level.dimensions.contains(&0) || level.block_shape.contains(&0) {
                    return invalid(format!(
                        "series {} level {} has an empty extent or block shape",
                        s, l
                    ));
                }
                if level.dimensions[0] > u64::from(u32::MAX)
                    || level.dimensions[1] > u64::from(u32::MAX)
                {
                    return invalid(format!("series {} level {} plane is too large", s, l));
                }
            }
            if series.voxel_size.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                return invalid(format!("series {} has a non-positive voxel size", s));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> ImageMetadata {
        ImageMetadata {
            name: "sample".to_string(),
            format: SampleFormat::UINT16,
            byte_order: ByteOrder::Big,
            size_c: 2,
            size_t: 1,
            dimension_order: DimensionOrder::Xyzct,
            series: vec![SeriesMetadata {
                name: None,
                levels: vec![
                    LevelMetadata {
                        dimensions: [64, 48, 4],
                        block_shape: [32, 32, 4],
                    },
                    LevelMetadata {
                        dimensions: [32, 24, 4],
                        block_shape: [32, 32, 4],
                    },
                ],
                voxel_size: [0.5, 0.5, 2.0],
            }],
        }
    }

    #[test]
    fn test_sample_format_sizes() {
        assert_eq!(SampleFormat::UINT8.bytes_per_pixel(), 1);
        assert_eq!(SampleFormat::UINT16.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::RGB8.bytes_per_pixel(), 3);
        assert_eq!(SampleFormat::FLOAT32.describe(), "float32");
        assert_eq!(SampleFormat::RGB8.describe(), "uint8x3");
    }

    #[test]
    fn test_dimension_order_axes() {
        assert_eq!(
            DimensionOrder::default().plane_axes(),
            [PlaneAxis::Z, PlaneAxis::C, PlaneAxis::T]
        );
        assert_eq!(
            DimensionOrder::Xytcz.plane_axes(),
            [PlaneAxis::T, PlaneAxis::C, PlaneAxis::Z]
        );
    }

    #[test]
    fn test_manifest_defaults() {
        let json = r#"{
            "name": "tiny",
            "format": { "kind": "unsigned", "bits": 8 },
            "series": [{ "levels": [{ "dimensions": [4, 4, 1], "block_shape": [4, 4, 1] }] }]
        }"#;
        let metadata: ImageMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.byte_order, ByteOrder::Little);
        assert_eq!(metadata.format.samples_per_pixel, 1);
        assert_eq!(metadata.size_c, 1);
        assert_eq!(metadata.dimension_order, DimensionOrder::Xyzct);
        assert_eq!(metadata.series[0].voxel_size, [1.0, 1.0, 1.0]);
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_dimension_order_serde_name() {
        let order: DimensionOrder = serde_json::from_str("\"XYCZT\"").unwrap();
        assert_eq!(order, DimensionOrder::Xyczt);
    }

    #[test]
    fn test_validate_rejects_bad_descriptions() {
        let mut metadata = sample_metadata();
        assert!(metadata.validate().is_ok());

        metadata.format.bits = 12;
        assert!(metadata.validate().is_err());

        let mut metadata = sample_metadata();
        metadata.series[0].levels[1].block_shape = [0, 32, 1];
        assert!(metadata.validate().is_err());

        let mut metadata = sample_metadata();
        metadata.series.clear();
        assert!(metadata.validate().is_err());

        let mut metadata = sample_metadata();
        metadata.format = SampleFormat::new(SampleKind::Float, 16, 1);
        assert!(metadata.validate().is_err());
    }
}
