use std::time::Duration;

use thiserror::Error;

/// I/O errors that can occur when reading byte ranges from storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object or file not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Object was replaced after it was opened
    #[error("Object changed since it was opened: {0}")]
    Modified(String),

    /// Local filesystem error
    #[error("File error on {path}: {message}")]
    File { path: String, message: String },
}

impl IoError {
    /// Wrap a `std::io::Error` raised while touching `path`.
    pub fn file(path: impl Into<String>, err: &std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(path)
        } else {
            IoError::File {
                path,
                message: err.to_string(),
            }
        }
    }
}

/// Errors raised by a backend driver while creating or driving a handle.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Underlying byte-level I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Series, level or channel does not exist in the image
    #[error("Invalid selection: series {series}, level {level}, channel {channel}")]
    InvalidSelection {
        series: usize,
        level: usize,
        channel: usize,
    },

    /// A read was issued before any selection was made on the handle
    #[error("Handle has no active selection")]
    NoSelection,

    /// Plane index outside the selected level
    #[error("Plane {plane} out of range (level has {count} planes)")]
    PlaneOutOfRange { plane: usize, count: usize },

    /// Region extends past the plane
    #[error("Region {width}x{height}+{x}+{y} exceeds plane of {plane_width}x{plane_height}")]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        plane_width: u64,
        plane_height: u64,
    },

    /// Backend returned fewer or more bytes than the region requires
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// Operation is not implemented by this backend
    #[error("Unsupported backend operation: {0}")]
    Unsupported(&'static str),

    /// Dataset description could not be used
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

/// Errors raised while parsing or validating a raw pyramid manifest.
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// Manifest is not valid JSON for the expected schema
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    /// Manifest parsed but describes an unusable dataset
    #[error("Invalid dataset: {reason}")]
    InvalidDataset { reason: String },

    /// Data file size does not match what the manifest describes
    #[error("Data size mismatch: manifest describes {expected} bytes, data has {actual}")]
    DataSizeMismatch { expected: u64, actual: u64 },
}

/// Errors in multi-resolution geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// Image has no resolution levels
    #[error("Image has no resolution levels")]
    NoLevels,

    /// Level index out of range
    #[error("Invalid level: {level} (image has {levels} levels)")]
    InvalidLevel { level: usize, levels: usize },

    /// A level has a zero-sized extent or block shape
    #[error("Level {level} has an empty extent or block shape")]
    EmptyLevel { level: usize },

    /// Level 0 must not be downsampled
    #[error("Level 0 downsampling must be (1, 1, 1), got {factors:?}")]
    BadBaseFactor { factors: [f64; 3] },

    /// A level is finer than the one before it along some axis
    #[error("Downsampling decreases at level {level} along axis {axis}")]
    NonMonotonic { level: usize, axis: usize },
}

/// Errors returned by [`crate::pool::ResourcePool`].
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The pool has been shut down
    #[error("Pool is closed")]
    Closed,

    /// No handle became available within the configured wait
    #[error("Timed out after {waited:?} waiting for a pooled handle")]
    Timeout { waited: Duration },

    /// Pool capacity must be at least one
    #[error("Invalid pool capacity: {0}")]
    InvalidCapacity(usize),

    /// The factory failed to construct a handle
    #[error("Failed to create handle: {0}")]
    Create(#[from] BackendError),
}

/// Errors returned by tile loaders.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The image was closed; never retried
    #[error("Tile pool is closed")]
    PoolClosed,

    /// The in-flight load was cancelled by a backend failure; safe to retry
    #[error("Load interrupted: {0}")]
    Interrupted(#[from] BackendError),

    /// Waiting for a handle exceeded the pool's acquire timeout; safe to retry
    #[error("Timed out after {0:?} waiting for a backend handle")]
    AcquireTimeout(Duration),

    /// A budgeted load ran out of I/O time; safe to retry
    #[error("I/O budget exhausted")]
    BudgetExhausted,

    /// The image's pixel representation has no typed loader
    #[error("Unsupported pixel type: {0}")]
    UnsupportedPixelType(String),

    /// The request does not fit the image geometry
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Series, channel or timepoint outside the image
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl LoadError {
    /// Whether a later request for the same block is expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LoadError::Interrupted(_) | LoadError::AcquireTimeout(_) | LoadError::BudgetExhausted
        )
    }
}

impl From<PoolError> for LoadError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Closed => LoadError::PoolClosed,
            PoolError::Timeout { waited } => LoadError::AcquireTimeout(waited),
            PoolError::Create(backend) => LoadError::Interrupted(backend),
            PoolError::InvalidCapacity(_) => LoadError::PoolClosed,
        }
    }
}

/// Errors raised while opening an image session through the registry.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Source could not be reached or read
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Manifest or data layout problem
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Driver failed to start
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Pool could not be built (eager creation failed)
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Levels are inconsistent
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Typed loader could not be built
    #[error("Loader error: {0}")]
    Load(#[from] LoadError),

    /// Requested series is not in the image
    #[error("Invalid series: {series} (image has {count})")]
    InvalidSeries { series: usize, count: usize },

    /// Requested channel is not in the image
    #[error("Invalid channel: {channel} (image has {count})")]
    InvalidChannel { channel: usize, count: usize },
}
