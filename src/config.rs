//! Configuration management for pyramid-fetch.
//!
//! This module provides a configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `PYRAMID_` prefix
//! - Defaults for all optional settings
//!
//! # Environment Variables
//!
//! - `PYRAMID_S3_BUCKET` - Read datasets from this bucket instead of the local filesystem
//! - `PYRAMID_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `PYRAMID_S3_REGION` - AWS region (default: us-east-1)
//! - `PYRAMID_POOL_SIZE` - Backend handles per image (default: 4)
//! - `PYRAMID_CREATION` - `dynamic` or `eager` handle creation (default: dynamic)
//! - `PYRAMID_ACQUIRE_TIMEOUT_MS` - Bound on waiting for a free handle
//! - `PYRAMID_SWAP_ZC` - Exchange z and channel when computing plane indices
//! - `PYRAMID_SERIES` - Series to load (default: 0)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::pool::{CreationMode, DEFAULT_POOL_CAPACITY};
use crate::source::OpenOptions;

// =============================================================================
// Default Values
// =============================================================================

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default number of concurrent bench workers.
pub const DEFAULT_BENCH_WORKERS: usize = 8;

/// Default number of cell loads per bench worker.
pub const DEFAULT_BENCH_REQUESTS: usize = 100;

/// Default export region edge in pixels.
pub const DEFAULT_EXPORT_SIZE: u32 = 512;

/// Upper bound on the pool size accepted from the command line.
pub const MAX_POOL_SIZE: usize = 256;

// =============================================================================
// CLI Arguments
// =============================================================================

/// pyramid-fetch - Concurrent tile fetching from multi-resolution images.
///
/// Reads raw pyramid datasets from local disk or S3 through a bounded pool
/// of backend handles.
#[derive(Parser, Debug, Clone)]
#[command(name = "pyramid-fetch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub source: SourceConfig,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Validate the global options and the selected subcommand.
    pub fn validate(&self) -> Result<(), String> {
        self.source.validate()?;
        match &self.command {
            Command::Inspect(config) => config.validate(&self.source),
            Command::Bench(config) => config.validate(&self.source),
            Command::Export(config) => config.validate(&self.source),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print image metadata, per-level geometry and grid sizes.
    Inspect(InspectConfig),

    /// Run a concurrent cell-load workload and report throughput.
    Bench(BenchConfig),

    /// Load one 2D block and write it as PNG.
    Export(ExportConfig),
}

/// Handle creation discipline.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreationArg {
    /// Build handles on demand, one at a time
    #[default]
    Dynamic,
    /// Build every handle when the image is opened
    Eager,
}

impl From<CreationArg> for CreationMode {
    fn from(arg: CreationArg) -> Self {
        match arg {
            CreationArg::Dynamic => CreationMode::Dynamic,
            CreationArg::Eager => CreationMode::Eager,
        }
    }
}

/// Where images come from and how they are opened.
#[derive(Args, Debug, Clone)]
pub struct SourceConfig {
    // =========================================================================
    // S3 Configuration
    // =========================================================================
    /// S3 bucket holding the datasets. Without it, locations are local paths.
    #[arg(long, global = true, env = "PYRAMID_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, global = true, env = "PYRAMID_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, global = true, default_value = DEFAULT_REGION, env = "PYRAMID_S3_REGION")]
    pub s3_region: String,

    // =========================================================================
    // Pool Configuration
    // =========================================================================
    /// Backend handles per opened image.
    #[arg(long, global = true, default_value_t = DEFAULT_POOL_CAPACITY, env = "PYRAMID_POOL_SIZE")]
    pub pool_size: usize,

    /// Handle creation discipline.
    #[arg(long, global = true, value_enum, default_value_t = CreationArg::Dynamic, env = "PYRAMID_CREATION")]
    pub creation: CreationArg,

    /// Fail loads that wait longer than this for a handle (milliseconds).
    #[arg(long, global = true, env = "PYRAMID_ACQUIRE_TIMEOUT_MS")]
    pub acquire_timeout_ms: Option<u64>,

    // =========================================================================
    // Selection
    // =========================================================================
    /// Exchange z and channel when computing plane indices.
    #[arg(long, global = true, default_value_t = false, env = "PYRAMID_SWAP_ZC")]
    pub swap_zc: bool,

    /// Series to load.
    #[arg(long, global = true, default_value_t = 0, env = "PYRAMID_SERIES")]
    pub series: usize,
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(bucket) = &self.s3_bucket {
            if bucket.is_empty() {
                return Err("S3 bucket name must not be empty".to_string());
            }
        }
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(format!("pool_size must be between 1 and {}", MAX_POOL_SIZE));
        }
        if self.acquire_timeout_ms == Some(0) {
            return Err("acquire_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            pool_size: self.pool_size,
            creation: self.creation.into(),
            acquire_timeout: self.acquire_timeout(),
            swap_zc: self.swap_zc,
        }
    }
}

// =============================================================================
// Inspect Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// Dataset directory, manifest path, or manifest key in the bucket.
    pub location: String,

    /// Print the manifest metadata as JSON instead of a summary.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl InspectConfig {
    pub fn validate(&self, _source: &SourceConfig) -> Result<(), String> {
        if self.location.is_empty() {
            return Err("location is required".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Bench Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct BenchConfig {
    /// Dataset to load from. Ignored with --synthetic.
    pub location: Option<String>,

    /// Use a generated in-memory image instead of a dataset.
    #[arg(long, default_value_t = false)]
    pub synthetic: bool,

    /// Concurrent workers.
    #[arg(long, default_value_t = DEFAULT_BENCH_WORKERS)]
    pub workers: usize,

    /// Cell loads per worker.
    #[arg(long, default_value_t = DEFAULT_BENCH_REQUESTS)]
    pub requests: usize,

    /// Level to load; it is the viewed level, so its loads block.
    #[arg(long, default_value_t = 0)]
    pub level: usize,

    #[arg(long, default_value_t = 0)]
    pub channel: u32,

    /// Per-read latency of the synthetic image (milliseconds).
    #[arg(long, default_value_t = 0)]
    pub latency_ms: u64,

    /// Keep loaded cells in a cache of this many megabytes.
    #[arg(long)]
    pub cache_mb: Option<usize>,
}

impl BenchConfig {
    pub fn validate(&self, source: &SourceConfig) -> Result<(), String> {
        if !self.synthetic && self.location.is_none() {
            return Err("a location is required unless --synthetic is set".to_string());
        }
        if self.synthetic && source.s3_bucket.is_some() {
            return Err("--synthetic cannot be combined with --s3-bucket".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.requests == 0 {
            return Err("requests must be greater than 0".to_string());
        }
        if self.cache_mb == Some(0) {
            return Err("cache_mb must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn read_latency(&self) -> Option<Duration> {
        (self.latency_ms > 0).then(|| Duration::from_millis(self.latency_ms))
    }

    /// Location used as the session key.
    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or("synthetic")
    }
}

// =============================================================================
// Export Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ExportConfig {
    /// Dataset directory, manifest path, or manifest key in the bucket.
    pub location: String,

    /// PNG file to write.
    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(long, default_value_t = 0)]
    pub level: usize,

    #[arg(long, default_value_t = 0)]
    pub channel: u32,

    #[arg(long, default_value_t = 0)]
    pub timepoint: u32,

    /// Plane to export.
    #[arg(long, default_value_t = 0)]
    pub z: u64,

    #[arg(long, default_value_t = 0)]
    pub x: u64,

    #[arg(long, default_value_t = 0)]
    pub y: u64,

    #[arg(long, default_value_t = DEFAULT_EXPORT_SIZE)]
    pub width: u32,

    #[arg(long, default_value_t = DEFAULT_EXPORT_SIZE)]
    pub height: u32,
}

impl ExportConfig {
    pub fn validate(&self, _source: &SourceConfig) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err("width and height must be greater than 0".to_string());
        }
        let is_png = self
            .output
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if !is_png {
            return Err("output must be a .png file".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
