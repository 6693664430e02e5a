//! Test utilities for integration tests.
//!
//! This module provides instrumented factories and drivers that count
//! constructions, live handles and reads, plus helpers for building images.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use pyramid_fetch::backend::{
    BackendDriver, BackendKind, ByteOrder, ImageMetadata, LevelMetadata, MemoryDriver,
    MemoryHandle, SampleFormat, SeriesMetadata,
};
use pyramid_fetch::error::BackendError;
use pyramid_fetch::pool::ResourceFactory;
use pyramid_fetch::{Region2, Selection};

// =============================================================================
// Instrumented Factory
// =============================================================================

/// Counters shared between a factory and the test observing it.
#[derive(Default)]
pub struct FactoryCounters {
    pub created: AtomicUsize,
    pub cloned: AtomicUsize,
    pub live: AtomicUsize,
    pub closed: AtomicUsize,
    pub in_use: AtomicUsize,
    pub max_in_use: AtomicUsize,
}

impl FactoryCounters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Handles built by either `create` or `clone_resource`.
    pub fn built(&self) -> usize {
        self.created() + self.cloned.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn max_in_use(&self) -> usize {
        self.max_in_use.load(Ordering::SeqCst)
    }

    /// Mark a handle as in use for the lifetime of the returned guard.
    pub fn enter(self: &Arc<Self>) -> InUse {
        let now = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_use.fetch_max(now, Ordering::SeqCst);
        InUse(self.clone())
    }
}

pub struct InUse(Arc<FactoryCounters>);

impl Drop for InUse {
    fn drop(&mut self) {
        self.0.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle produced by [`SlowFactory`].
#[derive(Debug)]
pub struct TestHandle {
    pub id: usize,
    pub uses: usize,
}

/// How a [`SlowFactory`] answers clone requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cloning {
    Unsupported,
    Works,
    Fails,
}

/// Factory whose construction takes `delay` and whose handles are counted.
pub struct SlowFactory {
    pub counters: Arc<FactoryCounters>,
    pub delay: Duration,
    pub cloning: Cloning,
}

impl SlowFactory {
    pub fn new(delay: Duration) -> Self {
        Self {
            counters: Arc::new(FactoryCounters::default()),
            delay,
            cloning: Cloning::Unsupported,
        }
    }

    pub fn with_cloning(mut self, cloning: Cloning) -> Self {
        self.cloning = cloning;
        self
    }
}

#[async_trait]
impl ResourceFactory for SlowFactory {
    type Resource = TestHandle;

    async fn create(&self) -> Result<TestHandle, BackendError> {
        tokio::time::sleep(self.delay).await;
        let id = self.counters.created.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Ok(TestHandle { id, uses: 0 })
    }

    fn supports_clone(&self) -> bool {
        self.cloning != Cloning::Unsupported
    }

    async fn clone_resource(&self, template: &mut TestHandle) -> Result<TestHandle, BackendError> {
        tokio::time::sleep(self.delay / 2).await;
        if self.cloning == Cloning::Fails {
            return Err(BackendError::Unsupported("clone"));
        }
        let id = self.counters.cloned.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Ok(TestHandle {
            id: 1000 + template.id + id,
            uses: 0,
        })
    }

    fn close(&self, _resource: TestHandle) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Recording Driver
// =============================================================================

/// Memory driver that records every read and can fail reads of one plane.
pub struct RecordingDriver {
    inner: MemoryDriver,
    reads: Mutex<Vec<(u64, Region2)>>,
    selections: Mutex<Vec<Selection>>,
    failing_plane: Option<u64>,
}

impl RecordingDriver {
    pub fn new(inner: MemoryDriver) -> Self {
        Self {
            inner,
            reads: Mutex::new(Vec::new()),
            selections: Mutex::new(Vec::new()),
            failing_plane: None,
        }
    }

    /// Reads of `plane` fail with a backend error.
    pub fn failing_on(mut self, plane: u64) -> Self {
        self.failing_plane = Some(plane);
        self
    }

    pub fn reads(&self) -> Vec<(u64, Region2)> {
        self.reads.lock().clone()
    }

    pub fn selections(&self) -> Vec<Selection> {
        self.selections.lock().clone()
    }
}

#[async_trait]
impl ResourceFactory for RecordingDriver {
    type Resource = MemoryHandle;

    async fn create(&self) -> Result<MemoryHandle, BackendError> {
        self.inner.create().await
    }
}

#[async_trait]
impl BackendDriver for RecordingDriver {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn metadata(&self) -> &ImageMetadata {
        self.inner.metadata()
    }

    async fn select(
        &self,
        handle: &mut MemoryHandle,
        selection: Selection,
    ) -> Result<(), BackendError> {
        self.selections.lock().push(selection);
        self.inner.select(handle, selection).await
    }

    async fn read_plane_region(
        &self,
        handle: &mut MemoryHandle,
        plane: u64,
        region: Region2,
    ) -> Result<Bytes, BackendError> {
        self.reads.lock().push((plane, region));
        if self.failing_plane == Some(plane) {
            return Err(BackendError::Unsupported("injected read failure"));
        }
        self.inner.read_plane_region(handle, plane, region).await
    }
}

// =============================================================================
// Image helpers
// =============================================================================

/// Single-series, single-level image metadata.
pub fn single_level(
    format: SampleFormat,
    byte_order: ByteOrder,
    dimensions: [u64; 3],
    size_c: u32,
) -> ImageMetadata {
    ImageMetadata {
        name: "test".to_string(),
        format,
        byte_order,
        size_c,
        size_t: 1,
        dimension_order: Default::default(),
        series: vec![SeriesMetadata {
            name: None,
            levels: vec![LevelMetadata {
                dimensions,
                block_shape: [dimensions[0] as u32, dimensions[1] as u32, 1],
            }],
            voxel_size: [1.0, 1.0, 1.0],
        }],
    }
}

/// A fresh, empty directory under the system temp dir.
pub fn temp_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let unique = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "pyramid-fetch-{}-{}-{}",
        name,
        std::process::id(),
        unique
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}
