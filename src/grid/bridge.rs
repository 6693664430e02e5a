//! Bridge between a cell-based cache grid and a typed tile loader.
//!
//! A viewer addresses data by [`CellKey`]; the bridge turns keys into block
//! requests, decides per level whether a load may block or must fit in the
//! remaining I/O budget, and turns failures into placeholder cells that are
//! retried on the next request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::cache::{CellCache, CellCacheKey};
use super::cell_grid::CellGrid;
use crate::backend::BackendDriver;
use crate::error::{GeometryError, LoadError};
use crate::tile::{AnyTileLoader, BlockRequest, PixelBuffer, PixelType};

// =============================================================================
// Keys and hints
// =============================================================================

/// Address of one cell of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub timepoint: u32,
    pub level: usize,
    pub channel: u32,
    pub cell_index: u64,
}

/// Whether a load may wait for I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadingStrategy {
    /// Wait for the data
    Blocking,
    /// Load only within the remaining I/O budget
    Budgeted,
}

/// Per-level loading hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheHints {
    /// Higher loads first; level 0 has the highest priority
    pub priority: usize,
    pub strategy: LoadingStrategy,
}

impl CacheHints {
    pub fn for_level(level: usize, num_levels: usize, viewed_level: usize) -> Self {
        let strategy = if level == viewed_level {
            LoadingStrategy::Blocking
        } else {
            LoadingStrategy::Budgeted
        };
        Self {
            priority: num_levels.saturating_sub(1).saturating_sub(level),
            strategy,
        }
    }
}

// =============================================================================
// IoBudget
// =============================================================================

/// Remaining time budgeted loads may spend on I/O.
///
/// Shared between bridges; typically reset once per rendered frame.
#[derive(Debug)]
pub struct IoBudget {
    remaining: Mutex<Duration>,
}

impl IoBudget {
    pub fn new(total: Duration) -> Self {
        Self {
            remaining: Mutex::new(total),
        }
    }

    pub fn remaining(&self) -> Duration {
        *self.remaining.lock()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Deduct time spent on a load.
    pub fn charge(&self, spent: Duration) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(spent);
    }

    pub fn reset(&self, total: Duration) {
        *self.remaining.lock() = total;
    }
}

// =============================================================================
// LoadedCell
// =============================================================================

/// Result of a cell load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCell {
    pub key: CellKey,

    /// Cell shape clamped to the level extent
    pub shape: [u32; 3],

    pub data: Arc<PixelBuffer>,

    /// `false` for zero-filled placeholders standing in for a failed load
    pub complete: bool,
}

impl LoadedCell {
    fn placeholder(key: CellKey, shape: [u32; 3], pixel_type: PixelType) -> Self {
        let len = shape.iter().map(|&n| n as usize).product();
        Self {
            key,
            shape,
            data: Arc::new(PixelBuffer::zeroed(pixel_type, len)),
            complete: false,
        }
    }
}

// =============================================================================
// CacheGridBridge
// =============================================================================

/// Serves cells of one series through a typed loader.
pub struct CacheGridBridge<D: BackendDriver> {
    loader: Arc<AnyTileLoader<D>>,
    source: Arc<str>,
    grids: Vec<CellGrid>,
    viewed_level: AtomicUsize,
    budget: Option<Arc<IoBudget>>,
    cache: Option<Arc<CellCache>>,
}

impl<D: BackendDriver> CacheGridBridge<D> {
    /// Bridge over `loader`; `source` identifies the image in cache keys.
    pub fn new(loader: Arc<AnyTileLoader<D>>, source: impl Into<Arc<str>>) -> Self {
        let grids = loader
            .geometry()
            .levels()
            .iter()
            .map(CellGrid::for_level)
            .collect();
        Self {
            loader,
            source: source.into(),
            grids,
            viewed_level: AtomicUsize::new(0),
            budget: None,
            cache: None,
        }
    }

    /// Bound budgeted loads by `budget`. Without one they behave like
    /// blocking loads.
    pub fn with_budget(mut self, budget: Arc<IoBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Keep complete cells in `cache`.
    pub fn with_cache(mut self, cache: Arc<CellCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn loader(&self) -> &Arc<AnyTileLoader<D>> {
        &self.loader
    }

    pub fn num_levels(&self) -> usize {
        self.grids.len()
    }

    pub fn grid(&self, level: usize) -> Result<&CellGrid, GeometryError> {
        self.grids.get(level).ok_or(GeometryError::InvalidLevel {
            level,
            levels: self.grids.len(),
        })
    }

    /// Level the viewer currently displays; its loads block.
    pub fn set_viewed_level(&self, level: usize) {
        self.viewed_level.store(level, Ordering::Relaxed);
    }

    pub fn viewed_level(&self) -> usize {
        self.viewed_level.load(Ordering::Relaxed)
    }

    pub fn hints(&self, level: usize) -> CacheHints {
        CacheHints::for_level(level, self.num_levels(), self.viewed_level())
    }

    /// Every cell key of one level, in index order.
    pub fn cell_keys(
        &self,
        timepoint: u32,
        level: usize,
        channel: u32,
    ) -> Result<impl Iterator<Item = CellKey>, GeometryError> {
        let cells = self.grid(level)?.num_cells();
        Ok((0..cells).map(move |cell_index| CellKey {
            timepoint,
            level,
            channel,
            cell_index,
        }))
    }

    /// Block request for `key` and the clamped shape of its cell.
    pub fn block_request(&self, key: &CellKey) -> Result<(BlockRequest, [u32; 3]), LoadError> {
        let grid = self.grid(key.level)?;
        let position = grid.cell_position(key.cell_index).ok_or_else(|| {
            LoadError::InvalidRequest(format!(
                "cell {} (level {} has {})",
                key.cell_index,
                key.level,
                grid.num_cells()
            ))
        })?;

        let request = BlockRequest {
            timepoint: key.timepoint,
            level: key.level,
            channel: key.channel,
            origin: grid.cell_origin(position),
            shape: grid.cell_shape(),
        };
        Ok((request, grid.cell_shape_at(position)))
    }

    /// Load one cell.
    ///
    /// Cells of the viewed level block until loaded. Other levels are
    /// skipped when the budget is spent and cancelled when they overrun it,
    /// both reported as [`LoadError::BudgetExhausted`].
    pub async fn load_cell(&self, key: CellKey) -> Result<LoadedCell, LoadError> {
        let (request, shape) = self.block_request(&key)?;

        let cache_key = CellCacheKey::new(self.source.clone(), self.loader.series(), key);
        if let Some(cache) = &self.cache {
            if let Some(data) = cache.get(&cache_key).await {
                return Ok(LoadedCell {
                    key,
                    shape,
                    data,
                    complete: true,
                });
            }
        }

        let data = match (self.hints(key.level).strategy, &self.budget) {
            (LoadingStrategy::Budgeted, Some(budget)) => {
                self.load_budgeted(&request, budget).await?
            }
            _ => self.loader.load(&request).await?,
        };
        let data = Arc::new(data);

        if let Some(cache) = &self.cache {
            cache.put(cache_key, data.clone()).await;
        }

        Ok(LoadedCell {
            key,
            shape,
            data,
            complete: true,
        })
    }

    /// Load one cell, substituting a zero-filled placeholder on failure.
    ///
    /// Placeholders are never cached, so the next request retries.
    pub async fn load_cell_or_placeholder(&self, key: CellKey) -> LoadedCell {
        match self.load_cell(key).await {
            Ok(cell) => cell,
            Err(err) => {
                if err.is_transient() {
                    debug!(?key, error = %err, "cell load deferred, using placeholder");
                } else {
                    warn!(?key, error = %err, "cell load failed, using placeholder");
                }
                let shape = self
                    .block_request(&key)
                    .map(|(_, shape)| shape)
                    .unwrap_or([0, 0, 0]);
                LoadedCell::placeholder(key, shape, self.loader.pixel_type())
            }
        }
    }

    async fn load_budgeted(
        &self,
        request: &BlockRequest,
        budget: &IoBudget,
    ) -> Result<PixelBuffer, LoadError> {
        let remaining = budget.remaining();
        if remaining.is_zero() {
            return Err(LoadError::BudgetExhausted);
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(remaining, self.loader.load(request)).await;
        budget.charge(started.elapsed());

        outcome.map_err(|_| LoadError::BudgetExhausted)?
    }
}
