//! Cache of decoded cells.
//!
//! Cells are cached by source, series and [`CellKey`], and the cache tracks
//! the total decoded size in bytes, evicting least-recently-used cells when
//! capacity is exceeded. Only complete cells are ever stored; placeholders
//! must be retried.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::RwLock;

use super::bridge::CellKey;
use crate::tile::PixelBuffer;

/// Default cache capacity: 256MB of decoded pixels
pub const DEFAULT_CELL_CACHE_CAPACITY: usize = 256 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 100_000;

// =============================================================================
// Cache Key
// =============================================================================

/// Cache key for decoded cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellCacheKey {
    /// Identifier of the opened image
    pub source: Arc<str>,

    pub series: usize,

    pub cell: CellKey,
}

impl CellCacheKey {
    pub fn new(source: impl Into<Arc<str>>, series: usize, cell: CellKey) -> Self {
        Self {
            source: source.into(),
            series,
            cell,
        }
    }
}

// =============================================================================
// Cell Cache
// =============================================================================

struct Entries {
    lru: LruCache<CellCacheKey, Arc<PixelBuffer>>,
    size: usize,
}

/// LRU cache of decoded cells with byte-based capacity.
///
/// Shared across tasks through `Arc`; several bridges (one per series or
/// channel) may use the same cache.
pub struct CellCache {
    entries: RwLock<Entries>,

    /// Maximum total size in bytes
    max_size: usize,
}

impl CellCache {
    /// Create a cache with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CELL_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `max_size` bytes of decoded pixels.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache with byte capacity and an entry limit.
    ///
    /// # Arguments
    ///
    /// * `max_size` - Maximum total size of cached cells in bytes
    /// * `max_entries` - Maximum number of cells; zero is treated as one
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(Entries {
                lru: LruCache::new(max_entries),
                size: 0,
            }),
            max_size,
        }
    }

    /// Get a cell, marking it as recently used.
    pub async fn get(&self, key: &CellCacheKey) -> Option<Arc<PixelBuffer>> {
        let mut entries = self.entries.write().await;
        entries.lru.get(key).cloned()
    }

    /// Check if a cell is cached without updating LRU order.
    pub async fn contains(&self, key: &CellCacheKey) -> bool {
        self.entries.read().await.lru.contains(key)
    }

    /// Store a cell, evicting least-recently-used cells while over capacity.
    ///
    /// A cell larger than the whole capacity is not stored.
    pub async fn put(&self, key: CellCacheKey, data: Arc<PixelBuffer>) {
        let data_size = data.byte_size();
        if data_size > self.max_size {
            return;
        }

        let mut entries = self.entries.write().await;

        // Returns either the replaced value or the entry evicted by count
        if let Some((_, evicted)) = entries.lru.push(key, data) {
            entries.size = entries.size.saturating_sub(evicted.byte_size());
        }
        entries.size += data_size;

        while entries.size > self.max_size {
            match entries.lru.pop_lru() {
                Some((_, evicted)) => {
                    entries.size = entries.size.saturating_sub(evicted.byte_size());
                }
                None => break,
            }
        }
    }

    /// Remove a cell.
    pub async fn remove(&self, key: &CellCacheKey) -> Option<Arc<PixelBuffer>> {
        let mut entries = self.entries.write().await;
        let removed = entries.lru.pop(key)?;
        entries.size = entries.size.saturating_sub(removed.byte_size());
        Some(removed)
    }

    /// Drop every cell belonging to `source`.
    pub async fn invalidate_source(&self, source: &str) -> usize {
        let mut entries = self.entries.write().await;
        let doomed: Vec<CellCacheKey> = entries
            .lru
            .iter()
            .filter(|(key, _)| &*key.source == source)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            if let Some(removed) = entries.lru.pop(key) {
                entries.size = entries.size.saturating_sub(removed.byte_size());
            }
        }
        doomed.len()
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.lru.clear();
        entries.size = 0;
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.lru.is_empty()
    }

    /// Current total size of cached cells in bytes.
    pub async fn size(&self) -> usize {
        self.entries.read().await.size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for CellCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
