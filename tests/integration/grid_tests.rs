//! Cache-grid bridge over a synthetic image with slow reads.

use std::sync::Arc;
use std::time::Duration;

use pyramid_fetch::backend::SyntheticImage;
use pyramid_fetch::error::LoadError;
use pyramid_fetch::grid::{CellCache, CellKey, IoBudget, LoadingStrategy};
use pyramid_fetch::source::{OpenOptions, SourceKey, SourceRegistry, SyntheticOpener};
use pyramid_fetch::tile::{PixelBuffer, PixelType};

fn opener(latency: Duration) -> SyntheticOpener {
    SyntheticOpener::new(SyntheticImage {
        dimensions: [128, 128, 4],
        block_shape: [32, 32, 4],
        levels: 3,
        ..Default::default()
    })
    .with_read_latency(latency)
}

fn key(level: usize, cell_index: u64) -> CellKey {
    CellKey {
        timepoint: 0,
        level,
        channel: 0,
        cell_index,
    }
}

#[tokio::test]
async fn test_hints_follow_viewed_level() {
    let registry = SourceRegistry::new(opener(Duration::ZERO));
    let session = registry
        .get(&SourceKey::new("grid", OpenOptions::default()))
        .await
        .unwrap();
    let bridge = session.bridge(0).unwrap();

    bridge.set_viewed_level(2);
    assert_eq!(bridge.hints(2).strategy, LoadingStrategy::Blocking);
    assert_eq!(bridge.hints(0).strategy, LoadingStrategy::Budgeted);
    assert_eq!(bridge.hints(0).priority, 2);
    assert_eq!(bridge.hints(2).priority, 0);

    // Level 0 is 4 x 4 x 1 cells, level 2 is 1 x 1 x 1
    assert_eq!(bridge.grid(0).unwrap().num_cells(), 16);
    assert_eq!(bridge.grid(2).unwrap().num_cells(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_budget_limits_background_levels_only() {
    let registry = SourceRegistry::new(opener(Duration::from_millis(10)));
    let session = registry
        .get(&SourceKey::new("grid", OpenOptions::default()))
        .await
        .unwrap();

    // Depth 4 means four reads of 10ms per cell
    let budget = Arc::new(IoBudget::new(Duration::from_millis(100)));
    let bridge = session.bridge(0).unwrap().with_budget(budget.clone());
    bridge.set_viewed_level(0);

    // Two background cells fit; the third overruns and is cancelled
    assert!(bridge.load_cell(key(1, 0)).await.unwrap().complete);
    assert!(bridge.load_cell(key(1, 1)).await.unwrap().complete);
    assert!(matches!(
        bridge.load_cell(key(1, 2)).await,
        Err(LoadError::BudgetExhausted)
    ));
    assert!(budget.is_exhausted());
    assert_eq!(session.pool_stats().checked_out, 0);

    // The viewed level still blocks
    assert!(bridge.load_cell(key(0, 5)).await.unwrap().complete);

    // A new frame refills the budget
    budget.reset(Duration::from_millis(100));
    assert!(bridge.load_cell(key(1, 2)).await.unwrap().complete);
}

#[tokio::test]
async fn test_placeholder_is_retried_after_recovery() {
    let registry = SourceRegistry::new(opener(Duration::ZERO));
    let session = registry
        .get(&SourceKey::new("grid", OpenOptions::default()))
        .await
        .unwrap();

    let budget = Arc::new(IoBudget::new(Duration::ZERO));
    let cache = Arc::new(CellCache::with_capacity(1 << 20));
    let bridge = session
        .bridge(0)
        .unwrap()
        .with_budget(budget.clone())
        .with_cache(cache.clone());

    let placeholder = bridge.load_cell_or_placeholder(key(2, 0)).await;
    assert!(!placeholder.complete);
    assert_eq!(placeholder.shape, [32, 32, 4]);
    assert_eq!(
        *placeholder.data,
        PixelBuffer::zeroed(PixelType::U16, 32 * 32 * 4)
    );
    assert!(cache.is_empty().await);

    budget.reset(Duration::from_secs(10));
    let cell = bridge.load_cell_or_placeholder(key(2, 0)).await;
    assert!(cell.complete);
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_shared_cache_across_sessions() {
    let registry = SourceRegistry::new(opener(Duration::ZERO));
    let cache = Arc::new(CellCache::with_capacity(1 << 22));

    let a = registry
        .get(&SourceKey::new("a", OpenOptions::default()))
        .await
        .unwrap();
    let b = registry
        .get(&SourceKey::new("b", OpenOptions::default()))
        .await
        .unwrap();

    let bridge_a = a.bridge(0).unwrap().with_cache(cache.clone());
    let bridge_b = b.bridge(0).unwrap().with_cache(cache.clone());

    bridge_a.load_cell(key(0, 0)).await.unwrap();
    bridge_b.load_cell(key(0, 0)).await.unwrap();
    assert_eq!(cache.len().await, 2);

    assert_eq!(cache.invalidate_source("a").await, 1);
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_closed_session_yields_placeholders() {
    let registry = SourceRegistry::new(opener(Duration::ZERO));
    let key_a = SourceKey::new("closing", OpenOptions::default());
    let session = registry.get(&key_a).await.unwrap();
    let bridge = session.bridge(0).unwrap();

    assert!(registry.invalidate(&key_a).await);
    assert!(matches!(
        bridge.load_cell(key(0, 0)).await,
        Err(LoadError::PoolClosed)
    ));
    assert!(!bridge.load_cell_or_placeholder(key(0, 0)).await.complete);
}
