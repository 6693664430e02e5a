//! Resource pool behaviour under concurrent load.

use std::sync::Arc;
use std::time::Duration;

use pyramid_fetch::error::PoolError;
use pyramid_fetch::pool::{PoolConfig, ResourcePool};

use super::test_utils::{Cloning, SlowFactory};

const CAPACITY: usize = 4;

/// 50 tasks x 100 acquire/use/recycle cycles against a capacity-4 pool.
async fn run_stress(factory: SlowFactory) {
    let counters = factory.counters.clone();
    let pool = Arc::new(
        ResourcePool::new(Arc::new(factory), PoolConfig::new(CAPACITY))
            .await
            .unwrap(),
    );

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let pool = pool.clone();
            let counters = counters.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let mut handle = pool.acquire().await.unwrap();
                    let _in_use = counters.enter();
                    handle.uses += 1;
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let all = async {
        for task in tasks {
            task.await.unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(60), all)
        .await
        .expect("stress workload deadlocked");

    assert!(counters.max_in_use() <= CAPACITY);
    assert!(counters.created() <= CAPACITY);
    assert!(counters.built() <= CAPACITY);
    assert_eq!(counters.live(), counters.built());

    let stats = pool.stats();
    assert_eq!(stats.checked_out, 0);
    assert_eq!(stats.created, counters.built());
    assert!(stats.free <= stats.created);

    pool.shutdown();
    assert_eq!(counters.live(), 0);
    assert_eq!(counters.closed(), counters.built());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_stress_respects_capacity_and_leaks_nothing() {
    run_stress(SlowFactory::new(Duration::from_millis(5))).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_stress_with_clone_template_stays_within_capacity() {
    run_stress(SlowFactory::new(Duration::from_millis(5)).with_cloning(Cloning::Works)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_stress_with_failing_clones_stays_within_capacity() {
    run_stress(SlowFactory::new(Duration::from_millis(5)).with_cloning(Cloning::Fails)).await;
}

#[tokio::test]
async fn test_eager_clone_pool_builds_exactly_capacity() {
    let factory = SlowFactory::new(Duration::from_millis(1)).with_cloning(Cloning::Works);
    let counters = factory.counters.clone();
    let pool = ResourcePool::new(Arc::new(factory), PoolConfig::new(CAPACITY).eager())
        .await
        .unwrap();

    assert_eq!(counters.created(), 1);
    assert_eq!(counters.built(), CAPACITY);
    assert_eq!(pool.stats().free, CAPACITY);

    assert_eq!(pool.shutdown(), CAPACITY);
    assert_eq!(counters.live(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_concurrent_with_acquires() {
    let factory = Arc::new(SlowFactory::new(Duration::from_millis(2)));
    let counters = factory.counters.clone();
    let pool = Arc::new(
        ResourcePool::new(factory, PoolConfig::new(CAPACITY))
            .await
            .unwrap(),
    );

    let workers: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                loop {
                    match pool.acquire().await {
                        Ok(_handle) => tokio::time::sleep(Duration::from_millis(1)).await,
                        Err(PoolError::Closed) => return,
                        Err(other) => panic!("unexpected error: {}", other),
                    }
                }
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let shutdowns: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move { pool.shutdown() })
        })
        .collect();
    for shutdown in shutdowns {
        shutdown.await.unwrap();
    }

    for worker in workers {
        tokio::time::timeout(Duration::from_secs(10), worker)
            .await
            .expect("worker did not observe shutdown")
            .unwrap();
    }

    // Each handle closed exactly once, whether free or returned late
    assert_eq!(counters.live(), 0);
    assert_eq!(counters.closed(), counters.created());
    assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
}

#[tokio::test]
async fn test_shutdown_twice_is_idempotent() {
    let factory = Arc::new(SlowFactory::new(Duration::ZERO));
    let counters = factory.counters.clone();
    let pool = ResourcePool::new(factory, PoolConfig::new(CAPACITY).eager())
        .await
        .unwrap();

    assert_eq!(pool.shutdown(), CAPACITY);
    assert_eq!(pool.shutdown(), 0);
    assert_eq!(counters.closed(), CAPACITY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifo_hand_off_under_contention() {
    let factory = Arc::new(SlowFactory::new(Duration::ZERO));
    let pool = Arc::new(ResourcePool::new(factory, PoolConfig::new(1)).await.unwrap());

    let held = pool.acquire().await.unwrap();

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let handle = pool.acquire().await.unwrap();
                handle.id
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);

    for waiter in waiters {
        // Single-member pool: everyone gets handle 0
        assert_eq!(waiter.await.unwrap(), 0);
    }
    assert_eq!(pool.stats().created, 1);
}

#[tokio::test]
async fn test_dropped_acquire_future_does_not_leak() {
    let factory = Arc::new(SlowFactory::new(Duration::from_millis(50)));
    let counters = factory.counters.clone();
    let pool = ResourcePool::new(factory, PoolConfig::new(1)).await.unwrap();

    // Cancelled mid-construction
    let cancelled = tokio::time::timeout(Duration::from_millis(5), pool.acquire()).await;
    assert!(cancelled.is_err());

    // The gate was released; a later acquire can construct
    let handle = pool.acquire().await.unwrap();
    drop(handle);
    assert_eq!(pool.stats().checked_out, 0);

    pool.shutdown();
    assert_eq!(counters.live(), 0);
}
