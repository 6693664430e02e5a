//! Bounded pool of expensive, non-thread-safe resources.
//!
//! # Algorithm
//!
//! The pool keeps a free list and a count of resources constructed so far.
//! Free resources are handed out through a FIFO-fair [`Semaphore`] holding
//! one permit per free resource, so no waiter starves while newcomers keep
//! succeeding.
//!
//! ```text
//! acquire()
//!   ├─ free resource and nobody queued ahead? ──────────► hand it out
//!   ├─ created < capacity and constructor gate free? ───► construct one
//!   └─ otherwise wait for either
//!        ├─ a recycled resource (FIFO) ─────────────────► hand it out
//!        └─ the constructor gate being released ────────► retry from the top
//! ```
//!
//! With [`CreationMode::Eager`] all resources are built inside
//! [`ResourcePool::new`], so the construction branch is never taken.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use crate::error::PoolError;

use super::factory::ResourceFactory;

// =============================================================================
// Configuration
// =============================================================================

/// Default number of handles per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 4;

/// When pool members are constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CreationMode {
    /// All members are built before the pool is returned to the caller.
    Eager,

    /// Members are built lazily, one at a time, on first demand.
    #[default]
    Dynamic,
}

/// Pool construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolConfig {
    /// Maximum number of resources ever constructed (and checked out)
    pub capacity: usize,

    /// Eager or dynamic construction
    pub creation: CreationMode,

    /// Upper bound on how long `acquire` may wait; `None` waits forever
    pub acquire_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Dynamic pool of the given capacity with no acquire timeout.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            creation: CreationMode::Dynamic,
            acquire_timeout: None,
        }
    }

    /// Build all members up front.
    pub fn eager(mut self) -> Self {
        self.creation = CreationMode::Eager;
        self
    }

    /// Bound the time `acquire` may wait.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

/// Snapshot of pool accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured capacity
    pub capacity: usize,
    /// Members constructed so far (never exceeds capacity)
    pub created: usize,
    /// Members sitting on the free list
    pub free: usize,
    /// Members currently owned by callers
    pub checked_out: usize,
    /// Whether shutdown has run
    pub closed: bool,
}

// =============================================================================
// ResourcePool
// =============================================================================

struct PoolState<R> {
    free: VecDeque<R>,
    /// Clone source, only present when the factory supports cloning
    template: Option<R>,
    created: usize,
    checked_out: usize,
    closed: bool,
}

/// Bounded pool of interchangeable resources built by a [`ResourceFactory`].
///
/// Every successful [`acquire`](ResourcePool::acquire) returns a [`Pooled`]
/// guard that recycles the resource when dropped, so a resource can never be
/// lost on an error path.
///
/// # Example
///
/// ```ignore
/// let pool = ResourcePool::new(Arc::new(driver), PoolConfig::new(4)).await?;
///
/// {
///     let mut handle = pool.acquire().await?;
///     driver.select(&mut handle, selection).await?;
/// } // handle recycled here
///
/// pool.shutdown();
/// ```
pub struct ResourcePool<F: ResourceFactory> {
    factory: Arc<F>,
    config: PoolConfig,
    state: Mutex<PoolState<F::Resource>>,
    /// One permit per resource on the free list
    available: Semaphore,
    /// Single-holder constructor gate
    constructing: AtomicBool,
    /// Signalled whenever the constructor gate is released
    construction_done: Notify,
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Create a pool.
    ///
    /// With [`CreationMode::Eager`] this constructs all `capacity` members
    /// before returning; if any construction fails, the members built so far
    /// are closed and the error is returned.
    pub async fn new(factory: Arc<F>, config: PoolConfig) -> Result<Self, PoolError> {
        if config.capacity == 0 {
            return Err(PoolError::InvalidCapacity(config.capacity));
        }

        let pool = Self {
            factory,
            config,
            state: Mutex::new(PoolState {
                free: VecDeque::with_capacity(config.capacity),
                template: None,
                created: 0,
                checked_out: 0,
                closed: false,
            }),
            available: Semaphore::new(0),
            constructing: AtomicBool::new(false),
            construction_done: Notify::new(),
        };

        if config.creation == CreationMode::Eager {
            while pool.below_capacity()? {
                match pool.build().await {
                    Ok(resource) => pool.admit(resource),
                    Err(err) => {
                        pool.shutdown();
                        return Err(err);
                    }
                }
            }
            debug!(capacity = config.capacity, "eager pool warmed");
        }

        Ok(pool)
    }

    /// The factory this pool constructs resources with.
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Whether [`shutdown`](ResourcePool::shutdown) has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Current accounting snapshot.
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: self.config.capacity,
            created: state.created,
            free: state.free.len(),
            checked_out: state.checked_out,
            closed: state.closed,
        }
    }

    /// Take a resource, waiting until one is free or can be constructed.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Closed`] once the pool is shut down
    /// - [`PoolError::Timeout`] if an acquire timeout is configured and expires
    /// - [`PoolError::Create`] if this caller constructed a resource and failed
    pub async fn acquire(&self) -> Result<Pooled<'_, F>, PoolError> {
        let resource = match self.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.checkout())
                .await
                .map_err(|_| PoolError::Timeout { waited: limit })??,
            None => self.checkout().await?,
        };

        Ok(Pooled {
            pool: self,
            resource: Some(resource),
        })
    }

    /// Return a resource previously taken with [`Pooled::detach`].
    ///
    /// Must be called exactly once per detached resource. Recycling with
    /// nothing checked out is a programming error: it asserts in debug builds
    /// and closes the surplus resource in release builds.
    pub fn recycle(&self, resource: F::Resource) {
        let mut state = self.state.lock();
        debug_assert!(state.checked_out > 0, "recycle without a matching acquire");

        if state.checked_out == 0 {
            drop(state);
            warn!("recycle without a matching acquire, closing surplus resource");
            self.factory.close(resource);
            return;
        }

        state.checked_out -= 1;

        if state.closed {
            drop(state);
            self.factory.close(resource);
            return;
        }

        state.free.push_back(resource);
        drop(state);
        self.available.add_permits(1);
    }

    /// Close the pool.
    ///
    /// Free resources and the clone template are closed now; resources still
    /// checked out are closed when they come back. Waiting and future
    /// acquires fail with [`PoolError::Closed`]. Calling this more than once
    /// is a no-op.
    ///
    /// Returns the number of resources closed by this call.
    pub fn shutdown(&self) -> usize {
        let (drained, template) = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            let drained: Vec<_> = state.free.drain(..).collect();
            (drained, state.template.take())
        };

        self.available.close();
        self.construction_done.notify_waiters();

        let mut closed = drained.len();
        for resource in drained {
            self.factory.close(resource);
        }
        if let Some(template) = template {
            self.factory.close(template);
            closed += 1;
        }

        info!(closed, "resource pool shut down");
        closed
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn checkout(&self) -> Result<F::Resource, PoolError> {
        loop {
            // Register before probing so a gate release between the probe and
            // the wait below is not missed.
            let construction_done = self.construction_done.notified();
            tokio::pin!(construction_done);
            construction_done.as_mut().enable();

            match self.available.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    return self.take_free();
                }
                Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
                Err(TryAcquireError::NoPermits) => {}
            }

            if self.below_capacity()? {
                if let Some(gate) = ConstructorGate::enter(self) {
                    match self.construct_member(gate).await? {
                        Some(resource) => return Ok(resource),
                        None => continue,
                    }
                }
            }

            tokio::select! {
                permit = self.available.acquire() => {
                    let permit = permit.map_err(|_| PoolError::Closed)?;
                    permit.forget();
                    return self.take_free();
                }
                _ = construction_done.as_mut() => {}
            }
        }
    }

    fn below_capacity(&self) -> Result<bool, PoolError> {
        let state = self.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        Ok(state.created < self.config.capacity)
    }

    fn take_free(&self) -> Result<F::Resource, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        let resource = state.free.pop_front().ok_or(PoolError::Closed)?;
        state.checked_out += 1;
        Ok(resource)
    }

    /// Build one member while holding the constructor gate.
    ///
    /// Returns `Ok(None)` if capacity was reached by the time the gate was
    /// taken.
    async fn construct_member(
        &self,
        _gate: ConstructorGate<'_, F>,
    ) -> Result<Option<F::Resource>, PoolError> {
        if !self.below_capacity()? {
            return Ok(None);
        }

        let resource = self.build().await?;

        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            self.factory.close(resource);
            return Err(PoolError::Closed);
        }
        state.checked_out += 1;
        debug!(
            created = state.created,
            capacity = self.config.capacity,
            "constructed pooled resource"
        );
        Ok(Some(resource))
    }

    /// Place a freshly built member on the free list (eager warm-up).
    fn admit(&self, resource: F::Resource) {
        self.state.lock().free.push_back(resource);
        self.available.add_permits(1);
    }

    /// Build one member and count it in `created`.
    ///
    /// With clone support the first call also builds the template, which is a
    /// member too: it stays parked while there is room for clones and joins
    /// the free list once the pool is full, so at most `capacity` resources
    /// ever exist. Callers hold the constructor gate or run before the pool
    /// is shared, and have checked `created < capacity`.
    async fn build(&self) -> Result<F::Resource, PoolError> {
        if !self.factory.supports_clone() {
            let resource = self.factory.create().await?;
            self.state.lock().created += 1;
            return Ok(resource);
        }

        let parked = self.state.lock().template.take();
        let template = match parked {
            Some(template) => template,
            None => {
                let template = self.factory.create().await?;
                let mut state = self.state.lock();
                state.created += 1;
                if state.created >= self.config.capacity {
                    // No room for clones; the template is the last member
                    return Ok(template);
                }
                template
            }
        };

        let mut lease = TemplateLease {
            pool: self,
            template: Some(template),
        };
        let cloned = match lease.template.as_mut() {
            Some(template) => match self.factory.clone_resource(template).await {
                Ok(resource) => Some(resource),
                Err(err) => {
                    warn!(error = %err, "clone failed, falling back to full construction");
                    None
                }
            },
            None => None,
        };
        let resource = match cloned {
            Some(resource) => resource,
            None => self.factory.create().await?,
        };

        self.state.lock().created += 1;
        drop(lease);
        Ok(resource)
    }

    /// Park the template again, or release it as an ordinary member once the
    /// pool is full.
    fn restore_template(&self, template: F::Resource) {
        let mut state = self.state.lock();
        if state.closed || state.template.is_some() {
            drop(state);
            self.factory.close(template);
        } else if state.created >= self.config.capacity {
            state.free.push_back(template);
            drop(state);
            self.available.add_permits(1);
        } else {
            state.template = Some(template);
        }
    }
}

impl<F: ResourceFactory> Drop for ResourcePool<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Held by the single task allowed to construct; released on drop, including
/// when the constructing future is cancelled.
struct ConstructorGate<'a, F: ResourceFactory> {
    pool: &'a ResourcePool<F>,
}

impl<'a, F: ResourceFactory> ConstructorGate<'a, F> {
    fn enter(pool: &'a ResourcePool<F>) -> Option<Self> {
        pool.constructing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { pool })
    }
}

impl<F: ResourceFactory> Drop for ConstructorGate<'_, F> {
    fn drop(&mut self) {
        self.pool.constructing.store(false, Ordering::Release);
        self.pool.construction_done.notify_waiters();
    }
}

/// Hands the clone template back to the pool on drop, including when the
/// building future is cancelled.
struct TemplateLease<'a, F: ResourceFactory> {
    pool: &'a ResourcePool<F>,
    template: Option<F::Resource>,
}

impl<F: ResourceFactory> Drop for TemplateLease<'_, F> {
    fn drop(&mut self) {
        if let Some(template) = self.template.take() {
            self.pool.restore_template(template);
        }
    }
}

// =============================================================================
// Pooled guard
// =============================================================================

/// A resource checked out of a [`ResourcePool`].
///
/// Dereferences to the resource. Dropping the guard recycles it.
pub struct Pooled<'a, F: ResourceFactory> {
    pool: &'a ResourcePool<F>,
    resource: Option<F::Resource>,
}

impl<'a, F: ResourceFactory> Pooled<'a, F> {
    /// Take the resource out of the guard.
    ///
    /// The caller becomes responsible for handing it back with
    /// [`ResourcePool::recycle`].
    pub fn detach(mut self) -> F::Resource {
        self.resource
            .take()
            .expect("pooled resource is present until detached or dropped")
    }

    /// The pool this resource belongs to.
    pub fn pool(&self) -> &'a ResourcePool<F> {
        self.pool
    }
}

impl<F: ResourceFactory> Deref for Pooled<'_, F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        self.resource
            .as_ref()
            .expect("pooled resource is present until detached or dropped")
    }
}

impl<F: ResourceFactory> DerefMut for Pooled<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource
            .as_mut()
            .expect("pooled resource is present until detached or dropped")
    }
}

impl<F: ResourceFactory> Drop for Pooled<'_, F> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.recycle(resource);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
