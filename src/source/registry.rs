//! Source registry for managing image session lifecycle.
//!
//! The registry provides:
//! - LRU caching of opened sessions, keyed by location and open options
//! - Singleflight opens: concurrent requests for the same key share one open
//! - Pool shutdown for sessions that are evicted, invalidated or cleared
//!
//! # Example
//!
//! ```ignore
//! use pyramid_fetch::source::{LocalOpener, OpenOptions, SourceKey, SourceRegistry};
//!
//! let registry = SourceRegistry::new(LocalOpener);
//! let session = registry
//!     .get(&SourceKey::new("data/sample", OpenOptions::default()))
//!     .await?;
//! let loader = session.loader(0)?;
//! ```

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{Notify, RwLock};
use tracing::debug;

use super::opener::SourceOpener;
use super::session::{ImageSession, SourceKey};
use crate::backend::BackendDriver;
use crate::error::SourceError;

/// Default number of open sessions.
pub const DEFAULT_SESSION_CAPACITY: usize = 16;

type SessionResult<D> = Result<Arc<ImageSession<D>>, SourceError>;

type InFlightMap<D> = parking_lot::Mutex<HashMap<SourceKey, Arc<InFlightState<D>>>>;

/// State for an in-flight open.
struct InFlightState<D: BackendDriver> {
    /// Notification for waiters
    notify: Notify,
    /// Result of the open (set when complete)
    result: parking_lot::Mutex<Option<SessionResult<D>>>,
}

/// Clears the in-flight entry and wakes waiters when the leader finishes or
/// is dropped.
struct Leader<'a, D: BackendDriver> {
    in_flight: &'a InFlightMap<D>,
    key: &'a SourceKey,
    state: &'a Arc<InFlightState<D>>,
}

impl<D: BackendDriver> Drop for Leader<'_, D> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.key);
        self.state.notify.notify_waiters();
    }
}

/// Registry of open image sessions.
pub struct SourceRegistry<O: SourceOpener> {
    opener: O,

    /// Open sessions indexed by key
    sessions: RwLock<LruCache<SourceKey, Arc<ImageSession<O::Driver>>>>,

    /// In-flight opens for singleflight
    in_flight: InFlightMap<O::Driver>,
}

impl<O: SourceOpener> SourceRegistry<O> {
    pub fn new(opener: O) -> Self {
        Self::with_capacity(opener, DEFAULT_SESSION_CAPACITY)
    }

    /// Create a registry keeping at most `capacity` sessions open; zero is
    /// treated as one.
    pub fn with_capacity(opener: O, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            opener,
            sessions: RwLock::new(LruCache::new(capacity)),
            in_flight: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Get a session, opening it if not already open.
    ///
    /// Concurrent calls for the same key wait for a single open and share
    /// its result, error included. If the opening task is cancelled, a
    /// waiter takes over.
    pub async fn get(&self, key: &SourceKey) -> SessionResult<O::Driver> {
        // Fast path
        {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get(key) {
                return Ok(session.clone());
            }
        }

        loop {
            let (state, leader) = {
                let mut in_flight = self.in_flight.lock();
                match in_flight.get(key) {
                    Some(state) => (state.clone(), false),
                    None => {
                        let state = Arc::new(InFlightState {
                            notify: Notify::new(),
                            result: parking_lot::Mutex::new(None),
                        });
                        in_flight.insert(key.clone(), state.clone());
                        (state, true)
                    }
                }
            };

            if leader {
                return self.lead_open(key, state).await;
            }

            // Register before checking so a completion in between is not lost
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let done = state.result.lock().clone();
            if let Some(result) = done {
                return result;
            }

            notified.await;

            let done = state.result.lock().clone();
            if let Some(result) = done {
                return result;
            }
            // Leader was cancelled; retry
        }
    }

    async fn lead_open(
        &self,
        key: &SourceKey,
        state: Arc<InFlightState<O::Driver>>,
    ) -> SessionResult<O::Driver> {
        let _leader = Leader {
            in_flight: &self.in_flight,
            key,
            state: &state,
        };

        // A previous leader may have finished after our fast-path check
        let cached = self.sessions.write().await.get(key).cloned();
        if let Some(session) = cached {
            return Ok(session);
        }

        let result = self.open_session(key).await;
        if let Ok(session) = &result {
            self.insert(key.clone(), session.clone()).await;
        }
        *state.result.lock() = Some(result.clone());
        result
    }

    async fn open_session(&self, key: &SourceKey) -> SessionResult<O::Driver> {
        let driver = self.opener.open_driver(&key.location).await?;
        let session = ImageSession::open(driver, key.clone()).await?;
        Ok(Arc::new(session))
    }

    async fn insert(&self, key: SourceKey, session: Arc<ImageSession<O::Driver>>) {
        let evicted = self.sessions.write().await.push(key, session.clone());
        if let Some((evicted_key, evicted)) = evicted {
            if !Arc::ptr_eq(&evicted, &session) {
                debug!(location = %evicted_key.location, "evicting session");
                evicted.close();
            }
        }
    }

    /// Close and forget the session for `key`. Returns whether one was open.
    pub async fn invalidate(&self, key: &SourceKey) -> bool {
        let removed = self.sessions.write().await.pop(key);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Close every open session.
    pub async fn clear(&self) {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            let mut drained = Vec::with_capacity(sessions.len());
            while let Some((_, session)) = sessions.pop_lru() {
                drained.push(session);
            }
            drained
        };
        for session in drained {
            session.close();
        }
    }

    /// Number of open sessions.
    pub async fn open_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
