//! Topology cache with TTL expiry and single-flight refresh.
//!
//! Wraps an expensive [`TopologySource::build`] so that concurrent callers
//! never trigger redundant rebuilds.
//!
//! # Concurrency model
//!
//! - **Cold start**: the first callers block on a gate; one builds, the rest
//!   wake up and find the published snapshot.
//! - **Fresh** (age < TTL): the current snapshot is returned immediately.
//! - **Expired**: one caller wins the `refreshing` flag under the state lock
//!   and rebuilds outside it. Everyone else gets the stale snapshot without
//!   waiting, so at most one rebuild is ever in flight.
//! - **Failed refresh**: the stale snapshot keeps being served and the next
//!   attempt waits for the retry backoff (capped at the TTL).
//! - **Invalidate**: expires the current snapshot, and also the one an
//!   in-flight refresh is about to publish.
//!
//! Snapshots are published by swapping an `Arc`; readers holding an older
//! `Arc` are unaffected.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use fleet_model::TopologySnapshot;

use crate::error::CacheError;
use crate::source::TopologySource;

/// Default snapshot time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Default wait after a failed refresh before the next attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

struct Current {
    snapshot: Arc<TopologySnapshot>,
    captured_at: Instant,
    invalidated: bool,
}

#[derive(Default)]
struct CacheState {
    current: Option<Current>,
    refreshing: bool,
    /// Bumped by every `invalidate`.
    generation: u64,
    /// Set after a failed refresh; no new attempt before this instant.
    retry_not_before: Option<Instant>,
}

enum Next {
    Serve(Arc<TopologySnapshot>),
    Refresh { stale: Arc<TopologySnapshot>, generation: u64 },
    ColdStart,
}

/// Clears the `refreshing` flag however the refresh ends.
struct RefreshGuard<'a> {
    state: &'a Mutex<CacheState>,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refreshing = false;
    }
}

pub struct ModelCache {
    source: Arc<dyn TopologySource>,
    ttl: Duration,
    retry_backoff: Duration,
    state: Mutex<CacheState>,
    cold_start: tokio::sync::Mutex<()>,
}

impl ModelCache {
    pub fn new(source: Arc<dyn TopologySource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            state: Mutex::new(CacheState::default()),
            cold_start: tokio::sync::Mutex::new(()),
        }
    }

    /// How long to keep serving the stale snapshot after a failed refresh.
    /// Capped at the TTL.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The current snapshot, refreshing it if it has expired.
    pub async fn get(&self) -> Result<Arc<TopologySnapshot>, CacheError> {
        let next = {
            let mut state = self.state();
            let refreshing = state.refreshing;
            let backing_off = state
                .retry_not_before
                .is_some_and(|retry_at| Instant::now() < retry_at);
            match &state.current {
                Some(current) if self.is_fresh(current) => Next::Serve(current.snapshot.clone()),
                Some(current) if refreshing => {
                    debug!("topology refresh in flight, serving stale snapshot");
                    Next::Serve(current.snapshot.clone())
                }
                Some(current) if backing_off => {
                    debug!("last topology refresh failed, serving stale snapshot");
                    Next::Serve(current.snapshot.clone())
                }
                Some(current) => {
                    let stale = current.snapshot.clone();
                    state.refreshing = true;
                    Next::Refresh {
                        stale,
                        generation: state.generation,
                    }
                }
                None => Next::ColdStart,
            }
        };

        match next {
            Next::Serve(snapshot) => Ok(snapshot),
            Next::Refresh { stale, generation } => Ok(self.refresh(stale, generation).await),
            Next::ColdStart => self.cold_start().await,
        }
    }

    /// Mark the current snapshot expired; the next `get` refreshes it.
    ///
    /// A refresh already in flight may have read the source before the
    /// change, so the snapshot it publishes is also treated as expired.
    pub fn invalidate(&self) {
        let mut state = self.state();
        state.generation += 1;
        state.retry_not_before = None;
        if let Some(current) = state.current.as_mut() {
            current.invalidated = true;
        }
        debug!(generation = state.generation, "topology snapshot invalidated");
    }

    /// Age of the current snapshot, if there is one.
    pub fn age(&self) -> Option<Duration> {
        self.state()
            .current
            .as_ref()
            .map(|current| current.captured_at.elapsed())
    }

    async fn refresh(&self, stale: Arc<TopologySnapshot>, generation: u64) -> Arc<TopologySnapshot> {
        let _guard = RefreshGuard { state: &self.state };
        debug!(ttl_ms = self.ttl.as_millis() as u64, "refreshing expired topology snapshot");

        match self.source.build().await {
            Ok(snapshot) => self.publish(snapshot, generation),
            Err(e) => {
                let backoff = self.retry_backoff.min(self.ttl);
                self.state().retry_not_before = Some(Instant::now() + backoff);
                warn!(
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "topology refresh failed, serving stale snapshot"
                );
                stale
            }
        }
    }

    async fn cold_start(&self) -> Result<Arc<TopologySnapshot>, CacheError> {
        let _gate = self.cold_start.lock().await;

        // Someone else may have finished the first build while we waited.
        let generation = {
            let state = self.state();
            if let Some(current) = &state.current {
                return Ok(current.snapshot.clone());
            }
            state.generation
        };

        debug!("building initial topology snapshot");
        match self.source.build().await {
            Ok(snapshot) => Ok(self.publish(snapshot, generation)),
            Err(e) => {
                warn!(error = %e, "initial topology build failed");
                Err(CacheError::Build(e.to_string()))
            }
        }
    }

    /// Publish a snapshot whose build started at `generation`. If the cache
    /// was invalidated since, the snapshot is served but already expired.
    fn publish(&self, snapshot: TopologySnapshot, generation: u64) -> Arc<TopologySnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut state = self.state();
        let invalidated = state.generation != generation;
        state.current = Some(Current {
            snapshot: snapshot.clone(),
            captured_at: Instant::now(),
            invalidated,
        });
        state.retry_not_before = None;
        drop(state);
        debug!(
            invalidated,
            applications = snapshot.application_count(),
            hosts = snapshot.host_count(),
            "topology snapshot published"
        );
        snapshot
    }

    fn is_fresh(&self, current: &Current) -> bool {
        !current.invalidated && current.captured_at.elapsed() < self.ttl
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
