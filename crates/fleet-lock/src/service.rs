//! Lock service interface and the in-process implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::{LockError, LockResult};

/// Proof of holding the lock for one scope. Handed back to
/// [`DistributedLock::release`] to give the lock up.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct LockHandle {
    scope: String,
    token: u64,
}

impl LockHandle {
    pub fn new(scope: impl Into<String>, token: u64) -> Self {
        Self {
            scope: scope.into(),
            token,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// An exclusive, named lock service (e.g. a coordination cluster).
///
/// `release` is synchronous so it can run from `Drop`.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquire the lock for `scope`, waiting at most `timeout`.
    async fn acquire(&self, scope: &str, timeout: Duration) -> LockResult<LockHandle>;

    /// Release a previously acquired lock.
    fn release(&self, handle: LockHandle);
}

#[derive(Default)]
struct LocalState {
    /// One single-permit semaphore per scope key, present while the scope
    /// is held or awaited.
    scopes: HashMap<String, Arc<Semaphore>>,
    /// Permits currently held, by handle token.
    held: HashMap<u64, OwnedSemaphorePermit>,
}

impl LocalState {
    /// Drop the scope's semaphore once nobody holds or awaits it. Holders
    /// and waiters each keep a clone, so only the map's reference is left.
    fn prune(&mut self, scope: &str) {
        if self
            .scopes
            .get(scope)
            .is_some_and(|semaphore| Arc::strong_count(semaphore) == 1)
        {
            self.scopes.remove(scope);
        }
    }
}

/// In-process lock service. Serializes holders of the same scope within one
/// process; different scopes never contend.
#[derive(Default)]
pub struct LocalLockService {
    state: Mutex<LocalState>,
    next_token: AtomicU64,
}

impl LocalLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether some holder currently owns the lock for `scope`.
    pub fn is_locked(&self, scope: &str) -> bool {
        self.state()
            .scopes
            .get(scope)
            .is_some_and(|s| s.available_permits() == 0)
    }

    /// Number of locks currently held across all scopes.
    pub fn held_count(&self) -> usize {
        self.state().held.len()
    }

    /// Number of scopes currently held or awaited.
    pub fn scope_count(&self) -> usize {
        self.state().scopes.len()
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DistributedLock for LocalLockService {
    async fn acquire(&self, scope: &str, timeout: Duration) -> LockResult<LockHandle> {
        let semaphore = self
            .state()
            .scopes
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();

        let outcome = tokio::time::timeout(timeout, semaphore.acquire_owned()).await;
        let permit = match outcome {
            Ok(Ok(permit)) => permit,
            Ok(Err(e)) => {
                self.state().prune(scope);
                return Err(LockError::Unavailable {
                    scope: scope.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.state().prune(scope);
                debug!(%scope, ?timeout, "lock acquisition timed out");
                return Err(LockError::Timeout {
                    scope: scope.to_string(),
                    timeout,
                });
            }
        };

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.state().held.insert(token, permit);
        Ok(LockHandle::new(scope, token))
    }

    fn release(&self, handle: LockHandle) {
        let mut state = self.state();
        // Dropping the permit frees the scope for the next waiter.
        match state.held.remove(&handle.token) {
            Some(permit) => {
                drop(permit);
                state.prune(&handle.scope);
            }
            None => {
                warn!(scope = %handle.scope, token = handle.token, "release of unknown lock handle");
            }
        }
    }
}
