//! Scoped lock guards with bounded retry.
//!
//! A [`ScopedLock`] releases its lock when dropped, so every exit path of the
//! holder (early return, `?`, panic, or the enclosing future being dropped)
//! gives the lock back.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::LockResult;
use crate::service::{DistributedLock, LockHandle};

/// Upper bound for the retry backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// How to acquire a cluster lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    /// How long a single acquisition attempt may wait.
    pub timeout: Duration,
    /// Extra attempts after a timed-out acquisition.
    pub retries: u32,
    /// Initial wait between attempts; doubled after each retry.
    pub retry_backoff: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 2,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// A held lock, released on drop.
pub struct ScopedLock {
    service: Arc<dyn DistributedLock>,
    handle: Option<LockHandle>,
    scope: String,
}

impl ScopedLock {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Release the lock now rather than at end of scope.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.service.release(handle);
            debug!(scope = %self.scope, "lock released");
        }
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for ScopedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedLock")
            .field("scope", &self.scope)
            .field("held", &self.handle.is_some())
            .finish()
    }
}

/// Acquire the lock for `scope`, retrying timed-out attempts up to
/// `options.retries` times. Non-timeout failures are returned immediately.
pub async fn acquire_scoped(
    service: &Arc<dyn DistributedLock>,
    scope: &str,
    options: &LockOptions,
) -> LockResult<ScopedLock> {
    let mut backoff = options.retry_backoff;
    let mut attempt = 0;

    loop {
        match service.acquire(scope, options.timeout).await {
            Ok(handle) => {
                debug!(%scope, attempt, "lock acquired");
                return Ok(ScopedLock {
                    service: service.clone(),
                    handle: Some(handle),
                    scope: scope.to_string(),
                });
            }
            Err(e) if e.is_timeout() && attempt < options.retries => {
                attempt += 1;
                warn!(%scope, attempt, retries = options.retries, "lock acquisition timed out, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Acquire locks for several scopes in sorted order, so concurrent holders
/// of overlapping scope sets cannot deadlock. On failure, locks acquired so
/// far are released.
pub async fn acquire_all(
    service: &Arc<dyn DistributedLock>,
    scopes: &BTreeSet<String>,
    options: &LockOptions,
) -> LockResult<Vec<ScopedLock>> {
    let mut guards = Vec::with_capacity(scopes.len());
    for scope in scopes {
        guards.push(acquire_scoped(service, scope, options).await?);
    }
    Ok(guards)
}
