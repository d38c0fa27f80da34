//! Lock error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while acquiring a cluster lock.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("timed out after {timeout:?} acquiring lock {scope}")]
    Timeout { scope: String, timeout: Duration },

    #[error("lock service unavailable for {scope}: {reason}")]
    Unavailable { scope: String, reason: String },
}

impl LockError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The scope key the failed acquisition was for.
    pub fn scope(&self) -> &str {
        match self {
            Self::Timeout { scope, .. } | Self::Unavailable { scope, .. } => scope,
        }
    }
}

pub type LockResult<T> = Result<T, LockError>;
