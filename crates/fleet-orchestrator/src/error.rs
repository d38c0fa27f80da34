//! Orchestrator error types.
//!
//! One error enum per operation family. Each separates the three outcome
//! kinds callers act on differently:
//!
//! - not found: the host or application is not in the current topology
//! - policy denied: the change would violate an availability requirement
//! - internal: lock timeout, topology or status store failure (retryable)

use std::fmt;

use thiserror::Error;

use fleet_lock::LockError;
use fleet_model::{ApplicationInstanceReference, HostName, ModelError};
use fleet_state::StateError;

use crate::policy::PolicyDenial;

/// What went wrong inside the orchestrator, without collaborator detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InternalKind {
    #[error("timed out waiting for lock")]
    LockTimeout,

    #[error("lock service unavailable")]
    LockUnavailable,

    #[error("topology unavailable")]
    TopologyUnavailable,

    #[error("status store unavailable")]
    StatusStore,
}

/// A transient failure, tagged with the operation and scope it hit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} on {scope} failed: {kind}")]
pub struct InternalError {
    pub operation: &'static str,
    pub scope: String,
    pub kind: InternalKind,
}

impl InternalError {
    pub fn new(operation: &'static str, scope: impl Into<String>, kind: InternalKind) -> Self {
        Self {
            operation,
            scope: scope.into(),
            kind,
        }
    }

    /// Classify a lock failure.
    pub fn from_lock(operation: &'static str, err: &LockError) -> Self {
        let kind = if err.is_timeout() {
            InternalKind::LockTimeout
        } else {
            InternalKind::LockUnavailable
        };
        Self::new(operation, err.scope(), kind)
    }
}

/// Errors from single-host operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("host {0} not found in topology")]
    NotFound(HostName),

    #[error("changing status of {host} denied: {}", DenialList(.denials))]
    PolicyDenied {
        host: HostName,
        denials: Vec<PolicyDenial>,
    },

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl HostError {
    /// Only internal failures are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// Errors from group (batch) operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    #[error("suspending group under {parent} failed: hosts not found: {}", HostList(.hosts))]
    HostsNotFound {
        parent: HostName,
        hosts: Vec<HostName>,
    },

    #[error("suspending group under {parent} denied: {}", DenialList(.denials))]
    PolicyDenied {
        parent: HostName,
        denials: Vec<PolicyDenial>,
    },

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl BatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// Errors from application-level operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplicationError {
    #[error("application {0} not found in topology")]
    NotFound(ApplicationInstanceReference),

    #[error("changing status of application {application} denied: {reason}")]
    PolicyDenied {
        application: ApplicationInstanceReference,
        reason: String,
    },

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl ApplicationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// Errors from the topology cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("topology build failed: {0}")]
    Build(String),
}

/// Errors while assembling an orchestrator.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid policy config: {0}")]
    Config(#[from] ModelError),

    #[error("status store error: {0}")]
    State(#[from] StateError),
}

pub type HostResult<T> = Result<T, HostError>;
pub type BatchResult<T> = Result<T, BatchError>;
pub type ApplicationResult<T> = Result<T, ApplicationError>;

/// `; `-joined denial diagnostics.
struct DenialList<'a>(&'a [PolicyDenial]);

impl fmt::Display for DenialList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, denial) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{denial}")?;
        }
        Ok(())
    }
}

/// `, `-joined host names.
pub(crate) struct HostList<'a>(pub(crate) &'a [HostName]);

impl fmt::Display for HostList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, host) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{host}")?;
        }
        Ok(())
    }
}
