//! fleet-lock: scoped cluster locks for the fleet orchestrator.
//!
//! State-changing orchestration decisions for one scope (an application
//! instance) must be serialized. This crate provides:
//!
//! - **`service`**: the [`DistributedLock`] interface to an external lock
//!   service, and [`LocalLockService`], an in-process implementation
//! - **`scoped`**: [`ScopedLock`] drop guards, bounded retry of timed-out
//!   acquisitions, and deadlock-free multi-scope acquisition
//!
//! Acquisition always carries a timeout. A timeout is a transient failure:
//! callers may retry it, and it is never reported as a policy decision.

pub mod error;
pub mod scoped;
pub mod service;

pub use error::{LockError, LockResult};
pub use scoped::{LockOptions, ScopedLock, acquire_all, acquire_scoped};
pub use service::{DistributedLock, LocalLockService, LockHandle};
