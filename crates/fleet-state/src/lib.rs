//! fleet-state: maintenance status persistence for the fleet orchestrator.
//!
//! Backed by [redb](https://docs.rs/redb), stores the operator-visible status
//! of every host (`NoRemarks`, `AllowedToBeDown`, `PermanentlyDown`) and of
//! every application instance.
//!
//! # Architecture
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns, keyed by
//! host name or `tenant:instance`. Batch host updates are written in a single
//! write transaction, so a group of hosts changes status atomically.
//!
//! `StatusDb` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`) and
//! can be shared across async tasks. The orchestrator only depends on the
//! [`StatusStore`] trait.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StatusDb, StatusStore};
pub use types::*;
