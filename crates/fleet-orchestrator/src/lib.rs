//! fleet-orchestrator: maintenance decisions for a multi-tenant fleet.
//!
//! Decides whether it is currently safe to take a host, a group of hosts, or
//! a whole application instance out of service.
//!
//! # Architecture
//!
//! ```text
//! caller ──► Orchestrator (PolicyOrchestrator)
//!              │
//!              ├── ModelCache ──► TopologySource   (TTL + single-flight)
//!              ├── DistributedLock                 (one scope per application)
//!              ├── PolicyEvaluator                 (minimum availability per cluster)
//!              └── StatusStore                     (persisted host/application status)
//! ```
//!
//! Outcomes are split three ways in every error family: not found, policy
//! denied, and internal. Only internal errors are retryable.

pub mod cache;
pub mod config;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod policy;
pub mod service;
pub mod source;

pub use cache::ModelCache;
pub use config::{FleetConfig, MinAvailability};
pub use error::{
    ApplicationError, ApplicationResult, BatchError, BatchResult, CacheError, HostError,
    HostResult, InternalError, InternalKind, SetupError,
};
pub use memory::InMemoryOrchestrator;
pub use orchestrator::{HostInfo, HostInstance, Orchestrator};
pub use policy::{PolicyDenial, PolicyEvaluator, RemovalKind};
pub use service::{PolicyOrchestrator, application_scope};
pub use source::{FileTopologySource, StaticTopologySource, TopologySource};
