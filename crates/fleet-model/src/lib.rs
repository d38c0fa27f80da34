//! fleet-model: the topology model for the fleet orchestrator.
//!
//! A [`TopologySnapshot`] is an immutable, point-in-time view of every
//! application instance in the fleet, the service clusters it runs, and the
//! service instances (processes) inside each cluster, together with their
//! liveness status.
//!
//! # Architecture
//!
//! ```text
//! TopologySnapshot
//!   ├── ApplicationInstance (keyed by tenant:instance)
//!   │   └── ServiceCluster (keyed by application + cluster id)
//!   │       └── ServiceInstance (config id, host, liveness)
//!   └── host index (host → owning application + clusters served)
//! ```
//!
//! Back-references are parent ids, not pointers: a cluster stores the
//! reference of its application, an instance stores the [`ClusterKey`] of its
//! cluster. Both are resolved through the snapshot. Snapshots are built in two
//! phases: [`SnapshotBuilder`] collects plain drafts, then
//! [`SnapshotBuilder::finalize`] wires parent ids, builds the host index, and
//! validates the graph.

pub mod error;
pub mod group;
pub mod status;
pub mod topology;
pub mod types;

pub use error::{ModelError, ModelResult};
pub use group::NodeGroup;
pub use status::{ApplicationInstanceStatus, HostStatus, ServiceStatus};
pub use topology::{
    ApplicationDraft, ApplicationInstance, ClusterDraft, ClusterKey, InstanceDraft,
    ServiceCluster, ServiceInstance, SnapshotBuilder, TopologyDocument, TopologySnapshot,
};
pub use types::*;
