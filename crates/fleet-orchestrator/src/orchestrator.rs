//! The orchestrator interface.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Serialize;

use fleet_model::{
    ApplicationInstanceReference, ApplicationInstanceStatus, ClusterId, ConfigId, HostName,
    HostStatus, NodeGroup, ServiceStatus, ServiceType,
};

use crate::error::{ApplicationResult, BatchResult, HostResult};

/// One service instance running on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInstance {
    pub cluster_id: ClusterId,
    pub service_type: ServiceType,
    pub config_id: ConfigId,
    pub status: ServiceStatus,
}

/// What the orchestrator knows about a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub host: HostName,
    pub status: HostStatus,
    pub application: ApplicationInstanceReference,
    pub instances: Vec<HostInstance>,
}

/// Decides whether hosts and applications may be taken out of service.
///
/// Every state-changing call either records the new status and succeeds, or
/// changes nothing and returns a typed error.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn get_host(&self, host: &HostName) -> HostResult<HostInfo>;

    async fn get_host_status(&self, host: &HostName) -> HostResult<HostStatus>;

    /// Allow the host to go down for maintenance, if every cluster it serves
    /// can spare it.
    async fn suspend(&self, host: &HostName) -> HostResult<()>;

    /// Return the host to service. Never denied by policy.
    async fn resume(&self, host: &HostName) -> HostResult<()>;

    /// Allow the host to leave the fleet permanently. Stricter than
    /// [`suspend`](Orchestrator::suspend): every cluster it serves must keep
    /// at least one healthy instance.
    async fn acquire_permission_to_remove(&self, host: &HostName) -> HostResult<()>;

    /// Suspend every host of the group as one all-or-nothing decision.
    async fn suspend_group(&self, group: &NodeGroup) -> BatchResult<()>;

    async fn suspend_all(&self, group: &NodeGroup) -> BatchResult<()> {
        self.suspend_group(group).await
    }

    /// Operator override: mark the whole application as allowed to be down.
    async fn suspend_application(
        &self,
        application: &ApplicationInstanceReference,
    ) -> ApplicationResult<()>;

    async fn resume_application(
        &self,
        application: &ApplicationInstanceReference,
    ) -> ApplicationResult<()>;

    async fn application_status(
        &self,
        application: &ApplicationInstanceReference,
    ) -> ApplicationResult<ApplicationInstanceStatus>;

    /// Applications whose suspension has completed.
    async fn suspended_applications(&self) -> BTreeSet<ApplicationInstanceReference>;
}
