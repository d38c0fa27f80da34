//! In-memory orchestrator for tests of code that drives an [`Orchestrator`].
//!
//! Serves a fixed snapshot and keeps statuses in memory. It approves every
//! request except those touching hosts marked with
//! [`InMemoryOrchestrator::deny`]; no availability policy is evaluated.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use fleet_model::{
    ApplicationInstanceReference, ApplicationInstanceStatus, HostName, HostStatus, NodeGroup,
    TopologySnapshot,
};

use crate::error::{
    ApplicationError, ApplicationResult, BatchError, BatchResult, HostError, HostResult,
};
use crate::orchestrator::{HostInfo, HostInstance, Orchestrator};
use crate::policy::PolicyDenial;

#[derive(Default)]
struct MemoryState {
    hosts: HashMap<HostName, HostStatus>,
    suspended: BTreeSet<ApplicationInstanceReference>,
    denied: HashSet<HostName>,
}

pub struct InMemoryOrchestrator {
    snapshot: Arc<TopologySnapshot>,
    state: Mutex<MemoryState>,
}

impl InMemoryOrchestrator {
    pub fn new(snapshot: TopologySnapshot) -> Self {
        Self {
            snapshot: Arc::new(snapshot),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Make every later removal request involving `host` fail with a policy
    /// denial.
    pub fn deny(&self, host: impl Into<HostName>) {
        self.state().denied.insert(host.into());
    }

    /// Current status of a host, without a topology lookup.
    pub fn status_of(&self, host: &HostName) -> HostStatus {
        self.state().hosts.get(host).copied().unwrap_or_default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn known(&self, host: &HostName) -> HostResult<()> {
        if self.snapshot.contains_host(host) {
            Ok(())
        } else {
            Err(HostError::NotFound(host.clone()))
        }
    }

    /// One denial per cluster the host serves.
    fn denials_for(&self, host: &HostName) -> Vec<PolicyDenial> {
        self.snapshot
            .clusters_on_host(host)
            .into_iter()
            .map(|cluster| PolicyDenial {
                cluster: cluster.key().clone(),
                service_type: cluster.service_type().clone(),
                hosts: vec![host.clone()],
                survivors: 0,
                required: 1,
            })
            .collect()
    }

    fn set_host(&self, host: &HostName, status: HostStatus) -> HostResult<()> {
        self.known(host)?;
        if status != HostStatus::NoRemarks && self.state().denied.contains(host) {
            return Err(HostError::PolicyDenied {
                host: host.clone(),
                denials: self.denials_for(host),
            });
        }
        self.state().hosts.insert(host.clone(), status);
        Ok(())
    }

    fn known_application(&self, application: &ApplicationInstanceReference) -> ApplicationResult<()> {
        if self.snapshot.contains_application(application) {
            Ok(())
        } else {
            Err(ApplicationError::NotFound(application.clone()))
        }
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn get_host(&self, host: &HostName) -> HostResult<HostInfo> {
        let application = self
            .snapshot
            .application_of(host)
            .ok_or_else(|| HostError::NotFound(host.clone()))?;
        let instances = self
            .snapshot
            .clusters_on_host(host)
            .into_iter()
            .flat_map(|cluster| {
                cluster
                    .instances()
                    .iter()
                    .filter(move |instance| instance.host() == host)
                    .map(move |instance| HostInstance {
                        cluster_id: cluster.id().clone(),
                        service_type: cluster.service_type().clone(),
                        config_id: instance.config_id().clone(),
                        status: instance.status(),
                    })
            })
            .collect();
        Ok(HostInfo {
            host: host.clone(),
            status: self.status_of(host),
            application: application.reference().clone(),
            instances,
        })
    }

    async fn get_host_status(&self, host: &HostName) -> HostResult<HostStatus> {
        self.known(host)?;
        Ok(self.status_of(host))
    }

    async fn suspend(&self, host: &HostName) -> HostResult<()> {
        self.known(host)?;
        // A host already down stays as it is; suspending never downgrades
        // a permanent removal.
        if self.status_of(host).is_down() {
            return Ok(());
        }
        self.set_host(host, HostStatus::AllowedToBeDown)
    }

    async fn resume(&self, host: &HostName) -> HostResult<()> {
        self.set_host(host, HostStatus::NoRemarks)
    }

    async fn acquire_permission_to_remove(&self, host: &HostName) -> HostResult<()> {
        self.set_host(host, HostStatus::PermanentlyDown)
    }

    async fn suspend_group(&self, group: &NodeGroup) -> BatchResult<()> {
        let missing: Vec<HostName> = group
            .hosts()
            .iter()
            .filter(|host| !self.snapshot.contains_host(host))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(BatchError::HostsNotFound {
                parent: group.parent().clone(),
                hosts: missing,
            });
        }

        let mut state = self.state();
        let denials: Vec<PolicyDenial> = group
            .hosts()
            .iter()
            .filter(|host| state.denied.contains(*host))
            .flat_map(|host| self.denials_for(host))
            .collect();
        if !denials.is_empty() {
            return Err(BatchError::PolicyDenied {
                parent: group.parent().clone(),
                denials,
            });
        }

        for host in group.hosts() {
            let status = state.hosts.entry(host.clone()).or_default();
            if !status.is_down() {
                *status = HostStatus::AllowedToBeDown;
            }
        }
        Ok(())
    }

    async fn suspend_application(
        &self,
        application: &ApplicationInstanceReference,
    ) -> ApplicationResult<()> {
        self.known_application(application)?;
        self.state().suspended.insert(application.clone());
        Ok(())
    }

    async fn resume_application(
        &self,
        application: &ApplicationInstanceReference,
    ) -> ApplicationResult<()> {
        self.known_application(application)?;
        self.state().suspended.remove(application);
        Ok(())
    }

    async fn application_status(
        &self,
        application: &ApplicationInstanceReference,
    ) -> ApplicationResult<ApplicationInstanceStatus> {
        self.known_application(application)?;
        Ok(if self.state().suspended.contains(application) {
            ApplicationInstanceStatus::AllowedToBeDown
        } else {
            ApplicationInstanceStatus::NoRemarks
        })
    }

    async fn suspended_applications(&self) -> BTreeSet<ApplicationInstanceReference> {
        self.state().suspended.clone()
    }
}
