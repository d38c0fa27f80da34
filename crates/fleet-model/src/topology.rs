//! Topology snapshot and its two-phase builder.
//!
//! Phase one collects [`ApplicationDraft`]s (plain, serde-friendly values,
//! also the shape of a topology JSON document). Phase two,
//! [`SnapshotBuilder::finalize`], turns them into an immutable
//! [`TopologySnapshot`]: every cluster gets its owning application's
//! reference, every instance gets its owning [`ClusterKey`], and the host
//! index is derived. Nothing in a finalized snapshot is mutable.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ModelError, ModelResult};
use crate::status::ServiceStatus;
use crate::types::*;

/// Identity of a service cluster. Two clusters with the same id in
/// different applications are different clusters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterKey {
    pub application: ApplicationInstanceReference,
    pub cluster_id: ClusterId,
}

impl ClusterKey {
    pub fn new(application: ApplicationInstanceReference, cluster_id: impl Into<ClusterId>) -> Self {
        Self {
            application,
            cluster_id: cluster_id.into(),
        }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.application, self.cluster_id)
    }
}

// ── Drafts ────────────────────────────────────────────────────────

/// Draft of a service instance, before it is attached to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDraft {
    pub config_id: ConfigId,
    pub host: HostName,
    #[serde(default)]
    pub status: ServiceStatus,
}

impl InstanceDraft {
    pub fn new(
        config_id: impl Into<ConfigId>,
        host: impl Into<HostName>,
        status: ServiceStatus,
    ) -> Self {
        Self {
            config_id: config_id.into(),
            host: host.into(),
            status,
        }
    }
}

/// Draft of a service cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDraft {
    pub id: ClusterId,
    pub service_type: ServiceType,
    #[serde(default)]
    pub instances: Vec<InstanceDraft>,
}

impl ClusterDraft {
    pub fn new(id: impl Into<ClusterId>, service_type: impl Into<ServiceType>) -> Self {
        Self {
            id: id.into(),
            service_type: service_type.into(),
            instances: Vec::new(),
        }
    }

    pub fn with_instance(mut self, instance: InstanceDraft) -> Self {
        self.instances.push(instance);
        self
    }
}

/// Draft of an application instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDraft {
    #[serde(flatten)]
    pub reference: ApplicationInstanceReference,
    #[serde(default)]
    pub clusters: Vec<ClusterDraft>,
}

impl ApplicationDraft {
    pub fn new(reference: ApplicationInstanceReference) -> Self {
        Self {
            reference,
            clusters: Vec::new(),
        }
    }

    pub fn with_cluster(mut self, cluster: ClusterDraft) -> Self {
        self.clusters.push(cluster);
        self
    }
}

/// On-disk shape of a topology (JSON).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDocument {
    #[serde(default)]
    pub applications: Vec<ApplicationDraft>,
}

impl TopologyDocument {
    /// Parse a topology document from JSON.
    pub fn from_json(json: &str) -> ModelResult<Self> {
        serde_json::from_str(json).map_err(|e| ModelError::Document(e.to_string()))
    }

    /// Finalize the document into a snapshot.
    pub fn into_snapshot(self) -> ModelResult<TopologySnapshot> {
        SnapshotBuilder::from(self).finalize()
    }
}

// ── Finalized model ───────────────────────────────────────────────

/// One running process of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    config_id: ConfigId,
    host: HostName,
    status: ServiceStatus,
    cluster: ClusterKey,
}

impl ServiceInstance {
    pub fn config_id(&self) -> &ConfigId {
        &self.config_id
    }

    pub fn host(&self) -> &HostName {
        &self.host
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    /// The cluster this instance belongs to.
    pub fn cluster(&self) -> &ClusterKey {
        &self.cluster
    }
}

/// The set of instances providing one logical service within an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCluster {
    key: ClusterKey,
    service_type: ServiceType,
    instances: Vec<ServiceInstance>,
}

impl ServiceCluster {
    pub fn key(&self) -> &ClusterKey {
        &self.key
    }

    pub fn id(&self) -> &ClusterId {
        &self.key.cluster_id
    }

    /// The application this cluster belongs to.
    pub fn application(&self) -> &ApplicationInstanceReference {
        &self.key.application
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn instances(&self) -> &[ServiceInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Distinct hosts running an instance of this cluster.
    pub fn hosts(&self) -> BTreeSet<&HostName> {
        self.instances.iter().map(|i| &i.host).collect()
    }
}

/// One deployed application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInstance {
    reference: ApplicationInstanceReference,
    clusters: BTreeMap<ClusterId, ServiceCluster>,
}

impl ApplicationInstance {
    pub fn reference(&self) -> &ApplicationInstanceReference {
        &self.reference
    }

    pub fn clusters(&self) -> impl Iterator<Item = &ServiceCluster> {
        self.clusters.values()
    }

    pub fn cluster(&self, id: &ClusterId) -> Option<&ServiceCluster> {
        self.clusters.get(id)
    }

    /// Distinct hosts running any instance of this application.
    pub fn hosts(&self) -> BTreeSet<&HostName> {
        self.clusters.values().flat_map(|c| c.hosts()).collect()
    }
}

/// Host index entry: which application owns the host, and which of its
/// clusters run on it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostEntry {
    application: ApplicationInstanceReference,
    clusters: BTreeSet<ClusterId>,
}

/// Immutable point-in-time view of the fleet topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    applications: BTreeMap<ApplicationInstanceReference, ApplicationInstance>,
    hosts: HashMap<HostName, HostEntry>,
}

impl TopologySnapshot {
    /// A snapshot with no applications.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn applications(&self) -> impl Iterator<Item = &ApplicationInstance> {
        self.applications.values()
    }

    pub fn application(&self, reference: &ApplicationInstanceReference) -> Option<&ApplicationInstance> {
        self.applications.get(reference)
    }

    pub fn contains_application(&self, reference: &ApplicationInstanceReference) -> bool {
        self.applications.contains_key(reference)
    }

    pub fn cluster(&self, key: &ClusterKey) -> Option<&ServiceCluster> {
        self.applications.get(&key.application)?.cluster(&key.cluster_id)
    }

    pub fn contains_host(&self, host: &HostName) -> bool {
        self.hosts.contains_key(host)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostName> {
        self.hosts.keys()
    }

    /// The application owning a host.
    pub fn application_of(&self, host: &HostName) -> Option<&ApplicationInstance> {
        let entry = self.hosts.get(host)?;
        self.applications.get(&entry.application)
    }

    /// Every cluster with at least one instance on the host.
    pub fn clusters_on_host(&self, host: &HostName) -> Vec<&ServiceCluster> {
        let Some(entry) = self.hosts.get(host) else {
            return Vec::new();
        };
        let Some(application) = self.applications.get(&entry.application) else {
            return Vec::new();
        };
        entry
            .clusters
            .iter()
            .filter_map(|id| application.cluster(id))
            .collect()
    }

    /// Every service instance running on the host.
    pub fn instances_on_host(&self, host: &HostName) -> Vec<&ServiceInstance> {
        self.clusters_on_host(host)
            .into_iter()
            .flat_map(|c| c.instances().iter())
            .filter(|i| i.host() == host)
            .collect()
    }

    pub fn application_count(&self) -> usize {
        self.applications.len()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}

// ── Builder ───────────────────────────────────────────────────────

/// Two-phase builder for [`TopologySnapshot`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    applications: Vec<ApplicationDraft>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application(mut self, application: ApplicationDraft) -> Self {
        self.applications.push(application);
        self
    }

    pub fn push(&mut self, application: ApplicationDraft) {
        self.applications.push(application);
    }

    /// Wire parent ids, build the host index, and validate.
    pub fn finalize(self) -> ModelResult<TopologySnapshot> {
        let mut applications = BTreeMap::new();
        let mut hosts: HashMap<HostName, HostEntry> = HashMap::new();

        for draft in self.applications {
            let reference = draft.reference;
            if applications.contains_key(&reference) {
                return Err(ModelError::DuplicateApplication(reference.to_string()));
            }

            let mut clusters = BTreeMap::new();
            for cluster in draft.clusters {
                if clusters.contains_key(&cluster.id) {
                    return Err(ModelError::DuplicateCluster {
                        application: reference.to_string(),
                        cluster: cluster.id.to_string(),
                    });
                }

                let key = ClusterKey::new(reference.clone(), cluster.id.clone());
                let mut instances = Vec::with_capacity(cluster.instances.len());
                for instance in cluster.instances {
                    index_host(&mut hosts, &instance.host, &key)?;
                    instances.push(ServiceInstance {
                        config_id: instance.config_id,
                        host: instance.host,
                        status: instance.status,
                        cluster: key.clone(),
                    });
                }

                clusters.insert(
                    cluster.id,
                    ServiceCluster {
                        key,
                        service_type: cluster.service_type,
                        instances,
                    },
                );
            }

            applications.insert(
                reference.clone(),
                ApplicationInstance {
                    reference,
                    clusters,
                },
            );
        }

        debug!(
            applications = applications.len(),
            hosts = hosts.len(),
            "topology snapshot finalized"
        );
        Ok(TopologySnapshot {
            applications,
            hosts,
        })
    }
}

impl From<TopologyDocument> for SnapshotBuilder {
    fn from(document: TopologyDocument) -> Self {
        Self {
            applications: document.applications,
        }
    }
}

/// Record that `host` runs an instance of `cluster`. A host belongs to
/// exactly one application.
fn index_host(
    hosts: &mut HashMap<HostName, HostEntry>,
    host: &HostName,
    cluster: &ClusterKey,
) -> ModelResult<()> {
    match hosts.get_mut(host) {
        Some(entry) if entry.application != cluster.application => {
            Err(ModelError::HostInMultipleApplications {
                host: host.to_string(),
                first: entry.application.to_string(),
                second: cluster.application.to_string(),
            })
        }
        Some(entry) => {
            entry.clusters.insert(cluster.cluster_id.clone());
            Ok(())
        }
        None => {
            hosts.insert(
                host.clone(),
                HostEntry {
                    application: cluster.application.clone(),
                    clusters: BTreeSet::from([cluster.cluster_id.clone()]),
                },
            );
            Ok(())
        }
    }
}
