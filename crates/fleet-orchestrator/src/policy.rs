//! Availability policy: may these hosts go down together?
//!
//! For each service cluster touched by a proposed removal, the evaluator
//! counts the instances that would still be healthy afterwards and compares
//! that against the cluster's minimum-availability requirement. A removal is
//! always judged as a whole: a group of hosts is checked against the
//! combined removal set, never host by host.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use tracing::debug;

use fleet_model::{
    ApplicationInstanceReference, ClusterKey, HostName, HostStatus, ModelResult, ServiceCluster,
    ServiceType, TopologySnapshot,
};

use crate::config::{MinAvailability, PolicyConfig};
use crate::error::HostList;

/// Why a proposed removal was rejected for one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDenial {
    pub cluster: ClusterKey,
    pub service_type: ServiceType,
    /// Requested hosts that run an instance of this cluster.
    pub hosts: Vec<HostName>,
    /// Healthy instances left if the removal went ahead.
    pub survivors: usize,
    /// Healthy instances the cluster must keep.
    pub required: usize,
}

impl fmt::Display for PolicyDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cluster {} ({}) would keep {} healthy instance(s) with {} down, {} required",
            self.cluster,
            self.service_type,
            self.survivors,
            HostList(&self.hosts),
            self.required
        )
    }
}

/// What the removal is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalKind {
    /// Temporary maintenance.
    Suspend,
    /// The host leaves for good. Every cluster must keep at least one
    /// healthy instance, and hosts already down are still checked.
    Permanent,
}

/// Per-cluster minimum-availability rules.
#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluator {
    default: MinAvailability,
    by_service_type: HashMap<ServiceType, MinAvailability>,
    protected: BTreeSet<ApplicationInstanceReference>,
}

impl PolicyEvaluator {
    pub fn new(default: MinAvailability) -> Self {
        Self {
            default,
            ..Default::default()
        }
    }

    pub fn from_config(config: &PolicyConfig) -> ModelResult<Self> {
        let by_service_type = config
            .service_types
            .iter()
            .map(|(name, policy)| (ServiceType::new(name.as_str()), policy.min_available))
            .collect();
        let protected = config
            .protected_applications
            .iter()
            .map(|s| ApplicationInstanceReference::parse(s))
            .collect::<ModelResult<_>>()?;
        Ok(Self {
            default: config.default_min_available,
            by_service_type,
            protected,
        })
    }

    pub fn with_service_type(
        mut self,
        service_type: impl Into<ServiceType>,
        min_available: MinAvailability,
    ) -> Self {
        self.by_service_type.insert(service_type.into(), min_available);
        self
    }

    pub fn with_protected(mut self, application: ApplicationInstanceReference) -> Self {
        self.protected.insert(application);
        self
    }

    /// Whether the application may never be suspended as a whole.
    pub fn is_protected(&self, application: &ApplicationInstanceReference) -> bool {
        self.protected.contains(application)
    }

    /// The requirement that applies to a cluster.
    pub fn min_available(&self, cluster: &ServiceCluster) -> MinAvailability {
        self.by_service_type
            .get(cluster.service_type())
            .copied()
            .unwrap_or(self.default)
    }

    /// Check one cluster against a removal set.
    ///
    /// `statuses` must hold the status of every host of the cluster; hosts
    /// missing from it are treated as `NoRemarks`.
    pub fn evaluate_cluster(
        &self,
        cluster: &ServiceCluster,
        removal: &BTreeSet<&HostName>,
        statuses: &HashMap<HostName, HostStatus>,
        kind: RemovalKind,
    ) -> Result<(), PolicyDenial> {
        let is_up = |host: &HostName| !statuses.get(host).copied().unwrap_or_default().is_down();

        let healthy_now = cluster
            .instances()
            .iter()
            .filter(|i| i.status().is_healthy() && is_up(i.host()))
            .count();
        let survivors = cluster
            .instances()
            .iter()
            .filter(|i| i.status().is_healthy() && is_up(i.host()) && !removal.contains(i.host()))
            .count();

        let mut required = self.min_available(cluster).required(cluster.len());
        if kind == RemovalKind::Permanent {
            required = required.max(1);
        } else if survivors >= healthy_now {
            // Nothing healthy goes away.
            return Ok(());
        }

        debug!(
            cluster = %cluster.key(),
            healthy_now,
            survivors,
            required,
            ?kind,
            "cluster availability evaluated"
        );

        if survivors >= required {
            return Ok(());
        }

        let hosts = cluster
            .hosts()
            .into_iter()
            .filter(|h| removal.contains(h))
            .cloned()
            .collect();
        Err(PolicyDenial {
            cluster: cluster.key().clone(),
            service_type: cluster.service_type().clone(),
            hosts,
            survivors,
            required,
        })
    }

    /// Check every cluster served by `evaluated` against the combined
    /// `removal` set. Returns all denials; empty means approved.
    pub fn evaluate(
        &self,
        snapshot: &TopologySnapshot,
        evaluated: &[&HostName],
        removal: &BTreeSet<&HostName>,
        statuses: &HashMap<HostName, HostStatus>,
        kind: RemovalKind,
    ) -> Vec<PolicyDenial> {
        affected_clusters(snapshot, evaluated)
            .into_values()
            .filter_map(|cluster| {
                self.evaluate_cluster(cluster, removal, statuses, kind)
                    .err()
            })
            .collect()
    }
}

/// Each cluster with an instance on any of `hosts`, once.
pub fn affected_clusters<'a>(
    snapshot: &'a TopologySnapshot,
    hosts: &[&HostName],
) -> BTreeMap<&'a ClusterKey, &'a ServiceCluster> {
    hosts
        .iter()
        .flat_map(|host| snapshot.clusters_on_host(host))
        .map(|cluster| (cluster.key(), cluster))
        .collect()
}

/// Every host whose status matters for evaluating `hosts`: all hosts of all
/// affected clusters.
pub fn hosts_to_inspect<'a>(
    snapshot: &'a TopologySnapshot,
    hosts: &[&HostName],
) -> Vec<&'a HostName> {
    affected_clusters(snapshot, hosts)
        .into_values()
        .flat_map(|cluster| cluster.hosts())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
