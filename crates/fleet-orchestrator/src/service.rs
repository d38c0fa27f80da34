//! The production orchestrator.
//!
//! Every state-changing operation follows the same path:
//!
//! 1. fetch the topology snapshot from the [`ModelCache`]
//! 2. acquire the cluster lock for every affected application
//! 3. read current host statuses and evaluate the availability policy
//! 4. persist the new status, then release the locks
//!
//! Locks are [`ScopedLock`] guards, so every early return releases them.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use fleet_lock::{DistributedLock, LockOptions, ScopedLock, acquire_all};
use fleet_model::{
    ApplicationInstanceReference, ApplicationInstanceStatus, HostName, HostStatus, NodeGroup,
    TopologySnapshot,
};
use fleet_state::{StateError, StatusStore};

use crate::cache::ModelCache;
use crate::config::FleetConfig;
use crate::error::{
    ApplicationError, ApplicationResult, BatchError, BatchResult, HostError, HostResult,
    InternalError, InternalKind, SetupError,
};
use crate::orchestrator::{HostInfo, HostInstance, Orchestrator};
use crate::policy::{PolicyEvaluator, RemovalKind, hosts_to_inspect};
use crate::source::TopologySource;

/// Lock scope key for an application instance.
pub fn application_scope(application: &ApplicationInstanceReference) -> String {
    format!("application:{application}")
}

pub struct PolicyOrchestrator {
    cache: ModelCache,
    store: Arc<dyn StatusStore>,
    locks: Arc<dyn DistributedLock>,
    lock_options: LockOptions,
    policy: PolicyEvaluator,
    /// Applications whose suspension has been persisted.
    suspended: Mutex<BTreeSet<ApplicationInstanceReference>>,
}

impl PolicyOrchestrator {
    /// Build an orchestrator. The suspended-application set is seeded from
    /// the status store.
    pub fn new(
        source: Arc<dyn TopologySource>,
        store: Arc<dyn StatusStore>,
        locks: Arc<dyn DistributedLock>,
        config: &FleetConfig,
    ) -> Result<Self, SetupError> {
        let policy = PolicyEvaluator::from_config(&config.policy)?;
        let suspended = store.suspended_applications()?;

        info!(
            ttl_ms = config.cache.ttl_ms,
            suspended_applications = suspended.len(),
            "orchestrator initialized"
        );

        Ok(Self {
            cache: ModelCache::new(source, config.cache.ttl())
                .with_retry_backoff(config.cache.retry_backoff()),
            store,
            locks,
            lock_options: config.lock.options(),
            policy,
            suspended: Mutex::new(suspended),
        })
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn policy(&self) -> &PolicyEvaluator {
        &self.policy
    }

    // ── Helpers ───────────────────────────────────────────────────

    async fn snapshot(
        &self,
        operation: &'static str,
        scope: &str,
    ) -> Result<Arc<TopologySnapshot>, InternalError> {
        self.cache.get().await.map_err(|e| {
            error!(operation, %scope, error = %e, "topology unavailable");
            InternalError::new(operation, scope, InternalKind::TopologyUnavailable)
        })
    }

    async fn lock(
        &self,
        operation: &'static str,
        scopes: &BTreeSet<String>,
    ) -> Result<Vec<ScopedLock>, InternalError> {
        acquire_all(&self.locks, scopes, &self.lock_options)
            .await
            .map_err(|e| {
                warn!(operation, error = %e, "cluster lock not acquired");
                InternalError::from_lock(operation, &e)
            })
    }

    fn store_error(operation: &'static str, scope: &str, err: StateError) -> InternalError {
        error!(operation, %scope, error = %err, "status store failure");
        InternalError::new(operation, scope, InternalKind::StatusStore)
    }

    fn suspended(&self) -> MutexGuard<'_, BTreeSet<ApplicationInstanceReference>> {
        self.suspended.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_application_suspended(&self, application: &ApplicationInstanceReference) -> bool {
        self.suspended().contains(application)
    }

    /// Resolve a host to its owning application, or `NotFound`.
    fn owner<'a>(
        snapshot: &'a TopologySnapshot,
        host: &HostName,
    ) -> HostResult<&'a ApplicationInstanceReference> {
        snapshot
            .application_of(host)
            .map(|application| application.reference())
            .ok_or_else(|| HostError::NotFound(host.clone()))
    }

    fn statuses(
        &self,
        operation: &'static str,
        scope: &str,
        snapshot: &TopologySnapshot,
        hosts: &[&HostName],
    ) -> Result<HashMap<HostName, HostStatus>, InternalError> {
        self.store
            .host_statuses(&hosts_to_inspect(snapshot, hosts))
            .map_err(|e| Self::store_error(operation, scope, e))
    }

    /// Resolve the application, lock it, and check it still exists.
    async fn locked_application(
        &self,
        operation: &'static str,
        application: &ApplicationInstanceReference,
    ) -> ApplicationResult<Vec<ScopedLock>> {
        let scope = application_scope(application);
        let snapshot = self.snapshot(operation, &scope).await?;
        if !snapshot.contains_application(application) {
            return Err(ApplicationError::NotFound(application.clone()));
        }
        Ok(self.lock(operation, &BTreeSet::from([scope])).await?)
    }
}

#[async_trait]
impl Orchestrator for PolicyOrchestrator {
    async fn get_host(&self, host: &HostName) -> HostResult<HostInfo> {
        const OP: &str = "get_host";

        let snapshot = self.snapshot(OP, host.as_str()).await?;
        let application = Self::owner(&snapshot, host)?.clone();
        let status = self
            .store
            .host_status(host)
            .map_err(|e| Self::store_error(OP, host.as_str(), e))?;

        let instances = snapshot
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
            status,
            application,
            instances,
        })
    }

    async fn get_host_status(&self, host: &HostName) -> HostResult<HostStatus> {
        const OP: &str = "get_host_status";

        let snapshot = self.snapshot(OP, host.as_str()).await?;
        Self::owner(&snapshot, host)?;
        let status = self
            .store
            .host_status(host)
            .map_err(|e| Self::store_error(OP, host.as_str(), e))?;
        Ok(status)
    }

    async fn suspend(&self, host: &HostName) -> HostResult<()> {
        const OP: &str = "suspend";

        let snapshot = self.snapshot(OP, host.as_str()).await?;
        let application = Self::owner(&snapshot, host)?;
        let scope = application_scope(application);
        let _locks = self.lock(OP, &BTreeSet::from([scope.clone()])).await?;

        let current = self
            .store
            .host_status(host)
            .map_err(|e| Self::store_error(OP, &scope, e))?;
        if current.is_down() {
            debug!(%host, %current, "host already down, nothing to do");
            return Ok(());
        }

        if self.is_application_suspended(application) {
            debug!(%host, %application, "application suspended, skipping policy check");
        } else {
            let statuses = self.statuses(OP, &scope, &snapshot, &[host])?;
            let denials = self.policy.evaluate(
                &snapshot,
                &[host],
                &BTreeSet::from([host]),
                &statuses,
                RemovalKind::Suspend,
            );
            if !denials.is_empty() {
                warn!(%host, denied_clusters = denials.len(), "suspend denied");
                return Err(HostError::PolicyDenied {
                    host: host.clone(),
                    denials,
                });
            }
        }

        self.store
            .set_host_status(host, HostStatus::AllowedToBeDown)
            .map_err(|e| Self::store_error(OP, &scope, e))?;
        info!(%host, %application, "host suspended");
        Ok(())
    }

    async fn resume(&self, host: &HostName) -> HostResult<()> {
        const OP: &str = "resume";

        let snapshot = self.snapshot(OP, host.as_str()).await?;
        let application = Self::owner(&snapshot, host)?;
        let scope = application_scope(application);
        let _locks = self.lock(OP, &BTreeSet::from([scope.clone()])).await?;

        let current = self
            .store
            .host_status(host)
            .map_err(|e| Self::store_error(OP, &scope, e))?;
        if current == HostStatus::NoRemarks {
            debug!(%host, "host not suspended, nothing to do");
            return Ok(());
        }

        self.store
            .set_host_status(host, HostStatus::NoRemarks)
            .map_err(|e| Self::store_error(OP, &scope, e))?;
        info!(%host, previous = %current, "host resumed");
        Ok(())
    }

    async fn acquire_permission_to_remove(&self, host: &HostName) -> HostResult<()> {
        const OP: &str = "acquire_permission_to_remove";

        let snapshot = self.snapshot(OP, host.as_str()).await?;
        let application = Self::owner(&snapshot, host)?;
        let scope = application_scope(application);
        let _locks = self.lock(OP, &BTreeSet::from([scope.clone()])).await?;

        let statuses = self.statuses(OP, &scope, &snapshot, &[host])?;
        let denials = self.policy.evaluate(
            &snapshot,
            &[host],
            &BTreeSet::from([host]),
            &statuses,
            RemovalKind::Permanent,
        );
        if !denials.is_empty() {
            warn!(%host, denied_clusters = denials.len(), "permanent removal denied");
            return Err(HostError::PolicyDenied {
                host: host.clone(),
                denials,
            });
        }

        self.store
            .set_host_status(host, HostStatus::PermanentlyDown)
            .map_err(|e| Self::store_error(OP, &scope, e))?;
        info!(%host, %application, "host approved for permanent removal");
        Ok(())
    }

    async fn suspend_group(&self, group: &NodeGroup) -> BatchResult<()> {
        const OP: &str = "suspend_group";

        let parent = group.parent();
        if group.is_empty() {
            debug!(%parent, "empty group, nothing to do");
            return Ok(());
        }

        let snapshot = self.snapshot(OP, parent.as_str()).await?;
        let missing: Vec<HostName> = group
            .hosts()
            .iter()
            .filter(|host| !snapshot.contains_host(host))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(%parent, missing = missing.len(), "group references unknown hosts");
            return Err(BatchError::HostsNotFound {
                parent: parent.clone(),
                hosts: missing,
            });
        }

        let scopes: BTreeSet<String> = group
            .hosts()
            .iter()
            .filter_map(|host| snapshot.application_of(host))
            .map(|application| application_scope(application.reference()))
            .collect();
        let _locks = self.lock(OP, &scopes).await?;

        let members: Vec<&HostName> = group.hosts().iter().collect();
        let statuses = self.statuses(OP, parent.as_str(), &snapshot, &members)?;
        let is_down = |host: &HostName| statuses.get(host).copied().unwrap_or_default().is_down();

        // Hosts already down or covered by an application override are not
        // evaluated, but still count as removed for the clusters that are.
        let suspended = self.suspended().clone();
        let pending: Vec<&HostName> = members.iter().copied().filter(|&h| !is_down(h)).collect();
        let evaluated: Vec<&HostName> = pending
            .iter()
            .copied()
            .filter(|host| {
                snapshot
                    .application_of(host)
                    .is_some_and(|application| !suspended.contains(application.reference()))
            })
            .collect();
        let removal: BTreeSet<&HostName> = members.iter().copied().collect();

        let denials = self.policy.evaluate(
            &snapshot,
            &evaluated,
            &removal,
            &statuses,
            RemovalKind::Suspend,
        );
        if !denials.is_empty() {
            warn!(%parent, hosts = members.len(), denied_clusters = denials.len(), "group suspend denied");
            return Err(BatchError::PolicyDenied {
                parent: parent.clone(),
                denials,
            });
        }

        let updates: Vec<(HostName, HostStatus)> = pending
            .into_iter()
            .map(|host| (host.clone(), HostStatus::AllowedToBeDown))
            .collect();
        if !updates.is_empty() {
            self.store
                .set_host_statuses(&updates)
                .map_err(|e| Self::store_error(OP, parent.as_str(), e))?;
        }
        info!(%parent, hosts = members.len(), changed = updates.len(), "group suspended");
        Ok(())
    }

    async fn suspend_application(
        &self,
        application: &ApplicationInstanceReference,
    ) -> ApplicationResult<()> {
        const OP: &str = "suspend_application";

        let _locks = self.locked_application(OP, application).await?;
        if self.policy.is_protected(application) {
            warn!(%application, "suspend of protected application denied");
            return Err(ApplicationError::PolicyDenied {
                application: application.clone(),
                reason: "application is protected from suspension".to_string(),
            });
        }
        if self.is_application_suspended(application) {
            debug!(%application, "application already suspended");
            return Ok(());
        }

        self.store
            .set_application_status(application, ApplicationInstanceStatus::AllowedToBeDown)
            .map_err(|e| Self::store_error(OP, &application_scope(application), e))?;
        self.suspended().insert(application.clone());
        info!(%application, "application suspended");
        Ok(())
    }

    async fn resume_application(
        &self,
        application: &ApplicationInstanceReference,
    ) -> ApplicationResult<()> {
        const OP: &str = "resume_application";

        let _locks = self.locked_application(OP, application).await?;
        if !self.is_application_suspended(application) {
            debug!(%application, "application not suspended");
            return Ok(());
        }

        self.store
            .set_application_status(application, ApplicationInstanceStatus::NoRemarks)
            .map_err(|e| Self::store_error(OP, &application_scope(application), e))?;
        self.suspended().remove(application);
        info!(%application, "application resumed");
        Ok(())
    }

    async fn application_status(
        &self,
        application: &ApplicationInstanceReference,
    ) -> ApplicationResult<ApplicationInstanceStatus> {
        const OP: &str = "application_status";

        let snapshot = self.snapshot(OP, &application_scope(application)).await?;
        if !snapshot.contains_application(application) {
            return Err(ApplicationError::NotFound(application.clone()));
        }
        Ok(if self.is_application_suspended(application) {
            ApplicationInstanceStatus::AllowedToBeDown
        } else {
            ApplicationInstanceStatus::NoRemarks
        })
    }

    async fn suspended_applications(&self) -> BTreeSet<ApplicationInstanceReference> {
        self.suspended().clone()
    }
}
