//! End-to-end orchestration scenarios over the real cache, lock service,
//! policy evaluator, and an in-memory redb status store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fleet_lock::{DistributedLock, LocalLockService};
use fleet_model::{
    ApplicationDraft, ApplicationInstanceReference, ApplicationInstanceStatus, ClusterDraft,
    HostName, HostStatus, InstanceDraft, NodeGroup, ServiceStatus, SnapshotBuilder,
    TopologySnapshot,
};
use fleet_orchestrator::{
    ApplicationError, BatchError, FleetConfig, HostError, InMemoryOrchestrator, InternalKind,
    ModelCache, Orchestrator, PolicyOrchestrator, StaticTopologySource, TopologySource,
    application_scope,
};
use fleet_state::{StateError, StateResult, StatusDb, StatusStore};

// ── Fixtures ──────────────────────────────────────────────────────

fn music() -> ApplicationInstanceReference {
    ApplicationInstanceReference::new("music", "prod")
}

fn video() -> ApplicationInstanceReference {
    ApplicationInstanceReference::new("video", "prod")
}

fn host(name: &str) -> HostName {
    HostName::from(name)
}

fn cluster(id: &str, service_type: &str, hosts: &[(&str, ServiceStatus)]) -> ClusterDraft {
    hosts
        .iter()
        .enumerate()
        .fold(ClusterDraft::new(id, service_type), |draft, (i, (host, status))| {
            draft.with_instance(InstanceDraft::new(format!("{id}/{i}"), *host, *status))
        })
}

/// music:prod runs "search" on h1..h3; video:prod runs its own "search" on
/// h4..h6; solo:prod runs a two-node "zk" with one instance already down.
fn topology() -> TopologySnapshot {
    use ServiceStatus::*;
    SnapshotBuilder::new()
        .with_application(
            ApplicationDraft::new(music())
                .with_cluster(cluster("search", "searchnode", &[("h1", Up), ("h2", Up), ("h3", Up)])),
        )
        .with_application(
            ApplicationDraft::new(video())
                .with_cluster(cluster("search", "searchnode", &[("h4", Up), ("h5", Up), ("h6", Up)])),
        )
        .with_application(
            ApplicationDraft::new(ApplicationInstanceReference::new("solo", "prod"))
                .with_cluster(cluster("zk", "zookeeper", &[("h7", Up), ("h8", Down)])),
        )
        .finalize()
        .unwrap()
}

fn config() -> FleetConfig {
    let mut config = FleetConfig::from_toml(
        r#"
[lock]
timeout_ms = 50
retries = 0

[policy]
default_min_available = { count = 2 }

[policy.service_types.zookeeper]
min_available = { count = 0 }
"#,
    )
    .unwrap();
    config.cache.ttl_ms = 10_000;
    config
}

struct Fleet {
    orchestrator: PolicyOrchestrator,
    store: Arc<StatusDb>,
    locks: Arc<LocalLockService>,
    source: Arc<StaticTopologySource>,
}

impl Fleet {
    fn new() -> Self {
        Self::with_config(config())
    }

    fn with_config(config: FleetConfig) -> Self {
        let store = Arc::new(StatusDb::open_in_memory().unwrap());
        Self::with_store(config, store.clone(), store)
    }

    fn with_store(config: FleetConfig, db: Arc<StatusDb>, store: Arc<dyn StatusStore>) -> Self {
        let locks = Arc::new(LocalLockService::new());
        let source = Arc::new(StaticTopologySource::new(topology()));
        let orchestrator =
            PolicyOrchestrator::new(source.clone(), store, locks.clone(), &config).unwrap();
        Self {
            orchestrator,
            store: db,
            locks,
            source,
        }
    }

    fn status(&self, name: &str) -> HostStatus {
        self.store.host_status(&host(name)).unwrap()
    }
}

/// Reads from a real store; every write fails.
struct ReadOnlyStore(Arc<StatusDb>);

impl StatusStore for ReadOnlyStore {
    fn host_status(&self, host: &HostName) -> StateResult<HostStatus> {
        self.0.host_status(host)
    }

    fn set_host_statuses(&self, _updates: &[(HostName, HostStatus)]) -> StateResult<()> {
        Err(StateError::Write("disk full".to_string()))
    }

    fn application_status(
        &self,
        application: &ApplicationInstanceReference,
    ) -> StateResult<ApplicationInstanceStatus> {
        self.0.application_status(application)
    }

    fn set_application_status(
        &self,
        _application: &ApplicationInstanceReference,
        _status: ApplicationInstanceStatus,
    ) -> StateResult<()> {
        Err(StateError::Write("disk full".to_string()))
    }

    fn suspended_applications(&self) -> StateResult<BTreeSet<ApplicationInstanceReference>> {
        self.0.suspended_applications()
    }
}

struct BrokenSource;

#[async_trait]
impl TopologySource for BrokenSource {
    async fn build(&self) -> anyhow::Result<TopologySnapshot> {
        anyhow::bail!("config server unreachable")
    }
}

// ── Single host ───────────────────────────────────────────────────

#[tokio::test]
async fn second_suspend_in_cluster_is_denied() {
    let fleet = Fleet::new();

    fleet.orchestrator.suspend(&host("h1")).await.unwrap();
    assert_eq!(fleet.status("h1"), HostStatus::AllowedToBeDown);

    let err = fleet.orchestrator.suspend(&host("h2")).await.unwrap_err();
    let HostError::PolicyDenied { host: denied, denials } = &err else {
        panic!("expected policy denial, got {err:?}");
    };
    assert_eq!(denied, &host("h2"));
    assert_eq!(denials.len(), 1);
    assert_eq!(denials[0].cluster.application, music());
    assert_eq!(denials[0].hosts, vec![host("h2")]);
    assert_eq!(denials[0].survivors, 1);
    assert_eq!(denials[0].required, 2);
    assert!(!err.is_retryable());
    assert_eq!(fleet.status("h2"), HostStatus::NoRemarks);
}

#[tokio::test]
async fn resume_of_unknown_host_is_not_found() {
    let fleet = Fleet::new();

    let err = fleet.orchestrator.resume(&host("ghost")).await.unwrap_err();
    assert_eq!(err, HostError::NotFound(host("ghost")));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn resuming_a_peer_makes_a_denied_suspend_succeed() {
    let fleet = Fleet::new();

    fleet.orchestrator.suspend(&host("h1")).await.unwrap();
    assert!(fleet.orchestrator.suspend(&host("h2")).await.is_err());

    fleet.orchestrator.resume(&host("h1")).await.unwrap();
    fleet.orchestrator.suspend(&host("h2")).await.unwrap();
    assert_eq!(fleet.status("h1"), HostStatus::NoRemarks);
    assert_eq!(fleet.status("h2"), HostStatus::AllowedToBeDown);
}

#[tokio::test]
async fn same_cluster_id_in_different_applications_is_independent() {
    let fleet = Fleet::new();

    fleet.orchestrator.suspend(&host("h1")).await.unwrap();
    fleet.orchestrator.suspend(&host("h4")).await.unwrap();
    assert_eq!(fleet.status("h4"), HostStatus::AllowedToBeDown);
}

#[tokio::test]
async fn permanent_removal_keeps_a_survivor() {
    let fleet = Fleet::new();

    // zk requires nothing, so a temporary suspend of its only live node is fine.
    fleet.orchestrator.suspend(&host("h7")).await.unwrap();

    let err = fleet
        .orchestrator
        .acquire_permission_to_remove(&host("h7"))
        .await
        .unwrap_err();
    let HostError::PolicyDenied { denials, .. } = err else {
        panic!("expected policy denial");
    };
    assert_eq!(denials[0].cluster.cluster_id.as_str(), "zk");
    assert_eq!(denials[0].survivors, 0);
    assert_eq!(denials[0].required, 1);
    assert_eq!(fleet.status("h7"), HostStatus::AllowedToBeDown);

    // The dead peer can go: h7 survives.
    fleet.orchestrator.resume(&host("h7")).await.unwrap();
    fleet
        .orchestrator
        .acquire_permission_to_remove(&host("h8"))
        .await
        .unwrap();
    assert_eq!(fleet.status("h8"), HostStatus::PermanentlyDown);
}

// ── Groups ────────────────────────────────────────────────────────

#[tokio::test]
async fn group_is_denied_as_one_decision() {
    let fleet = Fleet::new();
    let group = NodeGroup::new(host("parent"), [host("h1"), host("h2")]);

    let err = fleet.orchestrator.suspend_group(&group).await.unwrap_err();
    let BatchError::PolicyDenied { parent, denials } = &err else {
        panic!("expected batch denial, got {err:?}");
    };
    assert_eq!(parent, &host("parent"));
    assert_eq!(denials.len(), 1);
    assert_eq!(denials[0].hosts, vec![host("h1"), host("h2")]);
    assert_eq!(denials[0].survivors, 1);

    // Nothing changed, not even h1 which alone would have been allowed.
    assert_eq!(fleet.status("h1"), HostStatus::NoRemarks);
    assert_eq!(fleet.status("h2"), HostStatus::NoRemarks);
}

#[tokio::test]
async fn group_across_applications_is_suspended_atomically() {
    let fleet = Fleet::new();
    let group = NodeGroup::new(host("parent"), [host("h1"), host("h4"), host("h1")]);

    fleet.orchestrator.suspend_all(&group).await.unwrap();
    assert_eq!(fleet.status("h1"), HostStatus::AllowedToBeDown);
    assert_eq!(fleet.status("h4"), HostStatus::AllowedToBeDown);
    assert_eq!(fleet.locks.held_count(), 0);
}

#[tokio::test]
async fn group_reports_every_missing_host() {
    let fleet = Fleet::new();
    let group = NodeGroup::new(host("parent"), [host("ghost1"), host("h1"), host("ghost2")]);

    let err = fleet.orchestrator.suspend_group(&group).await.unwrap_err();
    assert_eq!(
        err,
        BatchError::HostsNotFound {
            parent: host("parent"),
            hosts: vec![host("ghost1"), host("ghost2")],
        }
    );
    assert_eq!(fleet.status("h1"), HostStatus::NoRemarks);
}

#[tokio::test]
async fn group_with_an_already_down_member_counts_it_as_removed() {
    let fleet = Fleet::new();
    fleet.orchestrator.suspend(&host("h1")).await.unwrap();

    // h1 is already down; adding h2 would leave one survivor.
    let group = NodeGroup::new(host("parent"), [host("h1"), host("h2")]);
    assert!(matches!(
        fleet.orchestrator.suspend_group(&group).await,
        Err(BatchError::PolicyDenied { .. })
    ));
}

#[tokio::test]
async fn group_write_failure_is_internal_and_retryable() {
    let db = Arc::new(StatusDb::open_in_memory().unwrap());
    let fleet = Fleet::with_store(config(), db.clone(), Arc::new(ReadOnlyStore(db)));
    let group = NodeGroup::new(host("parent"), [host("h1"), host("h4")]);

    let err = fleet.orchestrator.suspend_group(&group).await.unwrap_err();
    let BatchError::Internal(internal) = &err else {
        panic!("expected internal error, got {err:?}");
    };
    assert_eq!(internal.kind, InternalKind::StatusStore);
    assert_eq!(internal.operation, "suspend_group");
    assert!(err.is_retryable());
    assert!(!err.to_string().contains("disk full"));
    assert_eq!(fleet.locks.held_count(), 0);
}

// ── Locks ─────────────────────────────────────────────────────────

#[tokio::test]
async fn locks_are_released_after_denial() {
    let fleet = Fleet::new();
    fleet.orchestrator.suspend(&host("h1")).await.unwrap();
    assert!(fleet.orchestrator.suspend(&host("h2")).await.is_err());

    assert_eq!(fleet.locks.held_count(), 0);
    assert!(!fleet.locks.is_locked(&application_scope(&music())));
}

#[tokio::test(start_paused = true)]
async fn lock_timeout_is_a_retryable_internal_error() {
    let fleet = Fleet::new();
    let scope = application_scope(&music());
    let held = fleet
        .locks
        .acquire(&scope, Duration::from_secs(1))
        .await
        .unwrap();

    let err = fleet.orchestrator.suspend(&host("h1")).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        HostError::Internal(ref internal) if internal.kind == InternalKind::LockTimeout && internal.scope == scope
    ));
    assert_eq!(fleet.status("h1"), HostStatus::NoRemarks);

    // Other applications are not blocked.
    fleet.orchestrator.suspend(&host("h4")).await.unwrap();

    fleet.locks.release(held);
    fleet.orchestrator.suspend(&host("h1")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_suspends_in_one_cluster_are_serialized() {
    let fleet = Arc::new(Fleet::with_config({
        let mut config = config();
        config.lock.timeout_ms = 5_000;
        config
    }));

    let tasks: Vec<_> = ["h1", "h2", "h3"]
        .into_iter()
        .map(|name| {
            let fleet = fleet.clone();
            tokio::spawn(async move { fleet.orchestrator.suspend(&host(name)).await })
        })
        .collect();

    let mut approved = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => approved += 1,
            Err(e) => assert!(matches!(e, HostError::PolicyDenied { .. }), "{e}"),
        }
    }
    assert_eq!(approved, 1);
}

// ── Applications ──────────────────────────────────────────────────

#[tokio::test]
async fn application_override_skips_host_policy() {
    let fleet = Fleet::new();
    fleet.orchestrator.suspend(&host("h1")).await.unwrap();

    fleet.orchestrator.suspend_application(&music()).await.unwrap();
    assert_eq!(
        fleet.orchestrator.application_status(&music()).await.unwrap(),
        ApplicationInstanceStatus::AllowedToBeDown
    );

    fleet.orchestrator.suspend(&host("h2")).await.unwrap();
    assert_eq!(fleet.status("h2"), HostStatus::AllowedToBeDown);

    // Permanent removal never takes the override into account.
    assert!(matches!(
        fleet.orchestrator.acquire_permission_to_remove(&host("h3")).await,
        Err(HostError::PolicyDenied { .. })
    ));
}

#[tokio::test]
async fn protected_application_cannot_be_suspended() {
    let mut config = config();
    config.policy.protected_applications = vec!["music:prod".to_string()];
    let fleet = Fleet::with_config(config);

    let err = fleet
        .orchestrator
        .suspend_application(&music())
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::PolicyDenied { ref application, .. } if *application == music()));
    assert!(fleet.orchestrator.suspended_applications().await.is_empty());

    fleet.orchestrator.suspend_application(&video()).await.unwrap();
    assert_eq!(
        fleet.orchestrator.suspended_applications().await,
        BTreeSet::from([video()])
    );
}

#[tokio::test]
async fn failed_application_write_leaves_set_unchanged() {
    let db = Arc::new(StatusDb::open_in_memory().unwrap());
    let fleet = Fleet::with_store(config(), db.clone(), Arc::new(ReadOnlyStore(db)));

    let err = fleet
        .orchestrator
        .suspend_application(&music())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(fleet.orchestrator.suspended_applications().await.is_empty());
}

// ── Topology ──────────────────────────────────────────────────────

#[tokio::test]
async fn topology_failure_is_internal() {
    let orchestrator = PolicyOrchestrator::new(
        Arc::new(BrokenSource),
        Arc::new(StatusDb::open_in_memory().unwrap()),
        Arc::new(LocalLockService::new()),
        &config(),
    )
    .unwrap();

    let err = orchestrator.suspend(&host("h1")).await.unwrap_err();
    assert!(matches!(
        err,
        HostError::Internal(ref internal) if internal.kind == InternalKind::TopologyUnavailable
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn invalidated_cache_picks_up_new_hosts() {
    let fleet = Fleet::new();
    assert!(matches!(
        fleet.orchestrator.suspend(&host("h9")).await,
        Err(HostError::NotFound(_))
    ));

    let extended = SnapshotBuilder::new()
        .with_application(
            ApplicationDraft::new(music())
                .with_cluster(cluster("search", "searchnode", &[("h1", ServiceStatus::Up), ("h9", ServiceStatus::Up)])),
        )
        .finalize()
        .unwrap();
    fleet.source.replace(extended);
    fleet.orchestrator.cache().invalidate();

    // Two of two must stay up.
    assert!(matches!(
        fleet.orchestrator.suspend(&host("h9")).await,
        Err(HostError::PolicyDenied { .. })
    ));
    assert!(fleet.orchestrator.get_host(&host("h9")).await.is_ok());
}

/// Every instance resolves to a cluster in the same snapshot that lists it,
/// and every cluster to the application that owns it.
fn assert_back_references(snapshot: &TopologySnapshot) {
    for application in snapshot.applications() {
        for cluster in application.clusters() {
            let owner = snapshot.application(cluster.application()).unwrap();
            assert_eq!(owner.reference(), application.reference());

            for instance in cluster.instances() {
                let resolved = snapshot.cluster(instance.cluster()).unwrap();
                assert!(resolved.instances().contains(instance));
                assert_eq!(resolved.application(), application.reference());
                assert!(
                    snapshot
                        .clusters_on_host(instance.host())
                        .iter()
                        .any(|c| c.key() == cluster.key())
                );
            }
        }
    }
}

#[tokio::test]
async fn back_references_hold_across_cache_refreshes() {
    let source = Arc::new(StaticTopologySource::new(topology()));
    let cache = ModelCache::new(source.clone(), Duration::from_secs(10));
    let before = cache.get().await.unwrap();
    assert_back_references(&before);

    // music:prod moves its search cluster onto new hosts.
    use ServiceStatus::*;
    let moved = SnapshotBuilder::new()
        .with_application(
            ApplicationDraft::new(music())
                .with_cluster(cluster("search", "searchnode", &[("h10", Up), ("h11", Up)]))
                .with_cluster(cluster("feed", "container", &[("h10", Up), ("h12", Down)])),
        )
        .with_application(
            ApplicationDraft::new(video())
                .with_cluster(cluster("search", "searchnode", &[("h4", Up), ("h5", Up), ("h6", Up)])),
        )
        .finalize()
        .unwrap();
    source.replace(moved);
    cache.invalidate();

    let after = cache.get().await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_back_references(&after);
    assert_back_references(&before);

    // The old snapshot still answers for the old layout, the new one does not.
    assert!(before.contains_host(&host("h1")));
    assert!(!after.contains_host(&host("h1")));
    assert_eq!(after.clusters_on_host(&host("h10")).len(), 2);
    assert!(after.application_of(&host("h12")).is_some_and(|a| a.reference() == &music()));
}

// ── Interface ─────────────────────────────────────────────────────

/// Drain every host under a parent, the way a host-admin caller would.
async fn drain(orchestrator: &dyn Orchestrator, parent: &str, hosts: &[&str]) -> bool {
    let group = NodeGroup::new(host(parent), hosts.iter().map(|h| host(h)));
    orchestrator.suspend_all(&group).await.is_ok()
}

#[tokio::test]
async fn both_implementations_serve_the_same_interface() {
    let fleet = Fleet::new();
    let memory = InMemoryOrchestrator::new(topology());
    memory.deny("h2");

    assert!(!drain(&fleet.orchestrator, "parent", &["h1", "h2"]).await);
    assert!(!drain(&memory, "parent", &["h1", "h2"]).await);
    assert!(drain(&fleet.orchestrator, "parent", &["h1", "h4"]).await);
    assert!(drain(&memory, "parent", &["h1", "h4"]).await);
}
