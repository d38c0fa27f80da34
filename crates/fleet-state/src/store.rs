//! Status store interface and its redb-backed implementation.
//!
//! [`StatusStore`] is the seam the orchestrator persists decisions through.
//! [`StatusDb`] implements it on redb: all values are JSON-serialized records
//! in `&[u8]` columns. The database supports both on-disk and in-memory
//! backends (the latter for testing).

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use fleet_model::{ApplicationInstanceReference, ApplicationInstanceStatus, HostName, HostStatus};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Persistence of operator-visible maintenance status.
///
/// Hosts and applications that were never written read as `NoRemarks`.
pub trait StatusStore: Send + Sync {
    /// Current status of a host.
    fn host_status(&self, host: &HostName) -> StateResult<HostStatus>;

    /// Statuses of several hosts, read consistently.
    fn host_statuses(&self, hosts: &[&HostName]) -> StateResult<HashMap<HostName, HostStatus>> {
        hosts
            .iter()
            .map(|host| Ok(((*host).clone(), self.host_status(host)?)))
            .collect()
    }

    /// Set the status of one host.
    fn set_host_status(&self, host: &HostName, status: HostStatus) -> StateResult<()> {
        self.set_host_statuses(&[(host.clone(), status)])
    }

    /// Set the status of several hosts atomically: either every update is
    /// visible afterwards or none is.
    fn set_host_statuses(&self, updates: &[(HostName, HostStatus)]) -> StateResult<()>;

    /// Current status of an application instance.
    fn application_status(
        &self,
        application: &ApplicationInstanceReference,
    ) -> StateResult<ApplicationInstanceStatus>;

    /// Set the status of an application instance.
    fn set_application_status(
        &self,
        application: &ApplicationInstanceReference,
        status: ApplicationInstanceStatus,
    ) -> StateResult<()>;

    /// Every application currently `AllowedToBeDown`.
    fn suspended_applications(&self) -> StateResult<BTreeSet<ApplicationInstanceReference>>;
}

/// Thread-safe status store backed by redb.
#[derive(Clone)]
pub struct StatusDb {
    db: Arc<Database>,
}

impl StatusDb {
    /// Open (or create) a persistent status database at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "status database opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory status database (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory status database opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(HOST_STATUS).map_err(map_err!(Table))?;
        txn.open_table(APPLICATION_STATUS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List every host status record.
    pub fn list_host_statuses(&self) -> StateResult<Vec<HostStatusRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOST_STATUS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: HostStatusRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Get the stored record for a host, if any.
    pub fn get_host_record(&self, host: &HostName) -> StateResult<Option<HostStatusRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOST_STATUS).map_err(map_err!(Table))?;
        match table.get(host.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: HostStatusRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Get the stored record for an application, if any.
    pub fn get_application_record(
        &self,
        application: &ApplicationInstanceReference,
    ) -> StateResult<Option<ApplicationStatusRecord>> {
        let key = application.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPLICATION_STATUS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: ApplicationStatusRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

impl StatusStore for StatusDb {
    fn host_status(&self, host: &HostName) -> StateResult<HostStatus> {
        Ok(self
            .get_host_record(host)?
            .map(|r| r.status)
            .unwrap_or_default())
    }

    fn host_statuses(&self, hosts: &[&HostName]) -> StateResult<HashMap<HostName, HostStatus>> {
        // One read transaction for a consistent view across all hosts.
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOST_STATUS).map_err(map_err!(Table))?;
        let mut results = HashMap::with_capacity(hosts.len());
        for host in hosts {
            let status = match table.get(host.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let record: HostStatusRecord =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    record.status
                }
                None => HostStatus::NoRemarks,
            };
            results.insert((*host).clone(), status);
        }
        Ok(results)
    }

    fn set_host_statuses(&self, updates: &[(HostName, HostStatus)]) -> StateResult<()> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HOST_STATUS).map_err(map_err!(Table))?;
            for (host, status) in updates {
                let record = HostStatusRecord {
                    host: host.clone(),
                    status: *status,
                    updated_at: now,
                };
                let key = record.table_key();
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(hosts = updates.len(), "host statuses stored");
        Ok(())
    }

    fn application_status(
        &self,
        application: &ApplicationInstanceReference,
    ) -> StateResult<ApplicationInstanceStatus> {
        Ok(self
            .get_application_record(application)?
            .map(|r| r.status)
            .unwrap_or_default())
    }

    fn set_application_status(
        &self,
        application: &ApplicationInstanceReference,
        status: ApplicationInstanceStatus,
    ) -> StateResult<()> {
        let record = ApplicationStatusRecord {
            application: application.clone(),
            status,
            updated_at: epoch_secs(),
        };
        let key = record.table_key();
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APPLICATION_STATUS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, %status, "application status stored");
        Ok(())
    }

    fn suspended_applications(&self) -> StateResult<BTreeSet<ApplicationInstanceReference>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPLICATION_STATUS).map_err(map_err!(Table))?;
        let mut results = BTreeSet::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: ApplicationStatusRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if record.status == ApplicationInstanceStatus::AllowedToBeDown {
                results.insert(record.application);
            }
        }
        Ok(results)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> HostName {
        HostName::from(name)
    }

    fn app(tenant: &str, instance: &str) -> ApplicationInstanceReference {
        ApplicationInstanceReference::new(tenant, instance)
    }

    // ── Host status ────────────────────────────────────────────────

    #[test]
    fn unknown_host_reads_no_remarks() {
        let store = StatusDb::open_in_memory().unwrap();
        assert_eq!(store.host_status(&host("h1")).unwrap(), HostStatus::NoRemarks);
        assert!(store.get_host_record(&host("h1")).unwrap().is_none());
    }

    #[test]
    fn host_status_put_and_get() {
        let store = StatusDb::open_in_memory().unwrap();
        store
            .set_host_status(&host("h1"), HostStatus::AllowedToBeDown)
            .unwrap();

        assert_eq!(
            store.host_status(&host("h1")).unwrap(),
            HostStatus::AllowedToBeDown
        );
        let record = store.get_host_record(&host("h1")).unwrap().unwrap();
        assert_eq!(record.host, host("h1"));
        assert!(record.updated_at > 0);
    }

    #[test]
    fn host_status_update_in_place() {
        let store = StatusDb::open_in_memory().unwrap();
        store
            .set_host_status(&host("h1"), HostStatus::AllowedToBeDown)
            .unwrap();
        store.set_host_status(&host("h1"), HostStatus::NoRemarks).unwrap();

        assert_eq!(store.host_status(&host("h1")).unwrap(), HostStatus::NoRemarks);
        assert_eq!(store.list_host_statuses().unwrap().len(), 1);
    }

    #[test]
    fn batch_write_sets_every_host() {
        let store = StatusDb::open_in_memory().unwrap();
        store
            .set_host_statuses(&[
                (host("h1"), HostStatus::AllowedToBeDown),
                (host("h2"), HostStatus::AllowedToBeDown),
                (host("h3"), HostStatus::PermanentlyDown),
            ])
            .unwrap();

        let h1 = host("h1");
        let h3 = host("h3");
        let h9 = host("h9");
        let statuses = store.host_statuses(&[&h1, &h3, &h9]).unwrap();
        assert_eq!(statuses[&h1], HostStatus::AllowedToBeDown);
        assert_eq!(statuses[&h3], HostStatus::PermanentlyDown);
        assert_eq!(statuses[&h9], HostStatus::NoRemarks);
        assert_eq!(store.list_host_statuses().unwrap().len(), 3);
    }

    // ── Application status ─────────────────────────────────────────

    #[test]
    fn application_status_put_and_get() {
        let store = StatusDb::open_in_memory().unwrap();
        let music = app("music", "prod");
        assert_eq!(
            store.application_status(&music).unwrap(),
            ApplicationInstanceStatus::NoRemarks
        );

        store
            .set_application_status(&music, ApplicationInstanceStatus::AllowedToBeDown)
            .unwrap();
        assert_eq!(
            store.application_status(&music).unwrap(),
            ApplicationInstanceStatus::AllowedToBeDown
        );
    }

    #[test]
    fn suspended_applications_excludes_resumed() {
        let store = StatusDb::open_in_memory().unwrap();
        let music = app("music", "prod");
        let books = app("books", "prod");

        store
            .set_application_status(&music, ApplicationInstanceStatus::AllowedToBeDown)
            .unwrap();
        store
            .set_application_status(&books, ApplicationInstanceStatus::AllowedToBeDown)
            .unwrap();
        store
            .set_application_status(&books, ApplicationInstanceStatus::NoRemarks)
            .unwrap();

        let suspended = store.suspended_applications().unwrap();
        assert_eq!(suspended, BTreeSet::from([music]));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fleet.redb");

        {
            let store = StatusDb::open(&db_path).unwrap();
            store
                .set_host_status(&host("h1"), HostStatus::AllowedToBeDown)
                .unwrap();
            store
                .set_application_status(&app("music", "prod"), ApplicationInstanceStatus::AllowedToBeDown)
                .unwrap();
        }

        // Reopen the same database file.
        let store = StatusDb::open(&db_path).unwrap();
        assert_eq!(
            store.host_status(&host("h1")).unwrap(),
            HostStatus::AllowedToBeDown
        );
        assert_eq!(store.suspended_applications().unwrap().len(), 1);
    }

    #[test]
    fn unusable_path_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let err = StatusDb::open(dir.path()).err().unwrap();
        assert!(matches!(err, StateError::Open(_)), "{err}");
        assert!(err.to_string().starts_with("failed to open database"));
    }

    #[test]
    fn empty_store_operations() {
        let store = StatusDb::open_in_memory().unwrap();
        assert!(store.list_host_statuses().unwrap().is_empty());
        assert!(store.suspended_applications().unwrap().is_empty());
        store.set_host_statuses(&[]).unwrap();
    }
}
