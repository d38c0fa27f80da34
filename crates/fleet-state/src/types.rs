//! Persisted record types.

use serde::{Deserialize, Serialize};

use fleet_model::{ApplicationInstanceReference, ApplicationInstanceStatus, HostName, HostStatus};

/// Maintenance status of one host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostStatusRecord {
    pub host: HostName,
    pub status: HostStatus,
    /// Unix timestamp (seconds) of the last change.
    pub updated_at: u64,
}

/// Maintenance status of one application instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationStatusRecord {
    pub application: ApplicationInstanceReference,
    pub status: ApplicationInstanceStatus,
    /// Unix timestamp (seconds) of the last change.
    pub updated_at: u64,
}

impl HostStatusRecord {
    /// Build the key for the host status table.
    pub fn table_key(&self) -> String {
        self.host.to_string()
    }
}

impl ApplicationStatusRecord {
    /// Build the key for the application status table.
    pub fn table_key(&self) -> String {
        self.application.to_string()
    }
}
